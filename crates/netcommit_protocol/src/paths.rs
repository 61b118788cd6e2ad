use std::path::PathBuf;

/// Resolve the netcommit home directory.
///
/// Priority:
/// 1) NETCOMMIT_HOME
/// 2) <home dir>/.netcommit
/// 3) ./.netcommit
pub fn netcommit_home() -> PathBuf {
    if let Ok(override_path) = std::env::var("NETCOMMIT_HOME") {
        return PathBuf::from(override_path);
    }
    dirs::home_dir()
        .map(|home| home.join(".netcommit"))
        .unwrap_or_else(|| PathBuf::from(".").join(".netcommit"))
}

/// Default config file: ~/.netcommit/config.toml
pub fn default_config_path() -> PathBuf {
    netcommit_home().join("config.toml")
}
