//! Shared state for a CLI invocation: resolved configuration and the
//! operator name.

use crate::cli::error::HelpfulError;
use anyhow::Result;
use netcommit_pipeline::Pipeline;
use netcommit_protocol::config::StatePaths;
use netcommit_protocol::paths::default_config_path;
use netcommit_protocol::NetcommitConfig;
use std::path::PathBuf;

pub struct CliContext {
    pub config_path: PathBuf,
    /// Whether `config_path` existed; defaults are used otherwise.
    pub config_found: bool,
    pub config: NetcommitConfig,
    pub actor: String,
}

impl CliContext {
    pub fn load(config_path: Option<PathBuf>, actor: String) -> Result<Self> {
        let explicit = config_path.is_some();
        let config_path = config_path.unwrap_or_else(default_config_path);
        let config_found = config_path.exists();
        if explicit && !config_found {
            return Err(HelpfulError::new(format!(
                "Config file not found: {}",
                config_path.display()
            ))
            .with_suggestion("TRY: Omit --config to use <home>/config.toml or built-in defaults")
            .into());
        }

        let config = NetcommitConfig::load_or_default(&config_path)
            .map_err(|e| HelpfulError::config_invalid(&config_path, &e.to_string()))?;

        Ok(Self {
            config_path,
            config_found,
            config,
            actor,
        })
    }

    pub fn paths(&self) -> StatePaths {
        self.config.state_paths()
    }

    /// Open the file-backed pipeline (intent directory, lab devices, JSONL audit).
    pub fn pipeline(&self) -> Result<Pipeline> {
        Pipeline::open(self.config.clone()).map_err(|e| {
            HelpfulError::new("Failed to open the deployment pipeline")
                .with_context(format!("{:#}", anyhow::Error::new(e)))
                .with_suggestions([
                    format!(
                        "TRY: Check that {} is writable",
                        self.paths().home.display()
                    ),
                    "TRY: netcommit config".to_string(),
                ])
                .into()
        })
    }
}
