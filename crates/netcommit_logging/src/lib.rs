//! Logging setup for netcommit binaries.
//!
//! Two layers: a daily-rolling file under the configured logs directory,
//! written off-thread, and stderr. Only the newest [`MAX_LOG_FILES`] files
//! are kept, so `drift-watch` can run for months without filling the disk.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const DEFAULT_LOG_FILTER: &str = "netcommit=info,netcommit_pipeline=info";
pub const MAX_LOG_FILES: usize = 14;

pub struct LogConfig<'a> {
    pub app_name: &'a str,
    pub log_dir: PathBuf,
    pub verbose: bool,
}

/// Flushes buffered file output when dropped. Hold it until exit.
#[must_use = "file logging stops when the guard is dropped"]
pub struct LoggingGuard {
    _file: WorkerGuard,
}

/// Install the global subscriber.
///
/// The file records at `RUST_LOG` (or the default filter). Stderr shows
/// warnings only unless `verbose` is set, so command output stays readable.
pub fn init_logging(config: LogConfig<'_>) -> Result<LoggingGuard> {
    let appender = file_appender(&config.log_dir, config.app_name)?;
    let (file_writer, guard) = tracing_appender::non_blocking(appender);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false)
                .with_filter(default_filter()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_filter(console_filter(config.verbose)),
        )
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(LoggingGuard { _file: guard })
}

/// `<dir>/<app>.<date>.log`, rolled daily.
fn file_appender(dir: &Path, app_name: &str) -> Result<RollingFileAppender> {
    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create logs directory: {}", dir.display()))?;
    RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(app_name)
        .filename_suffix("log")
        .max_log_files(MAX_LOG_FILES)
        .build(dir)
        .with_context(|| format!("Failed to open log file in {}", dir.display()))
}

fn default_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
}

fn console_filter(verbose: bool) -> EnvFilter {
    if verbose {
        default_filter()
    } else {
        EnvFilter::new("warn")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;
    use tracing_subscriber::filter::LevelFilter;

    #[test]
    fn test_file_appender_creates_dated_log_in_dir() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("state").join("logs");
        let mut appender = file_appender(&dir, "netcommit").unwrap();
        appender.write_all(b"deploy started\n").unwrap();
        appender.flush().unwrap();

        let names: Vec<String> = fs::read_dir(&dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names.len(), 1, "{names:?}");
        assert!(names[0].starts_with("netcommit."));
        assert!(names[0].ends_with(".log"));
        let content = fs::read_to_string(dir.join(&names[0])).unwrap();
        assert_eq!(content, "deploy started\n");
    }

    #[test]
    fn test_console_quiet_unless_verbose() {
        assert_eq!(console_filter(false).max_level_hint(), Some(LevelFilter::WARN));
    }
}
