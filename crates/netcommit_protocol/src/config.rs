//! netcommit configuration file model.
//!
//! Every section and field has a default, so an empty or missing
//! `config.toml` yields a working local setup under the netcommit home.

use crate::defaults::*;
use crate::paths::netcommit_home;
use crate::types::{DeviceFamily, Severity};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors loading or saving configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("failed to write config {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize config: {0}")]
    Serialize(String),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetcommitConfig {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub concurrency: ConcurrencyConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub post_check: PostCheckConfig,
    #[serde(default)]
    pub lock: LockConfig,
    #[serde(default)]
    pub validation: ValidationConfig,
    #[serde(default)]
    pub diff: DiffConfig,
    #[serde(default)]
    pub drift: DriftConfig,
    #[serde(default)]
    pub approval: ApprovalConfig,
}

impl NetcommitConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: NetcommitConfig =
            toml::from_str(&content).map_err(|e| ConfigError::Parse {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;
        config.check()?;
        Ok(config)
    }

    /// Load configuration, falling back to defaults when the file is absent.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content =
            toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))?;
        std::fs::write(path, content).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Reject values that would make the pipeline spin or never retry.
    pub fn check(&self) -> Result<(), ConfigError> {
        if self.concurrency.max_workers == 0 {
            return Err(ConfigError::Invalid(
                "concurrency.max_workers must be at least 1".to_string(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.retry.multiplier == 0 {
            return Err(ConfigError::Invalid(
                "retry.multiplier must be at least 1".to_string(),
            ));
        }
        if self.post_check.initial_interval_ms == 0 || self.lock.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "polling intervals must be non-zero".to_string(),
            ));
        }
        if self.drift.interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "drift.interval_secs must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Resolve every state location against the netcommit home.
    pub fn state_paths(&self) -> StatePaths {
        let home = self
            .paths
            .state_dir
            .clone()
            .unwrap_or_else(netcommit_home);
        StatePaths {
            intent_dir: self
                .paths
                .intent_dir
                .clone()
                .unwrap_or_else(|| home.join("intent")),
            templates_dir: self.paths.templates_dir.clone(),
            lab_dir: self
                .paths
                .lab_dir
                .clone()
                .unwrap_or_else(|| home.join("lab")),
            jobs_dir: home.join("jobs"),
            baselines_dir: home.join("baselines"),
            locks_dir: home.join("locks"),
            audit_log: home.join("audit.jsonl"),
            logs_dir: home.join("logs"),
            home,
        }
    }
}

/// Filesystem locations of external collaborators and pipeline state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Root for pipeline state (jobs, baselines, locks, audit). Defaults to the netcommit home.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_dir: Option<PathBuf>,
    /// Intent store root: `<intent_dir>/<device>/v<N>.yaml`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent_dir: Option<PathBuf>,
    /// Template overrides: `<templates_dir>/<family>/<name>`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub templates_dir: Option<PathBuf>,
    /// Lab device root for the file-backed transport
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lab_dir: Option<PathBuf>,
}

/// Resolved state locations.
#[derive(Debug, Clone)]
pub struct StatePaths {
    pub home: PathBuf,
    pub intent_dir: PathBuf,
    pub templates_dir: Option<PathBuf>,
    pub lab_dir: PathBuf,
    pub jobs_dir: PathBuf,
    pub baselines_dir: PathBuf,
    pub locks_dir: PathBuf,
    pub audit_log: PathBuf,
    pub logs_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConcurrencyConfig {
    /// Worker threads processing jobs across devices
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
}

fn default_max_workers() -> usize {
    DEFAULT_MAX_WORKERS
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
        }
    }
}

/// Exponential backoff for transport errors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_retry_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_retry_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_retry_multiplier")]
    pub multiplier: u32,
}

fn default_retry_max_attempts() -> u32 {
    DEFAULT_RETRY_MAX_ATTEMPTS
}

fn default_retry_base_delay_ms() -> u64 {
    DEFAULT_RETRY_BASE_DELAY_MS
}

fn default_retry_max_delay_ms() -> u64 {
    DEFAULT_RETRY_MAX_DELAY_MS
}

fn default_retry_multiplier() -> u32 {
    DEFAULT_RETRY_MULTIPLIER
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_retry_max_attempts(),
            base_delay_ms: default_retry_base_delay_ms(),
            max_delay_ms: default_retry_max_delay_ms(),
            multiplier: default_retry_multiplier(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostCheckConfig {
    #[serde(default = "default_post_check_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_post_check_initial_interval_ms")]
    pub initial_interval_ms: u64,
    #[serde(default = "default_post_check_max_interval_ms")]
    pub max_interval_ms: u64,
}

fn default_post_check_timeout_ms() -> u64 {
    DEFAULT_POST_CHECK_TIMEOUT_MS
}

fn default_post_check_initial_interval_ms() -> u64 {
    DEFAULT_POST_CHECK_INITIAL_INTERVAL_MS
}

fn default_post_check_max_interval_ms() -> u64 {
    DEFAULT_POST_CHECK_MAX_INTERVAL_MS
}

impl Default for PostCheckConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_post_check_timeout_ms(),
            initial_interval_ms: default_post_check_initial_interval_ms(),
            max_interval_ms: default_post_check_max_interval_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockConfig {
    /// How long a job waits for a busy device before aborting
    #[serde(default = "default_lock_wait_timeout_ms")]
    pub wait_timeout_ms: u64,
    #[serde(default = "default_lock_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_lock_wait_timeout_ms() -> u64 {
    DEFAULT_LOCK_WAIT_TIMEOUT_MS
}

fn default_lock_poll_interval_ms() -> u64 {
    DEFAULT_LOCK_POLL_INTERVAL_MS
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            wait_timeout_ms: default_lock_wait_timeout_ms(),
            poll_interval_ms: default_lock_poll_interval_ms(),
        }
    }
}

/// A mandatory block: content of the given family must match `pattern`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyRule {
    pub id: String,
    /// Family this rule applies to; `None` applies to every family
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub family: Option<DeviceFamily>,
    /// Regex matched against the whole rendered text (multi-line mode)
    pub pattern: String,
    pub message: String,
    #[serde(default = "default_policy_severity")]
    pub severity: Severity,
}

fn default_policy_severity() -> Severity {
    Severity::Error
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationConfig {
    /// Extra CLI statement patterns accepted by the syntax check
    #[serde(default)]
    pub extra_statements: Vec<String>,
    #[serde(default = "default_policies")]
    pub policies: Vec<PolicyRule>,
    /// Patterns whose presence in the golden baseline must be preserved
    #[serde(default = "default_protected_patterns")]
    pub protected_patterns: Vec<String>,
    #[serde(default = "default_max_changed_lines")]
    pub max_changed_lines: usize,
}

fn policy(id: &str, family: DeviceFamily, pattern: &str, message: &str) -> PolicyRule {
    PolicyRule {
        id: id.to_string(),
        family: Some(family),
        pattern: pattern.to_string(),
        message: message.to_string(),
        severity: Severity::Error,
    }
}

fn default_policies() -> Vec<PolicyRule> {
    const HOSTNAME: &str = "a hostname is required";
    const NTP: &str = "at least one NTP server is required";
    vec![
        policy("hostname-required", DeviceFamily::Cli, r"(?m)^hostname \S+", HOSTNAME),
        policy("ntp-required", DeviceFamily::Cli, r"(?m)^ntp server \S+", NTP),
        policy("hostname-required", DeviceFamily::Api, r#""hostname":\s*"[^"]+""#, HOSTNAME),
        policy("ntp-required", DeviceFamily::Api, r#""ntp_servers":\s*\[\s*""#, NTP),
        policy("hostname-required", DeviceFamily::Controller, r"(?m)^hostname:\s*\S+", HOSTNAME),
        policy("ntp-required", DeviceFamily::Controller, r#"(?m)^ntp_servers:\s*\[\s*""#, NTP),
    ]
}

fn default_protected_patterns() -> Vec<String> {
    DEFAULT_PROTECTED_PATTERNS.iter().map(|p| p.to_string()).collect()
}

fn default_max_changed_lines() -> usize {
    DEFAULT_MAX_CHANGED_LINES
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            extra_statements: Vec::new(),
            policies: default_policies(),
            protected_patterns: default_protected_patterns(),
            max_changed_lines: default_max_changed_lines(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiffConfig {
    /// Lines matching any of these are dropped before comparison
    #[serde(default = "default_volatile_patterns")]
    pub volatile_patterns: Vec<String>,
}

fn default_volatile_patterns() -> Vec<String> {
    DEFAULT_VOLATILE_PATTERNS.iter().map(|p| p.to_string()).collect()
}

impl Default for DiffConfig {
    fn default() -> Self {
        Self {
            volatile_patterns: default_volatile_patterns(),
        }
    }
}

/// Drift weight for lines matching `pattern`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriticalityRule {
    pub category: String,
    pub pattern: String,
    pub weight: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriftConfig {
    #[serde(default = "default_drift_interval_secs")]
    pub interval_secs: u64,
    /// Reports scoring at or above this spawn a remediation candidate
    #[serde(default = "default_drift_severity_threshold")]
    pub severity_threshold: f64,
    /// Weight for lines no criticality rule matches
    #[serde(default = "default_drift_weight")]
    pub default_weight: f64,
    #[serde(default = "default_criticality")]
    pub criticality: Vec<CriticalityRule>,
}

fn default_drift_interval_secs() -> u64 {
    DEFAULT_DRIFT_INTERVAL_SECS
}

fn default_drift_severity_threshold() -> f64 {
    DEFAULT_DRIFT_SEVERITY_THRESHOLD
}

fn default_drift_weight() -> f64 {
    DEFAULT_DRIFT_WEIGHT
}

fn default_criticality() -> Vec<CriticalityRule> {
    DEFAULT_CRITICALITY
        .iter()
        .map(|(category, pattern, weight)| CriticalityRule {
            category: category.to_string(),
            pattern: pattern.to_string(),
            weight: *weight,
        })
        .collect()
}

impl Default for DriftConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_drift_interval_secs(),
            severity_threshold: default_drift_severity_threshold(),
            default_weight: default_drift_weight(),
            criticality: default_criticality(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApprovalConfig {
    /// Park operator-initiated deploys in AwaitingApproval as well.
    /// Drift remediation jobs always wait for approval.
    #[serde(default)]
    pub deploy_requires_approval: bool,
}
