//! Canonical default values shared by the pipeline and the CLI.

pub const DEFAULT_MAX_WORKERS: usize = 4;

pub const DEFAULT_RETRY_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 500;
pub const DEFAULT_RETRY_MAX_DELAY_MS: u64 = 8_000;
pub const DEFAULT_RETRY_MULTIPLIER: u32 = 2;

pub const DEFAULT_POST_CHECK_TIMEOUT_MS: u64 = 60_000;
pub const DEFAULT_POST_CHECK_INITIAL_INTERVAL_MS: u64 = 1_000;
pub const DEFAULT_POST_CHECK_MAX_INTERVAL_MS: u64 = 10_000;

pub const DEFAULT_LOCK_WAIT_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_LOCK_POLL_INTERVAL_MS: u64 = 200;

/// Golden-baseline check warns when more lines than this change at once.
pub const DEFAULT_MAX_CHANGED_LINES: usize = 50;

pub const DEFAULT_DRIFT_INTERVAL_SECS: u64 = 300;
pub const DEFAULT_DRIFT_SEVERITY_THRESHOLD: f64 = 5.0;
pub const DEFAULT_DRIFT_WEIGHT: f64 = 1.0;

pub const DEFAULT_TEMPLATE_NAME: &str = "base";

pub const OPERATOR_ROLLBACK_MESSAGE: &str = "Rollback requested by operator";
pub const CANCELLED_BY_USER_MESSAGE: &str = "Cancelled by user";

/// Lines that change on every read and carry no intent.
pub const DEFAULT_VOLATILE_PATTERNS: &[&str] = &[
    r"^!\s*Last configuration change",
    r"^!\s*NVRAM config last updated",
    r"^!\s*Time:",
    r"(?i)^!?\s*(\S+\s+)?uptime is\b",
    r#"(?i)^\s*"?uptime(_seconds)?"?\s*:"#,
    r"(?i)^\s*ntp clock-period",
    r"(?i)^\s*last clearing of .*counters\b",
    r"(?i)^\s*\d+ (packets|bytes) (input|output)\b",
    r#"(?i)^\s*"?(in|out)_(octets|packets|errors|discards)"?\s*:"#,
    r#"^\s*"?generated_at"?\s*:"#,
];

/// Block presence that must survive a change relative to the golden baseline.
pub const DEFAULT_PROTECTED_PATTERNS: &[&str] = &[
    r"^hostname ",
    r"^ntp server ",
    r"^router bgp ",
    r#"^\s*"?hostname"?\s*:"#,
];

/// Built-in drift criticality table: (category, pattern, weight).
/// First matching rule wins.
pub const DEFAULT_CRITICALITY: &[(&str, &str, f64)] = &[
    ("routing", r"^\s*(router bgp|neighbor|ip route|network)\b", 5.0),
    ("routing", r#"^\s*"?(asn|router_id|remote_as|neighbors|static_routes|next_hop)"?\s*:"#, 5.0),
    ("addressing", r#"(\bip address\b|^\s*"?address"?\s*:)"#, 3.0),
    ("vlan", r"(?i)\bvlans?\b", 2.0),
    ("services", r"(?i)\b(ntp|name-server|dns|logging|syslog)", 2.0),
    ("description", r"(?i)\bdescription\b", 0.5),
];
