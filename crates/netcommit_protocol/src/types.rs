//! Domain types shared by the pipeline, the job model and the CLI.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

// ============================================================================
// Device family
// ============================================================================

/// Platform family of a device.
///
/// The family selects the template set, the syntax grammar used by the
/// validator and the transport adapter that talks to the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceFamily {
    /// Line-oriented CLI configuration (`interface eth0` / indented statements)
    Cli,
    /// Structured JSON document pushed to a device API
    Api,
    /// YAML document handed to a fabric controller
    Controller,
}

impl DeviceFamily {
    pub const ALL: [DeviceFamily; 3] = [DeviceFamily::Cli, DeviceFamily::Api, DeviceFamily::Controller];

    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceFamily::Cli => "cli",
            DeviceFamily::Api => "api",
            DeviceFamily::Controller => "controller",
        }
    }

    /// File extension used for stored configuration of this family.
    pub fn config_extension(&self) -> &'static str {
        match self {
            DeviceFamily::Cli => "cfg",
            DeviceFamily::Api => "json",
            DeviceFamily::Controller => "yaml",
        }
    }
}

impl fmt::Display for DeviceFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error when parsing a DeviceFamily from string.
#[derive(Debug, Error, Clone)]
#[error("unknown device family: {0} (expected cli, api or controller)")]
pub struct FamilyParseError(String);

impl std::str::FromStr for DeviceFamily {
    type Err = FamilyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cli" => Ok(DeviceFamily::Cli),
            "api" => Ok(DeviceFamily::Api),
            "controller" => Ok(DeviceFamily::Controller),
            _ => Err(FamilyParseError(s.to_string())),
        }
    }
}

// ============================================================================
// Operational assertions
// ============================================================================

/// An operational fact that must hold on a device after configuration
/// is applied.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Assertion {
    /// Interface is operationally up
    InterfaceUp { interface: String },
    /// Routing peer session is established
    PeerEstablished { peer: String },
    /// Prefix is present in the routing table
    RoutePresent { prefix: String },
}

impl fmt::Display for Assertion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Assertion::InterfaceUp { interface } => write!(f, "interface {} up", interface),
            Assertion::PeerEstablished { peer } => write!(f, "peer {} established", peer),
            Assertion::RoutePresent { prefix } => write!(f, "route {} present", prefix),
        }
    }
}

// ============================================================================
// Validation findings
// ============================================================================

/// Finding severity. Ordered: `Info < Warning < Error < Critical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

impl Severity {
    /// Findings at or above `Error` block deployment.
    pub fn blocks_deployment(&self) -> bool {
        *self >= Severity::Error
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Which validator pass produced a finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStage {
    Syntax,
    Policy,
    Golden,
}

impl fmt::Display for ValidationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ValidationStage::Syntax => "syntax",
            ValidationStage::Policy => "policy",
            ValidationStage::Golden => "golden",
        };
        write!(f, "{}", s)
    }
}

/// A single validation finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub severity: Severity,
    pub stage: ValidationStage,
    /// Rule identifier (e.g. `unknown-statement`, `ntp-required`)
    pub rule: String,
    pub message: String,
    /// 1-based line in the rendered content, when the finding is line-bound
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
}

impl Finding {
    pub fn new(
        severity: Severity,
        stage: ValidationStage,
        rule: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            severity,
            stage,
            rule: rule.into(),
            message: message.into(),
            line: None,
        }
    }

    pub fn at_line(mut self, line: usize) -> Self {
        self.line = Some(line);
        self
    }
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.line {
            Some(line) => write!(
                f,
                "[{}] {}/{} line {}: {}",
                self.severity, self.stage, self.rule, line, self.message
            ),
            None => write!(
                f,
                "[{}] {}/{}: {}",
                self.severity, self.stage, self.rule, self.message
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_family_roundtrip() {
        for family in DeviceFamily::ALL {
            let parsed: DeviceFamily = family.as_str().parse().unwrap();
            assert_eq!(parsed, family);
        }
        assert!("junos".parse::<DeviceFamily>().is_err());
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Info < Severity::Warning);
        assert!(Severity::Warning < Severity::Error);
        assert!(!Severity::Warning.blocks_deployment());
        assert!(Severity::Error.blocks_deployment());
        assert!(Severity::Critical.blocks_deployment());
    }

    #[test]
    fn test_assertion_serde_tagged() {
        let a = Assertion::PeerEstablished {
            peer: "10.0.0.2".to_string(),
        };
        let json = serde_json::to_string(&a).unwrap();
        assert_eq!(json, r#"{"kind":"peer_established","peer":"10.0.0.2"}"#);
        assert_eq!(a.to_string(), "peer 10.0.0.2 established");
    }

    #[test]
    fn test_finding_display() {
        let f = Finding::new(Severity::Error, ValidationStage::Syntax, "unknown-statement", "bad")
            .at_line(3);
        assert_eq!(f.to_string(), "[error] syntax/unknown-statement line 3: bad");
    }
}
