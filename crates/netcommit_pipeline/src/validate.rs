//! Validator.
//!
//! Three passes, in order, none of which contacts a device:
//!
//! 1. **Syntax**: the family's grammar. CLI text is checked line by line
//!    (block headers, indented statements only inside a block that allows
//!    them, nothing unknown); API text must parse as JSON and controller text
//!    as YAML.
//! 2. **Policy**: mandatory blocks expressed as regexes per family.
//! 3. **Golden**: against the device's last committed baseline, warn on
//!    large changes and fail when a protected block disappears.
//!
//! Any finding of severity `Error` or above rejects the configuration.

use crate::diff::{compile_patterns, Differ, PatternError};
use netcommit_job::RenderedConfig;
use netcommit_protocol::config::{PolicyRule, ValidationConfig};
use netcommit_protocol::{DeviceFamily, Finding, Severity, ValidationStage};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Outcome of validating one rendered configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    /// Ordered by stage, then line
    pub findings: Vec<Finding>,
}

impl ValidationResult {
    pub fn passed(&self) -> bool {
        !self.findings.iter().any(|f| f.severity.blocks_deployment())
    }

    pub fn blocking(&self) -> impl Iterator<Item = &Finding> {
        self.findings.iter().filter(|f| f.severity.blocks_deployment())
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Finding> {
        self.findings
            .iter()
            .filter(|f| !f.severity.blocks_deployment())
    }
}

// ============================================================================
// CLI grammar
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Block {
    Interface,
    RouterBgp,
}

struct CliGrammar {
    headers: Vec<(Regex, Block)>,
    top_level: Vec<Regex>,
    children: Vec<(Block, Regex)>,
    extra: Vec<Regex>,
}

const CLI_HEADERS: &[(&str, Block)] = &[
    (r"^interface \S+$", Block::Interface),
    (r"^router bgp \d+$", Block::RouterBgp),
];

const CLI_TOP_LEVEL: &[&str] = &[
    r"^!.*$",
    r"^end$",
    r"^hostname \S+$",
    r"^ntp server \S+$",
    r"^ip name-server \S+$",
    r"^logging host \S+$",
    r"^ip route \S+ \S+$",
];

const CLI_INTERFACE_CHILDREN: &[&str] = &[
    r"^description .+$",
    r"^ip address \S+$",
    r"^(no )?shutdown$",
    r"^switchport access vlan \d+$",
    r"^switchport trunk allowed vlan \d+(,\d+)*$",
    r"^mtu \d+$",
];

const CLI_BGP_CHILDREN: &[&str] = &[
    r"^bgp router-id \S+$",
    r"^neighbor \S+ remote-as \d+$",
    r"^neighbor \S+ description .+$",
    r"^network \S+$",
];

impl CliGrammar {
    fn new(extra_statements: &[String]) -> Result<Self, PatternError> {
        let mut headers = Vec::new();
        for (pattern, block) in CLI_HEADERS {
            headers.extend(compile_patterns(&[*pattern])?.into_iter().map(|re| (re, *block)));
        }
        let mut children = Vec::new();
        for re in compile_patterns(CLI_INTERFACE_CHILDREN)? {
            children.push((Block::Interface, re));
        }
        for re in compile_patterns(CLI_BGP_CHILDREN)? {
            children.push((Block::RouterBgp, re));
        }
        Ok(Self {
            headers,
            top_level: compile_patterns(CLI_TOP_LEVEL)?,
            children,
            extra: compile_patterns(extra_statements)?,
        })
    }

    fn check(&self, content: &str) -> Vec<Finding> {
        let mut findings = Vec::new();
        let mut block: Option<Block> = None;

        for (idx, raw) in content.lines().enumerate() {
            let number = idx + 1;
            let line = raw.trim_end();
            if line.trim().is_empty() {
                continue;
            }
            let statement = line.trim_start();
            let indented = statement.len() != line.len();

            if self.extra.iter().any(|re| re.is_match(statement)) {
                continue;
            }

            if indented {
                match block {
                    Some(current) => {
                        let allowed = self
                            .children
                            .iter()
                            .any(|(b, re)| *b == current && re.is_match(statement));
                        if !allowed {
                            findings.push(
                                Finding::new(
                                    Severity::Error,
                                    ValidationStage::Syntax,
                                    "unknown-statement",
                                    format!("'{}' is not valid inside this block", statement),
                                )
                                .at_line(number),
                            );
                        }
                    }
                    None => findings.push(
                        Finding::new(
                            Severity::Error,
                            ValidationStage::Syntax,
                            "orphan-statement",
                            format!("indented statement '{}' outside any block", statement),
                        )
                        .at_line(number),
                    ),
                }
                continue;
            }

            if let Some((_, kind)) = self.headers.iter().find(|(re, _)| re.is_match(line)) {
                block = Some(*kind);
                continue;
            }
            block = None;
            if !self.top_level.iter().any(|re| re.is_match(line)) {
                findings.push(
                    Finding::new(
                        Severity::Error,
                        ValidationStage::Syntax,
                        "unknown-statement",
                        format!("unknown statement '{}'", line),
                    )
                    .at_line(number),
                );
            }
        }
        findings
    }
}

// ============================================================================
// Validator
// ============================================================================

struct CompiledPolicy {
    rule: PolicyRule,
    regex: Regex,
}

pub struct Validator {
    grammar: CliGrammar,
    policies: Vec<CompiledPolicy>,
    protected: Vec<Regex>,
    max_changed_lines: usize,
    differ: Arc<Differ>,
}

impl Validator {
    pub fn new(config: &ValidationConfig, differ: Arc<Differ>) -> Result<Self, PatternError> {
        let policies = config
            .policies
            .iter()
            .map(|rule| {
                Regex::new(&rule.pattern)
                    .map(|regex| CompiledPolicy {
                        rule: rule.clone(),
                        regex,
                    })
                    .map_err(|source| PatternError {
                        pattern: rule.pattern.clone(),
                        source,
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            grammar: CliGrammar::new(&config.extra_statements)?,
            policies,
            protected: compile_patterns(&config.protected_patterns)?,
            max_changed_lines: config.max_changed_lines,
            differ,
        })
    }

    /// Validate rendered text, optionally against the golden baseline text.
    pub fn validate(&self, rendered: &RenderedConfig, golden: Option<&str>) -> ValidationResult {
        let mut findings = self.check_syntax(rendered.family(), rendered.content());
        findings.extend(self.check_policies(rendered.family(), rendered.content()));
        if let Some(golden) = golden {
            findings.extend(self.check_golden(rendered.content(), golden));
        }
        findings.sort_by_key(|f| (f.stage, f.line.unwrap_or(0)));
        ValidationResult { findings }
    }

    fn check_syntax(&self, family: DeviceFamily, content: &str) -> Vec<Finding> {
        let parse_error = |rule: &str, message: String, line: Option<usize>| {
            let finding = Finding::new(Severity::Error, ValidationStage::Syntax, rule, message);
            match line {
                Some(l) => finding.at_line(l),
                None => finding,
            }
        };
        match family {
            DeviceFamily::Cli => self.grammar.check(content),
            DeviceFamily::Api => match serde_json::from_str::<serde_json::Value>(content) {
                Ok(serde_json::Value::Object(_)) => Vec::new(),
                Ok(_) => vec![parse_error(
                    "json-document",
                    "top level must be a JSON object".to_string(),
                    None,
                )],
                Err(e) => vec![parse_error("json-parse", e.to_string(), Some(e.line()))],
            },
            DeviceFamily::Controller => match serde_yaml::from_str::<serde_yaml::Value>(content) {
                Ok(serde_yaml::Value::Mapping(_)) => Vec::new(),
                Ok(_) => vec![parse_error(
                    "yaml-document",
                    "top level must be a YAML mapping".to_string(),
                    None,
                )],
                Err(e) => {
                    let line = e.location().map(|l| l.line());
                    vec![parse_error("yaml-parse", e.to_string(), line)]
                }
            },
        }
    }

    fn check_policies(&self, family: DeviceFamily, content: &str) -> Vec<Finding> {
        self.policies
            .iter()
            .filter(|p| p.rule.family.map_or(true, |f| f == family))
            .filter(|p| !p.regex.is_match(content))
            .map(|p| {
                Finding::new(
                    p.rule.severity,
                    ValidationStage::Policy,
                    p.rule.id.clone(),
                    p.rule.message.clone(),
                )
            })
            .collect()
    }

    fn check_golden(&self, candidate: &str, golden: &str) -> Vec<Finding> {
        let mut findings = Vec::new();

        let changes = self.differ.diff(golden, candidate);
        if changes.len() > self.max_changed_lines {
            findings.push(Finding::new(
                Severity::Warning,
                ValidationStage::Golden,
                "large-change",
                format!(
                    "{} lines differ from the baseline (threshold {})",
                    changes.len(),
                    self.max_changed_lines
                ),
            ));
        }

        let golden_lines = self.differ.normalize(golden);
        let candidate_lines = self.differ.normalize(candidate);
        for re in &self.protected {
            let Some(protected) = golden_lines.iter().find(|l| re.is_match(&l.text)) else {
                continue;
            };
            if !candidate_lines.iter().any(|l| re.is_match(&l.text)) {
                findings.push(Finding::new(
                    Severity::Error,
                    ValidationStage::Golden,
                    "protected-removed",
                    format!(
                        "protected line '{}' (baseline line {}) has no counterpart",
                        protected.text, protected.number
                    ),
                ));
            }
        }
        findings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netcommit_ids::DeviceId;
    use netcommit_protocol::defaults::DEFAULT_VOLATILE_PATTERNS;

    fn validator() -> Validator {
        validator_with(ValidationConfig::default())
    }

    fn validator_with(config: ValidationConfig) -> Validator {
        let differ = Arc::new(Differ::new(DEFAULT_VOLATILE_PATTERNS).unwrap());
        Validator::new(&config, differ).unwrap()
    }

    fn rendered(family: DeviceFamily, content: &str) -> RenderedConfig {
        RenderedConfig::new(
            DeviceId::parse("sw1").unwrap(),
            family,
            "base",
            "000000000000",
            1,
            content.to_string(),
        )
    }

    const GOOD_CLI: &str = "hostname sw1\ninterface eth0\n  description Uplink\n  ip address 10.1.1.1/24\nrouter bgp 65000\n  neighbor 10.1.1.2 remote-as 65001\nntp server 10.0.0.123\n";

    #[test]
    fn test_good_cli_passes() {
        let result = validator().validate(&rendered(DeviceFamily::Cli, GOOD_CLI), None);
        assert!(result.passed(), "{:?}", result.findings);
        assert!(result.findings.is_empty());
    }

    #[test]
    fn test_missing_ntp_is_error() {
        let content = "hostname sw1\ninterface eth0\n  ip address 10.1.1.1/24\n";
        let result = validator().validate(&rendered(DeviceFamily::Cli, content), None);
        assert!(!result.passed());
        let rules: Vec<&str> = result.blocking().map(|f| f.rule.as_str()).collect();
        assert_eq!(rules, vec!["ntp-required"]);
    }

    #[test]
    fn test_cli_grammar_errors_carry_lines() {
        let content = "  description orphan\nhostname sw1\nfrobnicate now\ninterface eth0\n  neighbor 1.1.1.1 remote-as 1\nntp server 10.0.0.1\n";
        let result = validator().validate(&rendered(DeviceFamily::Cli, content), None);
        let syntax: Vec<(&str, Option<usize>)> = result
            .findings
            .iter()
            .map(|f| (f.rule.as_str(), f.line))
            .collect();
        assert_eq!(
            syntax,
            vec![
                ("orphan-statement", Some(1)),
                ("unknown-statement", Some(3)),
                ("unknown-statement", Some(5)),
            ]
        );
    }

    #[test]
    fn test_extra_statements_extend_grammar() {
        let mut config = ValidationConfig::default();
        config.extra_statements.push(r"^spanning-tree mode \S+$".to_string());
        let content = format!("{}spanning-tree mode rapid-pvst\n", GOOD_CLI);
        assert!(validator_with(config)
            .validate(&rendered(DeviceFamily::Cli, &content), None)
            .passed());
    }

    #[test]
    fn test_api_and_controller_parse() {
        let v = validator();
        let api = r#"{"hostname": "sw1", "ntp_servers": ["10.0.0.1"]}"#;
        assert!(v.validate(&rendered(DeviceFamily::Api, api), None).passed());

        let broken = v.validate(&rendered(DeviceFamily::Api, "{\"hostname\": "), None);
        assert_eq!(broken.findings[0].rule, "json-parse");

        let yaml = "hostname: \"sw1\"\nntp_servers: [\"10.0.0.1\"]\n";
        assert!(v
            .validate(&rendered(DeviceFamily::Controller, yaml), None)
            .passed());
        let bad_yaml = v.validate(&rendered(DeviceFamily::Controller, "- just\n- a list\n"), None);
        assert!(!bad_yaml.passed());
    }

    #[test]
    fn test_golden_protected_line_removed() {
        let candidate = "hostname sw1\nntp server 10.0.0.123\n";
        let result = validator().validate(&rendered(DeviceFamily::Cli, candidate), Some(GOOD_CLI));
        let blocking: Vec<&str> = result.blocking().map(|f| f.rule.as_str()).collect();
        assert_eq!(blocking, vec!["protected-removed"]);
    }

    #[test]
    fn test_golden_large_change_warns() {
        let mut config = ValidationConfig::default();
        config.max_changed_lines = 1;
        let candidate = GOOD_CLI.replace("Uplink", "Core").replace("10.0.0.123", "10.0.0.124");
        let result =
            validator_with(config).validate(&rendered(DeviceFamily::Cli, &candidate), Some(GOOD_CLI));
        assert!(result.passed());
        assert_eq!(result.warnings().next().unwrap().rule, "large-change");
    }

    #[test]
    fn test_findings_ordered_by_stage() {
        let content = "hostname sw1\nbogus\n";
        let result = validator().validate(&rendered(DeviceFamily::Cli, content), None);
        let stages: Vec<ValidationStage> = result.findings.iter().map(|f| f.stage).collect();
        assert_eq!(stages, vec![ValidationStage::Syntax, ValidationStage::Policy]);
    }
}
