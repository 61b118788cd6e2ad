//! End-to-end tests for the netcommit binary
//!
//! Each test gets its own NETCOMMIT_HOME with file-backed intent and lab
//! devices, runs the CLI as a subprocess and checks exit codes and JSON output.

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::TempDir;

const FAST_CONFIG: &str = r#"
[retry]
max_attempts = 2
base_delay_ms = 1
max_delay_ms = 2

[post_check]
timeout_ms = 150
initial_interval_ms = 5
max_interval_ms = 10

[lock]
wait_timeout_ms = 100
poll_interval_ms = 5
"#;

const UPLINK: &str = r#"
device: DEVICE
family: cli
hostname: DEVICE
interfaces:
  - name: eth0
    description: Uplink
    address: 10.1.1.1/24
services:
  ntp_servers: [10.0.0.1]
"#;

const UPLINK_NO_NTP: &str = r#"
device: DEVICE
family: cli
hostname: DEVICE
interfaces:
  - name: eth0
    description: Uplink
    address: 10.1.1.1/24
"#;

const UPLINK_WITH_PEER: &str = r#"
device: DEVICE
family: cli
hostname: DEVICE
interfaces:
  - name: eth0
    address: 10.1.1.1/24
routing:
  asn: 65000
  neighbors:
    - address: 10.1.1.2
      remote_as: 65001
services:
  ntp_servers: [10.0.0.1]
"#;

struct Home {
    temp: TempDir,
}

impl Home {
    fn new() -> Self {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("config.toml"), FAST_CONFIG).unwrap();
        Self { temp }
    }

    fn path(&self) -> &Path {
        self.temp.path()
    }

    fn intent(&self, device: &str, version: u64, yaml: &str) {
        let dir = self.path().join("intent").join(device);
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join(format!("v{}.yaml", version)),
            yaml.replace("DEVICE", device),
        )
        .unwrap();
    }

    fn lab_file(&self, device: &str, name: &str, content: &str) {
        let dir = self.path().join("lab").join(device);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(name), content).unwrap();
    }

    fn running(&self, device: &str) -> String {
        fs::read_to_string(self.path().join("lab").join(device).join("running.cfg"))
            .unwrap_or_default()
    }

    fn run(&self, args: &[&str]) -> Output {
        Command::new(netcommit_bin())
            .args(args)
            .env("NETCOMMIT_HOME", self.path())
            .env("NETCOMMIT_ACTOR", "tester")
            .env_remove("NETCOMMIT_CONFIG")
            .env_remove("RUST_LOG")
            .output()
            .expect("failed to execute netcommit CLI")
    }
}

fn netcommit_bin() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_netcommit"))
}

fn code(output: &Output) -> i32 {
    output.status.code().unwrap_or_else(|| {
        panic!(
            "terminated by signal\nstdout:\n{}\nstderr:\n{}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        )
    })
}

fn parse_json<T: for<'de> Deserialize<'de>>(output: &Output) -> T {
    serde_json::from_slice(&output.stdout).unwrap_or_else(|err| {
        panic!(
            "failed to parse JSON output: {}\nstdout:\n{}\nstderr:\n{}",
            err,
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        )
    })
}

#[derive(Debug, Deserialize)]
struct DeployRow {
    device: String,
    job_id: Option<String>,
    state: Option<String>,
    refused: Option<String>,
    exit_code: u8,
}

#[derive(Debug, Deserialize)]
struct JobsOutput {
    stats: JobStats,
    jobs: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct JobStats {
    total: usize,
    committed: usize,
    rejected: usize,
}

// =============================================================================
// DEPLOY EXIT CODES
// =============================================================================

/// Test that a clean deployment exits 0 and writes the lab device
#[test]
fn test_deploy_commit_exits_zero() {
    let home = Home::new();
    home.intent("sw1", 1, UPLINK);

    let output = home.run(&["deploy", "--device", "sw1", "--json"]);
    assert_eq!(code(&output), 0, "{}", String::from_utf8_lossy(&output.stderr));
    let rows: Vec<DeployRow> = parse_json(&output);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].device, "sw1");
    assert_eq!(rows[0].state.as_deref(), Some("committed"));
    assert_eq!(rows[0].exit_code, 0);
    assert!(home
        .running("sw1")
        .contains("interface eth0\n  description Uplink\n  ip address 10.1.1.1/24\n"));
}

/// Test that a validation rejection exits 1 without touching the device
#[test]
fn test_deploy_rejected_exits_one() {
    let home = Home::new();
    home.intent("sw1", 1, UPLINK_NO_NTP);

    let output = home.run(&["deploy", "--device", "sw1", "--json"]);
    assert_eq!(code(&output), 1);
    let rows: Vec<DeployRow> = parse_json(&output);
    assert_eq!(rows[0].state.as_deref(), Some("rejected"));
    assert!(!home.path().join("lab").join("sw1").join("running.cfg").exists());
}

/// Test that a post-check failure rolls back and exits 2
#[test]
fn test_deploy_rolled_back_exits_two() {
    let home = Home::new();
    home.intent("sw1", 1, UPLINK_WITH_PEER);
    home.lab_file("sw1", "running.cfg", "hostname sw1\n");
    home.lab_file("sw1", "oper.json", r#"{"down_peers": ["10.1.1.2"]}"#);

    let output = home.run(&["deploy", "--device", "sw1", "--json"]);
    assert_eq!(code(&output), 2);
    let rows: Vec<DeployRow> = parse_json(&output);
    assert_eq!(rows[0].state.as_deref(), Some("rolled_back"));
    assert_eq!(home.running("sw1"), "hostname sw1\n");
}

/// Test that the worst outcome across devices decides the exit code
#[test]
fn test_deploy_all_reports_worst_outcome() {
    let home = Home::new();
    home.intent("sw1", 1, UPLINK);
    home.intent("sw2", 1, UPLINK_NO_NTP);

    let output = home.run(&["deploy", "--all", "--json"]);
    assert_eq!(code(&output), 1);
    let rows: Vec<DeployRow> = parse_json(&output);
    let states: Vec<_> = rows.iter().map(|r| r.state.as_deref()).collect();
    assert_eq!(states, vec![Some("committed"), Some("rejected")]);

    let output = home.run(&["jobs", "--json"]);
    assert_eq!(code(&output), 0);
    let jobs: JobsOutput = parse_json(&output);
    assert_eq!(jobs.stats.total, 2);
    assert_eq!(jobs.stats.committed, 1);
    assert_eq!(jobs.stats.rejected, 1);
    assert_eq!(jobs.jobs.len(), 2);
}

/// Test that an unknown device is refused with exit 2
#[test]
fn test_deploy_unknown_device_is_refused() {
    let home = Home::new();
    let output = home.run(&["deploy", "--device", "ghost", "--json"]);
    assert_eq!(code(&output), 2);
    let rows: Vec<DeployRow> = parse_json(&output);
    assert!(rows[0].job_id.is_none());
    assert!(rows[0].refused.is_some());
}

// =============================================================================
// PREVIEWS
// =============================================================================

/// Test that render prints the configuration and never contacts the device
#[test]
fn test_render_prints_configuration() {
    let home = Home::new();
    home.intent("sw1", 1, UPLINK);

    let output = home.run(&["render", "sw1"]);
    assert_eq!(code(&output), 0);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.starts_with("hostname sw1\n"));
    assert!(stdout.contains("ntp server 10.0.0.1"));
    assert!(!home.path().join("lab").join("sw1").exists());
}

/// Test that an unknown template is a render error (exit 1)
#[test]
fn test_render_unknown_template_exits_one() {
    let home = Home::new();
    home.intent("sw1", 1, UPLINK);

    let output = home.run(&["render", "sw1", "--template", "nope"]);
    assert_eq!(code(&output), 1);
    assert!(String::from_utf8_lossy(&output.stderr).contains("TRY:"));
}

/// Test that validate exits 1 when a policy fails
#[test]
fn test_validate_exit_code_follows_findings() {
    let home = Home::new();
    home.intent("sw1", 1, UPLINK);
    home.intent("sw2", 1, UPLINK_NO_NTP);

    assert_eq!(code(&home.run(&["validate", "sw1"])), 0);
    let output = home.run(&["validate", "sw2", "--json"]);
    assert_eq!(code(&output), 1);
    let body: serde_json::Value = parse_json(&output);
    assert_eq!(body["passed"], false);
    assert!(body["findings"]
        .as_array()
        .unwrap()
        .iter()
        .any(|f| f["rule"] == "ntp-required"));
}

// =============================================================================
// OPERATOR COMMANDS
// =============================================================================

/// Test that rollback of a finished job is refused with exit 2
#[test]
fn test_rollback_of_committed_job_is_refused() {
    let home = Home::new();
    home.intent("sw1", 1, UPLINK);
    let rows: Vec<DeployRow> = parse_json(&home.run(&["deploy", "--device", "sw1", "--json"]));
    let job_id = rows[0].job_id.clone().unwrap();

    let output = home.run(&["rollback", "--job", &job_id]);
    assert_eq!(code(&output), 2);
    assert!(String::from_utf8_lossy(&output.stderr).contains("Rollback refused"));

    let output = home.run(&["job", &job_id, "--json"]);
    assert_eq!(code(&output), 0);
    let detail: serde_json::Value = parse_json(&output);
    assert_eq!(detail["job"]["state"], "committed");
    assert!(!detail["audit"].as_array().unwrap().is_empty());
}

/// Test the approval gate through the CLI
#[test]
fn test_approval_gate_round_trip() {
    let home = Home::new();
    let mut config = FAST_CONFIG.to_string();
    config.push_str("\n[approval]\ndeploy_requires_approval = true\n");
    fs::write(home.path().join("config.toml"), config).unwrap();
    home.intent("sw1", 1, UPLINK);

    let output = home.run(&["deploy", "--device", "sw1", "--json"]);
    assert_eq!(code(&output), 0);
    let rows: Vec<DeployRow> = parse_json(&output);
    assert_eq!(rows[0].state.as_deref(), Some("awaiting_approval"));
    let job_id = rows[0].job_id.clone().unwrap();
    assert_eq!(home.running("sw1"), "");

    let output = home.run(&["approve", "--job", &job_id, "--note", "CHG-1"]);
    assert_eq!(code(&output), 0, "{}", String::from_utf8_lossy(&output.stderr));
    assert!(String::from_utf8_lossy(&output.stdout).contains("committed"));
    assert!(home.running("sw1").contains("ip address 10.1.1.1/24"));

    let output = home.run(&["cancel", "--job", &job_id]);
    assert_eq!(code(&output), 2);
}

/// Test that unlock on a healthy device is a no-op
#[test]
fn test_unlock_without_halt() {
    let home = Home::new();
    let output = home.run(&["unlock", "--device", "sw1", "--reason", "checked"]);
    assert_eq!(code(&output), 0);
    assert!(String::from_utf8_lossy(&output.stdout).contains("was not halted"));
}

/// Test that a hand edit shows up in drift-scan with a parked candidate
#[test]
fn test_drift_scan_raises_candidate() {
    let home = Home::new();
    home.intent("sw1", 1, UPLINK);
    assert_eq!(code(&home.run(&["deploy", "--device", "sw1"])), 0);

    let live = format!("{}router bgp 65999\n", home.running("sw1"));
    home.lab_file("sw1", "running.cfg", &live);

    let output = home.run(&["drift-scan", "--json"]);
    assert_eq!(code(&output), 0);
    let outcomes: serde_json::Value = parse_json(&output);
    let report = &outcomes.as_array().unwrap()[0];
    assert_eq!(report["outcome"], "report");
    assert!(report["score"].as_f64().unwrap() >= 5.0);
    assert!(report["candidate_job"].is_string());
}

/// Test that config reports the resolved home
#[test]
fn test_config_json() {
    let home = Home::new();
    let output = home.run(&["config", "--json"]);
    assert_eq!(code(&output), 0);
    let body: serde_json::Value = parse_json(&output);
    assert_eq!(body["paths"]["config_found"], true);
    assert_eq!(
        body["paths"]["home"].as_str().map(PathBuf::from),
        Some(home.path().to_path_buf())
    );
    assert_eq!(body["settings"]["retry"]["max_attempts"], 2);
}

/// Test that logs land under the state directory named by --config
#[test]
fn test_logs_follow_configured_state_dir() {
    let home = Home::new();
    let state = TempDir::new().unwrap();
    let config_path = home.path().join("elsewhere.toml");
    fs::write(
        &config_path,
        format!(
            "{}\n[paths]\nstate_dir = '{}'\n",
            FAST_CONFIG,
            state.path().display()
        ),
    )
    .unwrap();

    let output = home.run(&["--config", config_path.to_str().unwrap(), "jobs", "--json"]);
    assert_eq!(code(&output), 0);

    let logs: Vec<String> = fs::read_dir(state.path().join("logs"))
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert!(
        logs.iter().any(|name| name.starts_with("netcommit.") && name.ends_with(".log")),
        "{logs:?}"
    );
    assert!(!home.path().join("logs").exists());
}
