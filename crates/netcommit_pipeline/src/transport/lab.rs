//! File-backed lab devices.
//!
//! # Layout
//!
//! ```text
//! <lab_dir>/<device>/
//! ├── running.<ext>    # running configuration (cfg | json | yaml)
//! ├── oper.json        # optional OperState overrides
//! ├── reject           # present: applies are refused with its contents
//! └── unreachable      # present: every session fails
//! ```

use super::{ApplyError, ApplyResult, OperState, TransportAdapter, TransportError};
use netcommit_ids::DeviceId;
use netcommit_protocol::{Assertion, DeviceFamily};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Transport over a directory of simulated devices.
#[derive(Debug, Clone)]
pub struct LabTransport {
    root: PathBuf,
    family: DeviceFamily,
}

impl LabTransport {
    pub fn new(root: PathBuf, family: DeviceFamily) -> Self {
        Self { root, family }
    }

    pub fn device_dir(&self, device: &DeviceId) -> PathBuf {
        self.root.join(device.as_str())
    }

    pub fn running_path(&self, device: &DeviceId) -> PathBuf {
        self.device_dir(device)
            .join(format!("running.{}", self.family.config_extension()))
    }

    fn session_error(device: &DeviceId, path: &Path, err: std::io::Error) -> TransportError {
        TransportError::Session {
            device: device.clone(),
            message: format!("{}: {}", path.display(), err),
        }
    }

    fn ensure_reachable(&self, device: &DeviceId) -> Result<(), TransportError> {
        let marker = self.device_dir(device).join("unreachable");
        if marker.exists() {
            let message = fs::read_to_string(&marker)
                .ok()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| "lab device marked unreachable".to_string());
            return Err(TransportError::Unreachable {
                device: device.clone(),
                message,
            });
        }
        Ok(())
    }

    fn oper_state(&self, device: &DeviceId) -> Result<OperState, TransportError> {
        let path = self.device_dir(device).join("oper.json");
        if !path.exists() {
            return Ok(OperState::default());
        }
        let content =
            fs::read_to_string(&path).map_err(|e| Self::session_error(device, &path, e))?;
        serde_json::from_str(&content).map_err(|e| TransportError::Session {
            device: device.clone(),
            message: format!("invalid {}: {}", path.display(), e),
        })
    }
}

impl TransportAdapter for LabTransport {
    fn read_config(&self, device: &DeviceId) -> Result<String, TransportError> {
        self.ensure_reachable(device)?;
        let path = self.running_path(device);
        if !path.exists() {
            return Ok(String::new());
        }
        fs::read_to_string(&path).map_err(|e| Self::session_error(device, &path, e))
    }

    fn apply(&self, device: &DeviceId, content: &str) -> Result<ApplyResult, ApplyError> {
        self.ensure_reachable(device)?;
        let dir = self.device_dir(device);
        let reject = dir.join("reject");
        if reject.exists() {
            let message = fs::read_to_string(&reject)
                .map(|s| s.trim().to_string())
                .unwrap_or_default();
            return Err(ApplyError::Rejected {
                device: device.clone(),
                message: if message.is_empty() {
                    "configuration refused".to_string()
                } else {
                    message
                },
            });
        }

        fs::create_dir_all(&dir).map_err(|e| Self::session_error(device, &dir, e))?;
        let path = self.running_path(device);
        let previous = fs::read_to_string(&path).unwrap_or_default();
        let temp = dir.join(format!(".running.{}.tmp", uuid::Uuid::new_v4()));
        fs::write(&temp, content).map_err(|e| Self::session_error(device, &temp, e))?;
        fs::rename(&temp, &path).map_err(|e| Self::session_error(device, &path, e))?;

        debug!(device = %device, bytes = content.len(), "Lab device configuration replaced");
        Ok(ApplyResult {
            changed: previous != content,
            output: format!("wrote {}", path.display()),
        })
    }

    fn check_assertions(
        &self,
        device: &DeviceId,
        assertions: &[Assertion],
    ) -> Result<bool, TransportError> {
        let running = self.read_config(device)?;
        let oper = self.oper_state(device)?;
        Ok(assertions.iter().all(|a| oper.holds(&running, a)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, LabTransport, DeviceId) {
        let temp = TempDir::new().unwrap();
        let lab = LabTransport::new(temp.path().to_path_buf(), DeviceFamily::Cli);
        (temp, lab, DeviceId::parse("sw1").unwrap())
    }

    #[test]
    fn test_fresh_device_is_empty_and_apply_writes() {
        let (_temp, lab, device) = setup();
        assert_eq!(lab.read_config(&device).unwrap(), "");
        let result = lab.apply(&device, "hostname sw1\n").unwrap();
        assert!(result.changed);
        assert_eq!(lab.read_config(&device).unwrap(), "hostname sw1\n");
        assert!(!lab.apply(&device, "hostname sw1\n").unwrap().changed);
    }

    #[test]
    fn test_fault_markers() {
        let (_temp, lab, device) = setup();
        let dir = lab.device_dir(&device);
        fs::create_dir_all(&dir).unwrap();

        fs::write(dir.join("reject"), "% Invalid input detected\n").unwrap();
        match lab.apply(&device, "x\n") {
            Err(ApplyError::Rejected { message, .. }) => {
                assert_eq!(message, "% Invalid input detected")
            }
            other => panic!("expected rejection, got {other:?}"),
        }
        fs::remove_file(dir.join("reject")).unwrap();

        fs::write(dir.join("unreachable"), "").unwrap();
        assert!(matches!(
            lab.read_config(&device),
            Err(TransportError::Unreachable { .. })
        ));
        assert!(matches!(
            lab.apply(&device, "x\n"),
            Err(ApplyError::Transport(TransportError::Unreachable { .. }))
        ));
    }

    #[test]
    fn test_assertions_follow_oper_file() {
        let (_temp, lab, device) = setup();
        lab.apply(&device, "interface eth0\n  ip address 10.1.1.1/24\n")
            .unwrap();
        let up = [Assertion::InterfaceUp {
            interface: "eth0".into(),
        }];
        assert!(lab.check_assertions(&device, &up).unwrap());

        fs::write(
            lab.device_dir(&device).join("oper.json"),
            r#"{"down_interfaces": ["eth0"]}"#,
        )
        .unwrap();
        assert!(!lab.check_assertions(&device, &up).unwrap());
    }
}
