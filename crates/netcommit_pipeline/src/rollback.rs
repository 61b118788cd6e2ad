//! Rollback manager.
//!
//! Restores the configuration captured right before deployment, reads it
//! back, and re-runs the post-check against the assertions that held before
//! the change. The stored baseline is never the rollback target.

use crate::diff::Differ;
use crate::postcheck::{PostCheckError, PostCheckVerifier};
use crate::retry::RetryPolicy;
use crate::transport::{ApplyError, TransportAdapter, TransportError};
use netcommit_ids::DeviceId;
use netcommit_job::DeviceSnapshot;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

/// Why a restoration failed. Every variant halts the device.
#[derive(Debug, Error)]
pub enum RollbackError {
    #[error("restoring snapshot failed after {attempts} attempt(s): {source}")]
    Restore {
        attempts: u32,
        #[source]
        source: ApplyError,
    },

    #[error("reading back restored configuration failed: {0}")]
    ReadBack(#[source] TransportError),

    #[error("restored configuration differs from the snapshot in {differences} line(s)")]
    Mismatch { differences: usize },

    #[error("restored device failed re-verification: {0}")]
    Reverify(#[source] PostCheckError),
}

/// Successful restoration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollbackReport {
    pub attempts: u32,
    pub reverified: usize,
}

pub struct RollbackManager {
    retry: RetryPolicy,
    verifier: PostCheckVerifier,
    differ: Arc<Differ>,
}

impl RollbackManager {
    pub fn new(retry: RetryPolicy, verifier: PostCheckVerifier, differ: Arc<Differ>) -> Self {
        Self {
            retry,
            verifier,
            differ,
        }
    }

    /// Put `snapshot` back on the device and prove it took.
    pub fn restore(
        &self,
        transport: &dyn TransportAdapter,
        device: &DeviceId,
        snapshot: &DeviceSnapshot,
    ) -> Result<RollbackReport, RollbackError> {
        info!(device = %device, hash = %snapshot.content_hash, "Restoring pre-deployment snapshot");

        let (applied, attempts) = self.retry.run(
            "snapshot restore",
            ApplyError::is_retryable,
            || transport.apply(device, &snapshot.content),
        );
        applied.map_err(|source| RollbackError::Restore { attempts, source })?;

        let (live, _) = self.retry.run(
            "restore read-back",
            TransportError::is_retryable,
            || transport.read_config(device),
        );
        let live = live.map_err(RollbackError::ReadBack)?;
        let differences = self.differ.diff(&snapshot.content, &live).len();
        if differences > 0 {
            warn!(device = %device, differences, "Restored configuration does not match snapshot");
            return Err(RollbackError::Mismatch { differences });
        }

        self.verifier
            .verify(transport, device, &snapshot.holding_assertions, &|| false)
            .map_err(RollbackError::Reverify)?;

        info!(device = %device, attempts, "Snapshot restored and re-verified");
        Ok(RollbackReport {
            attempts,
            reverified: snapshot.holding_assertions.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{MemoryTransport, ScriptedFault};
    use netcommit_protocol::defaults::DEFAULT_VOLATILE_PATTERNS;
    use netcommit_protocol::Assertion;
    use std::time::Duration;

    fn manager() -> RollbackManager {
        RollbackManager::new(
            RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(2),
                multiplier: 2,
            },
            PostCheckVerifier {
                timeout: Duration::from_millis(20),
                initial_interval: Duration::from_millis(2),
                max_interval: Duration::from_millis(5),
            },
            Arc::new(Differ::new(DEFAULT_VOLATILE_PATTERNS).unwrap()),
        )
    }

    fn snapshot() -> DeviceSnapshot {
        DeviceSnapshot::new(
            "hostname sw1\ninterface eth0\n".to_string(),
            vec![Assertion::InterfaceUp {
                interface: "eth0".into(),
            }],
        )
    }

    #[test]
    fn test_restore_succeeds_after_transient_errors() {
        let transport = MemoryTransport::new();
        let device = DeviceId::parse("sw1").unwrap();
        transport.set_running(&device, "hostname broken\n");
        transport.script_applies(&device, vec![Some(ScriptedFault::Transport("reset".into()))]);

        let report = manager().restore(&transport, &device, &snapshot()).unwrap();
        assert_eq!(report.attempts, 2);
        assert_eq!(report.reverified, 1);
        assert_eq!(transport.running(&device), "hostname sw1\ninterface eth0\n");
    }

    #[test]
    fn test_restore_exhausts_retries() {
        let transport = MemoryTransport::new();
        let device = DeviceId::parse("sw1").unwrap();
        let fault = Some(ScriptedFault::Transport("reset".into()));
        transport.script_applies(&device, vec![fault.clone(), fault.clone(), fault]);

        match manager().restore(&transport, &device, &snapshot()) {
            Err(RollbackError::Restore { attempts, .. }) => assert_eq!(attempts, 3),
            other => panic!("expected restore failure, got {other:?}"),
        }
    }

    #[test]
    fn test_rejected_restore_is_not_retried() {
        let transport = MemoryTransport::new();
        let device = DeviceId::parse("sw1").unwrap();
        transport.script_applies(&device, vec![Some(ScriptedFault::Reject("no".into()))]);

        assert!(matches!(
            manager().restore(&transport, &device, &snapshot()),
            Err(RollbackError::Restore { attempts: 1, .. })
        ));
        assert_eq!(transport.apply_calls(&device), 1);
    }

    #[test]
    fn test_reverify_failure() {
        let transport = MemoryTransport::new();
        let device = DeviceId::parse("sw1").unwrap();
        transport.set_interface_down(&device, "eth0", true);

        assert!(matches!(
            manager().restore(&transport, &device, &snapshot()),
            Err(RollbackError::Reverify(_))
        ));
    }
}
