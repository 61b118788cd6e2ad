//! Post-check verifier.
//!
//! Polls a device until every operational assertion holds or the deadline
//! passes. Transport errors during a poll count as "not yet". The verifier
//! only reads; it never changes configuration.

use crate::transport::TransportAdapter;
use netcommit_ids::DeviceId;
use netcommit_protocol::config::PostCheckConfig;
use netcommit_protocol::Assertion;
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PostCheckError {
    #[error("post-check timed out after {elapsed_ms} ms; not holding: {}", describe(.pending))]
    Timeout {
        elapsed_ms: u64,
        pending: Vec<Assertion>,
    },

    #[error("post-check interrupted")]
    Interrupted,
}

fn describe(pending: &[Assertion]) -> String {
    if pending.is_empty() {
        "unknown (device unreachable)".to_string()
    } else {
        pending
            .iter()
            .map(|a| a.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[derive(Debug, Clone)]
pub struct PostCheckVerifier {
    pub timeout: Duration,
    pub initial_interval: Duration,
    pub max_interval: Duration,
}

impl PostCheckVerifier {
    pub fn from_config(config: &PostCheckConfig) -> Self {
        Self {
            timeout: Duration::from_millis(config.timeout_ms),
            initial_interval: Duration::from_millis(config.initial_interval_ms.max(1)),
            max_interval: Duration::from_millis(config.max_interval_ms.max(1)),
        }
    }

    /// Wait for `assertions` to hold on `device`.
    ///
    /// `interrupted` is consulted between polls; returning true stops the
    /// wait with [`PostCheckError::Interrupted`].
    pub fn verify(
        &self,
        transport: &dyn TransportAdapter,
        device: &DeviceId,
        assertions: &[Assertion],
        interrupted: &dyn Fn() -> bool,
    ) -> Result<(), PostCheckError> {
        if assertions.is_empty() {
            debug!(device = %device, "No assertions to verify");
            return Ok(());
        }

        let started = Instant::now();
        let mut interval = self.initial_interval;
        let mut polls = 0u32;
        loop {
            if interrupted() {
                return Err(PostCheckError::Interrupted);
            }
            polls += 1;
            match transport.check_assertions(device, assertions) {
                Ok(true) => {
                    info!(
                        device = %device,
                        polls,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Post-check passed"
                    );
                    return Ok(());
                }
                Ok(false) => debug!(device = %device, polls, "Assertions not holding yet"),
                Err(e) => debug!(device = %device, polls, "Post-check poll failed: {}", e),
            }

            let elapsed = started.elapsed();
            if elapsed >= self.timeout {
                return Err(PostCheckError::Timeout {
                    elapsed_ms: elapsed.as_millis() as u64,
                    pending: pending_assertions(transport, device, assertions),
                });
            }
            thread::sleep(interval.min(self.timeout - elapsed));
            interval = (interval * 2).min(self.max_interval);
        }
    }

    /// Assertions that hold right now, each checked on its own. Unreachable
    /// devices hold nothing.
    pub fn probe(
        &self,
        transport: &dyn TransportAdapter,
        device: &DeviceId,
        assertions: &[Assertion],
    ) -> Vec<Assertion> {
        assertions
            .iter()
            .filter(|a| {
                transport
                    .check_assertions(device, std::slice::from_ref(*a))
                    .unwrap_or(false)
            })
            .cloned()
            .collect()
    }
}

fn pending_assertions(
    transport: &dyn TransportAdapter,
    device: &DeviceId,
    assertions: &[Assertion],
) -> Vec<Assertion> {
    let mut pending = Vec::new();
    for assertion in assertions {
        match transport.check_assertions(device, std::slice::from_ref(assertion)) {
            Ok(true) => {}
            Ok(false) => pending.push(assertion.clone()),
            Err(_) => return Vec::new(),
        }
    }
    pending
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryTransport;
    use std::cell::Cell;

    fn verifier(timeout_ms: u64) -> PostCheckVerifier {
        PostCheckVerifier {
            timeout: Duration::from_millis(timeout_ms),
            initial_interval: Duration::from_millis(2),
            max_interval: Duration::from_millis(5),
        }
    }

    fn setup() -> (MemoryTransport, DeviceId, Vec<Assertion>) {
        let transport = MemoryTransport::new();
        let device = DeviceId::parse("sw1").unwrap();
        transport.set_running(&device, "interface eth0\nrouter bgp 1\n  neighbor 10.0.0.2 remote-as 2\n");
        let assertions = vec![
            Assertion::InterfaceUp {
                interface: "eth0".into(),
            },
            Assertion::PeerEstablished {
                peer: "10.0.0.2".into(),
            },
        ];
        (transport, device, assertions)
    }

    #[test]
    fn test_passes_when_assertions_hold() {
        let (transport, device, assertions) = setup();
        assert!(verifier(100)
            .verify(&transport, &device, &assertions, &|| false)
            .is_ok());
    }

    #[test]
    fn test_times_out_and_lists_pending() {
        let (transport, device, assertions) = setup();
        transport.set_peer_down(&device, "10.0.0.2", true);
        match verifier(20).verify(&transport, &device, &assertions, &|| false) {
            Err(PostCheckError::Timeout { pending, .. }) => {
                assert_eq!(pending, vec![assertions[1].clone()]);
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[test]
    fn test_unreachable_counts_as_not_yet() {
        let (transport, device, assertions) = setup();
        transport.set_unreachable(&device, true);
        assert!(matches!(
            verifier(15).verify(&transport, &device, &assertions, &|| false),
            Err(PostCheckError::Timeout { .. })
        ));
    }

    #[test]
    fn test_interrupt_stops_polling() {
        let (transport, device, assertions) = setup();
        transport.set_peer_down(&device, "10.0.0.2", true);
        let polls = Cell::new(0);
        let result = verifier(10_000).verify(&transport, &device, &assertions, &|| {
            polls.set(polls.get() + 1);
            polls.get() > 2
        });
        assert_eq!(result, Err(PostCheckError::Interrupted));
    }

    #[test]
    fn test_probe_reports_holding_subset() {
        let (transport, device, assertions) = setup();
        transport.set_interface_down(&device, "eth0", true);
        let holding = verifier(10).probe(&transport, &device, &assertions);
        assert_eq!(holding, vec![assertions[1].clone()]);
    }
}
