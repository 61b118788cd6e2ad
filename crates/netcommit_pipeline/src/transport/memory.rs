//! In-memory programmable devices.

use super::{ApplyError, ApplyResult, OperState, TransportAdapter, TransportError};
use netcommit_ids::DeviceId;
use netcommit_protocol::Assertion;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

/// A failure injected into the next call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedFault {
    /// Fail with a session error (retryable)
    Transport(String),
    /// Refuse the configuration (apply only)
    Reject(String),
}

#[derive(Debug, Default)]
struct MemoryDevice {
    running: String,
    oper: OperState,
    unreachable: bool,
    /// Consumed one per apply; `None` lets that apply through
    apply_script: VecDeque<Option<ScriptedFault>>,
    read_script: VecDeque<Option<ScriptedFault>>,
    applied: Vec<String>,
    apply_calls: usize,
}

/// Transport over in-memory devices. Devices spring into existence with an
/// empty configuration on first use.
#[derive(Debug, Default)]
pub struct MemoryTransport {
    devices: Mutex<HashMap<DeviceId, MemoryDevice>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_device<T>(&self, device: &DeviceId, f: impl FnOnce(&mut MemoryDevice) -> T) -> T {
        let mut devices = self.devices.lock().expect("Device map lock poisoned");
        f(devices.entry(device.clone()).or_default())
    }

    pub fn set_running(&self, device: &DeviceId, content: impl Into<String>) {
        let content = content.into();
        self.with_device(device, |d| d.running = content);
    }

    pub fn running(&self, device: &DeviceId) -> String {
        self.with_device(device, |d| d.running.clone())
    }

    pub fn set_unreachable(&self, device: &DeviceId, unreachable: bool) {
        self.with_device(device, |d| d.unreachable = unreachable);
    }

    pub fn set_interface_down(&self, device: &DeviceId, interface: &str, down: bool) {
        self.with_device(device, |d| toggle(&mut d.oper.down_interfaces, interface, down));
    }

    pub fn set_peer_down(&self, device: &DeviceId, peer: &str, down: bool) {
        self.with_device(device, |d| toggle(&mut d.oper.down_peers, peer, down));
    }

    /// Script the outcome of upcoming applies, in order.
    pub fn script_applies(&self, device: &DeviceId, script: Vec<Option<ScriptedFault>>) {
        self.with_device(device, |d| d.apply_script.extend(script));
    }

    /// Script the outcome of upcoming config reads, in order.
    pub fn script_reads(&self, device: &DeviceId, script: Vec<Option<ScriptedFault>>) {
        self.with_device(device, |d| d.read_script.extend(script));
    }

    /// Every configuration successfully applied, oldest first.
    pub fn applied(&self, device: &DeviceId) -> Vec<String> {
        self.with_device(device, |d| d.applied.clone())
    }

    /// Apply calls made, including failed ones.
    pub fn apply_calls(&self, device: &DeviceId) -> usize {
        self.with_device(device, |d| d.apply_calls)
    }
}

fn toggle(set: &mut std::collections::BTreeSet<String>, item: &str, present: bool) {
    if present {
        set.insert(item.to_string());
    } else {
        set.remove(item);
    }
}

fn unreachable(device: &DeviceId) -> TransportError {
    TransportError::Unreachable {
        device: device.clone(),
        message: "memory device marked unreachable".to_string(),
    }
}

impl TransportAdapter for MemoryTransport {
    fn read_config(&self, device: &DeviceId) -> Result<String, TransportError> {
        self.with_device(device, |d| {
            if d.unreachable {
                return Err(unreachable(device));
            }
            match d.read_script.pop_front().flatten() {
                Some(ScriptedFault::Transport(message)) | Some(ScriptedFault::Reject(message)) => {
                    Err(TransportError::Session {
                        device: device.clone(),
                        message,
                    })
                }
                None => Ok(d.running.clone()),
            }
        })
    }

    fn apply(&self, device: &DeviceId, content: &str) -> Result<ApplyResult, ApplyError> {
        self.with_device(device, |d| {
            d.apply_calls += 1;
            if d.unreachable {
                return Err(unreachable(device).into());
            }
            match d.apply_script.pop_front().flatten() {
                Some(ScriptedFault::Transport(message)) => {
                    Err(ApplyError::Transport(TransportError::Session {
                        device: device.clone(),
                        message,
                    }))
                }
                Some(ScriptedFault::Reject(message)) => Err(ApplyError::Rejected {
                    device: device.clone(),
                    message,
                }),
                None => {
                    let changed = d.running != content;
                    d.running = content.to_string();
                    d.applied.push(content.to_string());
                    Ok(ApplyResult {
                        changed,
                        output: String::new(),
                    })
                }
            }
        })
    }

    fn check_assertions(
        &self,
        device: &DeviceId,
        assertions: &[Assertion],
    ) -> Result<bool, TransportError> {
        self.with_device(device, |d| {
            if d.unreachable {
                return Err(unreachable(device));
            }
            Ok(assertions.iter().all(|a| d.oper.holds(&d.running, a)))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_is_consumed_in_order() {
        let transport = MemoryTransport::new();
        let device = DeviceId::parse("sw1").unwrap();
        transport.script_applies(
            &device,
            vec![Some(ScriptedFault::Transport("reset".into())), None],
        );

        assert!(matches!(
            transport.apply(&device, "a\n"),
            Err(ApplyError::Transport(_))
        ));
        assert!(transport.apply(&device, "a\n").is_ok());
        assert!(transport.apply(&device, "b\n").is_ok());
        assert_eq!(transport.applied(&device), vec!["a\n", "b\n"]);
        assert_eq!(transport.apply_calls(&device), 3);
        assert_eq!(transport.running(&device), "b\n");
    }

    #[test]
    fn test_peer_down() {
        let transport = MemoryTransport::new();
        let device = DeviceId::parse("sw1").unwrap();
        transport.set_running(&device, "router bgp 1\n  neighbor 10.0.0.2 remote-as 2\n");
        let peer = [Assertion::PeerEstablished {
            peer: "10.0.0.2".into(),
        }];
        assert!(transport.check_assertions(&device, &peer).unwrap());
        transport.set_peer_down(&device, "10.0.0.2", true);
        assert!(!transport.check_assertions(&device, &peer).unwrap());
    }
}
