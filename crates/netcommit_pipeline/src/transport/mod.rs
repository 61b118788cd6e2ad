//! Transport adapters.
//!
//! One [`TransportAdapter`] per device family talks to devices: it reads the
//! running configuration, applies new configuration and answers operational
//! assertions. Vendor protocols live behind this trait; the pipeline ships a
//! file-backed lab adapter and an in-memory adapter.

mod lab;
mod memory;

pub use lab::LabTransport;
pub use memory::{MemoryTransport, ScriptedFault};

use netcommit_ids::DeviceId;
use netcommit_protocol::{Assertion, DeviceFamily};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use thiserror::Error;

/// Connectivity or session failure. Retried with backoff.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("device {device} unreachable: {message}")]
    Unreachable { device: DeviceId, message: String },

    #[error("session with {device} failed: {message}")]
    Session { device: DeviceId, message: String },

    #[error("no transport configured for family {0}")]
    Unsupported(DeviceFamily),
}

impl TransportError {
    /// Unsupported families are a setup problem, not a flaky link.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, TransportError::Unsupported(_))
    }
}

/// Failure applying configuration.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ApplyError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The device refused the configuration. Never retried.
    #[error("device {device} rejected configuration: {message}")]
    Rejected { device: DeviceId, message: String },
}

impl ApplyError {
    pub fn is_retryable(&self) -> bool {
        match self {
            ApplyError::Transport(e) => e.is_retryable(),
            ApplyError::Rejected { .. } => false,
        }
    }
}

/// Outcome of a successful apply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyResult {
    /// Whether the running configuration differs from before
    pub changed: bool,
    #[serde(default)]
    pub output: String,
}

/// Device access for one family.
pub trait TransportAdapter: Send + Sync {
    /// Current running configuration.
    fn read_config(&self, device: &DeviceId) -> Result<String, TransportError>;

    /// Replace the running configuration.
    fn apply(&self, device: &DeviceId, content: &str) -> Result<ApplyResult, ApplyError>;

    /// Whether every assertion holds right now.
    fn check_assertions(
        &self,
        device: &DeviceId,
        assertions: &[Assertion],
    ) -> Result<bool, TransportError>;
}

/// Family -> adapter routing.
#[derive(Clone, Default)]
pub struct TransportSet {
    adapters: BTreeMap<DeviceFamily, Arc<dyn TransportAdapter>>,
}

impl TransportSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// The same adapter for every family.
    pub fn uniform(adapter: Arc<dyn TransportAdapter>) -> Self {
        let mut set = Self::new();
        for family in DeviceFamily::ALL {
            set.adapters.insert(family, adapter.clone());
        }
        set
    }

    pub fn with(mut self, family: DeviceFamily, adapter: Arc<dyn TransportAdapter>) -> Self {
        self.adapters.insert(family, adapter);
        self
    }

    pub fn get(&self, family: DeviceFamily) -> Result<Arc<dyn TransportAdapter>, TransportError> {
        self.adapters
            .get(&family)
            .cloned()
            .ok_or(TransportError::Unsupported(family))
    }
}

impl std::fmt::Debug for TransportSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportSet")
            .field("families", &self.adapters.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Simulated operational state: everything configured is up unless listed here.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperState {
    #[serde(default)]
    pub down_interfaces: BTreeSet<String>,
    #[serde(default)]
    pub down_peers: BTreeSet<String>,
    #[serde(default)]
    pub missing_routes: BTreeSet<String>,
}

impl OperState {
    /// Evaluate an assertion against a simulated device.
    ///
    /// The object must appear in the running configuration as a whole token
    /// and must not be marked down.
    pub fn holds(&self, running: &str, assertion: &Assertion) -> bool {
        let (token, down) = match assertion {
            Assertion::InterfaceUp { interface } => (interface, &self.down_interfaces),
            Assertion::PeerEstablished { peer } => (peer, &self.down_peers),
            Assertion::RoutePresent { prefix } => (prefix, &self.missing_routes),
        };
        !down.contains(token) && mentions(running, token)
    }
}

fn mentions(running: &str, token: &str) -> bool {
    let pattern = format!(r"(^|[^\w./-]){}($|[^\w./-])", regex::escape(token));
    match Regex::new(&pattern) {
        Ok(re) => running.lines().any(|line| re.is_match(line)),
        Err(_) => running.contains(token),
    }
}
