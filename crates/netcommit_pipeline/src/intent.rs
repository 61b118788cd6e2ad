//! Intent client.
//!
//! The pipeline only reads intent: a versioned, read-only snapshot of what a
//! device should look like. Storage and modeling of that data live elsewhere;
//! [`IntentStore`] is the narrow interface the pipeline depends on.
//!
//! # Storage Format ([`FileIntentStore`])
//!
//! ```text
//! <intent_dir>/
//! ├── core-sw01/
//! │   ├── v1.yaml
//! │   └── v2.yaml      <- latest
//! └── edge-rtr01/
//!     └── v1.yaml
//! ```

use netcommit_ids::DeviceId;
use netcommit_protocol::{Assertion, DeviceFamily};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use thiserror::Error;
use tracing::debug;

/// Errors reading intent.
#[derive(Debug, Error)]
pub enum IntentError {
    #[error("no intent found for device {0}")]
    DeviceNotFound(DeviceId),

    #[error("intent version {version} not found for device {device}")]
    VersionNotFound { device: DeviceId, version: u64 },

    #[error("failed to read intent {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse intent {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("intent {path} names device {found}, expected {expected}")]
    DeviceMismatch {
        path: PathBuf,
        expected: DeviceId,
        found: DeviceId,
    },
}

// ============================================================================
// Intent record
// ============================================================================

/// Desired state of one device at one intent version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentRecord {
    pub device: DeviceId,
    /// Assigned by the store; files do not need to carry it
    #[serde(default)]
    pub version: u64,
    pub family: DeviceFamily,
    #[serde(default)]
    pub site: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub interfaces: Vec<InterfaceIntent>,
    #[serde(default)]
    pub routing: RoutingIntent,
    #[serde(default)]
    pub services: ServicesIntent,
    /// Operational assertions beyond the ones derived from interfaces and peers
    #[serde(default)]
    pub assertions: Vec<Assertion>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterfaceIntent {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// CIDR address, e.g. `10.1.1.1/24`
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub vlans: Vec<u16>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoutingIntent {
    #[serde(default)]
    pub asn: Option<u32>,
    #[serde(default)]
    pub router_id: Option<String>,
    #[serde(default)]
    pub neighbors: Vec<BgpNeighbor>,
    #[serde(default)]
    pub static_routes: Vec<StaticRoute>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BgpNeighbor {
    pub address: String,
    pub remote_as: u32,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaticRoute {
    pub prefix: String,
    pub next_hop: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServicesIntent {
    #[serde(default)]
    pub ntp_servers: Vec<String>,
    #[serde(default)]
    pub dns_servers: Vec<String>,
    #[serde(default)]
    pub syslog_servers: Vec<String>,
}

impl IntentRecord {
    /// Minimal record; fill in the rest with struct update syntax.
    pub fn new(device: DeviceId, family: DeviceFamily, hostname: impl Into<String>) -> Self {
        Self {
            device,
            version: 0,
            family,
            site: None,
            role: None,
            hostname: hostname.into(),
            interfaces: Vec::new(),
            routing: RoutingIntent::default(),
            services: ServicesIntent::default(),
            assertions: Vec::new(),
        }
    }

    /// Assertions the post-check verifier must see hold after a deploy.
    ///
    /// Every enabled interface with an address must be up, every BGP
    /// neighbor must be established, then any explicit assertions. Order is
    /// stable and duplicates are dropped.
    pub fn derive_assertions(&self) -> Vec<Assertion> {
        let mut out: Vec<Assertion> = Vec::new();
        let derived = self
            .interfaces
            .iter()
            .filter(|iface| iface.enabled && iface.address.is_some())
            .map(|iface| Assertion::InterfaceUp {
                interface: iface.name.clone(),
            })
            .chain(
                self.routing
                    .neighbors
                    .iter()
                    .map(|n| Assertion::PeerEstablished {
                        peer: n.address.clone(),
                    }),
            )
            .chain(self.assertions.iter().cloned());
        for assertion in derived {
            if !out.contains(&assertion) {
                out.push(assertion);
            }
        }
        out
    }
}

// ============================================================================
// Store interface
// ============================================================================

/// Read-only access to versioned intent.
pub trait IntentStore: Send + Sync {
    /// Fetch a device's intent. `None` means the latest version.
    fn get_intent(
        &self,
        device: &DeviceId,
        version: Option<u64>,
    ) -> Result<IntentRecord, IntentError>;

    /// Every device with at least one intent version, sorted.
    fn list_devices(&self) -> Result<Vec<DeviceId>, IntentError>;
}

/// Intent store backed by a directory of YAML files.
pub struct FileIntentStore {
    dir: PathBuf,
}

impl FileIntentStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn device_dir(&self, device: &DeviceId) -> PathBuf {
        self.dir.join(device.as_str())
    }

    /// Versions present for a device, ascending.
    fn versions(&self, device: &DeviceId) -> Result<Vec<u64>, IntentError> {
        let dir = self.device_dir(device);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let entries = fs::read_dir(&dir).map_err(|source| IntentError::Io {
            path: dir.clone(),
            source,
        })?;
        let mut versions = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| IntentError::Io {
                path: dir.clone(),
                source,
            })?;
            if let Some(version) = entry.file_name().to_str().and_then(parse_version_file) {
                versions.push(version);
            }
        }
        versions.sort_unstable();
        Ok(versions)
    }

    /// Write a record as the next version. Used by tooling and tests; the
    /// pipeline itself never writes intent.
    pub fn put(&self, record: &IntentRecord) -> Result<u64, IntentError> {
        let dir = self.device_dir(&record.device);
        fs::create_dir_all(&dir).map_err(|source| IntentError::Io {
            path: dir.clone(),
            source,
        })?;
        let version = self.versions(&record.device)?.last().copied().unwrap_or(0) + 1;
        let path = dir.join(format!("v{}.yaml", version));
        let mut record = record.clone();
        record.version = version;
        let yaml = serde_yaml::to_string(&record).map_err(|e| IntentError::Parse {
            path: path.clone(),
            message: e.to_string(),
        })?;
        fs::write(&path, yaml).map_err(|source| IntentError::Io {
            path: path.clone(),
            source,
        })?;
        Ok(version)
    }
}

fn parse_version_file(name: &str) -> Option<u64> {
    name.strip_prefix('v')?
        .strip_suffix(".yaml")?
        .parse()
        .ok()
}

impl IntentStore for FileIntentStore {
    fn get_intent(
        &self,
        device: &DeviceId,
        version: Option<u64>,
    ) -> Result<IntentRecord, IntentError> {
        let versions = self.versions(device)?;
        let version = match version {
            Some(v) if versions.contains(&v) => v,
            Some(v) => {
                return Err(IntentError::VersionNotFound {
                    device: device.clone(),
                    version: v,
                })
            }
            None => *versions
                .last()
                .ok_or_else(|| IntentError::DeviceNotFound(device.clone()))?,
        };

        let path = self.device_dir(device).join(format!("v{}.yaml", version));
        let content = fs::read_to_string(&path).map_err(|source| IntentError::Io {
            path: path.clone(),
            source,
        })?;
        let mut record: IntentRecord =
            serde_yaml::from_str(&content).map_err(|e| IntentError::Parse {
                path: path.clone(),
                message: e.to_string(),
            })?;
        if &record.device != device {
            return Err(IntentError::DeviceMismatch {
                path,
                expected: device.clone(),
                found: record.device,
            });
        }
        record.version = version;
        debug!(device = %device, version, "Loaded intent");
        Ok(record)
    }

    fn list_devices(&self) -> Result<Vec<DeviceId>, IntentError> {
        if !self.dir.is_dir() {
            return Ok(Vec::new());
        }
        let entries = fs::read_dir(&self.dir).map_err(|source| IntentError::Io {
            path: self.dir.clone(),
            source,
        })?;
        let mut devices = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| IntentError::Io {
                path: self.dir.clone(),
                source,
            })?;
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            let Ok(device) = DeviceId::parse(&name) else {
                continue;
            };
            if !self.versions(&device)?.is_empty() {
                devices.push(device);
            }
        }
        devices.sort();
        Ok(devices)
    }
}

/// In-memory intent store for embedding and tests.
#[derive(Default)]
pub struct MemoryIntentStore {
    records: RwLock<HashMap<DeviceId, BTreeMap<u64, IntentRecord>>>,
}

impl MemoryIntentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a record as the next version of its device and return the version.
    pub fn put(&self, record: IntentRecord) -> u64 {
        let mut records = self.records.write().expect("Intent map lock poisoned");
        let versions = records.entry(record.device.clone()).or_default();
        let version = versions.keys().next_back().copied().unwrap_or(0) + 1;
        let mut record = record;
        record.version = version;
        versions.insert(version, record);
        version
    }
}

impl IntentStore for MemoryIntentStore {
    fn get_intent(
        &self,
        device: &DeviceId,
        version: Option<u64>,
    ) -> Result<IntentRecord, IntentError> {
        let records = self.records.read().expect("Intent map lock poisoned");
        let versions = records
            .get(device)
            .ok_or_else(|| IntentError::DeviceNotFound(device.clone()))?;
        let found = match version {
            Some(v) => versions.get(&v),
            None => versions.values().next_back(),
        };
        match (found, version) {
            (Some(record), _) => Ok(record.clone()),
            (None, Some(v)) => Err(IntentError::VersionNotFound {
                device: device.clone(),
                version: v,
            }),
            (None, None) => Err(IntentError::DeviceNotFound(device.clone())),
        }
    }

    fn list_devices(&self) -> Result<Vec<DeviceId>, IntentError> {
        let records = self.records.read().expect("Intent map lock poisoned");
        let mut devices: Vec<DeviceId> = records.keys().cloned().collect();
        devices.sort();
        Ok(devices)
    }
}
