//! Per-device serialization.
//!
//! A device is locked at two levels: an in-process table shared by the
//! worker threads, and an exclusive `fs2` file lock under the locks
//! directory so separate `netcommit` processes cannot touch the same device
//! at once. Each held lock has a JSON sidecar naming its holder.
//!
//! A failed rollback escalates the lock to a persistent halt marker
//! (`<device>.halt`). Halted devices refuse every lock request until the
//! marker is cleared by an operator.
//!
//! ```text
//! <locks_dir>/
//! ├── core-sw01.lock
//! ├── core-sw01.lock.json    # sidecar while held
//! └── edge-rtr01.halt        # persistent until `netcommit unlock`
//! ```

use chrono::{DateTime, Utc};
use fs2::FileExt;
use netcommit_ids::{DeviceId, JobId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::cancel::CancellationToken;

/// Errors from lock operations.
#[derive(Debug, Error)]
pub enum LockError {
    #[error("device {device} is busy ({holder})")]
    Busy { device: DeviceId, holder: String },

    #[error("device {device} is halted after a failed rollback of job {}; run `netcommit unlock`", .record.job_id)]
    Halted { device: DeviceId, record: HaltRecord },

    #[error("timed out after {waited_ms} ms waiting for device {device}")]
    Timeout { device: DeviceId, waited_ms: u64 },

    #[error("lock wait for device {0} cancelled")]
    Cancelled(DeviceId),

    #[error("lock file error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Who holds a device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LockHolder {
    Job { job_id: JobId },
    DriftScan,
}

impl fmt::Display for LockHolder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockHolder::Job { job_id } => write!(f, "job {}", job_id),
            LockHolder::DriftScan => write!(f, "drift scan"),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct LockSidecar {
    pid: u32,
    holder: LockHolder,
    timestamp: String,
}

/// Persistent marker left by a failed rollback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HaltRecord {
    pub device: DeviceId,
    pub job_id: JobId,
    pub reason: String,
    pub halted_at: DateTime<Utc>,
}

/// Lock table for all devices.
#[derive(Debug, Clone)]
pub struct DeviceLocks {
    dir: PathBuf,
    /// INVARIANT: Lock held only for HashMap insert/remove/get, never across I/O.
    held: Arc<Mutex<HashMap<DeviceId, LockHolder>>>,
}

impl DeviceLocks {
    pub fn new(dir: PathBuf) -> Result<Self, LockError> {
        fs::create_dir_all(&dir).map_err(|source| LockError::Io {
            path: dir.clone(),
            source,
        })?;
        Ok(Self {
            dir,
            held: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn lock_path(&self, device: &DeviceId) -> PathBuf {
        self.dir.join(format!("{}.lock", device))
    }

    fn halt_path(&self, device: &DeviceId) -> PathBuf {
        self.dir.join(format!("{}.halt", device))
    }

    /// Halt record for a device, if any.
    pub fn halt_record(&self, device: &DeviceId) -> Result<Option<HaltRecord>, LockError> {
        let path = self.halt_path(device);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path).map_err(|source| LockError::Io {
            path: path.clone(),
            source,
        })?;
        let record = serde_json::from_str(&content).unwrap_or_else(|e| {
            warn!("Unreadable halt marker {}: {}", path.display(), e);
            HaltRecord {
                device: device.clone(),
                job_id: JobId::new(),
                reason: format!("unreadable halt marker: {}", e),
                halted_at: Utc::now(),
            }
        });
        Ok(Some(record))
    }

    /// Every halted device, sorted.
    pub fn halted(&self) -> Result<Vec<HaltRecord>, LockError> {
        let entries = fs::read_dir(&self.dir).map_err(|source| LockError::Io {
            path: self.dir.clone(),
            source,
        })?;
        let mut records = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| LockError::Io {
                path: self.dir.clone(),
                source,
            })?;
            let name = entry.file_name();
            let Some(device) = name
                .to_str()
                .and_then(|n| n.strip_suffix(".halt"))
                .and_then(|n| DeviceId::parse(n).ok())
            else {
                continue;
            };
            if let Some(record) = self.halt_record(&device)? {
                records.push(record);
            }
        }
        records.sort_by(|a, b| a.device.cmp(&b.device));
        Ok(records)
    }

    /// Remove a halt marker. Returns the cleared record.
    pub fn clear_halt(&self, device: &DeviceId) -> Result<Option<HaltRecord>, LockError> {
        let record = self.halt_record(device)?;
        if record.is_some() {
            let path = self.halt_path(device);
            fs::remove_file(&path).map_err(|source| LockError::Io { path, source })?;
            info!(device = %device, "Cleared device halt");
        }
        Ok(record)
    }

    /// Try to lock a device without waiting.
    pub fn try_acquire(
        &self,
        device: &DeviceId,
        holder: LockHolder,
    ) -> Result<DeviceLockGuard, LockError> {
        if let Some(record) = self.halt_record(device)? {
            return Err(LockError::Halted {
                device: device.clone(),
                record,
            });
        }

        {
            let mut held = self.held.lock().expect("Device lock table poisoned");
            if let Some(current) = held.get(device) {
                return Err(LockError::Busy {
                    device: device.clone(),
                    holder: current.to_string(),
                });
            }
            held.insert(device.clone(), holder.clone());
        }

        match self.lock_file(device) {
            Ok(Some(file)) => {
                let lock_path = self.lock_path(device);
                let sidecar_path = write_sidecar(&lock_path, &holder);
                debug!(device = %device, holder = %holder, "Acquired device lock");
                Ok(DeviceLockGuard {
                    _file: file,
                    device: device.clone(),
                    holder,
                    lock_path,
                    sidecar_path,
                    locks: self.clone(),
                })
            }
            Ok(None) => {
                self.release_entry(device);
                Err(LockError::Busy {
                    device: device.clone(),
                    holder: read_sidecar_holder(&self.lock_path(device))
                        .unwrap_or_else(|| "another process".to_string()),
                })
            }
            Err(e) => {
                self.release_entry(device);
                Err(e)
            }
        }
    }

    /// Lock a device, polling while it is busy.
    ///
    /// Halted devices fail immediately; busy devices are retried every
    /// `poll` until `wait` has elapsed.
    pub fn acquire(
        &self,
        device: &DeviceId,
        holder: LockHolder,
        wait: Duration,
        poll: Duration,
        cancel: Option<&CancellationToken>,
    ) -> Result<DeviceLockGuard, LockError> {
        let started = Instant::now();
        loop {
            match self.try_acquire(device, holder.clone()) {
                Err(LockError::Busy { holder: current, .. }) => {
                    let waited = started.elapsed();
                    if waited >= wait {
                        return Err(LockError::Timeout {
                            device: device.clone(),
                            waited_ms: waited.as_millis() as u64,
                        });
                    }
                    if cancel.is_some_and(|c| c.is_cancelled()) {
                        return Err(LockError::Cancelled(device.clone()));
                    }
                    debug!(device = %device, "Device busy ({}), waiting", current);
                    thread::sleep(poll.min(wait - waited));
                }
                other => return other,
            }
        }
    }

    /// Whether this process currently holds the device.
    pub fn is_held(&self, device: &DeviceId) -> bool {
        self.held
            .lock()
            .expect("Device lock table poisoned")
            .contains_key(device)
    }

    fn lock_file(&self, device: &DeviceId) -> Result<Option<File>, LockError> {
        let path = self.lock_path(device);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|source| LockError::Io {
                path: path.clone(),
                source,
            })?;
        // Fully qualified: std::fs::File grew its own try_lock_exclusive
        match FileExt::try_lock_exclusive(&file) {
            Ok(()) => Ok(Some(file)),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) if e.raw_os_error() == fs2::lock_contended_error().raw_os_error() => Ok(None),
            Err(source) => Err(LockError::Io { path, source }),
        }
    }

    fn release_entry(&self, device: &DeviceId) {
        let mut held = self.held.lock().expect("Device lock table poisoned");
        held.remove(device);
    }
}

fn sidecar_path_for(lock_path: &Path) -> PathBuf {
    lock_path.with_extension("lock.json")
}

fn write_sidecar(lock_path: &Path, holder: &LockHolder) -> Option<PathBuf> {
    let sidecar = LockSidecar {
        pid: std::process::id(),
        holder: holder.clone(),
        timestamp: Utc::now().to_rfc3339(),
    };
    let path = sidecar_path_for(lock_path);
    match serde_json::to_vec_pretty(&sidecar)
        .map_err(io::Error::other)
        .and_then(|payload| fs::write(&path, payload))
    {
        Ok(()) => Some(path),
        Err(e) => {
            warn!("Failed to write lock sidecar {}: {}", path.display(), e);
            None
        }
    }
}

fn read_sidecar_holder(lock_path: &Path) -> Option<String> {
    let content = fs::read_to_string(sidecar_path_for(lock_path)).ok()?;
    let sidecar: LockSidecar = serde_json::from_str(&content).ok()?;
    Some(format!("{} in pid {}", sidecar.holder, sidecar.pid))
}

/// Exclusive hold on one device. Released on drop.
///
/// Baseline commits and halt escalation take a guard reference, so they can
/// only happen while the device is held.
pub struct DeviceLockGuard {
    _file: File,
    device: DeviceId,
    holder: LockHolder,
    lock_path: PathBuf,
    sidecar_path: Option<PathBuf>,
    locks: DeviceLocks,
}

impl DeviceLockGuard {
    pub fn device(&self) -> &DeviceId {
        &self.device
    }

    pub fn holder(&self) -> &LockHolder {
        &self.holder
    }

    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    /// Turn this hold into a persistent halt: the device stays refused after
    /// the guard is dropped, until the marker is cleared.
    pub fn escalate(&self, job_id: &JobId, reason: &str) -> Result<HaltRecord, LockError> {
        let record = HaltRecord {
            device: self.device.clone(),
            job_id: job_id.clone(),
            reason: reason.to_string(),
            halted_at: Utc::now(),
        };
        let path = self.locks.halt_path(&self.device);
        let payload = serde_json::to_vec_pretty(&record).map_err(|e| LockError::Io {
            path: path.clone(),
            source: io::Error::other(e),
        })?;
        fs::write(&path, payload).map_err(|source| LockError::Io {
            path: path.clone(),
            source,
        })?;
        warn!(device = %self.device, job_id = %job_id, "Device halted: {}", reason);
        Ok(record)
    }
}

impl Drop for DeviceLockGuard {
    fn drop(&mut self) {
        debug!(device = %self.device, "Releasing device lock");
        if let Some(path) = &self.sidecar_path {
            if let Err(e) = fs::remove_file(path) {
                debug!("Failed to remove lock sidecar {}: {}", path.display(), e);
            }
        }
        self.locks.release_entry(&self.device);
        // The file lock goes with the handle
    }
}

impl fmt::Debug for DeviceLockGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceLockGuard")
            .field("device", &self.device)
            .field("holder", &self.holder)
            .field("lock_path", &self.lock_path)
            .finish()
    }
}
