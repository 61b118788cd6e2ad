//! Baseline store: last committed configuration per device.
//!
//! ```text
//! <baselines_dir>/
//! ├── core-sw01.json
//! └── edge-rtr01.json
//! ```

use crate::lock::DeviceLockGuard;
use crate::store::atomic_write;
use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use netcommit_ids::{DeviceId, JobId};
use netcommit_job::RenderedConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use tracing::info;

/// Last-known-good configuration of a device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Baseline {
    pub device: DeviceId,
    /// Increases by one on every commit
    pub version: u64,
    pub job_id: JobId,
    pub committed_at: DateTime<Utc>,
    pub rendered: RenderedConfig,
}

impl Baseline {
    pub fn content(&self) -> &str {
        self.rendered.content()
    }
}

pub struct BaselineStore {
    dir: PathBuf,
}

impl BaselineStore {
    pub fn new(dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&dir).with_context(|| {
            format!("Failed to create baseline directory: {}", dir.display())
        })?;
        Ok(Self { dir })
    }

    fn path(&self, device: &DeviceId) -> PathBuf {
        self.dir.join(format!("{}.json", device))
    }

    pub fn load(&self, device: &DeviceId) -> Result<Option<Baseline>> {
        let path = self.path(device);
        if !path.exists() {
            return Ok(None);
        }
        let json = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read baseline: {}", path.display()))?;
        let baseline = serde_json::from_str(&json)
            .with_context(|| format!("Failed to parse baseline: {}", path.display()))?;
        Ok(Some(baseline))
    }

    /// Record `rendered` as the device's new baseline.
    ///
    /// Requires the device's lock guard: baselines only move inside the
    /// commit step of the job holding the device.
    pub fn commit(
        &self,
        guard: &DeviceLockGuard,
        rendered: &RenderedConfig,
        job_id: &JobId,
    ) -> Result<Baseline> {
        if guard.device() != rendered.device() {
            bail!(
                "Lock for {} cannot commit a baseline for {}",
                guard.device(),
                rendered.device()
            );
        }
        if !rendered.verify_integrity() {
            bail!("Refusing to commit baseline with mismatched content hash");
        }

        let version = self
            .load(rendered.device())?
            .map(|b| b.version + 1)
            .unwrap_or(1);
        let baseline = Baseline {
            device: rendered.device().clone(),
            version,
            job_id: job_id.clone(),
            committed_at: Utc::now(),
            rendered: rendered.clone(),
        };

        let path = self.path(rendered.device());
        let json = serde_json::to_string_pretty(&baseline)?;
        atomic_write(&path, json.as_bytes())
            .with_context(|| format!("Failed to write baseline: {}", path.display()))?;

        info!(
            device = %baseline.device,
            version,
            job_id = %job_id,
            hash = %rendered.content_hash(),
            "Committed baseline"
        );
        Ok(baseline)
    }

    /// Every stored baseline, sorted by device.
    pub fn load_all(&self) -> Result<Vec<Baseline>> {
        let mut baselines = Vec::new();
        let entries = fs::read_dir(&self.dir)
            .with_context(|| format!("Failed to read baseline directory: {}", self.dir.display()))?;
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|s| s.to_str()) != Some("json") {
                continue;
            }
            let json = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read baseline: {}", path.display()))?;
            let baseline: Baseline = serde_json::from_str(&json)
                .with_context(|| format!("Failed to parse baseline: {}", path.display()))?;
            baselines.push(baseline);
        }
        baselines.sort_by(|a, b| a.device.cmp(&b.device));
        Ok(baselines)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::{DeviceLocks, LockHolder};
    use netcommit_protocol::DeviceFamily;
    use tempfile::TempDir;

    fn rendered(device: &str, content: &str) -> RenderedConfig {
        RenderedConfig::new(
            DeviceId::parse(device).unwrap(),
            DeviceFamily::Cli,
            "base",
            "000000000000",
            1,
            content.to_string(),
        )
    }

    #[test]
    fn test_commit_bumps_version() {
        let temp = TempDir::new().unwrap();
        let store = BaselineStore::new(temp.path().join("baselines")).unwrap();
        let locks = DeviceLocks::new(temp.path().join("locks")).unwrap();
        let device = DeviceId::parse("sw1").unwrap();
        assert!(store.load(&device).unwrap().is_none());

        let guard = locks.try_acquire(&device, LockHolder::DriftScan).unwrap();
        let first = store
            .commit(&guard, &rendered("sw1", "hostname a\n"), &JobId::new())
            .unwrap();
        let second = store
            .commit(&guard, &rendered("sw1", "hostname b\n"), &JobId::new())
            .unwrap();
        assert_eq!(first.version, 1);
        assert_eq!(second.version, 2);

        let loaded = store.load(&device).unwrap().unwrap();
        assert_eq!(loaded.content(), "hostname b\n");
        assert_eq!(store.load_all().unwrap().len(), 1);
    }

    #[test]
    fn test_commit_requires_matching_guard() {
        let temp = TempDir::new().unwrap();
        let store = BaselineStore::new(temp.path().join("baselines")).unwrap();
        let locks = DeviceLocks::new(temp.path().join("locks")).unwrap();
        let other = DeviceId::parse("sw2").unwrap();
        let guard = locks.try_acquire(&other, LockHolder::DriftScan).unwrap();

        assert!(store
            .commit(&guard, &rendered("sw1", "hostname a\n"), &JobId::new())
            .is_err());
        assert!(store.load(&DeviceId::parse("sw1").unwrap()).unwrap().is_none());
    }
}
