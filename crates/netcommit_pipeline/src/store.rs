//! Job store - persistent job records.
//!
//! One JSON file per job; terminal jobs are kept, never deleted.
//!
//! ```text
//! <jobs_dir>/
//! ├── {job_id_1}.json
//! ├── {job_id_2}.json
//! └── ...
//! ```
//!
//! Operator requests (cancel, rollback) may be written by a different
//! process than the one running the job. [`JobStore::save`] folds request
//! markers already on disk into the record being saved so they are never
//! overwritten, and [`JobStore::sync_requests`] pulls them into a running
//! job at its checkpoints.
//!
//! [`JobStore::create`] is the only way a new job enters the store. It
//! checks for an active job on the device and writes the new record while
//! holding both the write lock and an exclusive `fs2` lock on
//! `<jobs_dir>/<device>.create`, so at most one non-terminal job exists per
//! device even when several processes share the directory.

use anyhow::{Context, Result};
use fs2::FileExt;
use netcommit_ids::{DeviceId, JobId};
use netcommit_job::DeploymentJob;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::debug;

pub struct JobStore {
    dir: PathBuf,
    /// Serializes read-merge-write cycles within this process
    write_lock: Mutex<()>,
}

impl JobStore {
    pub fn new(dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create job store directory: {}", dir.display()))?;
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    fn job_path(&self, id: &JobId) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }

    /// Persist a new job unless its device already has a non-terminal one.
    ///
    /// Returns the active job that blocked creation, if any.
    pub fn create(&self, job: &mut DeploymentJob) -> Result<Option<DeploymentJob>> {
        let _write = self.write_lock.lock().expect("Job store lock poisoned");
        let lock_path = self.dir.join(format!("{}.create", job.device));
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .with_context(|| format!("Failed to open create lock: {}", lock_path.display()))?;
        FileExt::lock_exclusive(&file)
            .with_context(|| format!("Failed to lock {}", lock_path.display()))?;

        let result = self.create_locked(job);
        if let Err(e) = FileExt::unlock(&file) {
            debug!("Failed to unlock {}: {}", lock_path.display(), e);
        }
        result
    }

    fn create_locked(&self, job: &mut DeploymentJob) -> Result<Option<DeploymentJob>> {
        if let Some(active) = self.active_for_device(&job.device)?.into_iter().next() {
            return Ok(Some(active));
        }
        self.write(job)?;
        Ok(None)
    }

    /// Save a job, keeping operator request markers already on disk.
    pub fn save(&self, job: &mut DeploymentJob) -> Result<()> {
        let _write = self.write_lock.lock().expect("Job store lock poisoned");
        if let Some(existing) = self.load(&job.id)? {
            merge_requests(job, &existing);
        }
        self.write(job)
    }

    /// Apply a change to a stored job under the store's write lock.
    pub fn update<T>(
        &self,
        id: &JobId,
        f: impl FnOnce(&mut DeploymentJob) -> Result<T>,
    ) -> Result<Option<(DeploymentJob, T)>> {
        let _write = self.write_lock.lock().expect("Job store lock poisoned");
        let Some(mut job) = self.load(id)? else {
            return Ok(None);
        };
        let out = f(&mut job)?;
        self.write(&job)?;
        Ok(Some((job, out)))
    }

    /// Copy request markers set by operators into a running job.
    pub fn sync_requests(&self, job: &mut DeploymentJob) -> Result<()> {
        if let Some(existing) = self.load(&job.id)? {
            merge_requests(job, &existing);
        }
        Ok(())
    }

    fn write(&self, job: &DeploymentJob) -> Result<()> {
        let path = self.job_path(&job.id);
        let json = serde_json::to_string_pretty(job)?;
        atomic_write(&path, json.as_bytes())
            .with_context(|| format!("Failed to write job file: {}", path.display()))?;
        debug!("Saved job {} ({}) to {}", job.id, job.state(), path.display());
        Ok(())
    }

    pub fn load(&self, id: &JobId) -> Result<Option<DeploymentJob>> {
        let path = self.job_path(id);
        if !path.exists() {
            return Ok(None);
        }
        let json = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read job file: {}", path.display()))?;
        let job = serde_json::from_str(&json)
            .with_context(|| format!("Failed to parse job file: {}", path.display()))?;
        Ok(Some(job))
    }

    /// All jobs, oldest first.
    pub fn load_all(&self) -> Result<Vec<DeploymentJob>> {
        let mut jobs = Vec::new();
        let entries = fs::read_dir(&self.dir)
            .with_context(|| format!("Failed to read job store directory: {}", self.dir.display()))?;
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|s| s.to_str()) != Some("json") {
                continue;
            }
            let json = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read job file: {}", path.display()))?;
            let job: DeploymentJob = serde_json::from_str(&json)
                .with_context(|| format!("Failed to parse job file: {}", path.display()))?;
            jobs.push(job);
        }
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        debug!("Loaded {} jobs from {}", jobs.len(), self.dir.display());
        Ok(jobs)
    }

    /// Non-terminal jobs for a device.
    pub fn active_for_device(&self, device: &DeviceId) -> Result<Vec<DeploymentJob>> {
        Ok(self
            .load_all()?
            .into_iter()
            .filter(|j| &j.device == device && !j.is_terminal())
            .collect())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

fn merge_requests(job: &mut DeploymentJob, on_disk: &DeploymentJob) {
    if job.rollback_requested_at.is_none() {
        job.rollback_requested_at = on_disk.rollback_requested_at;
    }
    if job.cancel_requested_at.is_none() {
        job.cancel_requested_at = on_disk.cancel_requested_at;
    }
}

/// Atomic write via temp file + rename
pub(crate) fn atomic_write(path: &Path, content: &[u8]) -> Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let temp_path = parent.join(format!(".tmp_{}", uuid::Uuid::new_v4()));
    fs::write(&temp_path, content)
        .with_context(|| format!("Failed to write temp file: {}", temp_path.display()))?;
    fs::rename(&temp_path, path).with_context(|| {
        format!(
            "Failed to rename {} to {}",
            temp_path.display(),
            path.display()
        )
    })?;
    Ok(())
}
