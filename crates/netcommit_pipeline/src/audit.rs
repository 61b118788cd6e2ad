//! Audit log: append-only record of job transitions and operator actions.

use chrono::{DateTime, Utc};
use netcommit_ids::{DeviceId, JobId};
use netcommit_job::{DeploymentJob, JobError, JobKind, JobState, StateTransition};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::sync::Mutex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("audit log {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("audit event encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Created,
    Transition,
    Approved,
    CancelRequested,
    RollbackRequested,
    DeviceHalted,
    DeviceUnlocked,
    DriftDetected,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Created => "created",
            EventKind::Transition => "transition",
            EventKind::Approved => "approved",
            EventKind::CancelRequested => "cancel_requested",
            EventKind::RollbackRequested => "rollback_requested",
            EventKind::DeviceHalted => "device_halted",
            EventKind::DeviceUnlocked => "device_unlocked",
            EventKind::DriftDetected => "drift_detected",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobEvent {
    pub at: DateTime<Utc>,
    pub event: EventKind,
    pub device: DeviceId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<JobId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_kind: Option<JobKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<JobState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<JobState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JobError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
    /// Operator who triggered the event, for manual actions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor: Option<String>,
}

impl JobEvent {
    fn base(event: EventKind, device: DeviceId) -> Self {
        Self {
            at: Utc::now(),
            event,
            device,
            job_id: None,
            job_kind: None,
            from: None,
            to: None,
            reason: None,
            error: None,
            content_hash: None,
            actor: None,
        }
    }

    /// Event about a job in its current state.
    pub fn for_job(event: EventKind, job: &DeploymentJob) -> Self {
        let mut e = Self::base(event, job.device.clone());
        e.job_id = Some(job.id.clone());
        e.job_kind = Some(job.kind);
        e.to = Some(job.state());
        e.content_hash = job.rendered().map(|r| r.content_hash().to_string());
        e
    }

    /// A state change. Terminal transitions carry the job's error cause.
    pub fn transition(job: &DeploymentJob, transition: &StateTransition) -> Self {
        let mut e = Self::for_job(EventKind::Transition, job);
        e.from = Some(transition.from);
        e.to = Some(transition.to);
        e.at = transition.timestamp;
        e.reason = transition.reason.clone();
        if matches!(transition.to, JobState::Failed) || transition.to.is_terminal() {
            e.error = job.error.clone();
        }
        e
    }

    /// Event about a device outside any job.
    pub fn for_device(event: EventKind, device: &DeviceId) -> Self {
        Self::base(event, device.clone())
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    pub fn with_job_id(mut self, job_id: JobId) -> Self {
        self.job_id = Some(job_id);
        self
    }
}

/// Append-only audit destination.
pub trait AuditSink: Send + Sync {
    fn record(&self, event: &JobEvent) -> Result<(), AuditError>;

    /// Every event recorded so far, oldest first.
    fn events(&self) -> Result<Vec<JobEvent>, AuditError>;

    /// Events for one job, oldest first.
    fn events_for_job(&self, job_id: &JobId) -> Result<Vec<JobEvent>, AuditError> {
        Ok(self
            .events()?
            .into_iter()
            .filter(|e| e.job_id.as_ref() == Some(job_id))
            .collect())
    }
}

/// Audit log as one JSON object per line.
pub struct JsonlAuditSink {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlAuditSink {
    pub fn new(path: PathBuf) -> Result<Self, AuditError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| AuditError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        Ok(Self {
            path,
            write_lock: Mutex::new(()),
        })
    }

    fn io_error(&self, source: std::io::Error) -> AuditError {
        AuditError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl AuditSink for JsonlAuditSink {
    fn record(&self, event: &JobEvent) -> Result<(), AuditError> {
        let mut line = serde_json::to_string(event)?;
        line.push('\n');
        let _write = self.write_lock.lock().expect("Audit lock poisoned");
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| self.io_error(e))?;
        file.write_all(line.as_bytes())
            .map_err(|e| self.io_error(e))?;
        file.sync_data().map_err(|e| self.io_error(e))
    }

    fn events(&self) -> Result<Vec<JobEvent>, AuditError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let file = fs::File::open(&self.path).map_err(|e| self.io_error(e))?;
        let mut events = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line.map_err(|e| self.io_error(e))?;
            if line.trim().is_empty() {
                continue;
            }
            events.push(serde_json::from_str(&line)?);
        }
        Ok(events)
    }
}

/// In-memory audit log for embedding and tests.
#[derive(Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<JobEvent>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, event: &JobEvent) -> Result<(), AuditError> {
        self.events
            .lock()
            .expect("Audit lock poisoned")
            .push(event.clone());
        Ok(())
    }

    fn events(&self) -> Result<Vec<JobEvent>, AuditError> {
        Ok(self.events.lock().expect("Audit lock poisoned").clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netcommit_protocol::DeviceFamily;
    use tempfile::TempDir;

    fn job() -> DeploymentJob {
        DeploymentJob::new(
            DeviceId::parse("sw1").unwrap(),
            DeviceFamily::Cli,
            JobKind::Deploy,
            "base",
        )
    }

    #[test]
    fn test_jsonl_appends_and_reads_back() {
        let temp = TempDir::new().unwrap();
        let sink = JsonlAuditSink::new(temp.path().join("state/audit.jsonl")).unwrap();
        let mut job = job();
        sink.record(&JobEvent::for_job(EventKind::Created, &job)).unwrap();
        let t = job.transition(JobState::Rendering).unwrap();
        sink.record(&JobEvent::transition(&job, &t)).unwrap();
        sink.record(
            &JobEvent::for_device(EventKind::DeviceUnlocked, &job.device).with_actor("ops"),
        )
        .unwrap();

        let events = sink.events().unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(events[1].from, Some(JobState::Pending));
        assert_eq!(events[1].to, Some(JobState::Rendering));
        assert_eq!(events[2].actor.as_deref(), Some("ops"));
        assert_eq!(sink.events_for_job(&job.id).unwrap().len(), 2);
    }

    #[test]
    fn test_memory_sink() {
        let sink = MemoryAuditSink::new();
        let job = job();
        sink.record(&JobEvent::for_job(EventKind::Created, &job)).unwrap();
        assert_eq!(sink.events_for_job(&job.id).unwrap().len(), 1);
        assert!(sink.events_for_job(&JobId::new()).unwrap().is_empty());
    }
}
