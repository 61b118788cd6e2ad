//! Configuration deployment pipeline for netcommit
//!
//! Turns versioned network intent into applied, verified device
//! configuration, reverses failed changes, and watches for drift.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────┐   ┌───────────┐   ┌───────────────┐
//! │ IntentStore  │──▶│ Template │──▶│ Validator │──▶│ approval gate │
//! └──────────────┘   │ Registry │   └───────────┘   └───────┬───────┘
//!                    └──────────┘                           ▼
//! ┌─────────────┐   ┌──────────────┐   ┌───────────┐   ┌──────────┐
//! │ AuditSink   │◀──│ commit /     │◀──│ PostCheck │◀──│ Executor │
//! └─────────────┘   │ RollbackMgr  │   │ Verifier  │   │ (locks)  │
//!                   └──────────────┘   └───────────┘   └──────────┘
//!
//! DriftMonitor: live config ─diff─▶ baseline ─score─▶ candidate job (parks)
//! ```
//!
//! # Design Principles
//!
//! 1. **One job per device:** a device lock (in-process table plus an `fs2`
//!    file lock) is held from Deploying through the terminal state.
//!
//! 2. **Frozen artifacts:** a job renders once; the exact bytes that passed
//!    validation are the bytes applied, checked by content hash.
//!
//! 3. **Snapshot rollback:** failures after apply restore the configuration
//!    captured right before it, never the stored baseline.
//!
//! 4. **Halts are sticky:** a failed rollback halts the device until an
//!    operator clears it.

pub mod audit;
pub mod baseline;
pub mod cancel;
pub mod context;
pub mod diff;
pub mod drift;
pub mod executor;
pub mod intent;
pub mod lock;
pub mod pipeline;
pub mod pool;
pub mod postcheck;
pub mod render;
pub mod retry;
pub mod rollback;
pub mod store;
pub mod transport;
pub mod validate;

pub use audit::{AuditError, AuditSink, EventKind, JobEvent, JsonlAuditSink, MemoryAuditSink};
pub use baseline::{Baseline, BaselineStore};
pub use cancel::CancellationToken;
pub use context::PipelineContext;
pub use diff::{DiffEntry, DiffOp, Differ, PatternError};
pub use drift::{DriftMonitor, DriftOutcome, DriftReference, DriftReport};
pub use executor::DeploymentExecutor;
pub use intent::{FileIntentStore, IntentError, IntentRecord, IntentStore, MemoryIntentStore};
pub use lock::{DeviceLockGuard, DeviceLocks, HaltRecord, LockError, LockHolder};
pub use pipeline::{CancelOutcome, Pipeline};
pub use pool::{JobOutcome, WorkerPool};
pub use render::{RenderError, TemplateRegistry};
pub use transport::{
    ApplyError, ApplyResult, LabTransport, MemoryTransport, OperState, ScriptedFault,
    TransportAdapter, TransportError, TransportSet,
};
pub use validate::{ValidationResult, Validator};

use netcommit_ids::{DeviceId, JobId};
use netcommit_job::{JobState, StateMachineError};
use netcommit_protocol::ConfigError;
use thiserror::Error;

/// Errors surfaced by pipeline operations.
///
/// Failures inside a job are not errors here: they are recorded on the job
/// and reflected in its terminal state.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    StateMachine(#[from] StateMachineError),

    #[error(transparent)]
    Store(#[from] anyhow::Error),

    #[error(transparent)]
    Audit(#[from] AuditError),

    #[error(transparent)]
    Intent(#[from] IntentError),

    #[error(transparent)]
    Render(#[from] RenderError),

    #[error(transparent)]
    Pattern(#[from] PatternError),

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error("job not found: {0}")]
    JobNotFound(JobId),

    #[error("device {device} already has active job {job_id} ({state})")]
    DeviceBusy {
        device: DeviceId,
        job_id: JobId,
        state: JobState,
    },

    #[error("job {job_id} is {state} and can no longer be cancelled")]
    NotCancellable { job_id: JobId, state: JobState },

    #[error("job {job_id} is {state}; rollback is only accepted while deploying or post-checking")]
    RollbackRefused { job_id: JobId, state: JobState },

    #[error("job {job_id} is {state}, not awaiting approval")]
    NotAwaitingApproval { job_id: JobId, state: JobState },

    #[error("job {job_id} was interrupted in {state} and cannot be resumed")]
    NotResumable { job_id: JobId, state: JobState },

    #[error("worker pool closed before the job finished")]
    PoolClosed,

    #[error("failed to start {what}: {source}")]
    Spawn {
        what: String,
        #[source]
        source: std::io::Error,
    },
}
