//! Error cause recorded on a job.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Pipeline stage where a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Intent,
    Render,
    Validate,
    Approval,
    Lock,
    Snapshot,
    Deploy,
    PostCheck,
    Rollback,
    Commit,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Intent => "intent",
            Stage::Render => "render",
            Stage::Validate => "validate",
            Stage::Approval => "approval",
            Stage::Lock => "lock",
            Stage::Snapshot => "snapshot",
            Stage::Deploy => "deploy",
            Stage::PostCheck => "post_check",
            Stage::Rollback => "rollback",
            Stage::Commit => "commit",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error taxonomy. Only `RollbackFailure` escalates beyond the job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Intent record missing or unreadable
    Intent,
    /// Data or template defect; never retried
    Render,
    /// Policy or syntax violation; job Rejected
    Validation,
    /// Connectivity/auth failure; retried with backoff
    Transport,
    /// Device refused the configuration; triggers rollback
    Apply,
    /// Operational state did not converge in time; triggers rollback
    PostCheckTimeout,
    /// Operator asked for the change to be reversed
    OperatorRollback,
    /// Restoration failed; device automation halted
    RollbackFailure,
    /// Device lock busy or device halted
    Lock,
    /// Frozen content changed between validation and deployment
    Integrity,
    Cancelled,
    /// Pipeline state could not be persisted
    Storage,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Intent => "intent_error",
            ErrorKind::Render => "render_error",
            ErrorKind::Validation => "validation_error",
            ErrorKind::Transport => "transport_error",
            ErrorKind::Apply => "apply_error",
            ErrorKind::PostCheckTimeout => "post_check_timeout",
            ErrorKind::OperatorRollback => "operator_rollback",
            ErrorKind::RollbackFailure => "rollback_failure",
            ErrorKind::Lock => "lock_error",
            ErrorKind::Integrity => "integrity_error",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Storage => "storage_error",
        }
    }

    /// Whether the pipeline retries this kind of failure on its own.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorKind::Transport)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error cause attached to a job record and its audit events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobError {
    pub stage: Stage,
    pub kind: ErrorKind,
    pub message: String,
    pub at: DateTime<Utc>,
}

impl JobError {
    pub fn new(stage: Stage, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            stage,
            kind,
            message: message.into(),
            at: Utc::now(),
        }
    }
}

impl fmt::Display for JobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} during {}: {}", self.kind, self.stage, self.message)
    }
}
