//! Deployment job record for netcommit.
//!
//! A [`DeploymentJob`] carries one device through the pipeline. Every state
//! change goes through [`DeploymentJob::transition`], which enforces the
//! [`JobState`] transition table and appends to the job's history.

pub mod error;
pub mod rendered;
pub mod state;

pub use error::{ErrorKind, JobError, Stage};
pub use rendered::{content_hash, DeviceSnapshot, RenderedConfig};
pub use state::{JobState, StateMachineError, StateParseError, StateTransition};

use chrono::{DateTime, Utc};
use netcommit_ids::{DeviceId, JobId};
use netcommit_protocol::{Assertion, DeviceFamily, Finding};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Why a job was created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Operator-requested deployment of current intent
    Deploy,
    /// Candidate raised by the drift monitor
    DriftRemediation,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Deploy => "deploy",
            JobKind::DriftRemediation => "drift_remediation",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Who let a gated job through, and when.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRecord {
    pub approved_by: String,
    pub approved_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl ApprovalRecord {
    pub fn new(approved_by: impl Into<String>, note: Option<String>) -> Self {
        Self {
            approved_by: approved_by.into(),
            approved_at: Utc::now(),
            note,
        }
    }
}

/// A deployment job for a single device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentJob {
    pub id: JobId,
    pub device: DeviceId,
    pub family: DeviceFamily,
    pub kind: JobKind,
    pub template: String,
    /// Intent version the job renders from; `None` means latest
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent_version: Option<u64>,
    state: JobState,
    /// Apply attempts made, including transport retries
    #[serde(default)]
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    history: Vec<StateTransition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    rendered: Option<Arc<RenderedConfig>>,
    /// Content hash that passed validation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validated_hash: Option<String>,
    #[serde(default)]
    pub findings: Vec<Finding>,
    #[serde(default)]
    pub assertions: Vec<Assertion>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<DeviceSnapshot>,
    #[serde(default)]
    pub requires_approval: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval: Option<ApprovalRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollback_requested_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancel_requested_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JobError>,
    /// Times the rollback manager ran for this job; never more than one
    #[serde(default)]
    pub rollback_invocations: u32,
}

impl DeploymentJob {
    pub fn new(
        device: DeviceId,
        family: DeviceFamily,
        kind: JobKind,
        template: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            device,
            family,
            kind,
            template: template.into(),
            intent_version: None,
            state: JobState::Pending,
            attempts: 0,
            created_at: now,
            updated_at: now,
            history: Vec::new(),
            rendered: None,
            validated_hash: None,
            findings: Vec::new(),
            assertions: Vec::new(),
            snapshot: None,
            requires_approval: false,
            approval: None,
            rollback_requested_at: None,
            cancel_requested_at: None,
            error: None,
            rollback_invocations: 0,
        }
    }

    pub fn with_intent_version(mut self, version: u64) -> Self {
        self.intent_version = Some(version);
        self
    }

    pub fn with_approval_required(mut self, required: bool) -> Self {
        self.requires_approval = required;
        self
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn history(&self) -> &[StateTransition] {
        &self.history
    }

    pub fn rendered(&self) -> Option<&Arc<RenderedConfig>> {
        self.rendered.as_ref()
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Attempt to transition to a new state.
    pub fn transition(&mut self, to: JobState) -> Result<StateTransition, StateMachineError> {
        self.transition_with_reason(to, None)
    }

    /// Attempt to transition, recording why.
    pub fn transition_with_reason(
        &mut self,
        to: JobState,
        reason: Option<String>,
    ) -> Result<StateTransition, StateMachineError> {
        if self.state.is_terminal() {
            return Err(StateMachineError::TerminalState(self.state));
        }

        if !self.state.can_transition_to(to) {
            return Err(StateMachineError::InvalidTransition {
                from: self.state,
                to,
            });
        }

        let mut transition = StateTransition::new(self.state, to);
        if let Some(r) = reason {
            transition = transition.with_reason(r);
        }

        self.state = to;
        self.updated_at = transition.timestamp;
        self.history.push(transition.clone());

        Ok(transition)
    }

    /// Freeze the rendered configuration for the rest of the job.
    ///
    /// Only accepted while rendering; the artifact is never replaced later.
    pub fn attach_rendered(
        &mut self,
        rendered: Arc<RenderedConfig>,
    ) -> Result<(), StateMachineError> {
        if self.state != JobState::Rendering {
            return Err(StateMachineError::InvalidTransition {
                from: self.state,
                to: JobState::Rendered,
            });
        }
        self.intent_version = Some(rendered.intent_version());
        self.rendered = Some(rendered);
        Ok(())
    }

    /// Record an error cause. The first cause wins; later ones are kept only
    /// when nothing was recorded yet, except a rollback failure which always
    /// replaces the original cause.
    pub fn record_error(&mut self, error: JobError) {
        match &self.error {
            Some(_) if error.kind != ErrorKind::RollbackFailure => {}
            _ => self.error = Some(error),
        }
    }

    /// Whether the job passed through the given state.
    pub fn visited(&self, state: JobState) -> bool {
        self.history.iter().any(|t| t.to == state)
    }

    /// Whether an operator asked for this job's change to be reversed.
    pub fn rollback_requested(&self) -> bool {
        self.rollback_requested_at.is_some()
    }

    pub fn cancel_requested(&self) -> bool {
        self.cancel_requested_at.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> DeploymentJob {
        DeploymentJob::new(
            DeviceId::parse("sw1").unwrap(),
            DeviceFamily::Cli,
            JobKind::Deploy,
            "base",
        )
    }

    fn rendered() -> Arc<RenderedConfig> {
        Arc::new(RenderedConfig::new(
            DeviceId::parse("sw1").unwrap(),
            DeviceFamily::Cli,
            "base",
            "0123456789ab",
            3,
            "hostname sw1\n".into(),
        ))
    }

    #[test]
    fn test_new_job_is_pending() {
        let job = job();
        assert_eq!(job.state(), JobState::Pending);
        assert!(job.history().is_empty());
        assert!(!job.is_terminal());
    }

    #[test]
    fn test_transition_records_history() {
        let mut job = job();
        job.transition(JobState::Rendering).unwrap();
        let t = job
            .transition_with_reason(JobState::Aborted, Some("template missing".into()))
            .unwrap();
        assert_eq!(t.from, JobState::Rendering);
        assert_eq!(t.reason.as_deref(), Some("template missing"));
        assert_eq!(job.history().len(), 2);
        assert!(job.visited(JobState::Rendering));
        assert!(job.is_terminal());
    }

    #[test]
    fn test_invalid_transition_rejected() {
        let mut job = job();
        let err = job.transition(JobState::Deploying).unwrap_err();
        assert_eq!(
            err,
            StateMachineError::InvalidTransition {
                from: JobState::Pending,
                to: JobState::Deploying
            }
        );
        assert_eq!(job.state(), JobState::Pending);
    }

    #[test]
    fn test_terminal_job_is_frozen() {
        let mut job = job();
        job.transition(JobState::Cancelled).unwrap();
        assert_eq!(
            job.transition(JobState::Rendering).unwrap_err(),
            StateMachineError::TerminalState(JobState::Cancelled)
        );
    }

    #[test]
    fn test_rendered_only_attached_while_rendering() {
        let mut job = job();
        assert!(job.attach_rendered(rendered()).is_err());
        job.transition(JobState::Rendering).unwrap();
        job.attach_rendered(rendered()).unwrap();
        assert_eq!(job.intent_version, Some(3));
        assert!(job.rendered().unwrap().verify_integrity());
    }

    #[test]
    fn test_rollback_failure_overrides_first_error() {
        let mut job = job();
        job.record_error(JobError::new(
            Stage::PostCheck,
            ErrorKind::PostCheckTimeout,
            "peer down",
        ));
        job.record_error(JobError::new(Stage::Deploy, ErrorKind::Transport, "later"));
        assert_eq!(job.error.as_ref().unwrap().kind, ErrorKind::PostCheckTimeout);
        job.record_error(JobError::new(
            Stage::Rollback,
            ErrorKind::RollbackFailure,
            "restore failed",
        ));
        assert_eq!(job.error.as_ref().unwrap().kind, ErrorKind::RollbackFailure);
    }

    #[test]
    fn test_job_serde_roundtrip_keeps_state() {
        let mut job = job().with_approval_required(true);
        job.transition(JobState::Rendering).unwrap();
        job.attach_rendered(rendered()).unwrap();
        let encoded = serde_json::to_string(&job).unwrap();
        let decoded: DeploymentJob = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded.id, job.id);
        assert_eq!(decoded.state(), JobState::Rendering);
        assert_eq!(decoded.history().len(), 1);
        assert!(decoded.requires_approval);
        assert_eq!(
            decoded.rendered().unwrap().content_hash(),
            job.rendered().unwrap().content_hash()
        );
    }
}
