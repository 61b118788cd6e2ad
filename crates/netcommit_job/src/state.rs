//! Deployment job state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

// ============================================================================
// Job State
// ============================================================================

/// Deployment job states.
///
/// Happy path:
/// `Pending → Rendering → Rendered → Validating → Validated → [AwaitingApproval]
///  → Deploying → Deployed → PostChecking → Verified → Committed`
///
/// Failure after apply:
/// `Deploying | PostChecking → Failed → RollingBack → RolledBack | FailedFatal`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    // ========== Pre-deploy (cancellable) ==========
    Pending,
    Rendering,
    Rendered,
    Validating,
    Validated,
    /// Gate: an operator must approve before the device is touched
    AwaitingApproval,

    // ========== Device mutation (runs to completion) ==========
    Deploying,
    Deployed,
    PostChecking,
    Verified,
    /// Post-apply failure; always followed by RollingBack
    Failed,
    RollingBack,

    // ========== Terminal ==========
    /// Terminal: verified and recorded as the device baseline
    Committed,
    /// Terminal: validation produced a blocking finding
    Rejected,
    /// Terminal: pre-deployment snapshot restored and re-verified
    RolledBack,
    /// Terminal: restoration failed; device automation is halted
    FailedFatal,
    /// Terminal: cancelled before any device mutation
    Cancelled,
    /// Terminal: stopped before any device mutation (render, lock or snapshot failure)
    Aborted,
}

impl JobState {
    pub const ALL: [JobState; 18] = [
        JobState::Pending,
        JobState::Rendering,
        JobState::Rendered,
        JobState::Validating,
        JobState::Validated,
        JobState::AwaitingApproval,
        JobState::Deploying,
        JobState::Deployed,
        JobState::PostChecking,
        JobState::Verified,
        JobState::Failed,
        JobState::RollingBack,
        JobState::Committed,
        JobState::Rejected,
        JobState::RolledBack,
        JobState::FailedFatal,
        JobState::Cancelled,
        JobState::Aborted,
    ];

    /// Get the canonical string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Rendering => "rendering",
            JobState::Rendered => "rendered",
            JobState::Validating => "validating",
            JobState::Validated => "validated",
            JobState::AwaitingApproval => "awaiting_approval",
            JobState::Deploying => "deploying",
            JobState::Deployed => "deployed",
            JobState::PostChecking => "post_checking",
            JobState::Verified => "verified",
            JobState::Failed => "failed",
            JobState::RollingBack => "rolling_back",
            JobState::Committed => "committed",
            JobState::Rejected => "rejected",
            JobState::RolledBack => "rolled_back",
            JobState::FailedFatal => "failed_fatal",
            JobState::Cancelled => "cancelled",
            JobState::Aborted => "aborted",
        }
    }

    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Committed
                | JobState::Rejected
                | JobState::RolledBack
                | JobState::FailedFatal
                | JobState::Cancelled
                | JobState::Aborted
        )
    }

    /// Check if this is the approval gate.
    pub fn is_gate(&self) -> bool {
        matches!(self, JobState::AwaitingApproval)
    }

    /// Cancellation is only honoured before the device is touched.
    pub fn is_cancellable(&self) -> bool {
        matches!(
            self,
            JobState::Pending
                | JobState::Rendering
                | JobState::Rendered
                | JobState::Validating
                | JobState::Validated
                | JobState::AwaitingApproval
        )
    }

    /// States in which the job holds the device lock.
    pub fn holds_device(&self) -> bool {
        matches!(
            self,
            JobState::Deploying
                | JobState::Deployed
                | JobState::PostChecking
                | JobState::Verified
                | JobState::Failed
                | JobState::RollingBack
        )
    }

    /// States in which an operator rollback request is accepted.
    pub fn accepts_rollback_request(&self) -> bool {
        matches!(
            self,
            JobState::Deploying | JobState::Deployed | JobState::PostChecking
        )
    }

    /// Get valid transitions from this state.
    pub fn valid_transitions(&self) -> &'static [JobState] {
        match self {
            JobState::Pending => &[JobState::Rendering, JobState::Cancelled, JobState::Aborted],
            JobState::Rendering => &[JobState::Rendered, JobState::Cancelled, JobState::Aborted],
            JobState::Rendered => &[JobState::Validating, JobState::Cancelled, JobState::Aborted],
            JobState::Validating => &[
                JobState::Validated,
                JobState::Rejected,
                JobState::Cancelled,
                JobState::Aborted,
            ],
            JobState::Validated => &[
                JobState::AwaitingApproval,
                JobState::Deploying,
                JobState::Cancelled,
                JobState::Aborted,
            ],
            JobState::AwaitingApproval => &[
                JobState::Deploying,
                JobState::Cancelled,
                JobState::Aborted,
            ],
            JobState::Deploying => &[JobState::Deployed, JobState::Failed],
            JobState::Deployed => &[JobState::PostChecking, JobState::Failed],
            JobState::PostChecking => &[JobState::Verified, JobState::Failed],
            JobState::Verified => &[JobState::Committed],
            JobState::Failed => &[JobState::RollingBack],
            JobState::RollingBack => &[JobState::RolledBack, JobState::FailedFatal],
            JobState::Committed
            | JobState::Rejected
            | JobState::RolledBack
            | JobState::FailedFatal
            | JobState::Cancelled
            | JobState::Aborted => &[],
        }
    }

    /// Check if a transition to the target state is valid.
    pub fn can_transition_to(&self, target: JobState) -> bool {
        self.valid_transitions().contains(&target)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error when parsing a JobState from string.
#[derive(Debug, Error, Clone)]
#[error("invalid job state: {0}")]
pub struct StateParseError(String);

impl std::str::FromStr for JobState {
    type Err = StateParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobState::ALL
            .iter()
            .copied()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| StateParseError(s.to_string()))
    }
}

// ============================================================================
// State Transition
// ============================================================================

/// A state transition event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateTransition {
    pub from: JobState,
    pub to: JobState,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl StateTransition {
    pub fn new(from: JobState, to: JobState) -> Self {
        Self {
            from,
            to,
            timestamp: Utc::now(),
            reason: None,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

/// Errors for state machine operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StateMachineError {
    #[error("invalid transition from {from} to {to}")]
    InvalidTransition { from: JobState, to: JobState },

    #[error("job is terminal: {0}")]
    TerminalState(JobState),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_roundtrip() {
        for state in JobState::ALL {
            let parsed: JobState = state.as_str().parse().unwrap();
            assert_eq!(state, parsed);
        }
        assert!("exploded".parse::<JobState>().is_err());
    }

    #[test]
    fn test_state_serde_matches_as_str() {
        for state in JobState::ALL {
            let encoded = serde_json::to_string(&state).unwrap();
            assert_eq!(encoded, format!("\"{}\"", state.as_str()));
        }
    }

    #[test]
    fn test_terminal_states_have_no_exits() {
        for state in JobState::ALL {
            assert_eq!(state.is_terminal(), state.valid_transitions().is_empty());
        }
    }

    #[test]
    fn test_device_mutation_cannot_be_cancelled() {
        for state in JobState::ALL {
            if state.holds_device() {
                assert!(!state.is_cancellable(), "{state} must not be cancellable");
                assert!(!state.can_transition_to(JobState::Cancelled));
            }
        }
    }

    #[test]
    fn test_deploying_only_after_validation() {
        let sources: Vec<JobState> = JobState::ALL
            .into_iter()
            .filter(|s| s.can_transition_to(JobState::Deploying))
            .collect();
        assert_eq!(sources, vec![JobState::Validated, JobState::AwaitingApproval]);
    }

    #[test]
    fn test_committed_only_from_verified() {
        let sources: Vec<JobState> = JobState::ALL
            .into_iter()
            .filter(|s| s.can_transition_to(JobState::Committed))
            .collect();
        assert_eq!(sources, vec![JobState::Verified]);
    }

    #[test]
    fn test_failed_always_rolls_back() {
        assert_eq!(JobState::Failed.valid_transitions(), &[JobState::RollingBack]);
        assert!(!JobState::Failed.is_terminal());
    }
}
