//! Process exit status.
//!
//! | Code | Meaning |
//! |------|---------|
//! | 0 | success (including a job parked for approval) |
//! | 1 | validation rejected, or rendering failed |
//! | 2 | deployment failed: rolled back, aborted, cancelled or refused |
//! | 3 | rollback failed, device halted |
//!
//! When several jobs run, the most severe status wins.

use netcommit_job::{DeploymentJob, ErrorKind, JobState};
use netcommit_pipeline::PipelineError;
use std::process::ExitCode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Exit {
    Success = 0,
    Rejected = 1,
    Failed = 2,
    Fatal = 3,
}

impl Exit {
    pub fn for_job(job: &DeploymentJob) -> Self {
        match job.state() {
            JobState::FailedFatal => Exit::Fatal,
            JobState::Rejected => Exit::Rejected,
            JobState::Aborted
                if job
                    .error
                    .as_ref()
                    .is_some_and(|e| e.kind == ErrorKind::Render) =>
            {
                Exit::Rejected
            }
            JobState::RolledBack
            | JobState::Aborted
            | JobState::Cancelled
            | JobState::Failed
            | JobState::RollingBack => Exit::Failed,
            _ => Exit::Success,
        }
    }

    /// Status for an operation that failed before or outside a job.
    pub fn for_error(err: &anyhow::Error) -> Self {
        match err.downcast_ref::<PipelineError>() {
            Some(PipelineError::Render(_)) => Exit::Rejected,
            _ => Exit::Failed,
        }
    }

    /// Most severe status across a batch.
    pub fn worst(statuses: impl IntoIterator<Item = Exit>) -> Self {
        statuses.into_iter().max().unwrap_or(Exit::Success)
    }

    pub fn code(self) -> u8 {
        self as u8
    }
}

impl From<Exit> for ExitCode {
    fn from(exit: Exit) -> Self {
        ExitCode::from(exit.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netcommit_ids::DeviceId;
    use netcommit_job::{JobError, JobKind, Stage};
    use netcommit_protocol::DeviceFamily;

    fn job_in(path: &[JobState]) -> DeploymentJob {
        let mut job = DeploymentJob::new(
            DeviceId::parse("sw1").unwrap(),
            DeviceFamily::Cli,
            JobKind::Deploy,
            "base",
        );
        for state in path {
            job.transition(*state).unwrap();
        }
        job
    }

    #[test]
    fn test_terminal_states_map_to_codes() {
        assert_eq!(Exit::for_job(&job_in(&[])), Exit::Success);
        assert_eq!(
            Exit::for_job(&job_in(&[
                JobState::Rendering,
                JobState::Rendered,
                JobState::Validating,
                JobState::Rejected,
            ])),
            Exit::Rejected
        );
        assert_eq!(
            Exit::for_job(&job_in(&[JobState::Rendering, JobState::Aborted])),
            Exit::Failed
        );
    }

    #[test]
    fn test_render_abort_is_a_rejection() {
        let mut job = job_in(&[JobState::Rendering, JobState::Aborted]);
        job.record_error(JobError::new(Stage::Render, ErrorKind::Render, "bad template"));
        assert_eq!(Exit::for_job(&job), Exit::Rejected);
    }

    #[test]
    fn test_worst_wins() {
        assert_eq!(Exit::worst([]), Exit::Success);
        assert_eq!(
            Exit::worst([Exit::Rejected, Exit::Fatal, Exit::Failed]),
            Exit::Fatal
        );
        assert_eq!(Exit::Fatal.code(), 3);
    }
}
