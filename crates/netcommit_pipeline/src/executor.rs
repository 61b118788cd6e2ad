//! Deployment executor - drives one job through the state machine.
//!
//! ```text
//! Pending → Rendering → Rendered → Validating → Validated ─┬─→ Deploying
//!                                      │                    └─→ AwaitingApproval → Deploying
//!                                      └─→ Rejected
//! Deploying → Deployed → PostChecking → Verified → Committed
//!     └──────────┴────────────┴─→ Failed → RollingBack → RolledBack | FailedFatal
//! ```
//!
//! Before Deploying a job can be cancelled, rejected or aborted. Once the
//! device lock is taken and the snapshot captured the job runs to a terminal
//! state: every failure from there on goes through the rollback manager
//! exactly once.
//!
//! A run stops early when the job parks at the approval gate; calling
//! [`DeploymentExecutor::run`] again after approval resumes it.

use crate::audit::{EventKind, JobEvent};
use crate::cancel::CancellationToken;
use crate::context::PipelineContext;
use crate::lock::{DeviceLockGuard, LockError, LockHolder};
use crate::postcheck::PostCheckError;
use crate::transport::{ApplyError, TransportAdapter, TransportError};
use crate::PipelineError;
use netcommit_job::{
    DeploymentJob, DeviceSnapshot, ErrorKind, JobError, JobState, RenderedConfig, Stage,
    StateMachineError,
};
use netcommit_protocol::defaults::{CANCELLED_BY_USER_MESSAGE, OPERATOR_ROLLBACK_MESSAGE};
use std::sync::Arc;
use tracing::{debug, error, info, info_span, warn};

pub struct DeploymentExecutor {
    ctx: Arc<PipelineContext>,
}

impl DeploymentExecutor {
    pub fn new(ctx: Arc<PipelineContext>) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &Arc<PipelineContext> {
        &self.ctx
    }

    /// Persist a freshly created job and audit its creation.
    ///
    /// Fails with `DeviceBusy` if the device already has an active job.
    pub fn register(&self, job: &mut DeploymentJob) -> Result<(), PipelineError> {
        if let Some(active) = self.ctx.jobs.create(job)? {
            return Err(PipelineError::DeviceBusy {
                device: job.device.clone(),
                state: active.state(),
                job_id: active.id,
            });
        }
        self.ctx.record(&JobEvent::for_job(EventKind::Created, job));
        info!(
            job_id = %job.id,
            device = %job.device,
            kind = %job.kind,
            "Created job"
        );
        Ok(())
    }

    /// Run a job until it reaches a terminal state or parks at the approval
    /// gate.
    ///
    /// Pre-deploy states resume where they left off. A job found in a
    /// device-holding state was interrupted mid-deployment and is refused.
    pub fn run(
        &self,
        mut job: DeploymentJob,
        cancel: &CancellationToken,
    ) -> Result<DeploymentJob, PipelineError> {
        let span = info_span!("job", job_id = %job.id, device = %job.device);
        let _enter = span.enter();

        if job.is_terminal() {
            debug!("Job already terminal ({})", job.state());
            return Ok(job);
        }
        if job.state().holds_device() {
            return Err(PipelineError::NotResumable {
                job_id: job.id.clone(),
                state: job.state(),
            });
        }

        if job.state() == JobState::Pending {
            if let Some(record) = self.ctx.locks.halt_record(&job.device)? {
                let message = format!(
                    "device halted after job {} ({}); clear with `netcommit unlock`",
                    record.job_id, record.reason
                );
                return self.abort(job, Stage::Lock, ErrorKind::Lock, message);
            }
            if self.cancel_requested(&mut job, cancel) {
                return self.cancel_job(job);
            }
            self.advance(&mut job, JobState::Rendering, None)?;
        }

        if job.state() == JobState::Rendering {
            match self.render(&mut job)? {
                Flow::Continue => {}
                Flow::Stop => return Ok(job),
            }
        }

        if job.state() == JobState::Rendered {
            if self.cancel_requested(&mut job, cancel) {
                return self.cancel_job(job);
            }
            self.advance(&mut job, JobState::Validating, None)?;
        }

        if job.state() == JobState::Validating {
            match self.validate(&mut job)? {
                Flow::Continue => {}
                Flow::Stop => return Ok(job),
            }
        }

        if self.cancel_requested(&mut job, cancel) {
            return self.cancel_job(job);
        }

        if job.state() == JobState::Validated && job.requires_approval && job.approval.is_none() {
            let reason = format!("{} job requires approval", job.kind);
            self.advance(&mut job, JobState::AwaitingApproval, Some(reason))?;
            info!("Job parked awaiting approval");
            return Ok(job);
        }
        if job.state() == JobState::AwaitingApproval && job.approval.is_none() {
            debug!("Job still awaiting approval");
            return Ok(job);
        }

        self.deploy(job, cancel)
    }

    // ------------------------------------------------------------------
    // Pre-deploy stages
    // ------------------------------------------------------------------

    fn render(&self, job: &mut DeploymentJob) -> Result<Flow, PipelineError> {
        if job.rendered().is_none() {
            let intent = match self.ctx.intents.get_intent(&job.device, job.intent_version) {
                Ok(intent) => intent,
                Err(e) => {
                    self.abort_in_place(job, Stage::Intent, ErrorKind::Intent, e.to_string())?;
                    return Ok(Flow::Stop);
                }
            };
            if intent.family != job.family {
                let message = format!(
                    "intent declares family {} but the job targets {}",
                    intent.family, job.family
                );
                self.abort_in_place(job, Stage::Intent, ErrorKind::Intent, message)?;
                return Ok(Flow::Stop);
            }

            let rendered = match self.ctx.templates.render(&intent, &job.template) {
                Ok(rendered) => rendered,
                Err(e) => {
                    self.abort_in_place(job, Stage::Render, ErrorKind::Render, e.to_string())?;
                    return Ok(Flow::Stop);
                }
            };
            job.assertions = intent.derive_assertions();
            job.attach_rendered(Arc::new(rendered))?;
        }

        let reason = job.rendered().map(|r| {
            format!(
                "template {}@{} intent v{} hash {}",
                r.template_name(),
                r.template_version(),
                r.intent_version(),
                r.content_hash()
            )
        });
        self.advance(job, JobState::Rendered, reason)?;
        Ok(Flow::Continue)
    }

    fn validate(&self, job: &mut DeploymentJob) -> Result<Flow, PipelineError> {
        let Some(rendered) = job.rendered().cloned() else {
            self.abort_in_place(
                job,
                Stage::Validate,
                ErrorKind::Integrity,
                "no rendered configuration attached".to_string(),
            )?;
            return Ok(Flow::Stop);
        };

        let golden = match self.ctx.baselines.load(&job.device) {
            Ok(baseline) => baseline,
            Err(e) => {
                self.abort_in_place(job, Stage::Validate, ErrorKind::Storage, format!("{:#}", e))?;
                return Ok(Flow::Stop);
            }
        };

        let result = self
            .ctx
            .validator
            .validate(&rendered, golden.as_ref().map(|b| b.content()));
        job.findings = result.findings.clone();
        for warning in result.warnings() {
            warn!("Validation warning: {}", warning);
        }

        if !result.passed() {
            let blocking: Vec<String> = result.blocking().map(|f| f.to_string()).collect();
            let message = format!(
                "{} blocking finding(s): {}",
                blocking.len(),
                blocking.join("; ")
            );
            warn!("Validation rejected configuration: {}", message);
            job.record_error(JobError::new(Stage::Validate, ErrorKind::Validation, message.clone()));
            self.advance(job, JobState::Rejected, Some(message))?;
            return Ok(Flow::Stop);
        }

        job.validated_hash = Some(rendered.content_hash().to_string());
        let reason = format!("{} warning(s)", result.warnings().count());
        self.advance(job, JobState::Validated, Some(reason))?;
        Ok(Flow::Continue)
    }

    // ------------------------------------------------------------------
    // Deployment
    // ------------------------------------------------------------------

    fn deploy(
        &self,
        mut job: DeploymentJob,
        cancel: &CancellationToken,
    ) -> Result<DeploymentJob, PipelineError> {
        let transport = match self.ctx.transports.get(job.family) {
            Ok(t) => t,
            Err(e) => return self.abort(job, Stage::Deploy, ErrorKind::Transport, e.to_string()),
        };

        let holder = LockHolder::Job {
            job_id: job.id.clone(),
        };
        let guard = match self.ctx.locks.acquire(
            &job.device,
            holder,
            self.ctx.lock_wait(),
            self.ctx.lock_poll(),
            Some(cancel),
        ) {
            Ok(guard) => guard,
            Err(LockError::Cancelled(_)) => return self.cancel_job(job),
            Err(e) => return self.abort(job, Stage::Lock, ErrorKind::Lock, e.to_string()),
        };

        // Last chance to stop without touching the device
        if self.cancel_requested(&mut job, cancel) {
            return self.cancel_job(job);
        }

        let Some(rendered) = job.rendered().cloned() else {
            return self.abort(
                job,
                Stage::Deploy,
                ErrorKind::Integrity,
                "no rendered configuration attached".to_string(),
            );
        };
        if !rendered.verify_integrity()
            || job.validated_hash.as_deref() != Some(rendered.content_hash())
        {
            return self.abort(
                job,
                Stage::Deploy,
                ErrorKind::Integrity,
                "rendered content does not match the validated hash".to_string(),
            );
        }

        let (live, _) = self.ctx.retry.run(
            "snapshot read",
            TransportError::is_retryable,
            || transport.read_config(&job.device),
        );
        let live = match live {
            Ok(live) => live,
            Err(e) => {
                return self.abort(
                    job,
                    Stage::Snapshot,
                    ErrorKind::Transport,
                    format!("snapshot capture failed: {}", e),
                )
            }
        };
        let holding = self
            .ctx
            .verifier
            .probe(transport.as_ref(), &job.device, &job.assertions);
        let snapshot = DeviceSnapshot::new(live, holding);
        debug!(hash = %snapshot.content_hash, "Captured pre-deployment snapshot");
        job.snapshot = Some(snapshot);

        self.advance(&mut job, JobState::Deploying, None)?;

        // From here on the job runs to a terminal state
        match self.apply_and_verify(&mut job, transport.as_ref(), &rendered) {
            Ok(()) => self.commit(job, &guard, &rendered),
            Err(cause) => self.roll_back(job, transport.as_ref(), guard, cause),
        }
    }

    fn apply_and_verify(
        &self,
        job: &mut DeploymentJob,
        transport: &dyn TransportAdapter,
        rendered: &RenderedConfig,
    ) -> Result<(), JobError> {
        if self.rollback_requested(job) {
            return Err(operator_rollback(Stage::Deploy));
        }

        let (applied, attempts) = self.ctx.retry.run(
            "configuration apply",
            ApplyError::is_retryable,
            || transport.apply(&job.device, rendered.content()),
        );
        job.attempts += attempts;
        match applied {
            Ok(result) => debug!(changed = result.changed, attempts, "Configuration applied"),
            Err(ApplyError::Transport(e)) => {
                return Err(JobError::new(
                    Stage::Deploy,
                    ErrorKind::Transport,
                    format!("{} (after {} attempt(s))", e, attempts),
                ))
            }
            Err(e @ ApplyError::Rejected { .. }) => {
                return Err(JobError::new(Stage::Deploy, ErrorKind::Apply, e.to_string()))
            }
        }
        self.advance(job, JobState::Deployed, Some(format!("{} attempt(s)", attempts)))
            .map_err(|e| machine_error(Stage::Deploy, e))?;

        if self.rollback_requested(job) {
            return Err(operator_rollback(Stage::Deploy));
        }
        self.advance(job, JobState::PostChecking, None)
            .map_err(|e| machine_error(Stage::PostCheck, e))?;

        let jobs = &self.ctx.jobs;
        let job_id = job.id.clone();
        let interrupted = || {
            jobs.load(&job_id)
                .ok()
                .flatten()
                .is_some_and(|j| j.rollback_requested())
        };
        let verified = self.ctx.verifier.verify(
            transport,
            &job.device,
            &job.assertions,
            &interrupted,
        );
        match verified {
            Ok(()) => Ok(()),
            Err(PostCheckError::Interrupted) => {
                self.rollback_requested(job);
                Err(operator_rollback(Stage::PostCheck))
            }
            Err(e @ PostCheckError::Timeout { .. }) => Err(JobError::new(
                Stage::PostCheck,
                ErrorKind::PostCheckTimeout,
                e.to_string(),
            )),
        }
    }

    fn commit(
        &self,
        mut job: DeploymentJob,
        guard: &DeviceLockGuard,
        rendered: &RenderedConfig,
    ) -> Result<DeploymentJob, PipelineError> {
        self.advance(&mut job, JobState::Verified, None)?;

        let reason = match self.ctx.baselines.commit(guard, rendered, &job.id) {
            Ok(baseline) => format!("baseline v{}", baseline.version),
            Err(e) => {
                // The device runs verified config; only the record is missing
                error!("Failed to record baseline: {:#}", e);
                job.record_error(JobError::new(
                    Stage::Commit,
                    ErrorKind::Storage,
                    format!("baseline not recorded: {:#}", e),
                ));
                "baseline not recorded".to_string()
            }
        };
        self.advance(&mut job, JobState::Committed, Some(reason))?;
        info!("Job committed");
        Ok(job)
    }

    fn roll_back(
        &self,
        mut job: DeploymentJob,
        transport: &dyn TransportAdapter,
        guard: DeviceLockGuard,
        cause: JobError,
    ) -> Result<DeploymentJob, PipelineError> {
        warn!("Deployment failed: {}", cause);
        let reason = cause.to_string();
        job.record_error(cause);
        self.advance(&mut job, JobState::Failed, Some(reason))?;
        self.advance(&mut job, JobState::RollingBack, None)?;

        job.rollback_invocations += 1;
        let restored = match &job.snapshot {
            Some(snapshot) => self
                .ctx
                .rollback
                .restore(transport, &job.device, snapshot)
                .map_err(|e| e.to_string()),
            None => Err("no pre-deployment snapshot captured".to_string()),
        };

        match restored {
            Ok(report) => {
                let reason = format!(
                    "snapshot restored in {} attempt(s), {} assertion(s) re-verified",
                    report.attempts, report.reverified
                );
                self.advance(&mut job, JobState::RolledBack, Some(reason))?;
                info!("Job rolled back");
            }
            Err(message) => {
                error!("Rollback failed: {}", message);
                job.record_error(JobError::new(
                    Stage::Rollback,
                    ErrorKind::RollbackFailure,
                    message.clone(),
                ));
                match guard.escalate(&job.id, &message) {
                    Ok(record) => self.ctx.record(
                        &JobEvent::for_job(EventKind::DeviceHalted, &job).with_reason(record.reason),
                    ),
                    Err(e) => error!("Failed to persist device halt: {}", e),
                }
                self.advance(&mut job, JobState::FailedFatal, Some(message))?;
            }
        }
        drop(guard);
        Ok(job)
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    /// Move the job, persist it and audit the transition.
    fn advance(
        &self,
        job: &mut DeploymentJob,
        to: JobState,
        reason: Option<String>,
    ) -> Result<(), StateMachineError> {
        let transition = job.transition_with_reason(to, reason)?;
        info!(
            job_id = %job.id,
            device = %job.device,
            from = %transition.from,
            state = %to,
            "Job transition"
        );
        if let Err(e) = self.ctx.jobs.save(job) {
            error!(job_id = %job.id, "Failed to persist job: {:#}", e);
        }
        self.ctx.record(&JobEvent::transition(job, &transition));
        Ok(())
    }

    fn abort(
        &self,
        mut job: DeploymentJob,
        stage: Stage,
        kind: ErrorKind,
        message: String,
    ) -> Result<DeploymentJob, PipelineError> {
        self.abort_in_place(&mut job, stage, kind, message)?;
        Ok(job)
    }

    fn abort_in_place(
        &self,
        job: &mut DeploymentJob,
        stage: Stage,
        kind: ErrorKind,
        message: String,
    ) -> Result<(), StateMachineError> {
        warn!("Job aborted during {}: {}", stage, message);
        job.record_error(JobError::new(stage, kind, message.clone()));
        self.advance(job, JobState::Aborted, Some(message))
    }

    fn cancel_job(&self, mut job: DeploymentJob) -> Result<DeploymentJob, PipelineError> {
        let stage = pre_deploy_stage(job.state());
        info!("Job cancelled during {}", stage);
        job.record_error(JobError::new(
            stage,
            ErrorKind::Cancelled,
            CANCELLED_BY_USER_MESSAGE,
        ));
        self.advance(
            &mut job,
            JobState::Cancelled,
            Some(CANCELLED_BY_USER_MESSAGE.to_string()),
        )?;
        Ok(job)
    }

    /// Cancellation checkpoint: the in-process token or a marker written by
    /// another process.
    fn cancel_requested(&self, job: &mut DeploymentJob, cancel: &CancellationToken) -> bool {
        if cancel.is_cancelled() {
            return true;
        }
        self.sync(job);
        job.cancel_requested()
    }

    /// Rollback checkpoint while the device is held.
    fn rollback_requested(&self, job: &mut DeploymentJob) -> bool {
        self.sync(job);
        job.rollback_requested()
    }

    fn sync(&self, job: &mut DeploymentJob) {
        if let Err(e) = self.ctx.jobs.sync_requests(job) {
            debug!("Could not read operator requests: {:#}", e);
        }
    }
}

enum Flow {
    Continue,
    Stop,
}

fn operator_rollback(stage: Stage) -> JobError {
    JobError::new(stage, ErrorKind::OperatorRollback, OPERATOR_ROLLBACK_MESSAGE)
}

fn machine_error(stage: Stage, e: StateMachineError) -> JobError {
    JobError::new(stage, ErrorKind::Storage, e.to_string())
}

fn pre_deploy_stage(state: JobState) -> Stage {
    match state {
        JobState::Pending | JobState::Rendering => Stage::Render,
        JobState::Rendered | JobState::Validating => Stage::Validate,
        _ => Stage::Approval,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditSink;
    use crate::intent::{IntentRecord, InterfaceIntent, MemoryIntentStore};
    use crate::transport::{MemoryTransport, TransportSet};
    use netcommit_ids::DeviceId;
    use netcommit_job::JobKind;
    use netcommit_protocol::{DeviceFamily, NetcommitConfig};
    use tempfile::TempDir;

    struct Fixture {
        _temp: TempDir,
        executor: DeploymentExecutor,
        intents: Arc<MemoryIntentStore>,
        transport: Arc<MemoryTransport>,
    }

    fn fixture() -> Fixture {
        let temp = TempDir::new().unwrap();
        let mut config = NetcommitConfig::default();
        config.paths.state_dir = Some(temp.path().to_path_buf());
        config.retry.base_delay_ms = 1;
        config.retry.max_delay_ms = 2;
        config.post_check.timeout_ms = 30;
        config.post_check.initial_interval_ms = 2;
        config.post_check.max_interval_ms = 5;
        config.lock.wait_timeout_ms = 50;
        config.lock.poll_interval_ms = 5;
        let paths = config.state_paths();

        let intents = Arc::new(MemoryIntentStore::new());
        let transport = Arc::new(MemoryTransport::new());
        let ctx = PipelineContext::new(
            config,
            &paths,
            intents.clone(),
            TransportSet::uniform(transport.clone()),
            Arc::new(MemoryAuditSink::new()),
        )
        .unwrap();
        Fixture {
            _temp: temp,
            executor: DeploymentExecutor::new(Arc::new(ctx)),
            intents,
            transport,
        }
    }

    fn intent(device: &str) -> IntentRecord {
        let mut record = IntentRecord::new(
            DeviceId::parse(device).unwrap(),
            DeviceFamily::Cli,
            device,
        );
        record.interfaces.push(InterfaceIntent {
            name: "eth0".to_string(),
            description: Some("Uplink".to_string()),
            address: Some("10.1.1.1/24".to_string()),
            vlans: Vec::new(),
            enabled: true,
        });
        record.services.ntp_servers.push("10.0.0.1".to_string());
        record
    }

    fn job(device: &str) -> DeploymentJob {
        DeploymentJob::new(
            DeviceId::parse(device).unwrap(),
            DeviceFamily::Cli,
            JobKind::Deploy,
            "base",
        )
    }

    #[test]
    fn test_happy_path_commits() {
        let f = fixture();
        f.intents.put(intent("sw1"));
        let done = f
            .executor
            .run(job("sw1"), &CancellationToken::new())
            .unwrap();
        assert_eq!(done.state(), JobState::Committed);
        assert_eq!(done.attempts, 1);
        assert!(done.error.is_none());
        let baseline = f.executor.context().baselines.load(&done.device).unwrap();
        assert_eq!(
            baseline.unwrap().rendered.content_hash(),
            done.rendered().unwrap().content_hash()
        );
    }

    #[test]
    fn test_missing_intent_aborts() {
        let f = fixture();
        let done = f
            .executor
            .run(job("ghost"), &CancellationToken::new())
            .unwrap();
        assert_eq!(done.state(), JobState::Aborted);
        assert_eq!(done.error.unwrap().kind, ErrorKind::Intent);
    }

    #[test]
    fn test_cancelled_token_stops_before_render() {
        let f = fixture();
        f.intents.put(intent("sw1"));
        let token = CancellationToken::new();
        token.cancel();
        let done = f.executor.run(job("sw1"), &token).unwrap();
        assert_eq!(done.state(), JobState::Cancelled);
        assert!(f.transport.applied(&done.device).is_empty());
    }

    #[test]
    fn test_approval_gate_parks_then_resumes() {
        let f = fixture();
        f.intents.put(intent("sw1"));
        let token = CancellationToken::new();
        let parked = f
            .executor
            .run(job("sw1").with_approval_required(true), &token)
            .unwrap();
        assert_eq!(parked.state(), JobState::AwaitingApproval);
        assert!(f.transport.applied(&parked.device).is_empty());

        // Without approval a second run stays parked
        let parked = f.executor.run(parked, &token).unwrap();
        assert_eq!(parked.state(), JobState::AwaitingApproval);

        let mut approved = parked;
        approved.approval = Some(netcommit_job::ApprovalRecord::new("ops", None));
        let done = f.executor.run(approved, &token).unwrap();
        assert_eq!(done.state(), JobState::Committed);
    }

    #[test]
    fn test_device_holding_state_is_not_resumable() {
        let f = fixture();
        f.intents.put(intent("sw1"));
        let mut stuck = job("sw1");
        for state in [
            JobState::Rendering,
            JobState::Rendered,
            JobState::Validating,
            JobState::Validated,
            JobState::Deploying,
        ] {
            stuck.transition(state).unwrap();
        }
        assert!(matches!(
            f.executor.run(stuck, &CancellationToken::new()),
            Err(PipelineError::NotResumable { .. })
        ));
    }
}
