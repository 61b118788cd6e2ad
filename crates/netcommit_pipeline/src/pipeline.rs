//! Pipeline facade: the operations the CLI and embedders call.

use crate::audit::{AuditSink, EventKind, JobEvent, JsonlAuditSink};
use crate::context::PipelineContext;
use crate::drift::DriftMonitor;
use crate::executor::DeploymentExecutor;
use crate::intent::{FileIntentStore, IntentStore};
use crate::lock::HaltRecord;
use crate::pool::{CancelMap, JobOutcome, WorkerPool};
use crate::transport::{LabTransport, TransportSet};
use crate::validate::ValidationResult;
use crate::PipelineError;
use chrono::Utc;
use netcommit_ids::{DeviceId, JobId};
use netcommit_job::{
    ApprovalRecord, DeploymentJob, ErrorKind, JobError, JobKind, JobState, RenderedConfig,
};
use netcommit_protocol::config::StatePaths;
use netcommit_protocol::defaults::CANCELLED_BY_USER_MESSAGE;
use netcommit_protocol::{DeviceFamily, NetcommitConfig};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

/// What `cancel` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The job was parked and is now Cancelled
    Cancelled,
    /// The job is running; it stops at its next checkpoint
    Requested,
}

pub struct Pipeline {
    ctx: Arc<PipelineContext>,
    executor: Arc<DeploymentExecutor>,
    /// Tokens for jobs running in this process.
    /// INVARIANT: Lock held only for HashMap insert/remove/get, never across I/O.
    cancels: CancelMap,
}

impl Pipeline {
    /// File-backed pipeline: intent directory, lab devices and a JSONL audit
    /// log, all under the configured state paths.
    pub fn open(config: NetcommitConfig) -> Result<Self, PipelineError> {
        let paths = config.state_paths();
        let intents: Arc<dyn IntentStore> =
            Arc::new(FileIntentStore::new(paths.intent_dir.clone()));
        let transports = DeviceFamily::ALL
            .iter()
            .fold(TransportSet::new(), |set, family| {
                set.with(
                    *family,
                    Arc::new(LabTransport::new(paths.lab_dir.clone(), *family)),
                )
            });
        let audit: Arc<dyn AuditSink> = Arc::new(JsonlAuditSink::new(paths.audit_log.clone())?);
        Self::with_parts(config, &paths, intents, transports, audit)
    }

    /// Pipeline over caller-supplied collaborators.
    pub fn with_parts(
        config: NetcommitConfig,
        paths: &StatePaths,
        intents: Arc<dyn IntentStore>,
        transports: TransportSet,
        audit: Arc<dyn AuditSink>,
    ) -> Result<Self, PipelineError> {
        let ctx = Arc::new(PipelineContext::new(
            config, paths, intents, transports, audit,
        )?);
        Ok(Self {
            executor: Arc::new(DeploymentExecutor::new(ctx.clone())),
            ctx,
            cancels: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    pub fn context(&self) -> &Arc<PipelineContext> {
        &self.ctx
    }

    pub fn config(&self) -> &NetcommitConfig {
        &self.ctx.config
    }

    // ------------------------------------------------------------------
    // Previews (no job, no device contact)
    // ------------------------------------------------------------------

    pub fn render_preview(
        &self,
        device: &DeviceId,
        template: &str,
        intent_version: Option<u64>,
    ) -> Result<RenderedConfig, PipelineError> {
        let intent = self.ctx.intents.get_intent(device, intent_version)?;
        Ok(self.ctx.templates.render(&intent, template)?)
    }

    /// Render and validate against the device's current baseline.
    pub fn validate_preview(
        &self,
        device: &DeviceId,
        template: &str,
        intent_version: Option<u64>,
    ) -> Result<(RenderedConfig, ValidationResult), PipelineError> {
        let rendered = self.render_preview(device, template, intent_version)?;
        let golden = self.ctx.baselines.load(device)?;
        let result = self
            .ctx
            .validator
            .validate(&rendered, golden.as_ref().map(|b| b.content()));
        Ok((rendered, result))
    }

    // ------------------------------------------------------------------
    // Jobs
    // ------------------------------------------------------------------

    /// Create and persist a job for the device's current intent.
    ///
    /// Refused with `DeviceBusy` while the device already has a non-terminal
    /// job; the check and the write are atomic in the job store.
    pub fn create_job(
        &self,
        device: &DeviceId,
        template: &str,
        kind: JobKind,
    ) -> Result<DeploymentJob, PipelineError> {
        let intent = self.ctx.intents.get_intent(device, None)?;
        let requires_approval = match kind {
            JobKind::Deploy => self.ctx.config.approval.deploy_requires_approval,
            JobKind::DriftRemediation => true,
        };
        let mut job = DeploymentJob::new(device.clone(), intent.family, kind, template)
            .with_intent_version(intent.version)
            .with_approval_required(requires_approval);
        self.executor.register(&mut job)?;
        Ok(job)
    }

    /// Deploy current intent to each device, running up to
    /// `concurrency.max_workers` jobs at once. Outcomes follow input order.
    pub fn deploy(
        &self,
        devices: &[DeviceId],
        template: &str,
    ) -> Result<Vec<JobOutcome>, PipelineError> {
        let mut outcomes: Vec<Option<JobOutcome>> = Vec::with_capacity(devices.len());
        let mut queued = Vec::new();
        for device in devices {
            match self.create_job(device, template, JobKind::Deploy) {
                Ok(job) => {
                    queued.push(job);
                    outcomes.push(None);
                }
                Err(e) => {
                    warn!(device = %device, "Deploy refused: {}", e);
                    outcomes.push(Some(JobOutcome {
                        device: device.clone(),
                        job_id: None,
                        result: Err(e),
                    }));
                }
            }
        }

        if !queued.is_empty() {
            let workers = self.ctx.config.concurrency.max_workers.min(queued.len());
            let pool = WorkerPool::start(workers, self.executor.clone(), self.cancels.clone())?;
            let expected = queued.len();
            for job in queued {
                pool.submit(job)?;
            }
            let mut finished = Vec::with_capacity(expected);
            while finished.len() < expected {
                match pool.recv() {
                    Some(outcome) => finished.push(outcome),
                    None => break,
                }
            }
            pool.shutdown();

            let mut by_device: HashMap<DeviceId, JobOutcome> = finished
                .into_iter()
                .map(|o| (o.device.clone(), o))
                .collect();
            for (device, slot) in devices.iter().zip(outcomes.iter_mut()) {
                if slot.is_none() {
                    *slot = by_device.remove(device);
                }
            }
        }

        Ok(outcomes
            .into_iter()
            .zip(devices)
            .map(|(outcome, device)| {
                outcome.unwrap_or_else(|| JobOutcome {
                    device: device.clone(),
                    job_id: None,
                    result: Err(PipelineError::PoolClosed),
                })
            })
            .collect())
    }

    /// Deploy to every device the intent store knows about.
    pub fn deploy_all(&self, template: &str) -> Result<Vec<JobOutcome>, PipelineError> {
        let devices = self.ctx.intents.list_devices()?;
        info!(devices = devices.len(), "Deploying to all devices");
        self.deploy(&devices, template)
    }

    /// Run (or resume) a stored job on the calling thread.
    pub fn run_job(&self, job_id: &JobId) -> Result<DeploymentJob, PipelineError> {
        let job = self.job(job_id)?;
        let token = self
            .cancels
            .lock()
            .expect("Cancel map lock poisoned")
            .entry(job_id.clone())
            .or_default()
            .clone();
        let result = self.executor.run(job, &token);
        self.cancels
            .lock()
            .expect("Cancel map lock poisoned")
            .remove(job_id);
        result
    }

    /// Let a parked job through the gate and run it.
    pub fn approve(
        &self,
        job_id: &JobId,
        approver: &str,
        note: Option<String>,
    ) -> Result<DeploymentJob, PipelineError> {
        let approval = ApprovalRecord::new(approver, note);
        let updated = self.ctx.jobs.update(job_id, |job| {
            if job.state() != JobState::AwaitingApproval {
                return Ok(Err(job.state()));
            }
            job.approval = Some(approval.clone());
            Ok(Ok(()))
        })?;
        let job = match updated {
            None => return Err(PipelineError::JobNotFound(job_id.clone())),
            Some((job, Err(state))) => {
                return Err(PipelineError::NotAwaitingApproval {
                    job_id: job.id,
                    state,
                })
            }
            Some((job, Ok(()))) => job,
        };

        self.ctx.record(
            &JobEvent::for_job(EventKind::Approved, &job)
                .with_actor(approver)
                .with_reason(approval.note.clone().unwrap_or_else(|| "approved".to_string())),
        );
        info!(job_id = %job_id, approver, "Job approved");
        self.run_job(job_id)
    }

    /// Cancel a job that has not touched its device.
    ///
    /// A parked job is cancelled on the spot; a running one gets a marker
    /// (and its token, when it runs in this process) and stops at its next
    /// checkpoint.
    pub fn cancel(&self, job_id: &JobId, actor: &str) -> Result<CancelOutcome, PipelineError> {
        let updated = self.ctx.jobs.update(job_id, |job| {
            let state = job.state();
            if !state.is_cancellable() {
                return Ok(Err(state));
            }
            if state == JobState::AwaitingApproval {
                job.record_error(JobError::new(
                    netcommit_job::Stage::Approval,
                    ErrorKind::Cancelled,
                    CANCELLED_BY_USER_MESSAGE,
                ));
                let transition = job.transition_with_reason(
                    JobState::Cancelled,
                    Some(CANCELLED_BY_USER_MESSAGE.to_string()),
                )?;
                return Ok(Ok(Some(transition)));
            }
            job.cancel_requested_at = Some(Utc::now());
            Ok(Ok(None))
        })?;

        let (job, transition) = match updated {
            None => return Err(PipelineError::JobNotFound(job_id.clone())),
            Some((job, Err(state))) => {
                return Err(PipelineError::NotCancellable {
                    job_id: job.id,
                    state,
                })
            }
            Some((job, Ok(transition))) => (job, transition),
        };

        self.ctx
            .record(&JobEvent::for_job(EventKind::CancelRequested, &job).with_actor(actor));
        match transition {
            Some(transition) => {
                self.ctx
                    .record(&JobEvent::transition(&job, &transition).with_actor(actor));
                info!(job_id = %job_id, "Cancelled parked job");
                Ok(CancelOutcome::Cancelled)
            }
            None => {
                if let Some(token) = self
                    .cancels
                    .lock()
                    .expect("Cancel map lock poisoned")
                    .get(job_id)
                {
                    token.cancel();
                }
                info!(job_id = %job_id, "Cancellation requested");
                Ok(CancelOutcome::Requested)
            }
        }
    }

    /// Ask for a deployed change to be reversed. Accepted only while the job
    /// is deploying or post-checking; the executor picks it up at its next
    /// checkpoint.
    pub fn request_rollback(&self, job_id: &JobId, actor: &str) -> Result<DeploymentJob, PipelineError> {
        let updated = self.ctx.jobs.update(job_id, |job| {
            let state = job.state();
            if !state.accepts_rollback_request() {
                return Ok(Err(state));
            }
            job.rollback_requested_at = Some(Utc::now());
            Ok(Ok(()))
        })?;
        match updated {
            None => Err(PipelineError::JobNotFound(job_id.clone())),
            Some((job, Err(state))) => Err(PipelineError::RollbackRefused {
                job_id: job.id,
                state,
            }),
            Some((job, Ok(()))) => {
                self.ctx.record(
                    &JobEvent::for_job(EventKind::RollbackRequested, &job).with_actor(actor),
                );
                info!(job_id = %job_id, "Rollback requested");
                Ok(job)
            }
        }
    }

    pub fn jobs(&self) -> Result<Vec<DeploymentJob>, PipelineError> {
        Ok(self.ctx.jobs.load_all()?)
    }

    pub fn job(&self, job_id: &JobId) -> Result<DeploymentJob, PipelineError> {
        self.ctx
            .jobs
            .load(job_id)?
            .ok_or_else(|| PipelineError::JobNotFound(job_id.clone()))
    }

    // ------------------------------------------------------------------
    // Devices and audit
    // ------------------------------------------------------------------

    /// Clear a device halt. Returns the cleared record, if there was one.
    pub fn unlock(
        &self,
        device: &DeviceId,
        reason: &str,
        actor: &str,
    ) -> Result<Option<HaltRecord>, PipelineError> {
        let cleared = self.ctx.locks.clear_halt(device)?;
        if let Some(record) = &cleared {
            self.ctx.record(
                &JobEvent::for_device(EventKind::DeviceUnlocked, device)
                    .with_job_id(record.job_id.clone())
                    .with_reason(reason)
                    .with_actor(actor),
            );
        }
        Ok(cleared)
    }

    pub fn halted(&self) -> Result<Vec<HaltRecord>, PipelineError> {
        Ok(self.ctx.locks.halted()?)
    }

    pub fn audit_trail(&self, job_id: Option<&JobId>) -> Result<Vec<JobEvent>, PipelineError> {
        Ok(match job_id {
            Some(id) => self.ctx.audit.events_for_job(id)?,
            None => self.ctx.audit.events()?,
        })
    }

    pub fn drift_monitor(&self) -> Result<DriftMonitor, PipelineError> {
        DriftMonitor::new(self.executor.clone())
    }
}
