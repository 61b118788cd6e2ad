//! Shared services for every stage of the pipeline.

use crate::audit::{AuditSink, JobEvent};
use crate::baseline::BaselineStore;
use crate::diff::Differ;
use crate::intent::IntentStore;
use crate::lock::DeviceLocks;
use crate::postcheck::PostCheckVerifier;
use crate::render::TemplateRegistry;
use crate::retry::RetryPolicy;
use crate::rollback::RollbackManager;
use crate::store::JobStore;
use crate::transport::TransportSet;
use crate::validate::Validator;
use crate::PipelineError;
use netcommit_protocol::config::StatePaths;
use netcommit_protocol::NetcommitConfig;
use std::sync::Arc;
use std::time::Duration;
use tracing::error;

/// Everything a worker needs to carry a job through the pipeline.
///
/// Built once per process and shared behind an `Arc`. All members are
/// either immutable or internally synchronized.
pub struct PipelineContext {
    pub config: NetcommitConfig,
    pub intents: Arc<dyn IntentStore>,
    pub templates: TemplateRegistry,
    pub differ: Arc<Differ>,
    pub validator: Validator,
    pub transports: TransportSet,
    pub locks: DeviceLocks,
    pub baselines: BaselineStore,
    pub jobs: JobStore,
    pub audit: Arc<dyn AuditSink>,
    pub retry: RetryPolicy,
    pub verifier: PostCheckVerifier,
    pub rollback: RollbackManager,
}

impl PipelineContext {
    pub fn new(
        config: NetcommitConfig,
        paths: &StatePaths,
        intents: Arc<dyn IntentStore>,
        transports: TransportSet,
        audit: Arc<dyn AuditSink>,
    ) -> Result<Self, PipelineError> {
        config.check()?;

        let differ = Arc::new(Differ::new(&config.diff.volatile_patterns)?);
        let templates = match &paths.templates_dir {
            Some(dir) => TemplateRegistry::with_overrides(dir)?,
            None => TemplateRegistry::from_embedded()?,
        };
        let validator = Validator::new(&config.validation, differ.clone())?;
        let retry = RetryPolicy::from_config(&config.retry);
        let verifier = PostCheckVerifier::from_config(&config.post_check);
        let rollback = RollbackManager::new(retry.clone(), verifier.clone(), differ.clone());

        Ok(Self {
            locks: DeviceLocks::new(paths.locks_dir.clone())?,
            baselines: BaselineStore::new(paths.baselines_dir.clone())?,
            jobs: JobStore::new(paths.jobs_dir.clone())?,
            config,
            intents,
            templates,
            differ,
            validator,
            transports,
            audit,
            retry,
            verifier,
            rollback,
        })
    }

    /// Append to the audit log. A failed write is logged and does not stop
    /// the job that produced the event.
    pub fn record(&self, event: &JobEvent) {
        if let Err(e) = self.audit.record(event) {
            error!(
                device = %event.device,
                event = ?event.event,
                "Failed to write audit event: {}",
                e
            );
        }
    }

    pub fn lock_wait(&self) -> Duration {
        Duration::from_millis(self.config.lock.wait_timeout_ms)
    }

    pub fn lock_poll(&self) -> Duration {
        Duration::from_millis(self.config.lock.poll_interval_ms)
    }
}
