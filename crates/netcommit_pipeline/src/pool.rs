//! Worker pool - runs jobs for different devices concurrently.
//!
//! Workers share one queue. Render and validate run in parallel freely;
//! deployments serialize per device on the device lock.
//!
//! # Lock Invariant (cancels)
//!
//! The `cancels` map is shared with the [`crate::Pipeline`] facade so an
//! operator can signal a queued or running job:
//! 1. Tokens are registered before a job is queued and removed when it finishes
//! 2. Lock held only for brief O(1) HashMap ops, never across I/O
//! 3. CancellationToken itself is lock-free (Arc<AtomicBool>)

use crate::cancel::CancellationToken;
use crate::executor::DeploymentExecutor;
use crate::PipelineError;
use netcommit_ids::{DeviceId, JobId};
use netcommit_job::DeploymentJob;
use std::collections::HashMap;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use tracing::{debug, info};

pub type CancelMap = Arc<Mutex<HashMap<JobId, CancellationToken>>>;

/// Result of running one job.
#[derive(Debug)]
pub struct JobOutcome {
    pub device: DeviceId,
    pub job_id: Option<JobId>,
    pub result: Result<DeploymentJob, PipelineError>,
}

pub struct WorkerPool {
    tx: Option<Sender<DeploymentJob>>,
    results: Receiver<JobOutcome>,
    workers: Vec<JoinHandle<()>>,
    /// INVARIANT: Lock held only for HashMap insert/remove/get, never across I/O.
    cancels: CancelMap,
}

impl WorkerPool {
    pub fn start(
        size: usize,
        executor: Arc<DeploymentExecutor>,
        cancels: CancelMap,
    ) -> Result<Self, PipelineError> {
        let size = size.max(1);
        let (tx, rx) = mpsc::channel::<DeploymentJob>();
        let (results_tx, results) = mpsc::channel();
        let rx = Arc::new(Mutex::new(rx));

        let mut workers = Vec::with_capacity(size);
        for n in 0..size {
            let rx = rx.clone();
            let results_tx = results_tx.clone();
            let executor = executor.clone();
            let cancels = cancels.clone();
            let handle = thread::Builder::new()
                .name(format!("netcommit-worker-{}", n))
                .spawn(move || worker_loop(n, rx, results_tx, executor, cancels))
                .map_err(|source| PipelineError::Spawn {
                    what: "worker thread".to_string(),
                    source,
                })?;
            workers.push(handle);
        }
        info!(workers = size, "Worker pool started");

        Ok(Self {
            tx: Some(tx),
            results,
            workers,
            cancels,
        })
    }

    /// Queue a job. Its cancellation token is registered right away so a
    /// cancel arriving before a worker picks it up is not lost.
    pub fn submit(&self, job: DeploymentJob) -> Result<(), PipelineError> {
        let job_id = job.id.clone();
        self.cancels
            .lock()
            .expect("Cancel map lock poisoned")
            .entry(job_id.clone())
            .or_default();
        let sent = self
            .tx
            .as_ref()
            .map(|tx| tx.send(job).is_ok())
            .unwrap_or(false);
        if !sent {
            self.cancels
                .lock()
                .expect("Cancel map lock poisoned")
                .remove(&job_id);
            return Err(PipelineError::PoolClosed);
        }
        debug!(job_id = %job_id, "Queued job");
        Ok(())
    }

    /// Next finished job, or `None` once every worker has exited.
    pub fn recv(&self) -> Option<JobOutcome> {
        self.results.recv().ok()
    }

    /// Stop accepting jobs and wait for the queue to drain.
    pub fn shutdown(mut self) {
        self.tx.take();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
        info!("Worker pool stopped");
    }
}

fn worker_loop(
    n: usize,
    rx: Arc<Mutex<Receiver<DeploymentJob>>>,
    results: Sender<JobOutcome>,
    executor: Arc<DeploymentExecutor>,
    cancels: CancelMap,
) {
    debug!(worker = n, "Worker started");
    loop {
        let next = rx.lock().expect("Worker queue lock poisoned").recv();
        let Ok(job) = next else {
            break;
        };

        let job_id = job.id.clone();
        let device = job.device.clone();
        let token = cancels
            .lock()
            .expect("Cancel map lock poisoned")
            .get(&job_id)
            .cloned()
            .unwrap_or_default();

        let result = executor.run(job, &token);

        cancels
            .lock()
            .expect("Cancel map lock poisoned")
            .remove(&job_id);
        let outcome = JobOutcome {
            device,
            job_id: Some(job_id),
            result,
        };
        if results.send(outcome).is_err() {
            break;
        }
    }
    debug!(worker = n, "Worker stopped");
}
