//! Drift monitor.
//!
//! Compares each device's live configuration against its baseline (or a
//! fresh render of current intent when nothing was ever committed), scores
//! the differences and raises remediation candidates that wait for
//! approval. The monitor only reads from devices and never moves a
//! baseline.

use crate::audit::{EventKind, JobEvent};
use crate::cancel::CancellationToken;
use crate::diff::{compile_patterns, DiffEntry, PatternError};
use crate::executor::DeploymentExecutor;
use crate::lock::{LockError, LockHolder};
use crate::PipelineError;
use chrono::{DateTime, Utc};
use netcommit_ids::{DeviceId, JobId};
use netcommit_job::{DeploymentJob, JobKind, JobState};
use netcommit_protocol::config::DriftConfig;
use netcommit_protocol::defaults::DEFAULT_TEMPLATE_NAME;
use netcommit_protocol::DeviceFamily;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// What the live configuration was compared against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriftReference {
    Baseline,
    FreshRender,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriftReport {
    pub device: DeviceId,
    /// Reference on the left, live on the right
    pub entries: Vec<DiffEntry>,
    pub score: f64,
    pub generated_at: DateTime<Utc>,
    pub reference: DriftReference,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baseline_version: Option<u64>,
    /// Intent moved on since the baseline was committed
    pub intent_changed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidate_job: Option<JobId>,
}

impl DriftReport {
    pub fn is_clean(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DriftOutcome {
    Report(DriftReport),
    /// Device was busy, halted or unreachable; nothing was compared
    Skipped { device: DeviceId, reason: String },
}

impl DriftOutcome {
    pub fn device(&self) -> &DeviceId {
        match self {
            DriftOutcome::Report(r) => &r.device,
            DriftOutcome::Skipped { device, .. } => device,
        }
    }
}

/// Weights diff lines by what they touch. First matching rule wins.
#[derive(Debug, Clone)]
pub struct CriticalityTable {
    rules: Vec<(String, Regex, f64)>,
    default_weight: f64,
}

impl CriticalityTable {
    pub fn from_config(config: &DriftConfig) -> Result<Self, PatternError> {
        let patterns: Vec<&str> = config.criticality.iter().map(|r| r.pattern.as_str()).collect();
        let compiled = compile_patterns(&patterns)?;
        let rules = config
            .criticality
            .iter()
            .zip(compiled)
            .map(|(rule, re)| (rule.category.clone(), re, rule.weight))
            .collect();
        Ok(Self {
            rules,
            default_weight: config.default_weight,
        })
    }

    pub fn weight(&self, line: &str) -> f64 {
        self.rules
            .iter()
            .find(|(_, re, _)| re.is_match(line))
            .map(|(_, _, w)| *w)
            .unwrap_or(self.default_weight)
    }

    /// Category of the first matching rule, if any.
    pub fn category(&self, line: &str) -> Option<&str> {
        self.rules
            .iter()
            .find(|(_, re, _)| re.is_match(line))
            .map(|(c, _, _)| c.as_str())
    }

    /// Sum over entries of the heavier side of each entry.
    pub fn score(&self, entries: &[DiffEntry]) -> f64 {
        entries
            .iter()
            .map(|entry| {
                entry
                    .texts()
                    .map(|t| self.weight(t))
                    .fold(0.0_f64, f64::max)
            })
            .sum()
    }
}

pub struct DriftMonitor {
    executor: Arc<DeploymentExecutor>,
    table: CriticalityTable,
}

impl DriftMonitor {
    pub fn new(executor: Arc<DeploymentExecutor>) -> Result<Self, PipelineError> {
        let table = CriticalityTable::from_config(&executor.context().config.drift)?;
        Ok(Self { executor, table })
    }

    pub fn table(&self) -> &CriticalityTable {
        &self.table
    }

    /// Scan the given devices, or every device with intent or a baseline.
    pub fn scan_once(
        &self,
        devices: Option<&[DeviceId]>,
    ) -> Result<Vec<DriftOutcome>, PipelineError> {
        let targets: Vec<DeviceId> = match devices {
            Some(list) => list.to_vec(),
            None => {
                let ctx = self.executor.context();
                let mut all: BTreeSet<DeviceId> = ctx.intents.list_devices()?.into_iter().collect();
                all.extend(ctx.baselines.load_all()?.into_iter().map(|b| b.device));
                all.into_iter().collect()
            }
        };

        let mut outcomes = Vec::with_capacity(targets.len());
        for device in &targets {
            outcomes.push(self.scan_device(device)?);
        }
        let drifted = outcomes
            .iter()
            .filter(|o| matches!(o, DriftOutcome::Report(r) if !r.is_clean()))
            .count();
        info!(devices = targets.len(), drifted, "Drift scan complete");
        Ok(outcomes)
    }

    pub fn scan_device(&self, device: &DeviceId) -> Result<DriftOutcome, PipelineError> {
        let ctx = self.executor.context();
        let skipped = |reason: String| -> Result<DriftOutcome, PipelineError> {
            debug!(device = %device, "Drift scan skipped: {}", reason);
            Ok(DriftOutcome::Skipped {
                device: device.clone(),
                reason,
            })
        };

        let baseline = ctx.baselines.load(device)?;
        let intent = match ctx.intents.get_intent(device, None) {
            Ok(intent) => Some(intent),
            Err(e) => {
                debug!(device = %device, "No current intent: {}", e);
                None
            }
        };
        let family = match (&baseline, &intent) {
            (Some(b), _) => b.rendered.family(),
            (None, Some(i)) => i.family,
            (None, None) => return skipped("no baseline and no intent".to_string()),
        };
        let template = baseline
            .as_ref()
            .map(|b| b.rendered.template_name().to_string())
            .unwrap_or_else(|| DEFAULT_TEMPLATE_NAME.to_string());

        let (reference_text, reference) = match (&baseline, &intent) {
            (Some(b), _) => (b.content().to_string(), DriftReference::Baseline),
            (None, Some(i)) => match ctx.templates.render(i, &template) {
                Ok(rendered) => (rendered.content().to_string(), DriftReference::FreshRender),
                Err(e) => return skipped(format!("fresh render failed: {}", e)),
            },
            (None, None) => return skipped("no baseline and no intent".to_string()),
        };

        let transport = match ctx.transports.get(family) {
            Ok(t) => t,
            Err(e) => return skipped(e.to_string()),
        };

        // Short read session; never wait behind a deployment
        let live = {
            let _guard = match ctx.locks.try_acquire(device, LockHolder::DriftScan) {
                Ok(guard) => guard,
                Err(LockError::Busy { holder, .. }) => {
                    return skipped(format!("device busy ({})", holder))
                }
                Err(LockError::Halted { record, .. }) => {
                    return skipped(format!("device halted after job {}", record.job_id))
                }
                Err(e) => return Err(e.into()),
            };
            match transport.read_config(device) {
                Ok(live) => live,
                Err(e) => return skipped(format!("read failed: {}", e)),
            }
        };

        let entries = ctx.differ.diff(&reference_text, &live);
        let score = self.table.score(&entries);
        let intent_changed = match (&baseline, &intent) {
            (Some(b), Some(i)) => b.rendered.intent_version() != i.version,
            _ => false,
        };

        let mut report = DriftReport {
            device: device.clone(),
            entries,
            score,
            generated_at: Utc::now(),
            reference,
            baseline_version: baseline.as_ref().map(|b| b.version),
            intent_changed,
            candidate_job: None,
        };

        if report.is_clean() {
            debug!(device = %device, "No drift");
            return Ok(DriftOutcome::Report(report));
        }

        info!(
            device = %device,
            entries = report.entries.len(),
            score = report.score,
            "Drift detected"
        );

        let threshold = ctx.config.drift.severity_threshold;
        if report.score >= threshold {
            match &intent {
                Some(i) => {
                    report.candidate_job =
                        self.raise_candidate(device, i.family, i.version, &template)?;
                }
                None => warn!(device = %device, "Drift over threshold but no intent to remediate from"),
            }
        }

        let mut event = JobEvent::for_device(EventKind::DriftDetected, device).with_reason(format!(
            "score {:.1} over {} line(s), threshold {:.1}",
            report.score,
            report.entries.len(),
            threshold
        ));
        if let Some(job_id) = &report.candidate_job {
            event = event.with_job_id(job_id.clone());
        }
        ctx.record(&event);

        Ok(DriftOutcome::Report(report))
    }

    /// Create a remediation job and run it up to the approval gate.
    fn raise_candidate(
        &self,
        device: &DeviceId,
        family: DeviceFamily,
        intent_version: u64,
        template: &str,
    ) -> Result<Option<JobId>, PipelineError> {
        let mut job = DeploymentJob::new(
            device.clone(),
            family,
            JobKind::DriftRemediation,
            template,
        )
        .with_intent_version(intent_version)
        .with_approval_required(true);
        match self.executor.register(&mut job) {
            Ok(()) => {}
            Err(PipelineError::DeviceBusy { job_id, state, .. }) => {
                info!(
                    device = %device,
                    job_id = %job_id,
                    state = %state,
                    "Device already has an active job; no candidate raised"
                );
                return Ok(None);
            }
            Err(e) => return Err(e),
        }

        let job = self.executor.run(job, &CancellationToken::new())?;
        if job.state() != JobState::AwaitingApproval {
            warn!(
                device = %device,
                job_id = %job.id,
                "Remediation candidate ended in {}",
                job.state()
            );
        }
        Ok(Some(job.id))
    }

    /// Scan every `drift.interval_secs` on a background thread until
    /// `shutdown` is cancelled.
    pub fn spawn(self: Arc<Self>, shutdown: CancellationToken) -> io::Result<JoinHandle<()>> {
        let interval = Duration::from_secs(self.executor.context().config.drift.interval_secs);
        thread::Builder::new()
            .name("drift-monitor".to_string())
            .spawn(move || {
                info!(interval_secs = interval.as_secs(), "Drift monitor started");
                while !shutdown.is_cancelled() {
                    if let Err(e) = self.scan_once(None) {
                        error!("Drift scan failed: {}", e);
                    }
                    let deadline = Instant::now() + interval;
                    while !shutdown.is_cancelled() {
                        let now = Instant::now();
                        if now >= deadline {
                            break;
                        }
                        thread::sleep((deadline - now).min(Duration::from_millis(250)));
                    }
                }
                info!("Drift monitor stopped");
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::Differ;
    use netcommit_protocol::defaults::DEFAULT_VOLATILE_PATTERNS;

    #[test]
    fn test_routing_outweighs_description() {
        let table = CriticalityTable::from_config(&DriftConfig::default()).unwrap();
        assert_eq!(table.category("router bgp 65000"), Some("routing"));
        assert_eq!(table.category("  ip address 10.1.1.1/24"), Some("addressing"));
        assert_eq!(table.category("ntp server 10.0.0.1"), Some("services"));
        assert_eq!(table.category("  description Uplink"), Some("description"));
        assert!(table.weight("router bgp 65000") > table.weight("  ip address 10.1.1.1/24"));
        assert!(table.weight("  ip address 10.1.1.1/24") > table.weight("ntp server 10.0.0.1"));
        assert!(table.weight("ntp server 10.0.0.1") > table.weight("  description Uplink"));
        assert_eq!(table.weight("banner motd hi"), 1.0);
    }

    #[test]
    fn test_score_takes_heavier_side() {
        let table = CriticalityTable::from_config(&DriftConfig::default()).unwrap();
        let differ = Differ::new(DEFAULT_VOLATILE_PATTERNS).unwrap();
        let entries = differ.diff(
            "hostname a\ninterface eth0\n  description Uplink\n",
            "hostname a\ninterface eth0\n  description Uplink\n  ip address 10.9.9.9/24\n",
        );
        assert_eq!(entries.len(), 1);
        assert_eq!(table.score(&entries), 3.0);

        let changed = differ.diff("  description old\n", "  ip address 10.9.9.9/24\n");
        assert_eq!(table.score(&changed), 3.0);
        assert_eq!(table.score(&[]), 0.0);
    }
}
