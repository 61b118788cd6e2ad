//! Jobs command - list deployment jobs from the job store.

use crate::cli::context::CliContext;
use crate::cli::error::explain;
use crate::cli::exit::Exit;
use crate::cli::output::{format_time, print_json, print_table_colored, short_id, state_color};
use anyhow::Result;
use comfy_table::Color;
use netcommit_ids::DeviceId;
use netcommit_job::{DeploymentJob, JobState};
use serde::Serialize;

/// Arguments for the jobs command
#[derive(Debug)]
pub struct JobsArgs {
    pub device: Option<DeviceId>,
    pub active: bool,
    pub limit: usize,
    pub json: bool,
}

/// Counts by outcome across every stored job
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct JobStats {
    pub total: usize,
    pub active: usize,
    pub committed: usize,
    pub rejected: usize,
    pub rolled_back: usize,
    pub fatal: usize,
}

impl JobStats {
    pub fn collect(jobs: &[DeploymentJob]) -> Self {
        let mut stats = JobStats {
            total: jobs.len(),
            ..Default::default()
        };
        for job in jobs {
            match job.state() {
                JobState::Committed => stats.committed += 1,
                JobState::Rejected => stats.rejected += 1,
                JobState::RolledBack => stats.rolled_back += 1,
                JobState::FailedFatal => stats.fatal += 1,
                state if !state.is_terminal() => stats.active += 1,
                _ => {}
            }
        }
        stats
    }
}

#[derive(Debug, Serialize)]
struct JobsOutput<'a> {
    stats: JobStats,
    jobs: &'a [DeploymentJob],
}

/// Apply filters, newest first, truncated to `limit`.
pub fn select(mut jobs: Vec<DeploymentJob>, args: &JobsArgs) -> Vec<DeploymentJob> {
    jobs.retain(|job| {
        args.device.as_ref().map_or(true, |d| &job.device == d)
            && (!args.active || !job.is_terminal())
    });
    jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    jobs.truncate(args.limit);
    jobs
}

/// Execute the jobs command
pub fn run(ctx: &CliContext, args: JobsArgs) -> Result<Exit> {
    let pipeline = ctx.pipeline()?;
    let all = pipeline.jobs().map_err(explain)?;
    let stats = JobStats::collect(&all);
    let halted = pipeline.halted().map_err(explain)?;
    let jobs = select(all, &args);

    if args.json {
        print_json(&JobsOutput {
            stats,
            jobs: &jobs,
        })?;
        return Ok(Exit::Success);
    }

    if jobs.is_empty() {
        println!("No jobs found.");
    } else {
        let rows = jobs
            .iter()
            .map(|job| {
                vec![
                    (short_id(job.id.as_str()).to_string(), None),
                    (job.device.to_string(), None),
                    (job.kind.to_string(), None),
                    (job.state().to_string(), Some(state_color(job.state()))),
                    (format_time(job.updated_at), None),
                    (
                        job.error
                            .as_ref()
                            .map(|e| e.kind.to_string())
                            .unwrap_or_default(),
                        None,
                    ),
                ]
            })
            .collect();
        print_table_colored(&["Job", "Device", "Kind", "State", "Updated", "Error"], rows);
    }

    println!(
        "{} job(s): {} active, {} committed, {} rejected, {} rolled back, {} fatal",
        stats.total, stats.active, stats.committed, stats.rejected, stats.rolled_back, stats.fatal
    );
    if !halted.is_empty() {
        println!();
        let rows = halted
            .iter()
            .map(|h| {
                vec![
                    (h.device.to_string(), Some(Color::Magenta)),
                    (h.job_id.to_string(), None),
                    (format_time(h.halted_at), None),
                    (h.reason.clone(), None),
                ]
            })
            .collect();
        print_table_colored(&["Halted device", "Job", "Since", "Reason"], rows);
    }
    Ok(Exit::Success)
}

#[cfg(test)]
mod tests {
    use super::*;
    use netcommit_job::JobKind;
    use netcommit_protocol::DeviceFamily;

    fn job(device: &str, path: &[JobState]) -> DeploymentJob {
        let mut job = DeploymentJob::new(
            DeviceId::parse(device).unwrap(),
            DeviceFamily::Cli,
            JobKind::Deploy,
            "base",
        );
        for state in path {
            job.transition(*state).unwrap();
        }
        job
    }

    fn args(device: Option<&str>, active: bool, limit: usize) -> JobsArgs {
        JobsArgs {
            device: device.map(|d| DeviceId::parse(d).unwrap()),
            active,
            limit,
            json: false,
        }
    }

    #[test]
    fn test_stats_by_outcome() {
        let jobs = vec![
            job("sw1", &[]),
            job("sw2", &[JobState::Rendering, JobState::Aborted]),
            job(
                "sw3",
                &[
                    JobState::Rendering,
                    JobState::Rendered,
                    JobState::Validating,
                    JobState::Rejected,
                ],
            ),
        ];
        let stats = JobStats::collect(&jobs);
        assert_eq!(stats.total, 3);
        assert_eq!(stats.active, 1);
        assert_eq!(stats.rejected, 1);
        assert_eq!(stats.committed, 0);
    }

    #[test]
    fn test_select_filters_and_limits() {
        let jobs = vec![
            job("sw1", &[]),
            job("sw1", &[JobState::Rendering, JobState::Aborted]),
            job("sw2", &[]),
        ];

        assert_eq!(select(jobs.clone(), &args(Some("sw1"), false, 10)).len(), 2);
        assert_eq!(select(jobs.clone(), &args(Some("sw1"), true, 10)).len(), 1);
        assert_eq!(select(jobs.clone(), &args(None, true, 10)).len(), 2);
        assert_eq!(select(jobs, &args(None, false, 1)).len(), 1);
    }
}
