//! `deploy` - run jobs for one or more devices through the whole pipeline.

use crate::cli::context::CliContext;
use crate::cli::error::explain;
use crate::cli::exit::Exit;
use crate::cli::output::{print_json, print_table_colored, short_id, state_color};
use anyhow::Result;
use comfy_table::Color;
use netcommit_ids::{DeviceId, JobId};
use netcommit_job::{JobError, JobState};
use netcommit_pipeline::{JobOutcome, PipelineError};
use serde::Serialize;

#[derive(Debug)]
pub struct DeployArgs {
    pub devices: Vec<DeviceId>,
    pub all: bool,
    pub template: String,
    pub json: bool,
}

#[derive(Debug, Serialize)]
struct DeployRow {
    device: DeviceId,
    job_id: Option<JobId>,
    state: Option<JobState>,
    attempts: u32,
    error: Option<JobError>,
    /// Set when no job ran (device busy, intent missing, ...)
    refused: Option<String>,
    exit_code: u8,
}

impl DeployRow {
    fn from_outcome(outcome: JobOutcome) -> (Self, Exit) {
        match outcome.result {
            Ok(job) => {
                let exit = Exit::for_job(&job);
                let row = DeployRow {
                    device: outcome.device,
                    job_id: Some(job.id.clone()),
                    state: Some(job.state()),
                    attempts: job.attempts,
                    error: job.error,
                    refused: None,
                    exit_code: exit.code(),
                };
                (row, exit)
            }
            Err(err) => {
                let exit = match &err {
                    PipelineError::Render(_) => Exit::Rejected,
                    _ => Exit::Failed,
                };
                let row = DeployRow {
                    device: outcome.device,
                    job_id: outcome.job_id,
                    state: None,
                    attempts: 0,
                    error: None,
                    refused: Some(err.to_string()),
                    exit_code: exit.code(),
                };
                (row, exit)
            }
        }
    }
}

pub fn run(ctx: &CliContext, args: DeployArgs) -> Result<Exit> {
    let pipeline = ctx.pipeline()?;
    let outcomes = if args.all {
        pipeline.deploy_all(&args.template)
    } else {
        pipeline.deploy(&args.devices, &args.template)
    }
    .map_err(explain)?;

    if outcomes.is_empty() {
        println!("No devices to deploy.");
        return Ok(Exit::Success);
    }

    let (rows, exits): (Vec<DeployRow>, Vec<Exit>) =
        outcomes.into_iter().map(DeployRow::from_outcome).unzip();
    let exit = Exit::worst(exits);

    if args.json {
        print_json(&rows)?;
        return Ok(exit);
    }

    let table = rows
        .iter()
        .map(|row| {
            let (state, color) = match row.state {
                Some(state) => (state.to_string(), Some(state_color(state))),
                None => ("REFUSED".to_string(), Some(Color::DarkYellow)),
            };
            let detail = row
                .refused
                .clone()
                .or_else(|| row.error.as_ref().map(|e| e.to_string()))
                .unwrap_or_default();
            vec![
                (row.device.to_string(), None),
                (
                    row.job_id
                        .as_ref()
                        .map(|id| short_id(id.as_str()).to_string())
                        .unwrap_or_else(|| "-".to_string()),
                    None,
                ),
                (state, color),
                (row.attempts.to_string(), None),
                (detail, None),
            ]
        })
        .collect();
    print_table_colored(&["Device", "Job", "State", "Attempts", "Detail"], table);

    let parked: Vec<&DeployRow> = rows
        .iter()
        .filter(|r| r.state == Some(JobState::AwaitingApproval))
        .collect();
    for row in parked {
        if let Some(id) = &row.job_id {
            println!("  {} awaits approval: netcommit approve --job {}", row.device, id);
        }
    }
    Ok(exit)
}
