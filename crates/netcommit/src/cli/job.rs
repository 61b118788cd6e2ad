//! Single-job commands: `approve`, `cancel`, `rollback` and `job <id>`.

use crate::cli::context::CliContext;
use crate::cli::error::explain;
use crate::cli::exit::Exit;
use crate::cli::output::{format_time, print_json, print_table_colored, severity_color, state_color};
use anyhow::Result;
use netcommit_ids::JobId;
use netcommit_job::DeploymentJob;
use netcommit_pipeline::{CancelOutcome, JobEvent};
use serde::Serialize;

fn print_summary(job: &DeploymentJob) {
    println!("Job:      {}", job.id);
    println!("Device:   {} ({})", job.device, job.family);
    println!("Kind:     {}", job.kind);
    println!("Template: {}", job.template);
    if let Some(version) = job.intent_version {
        println!("Intent:   v{}", version);
    }
    println!("State:    {}", job.state());
    if let Some(hash) = &job.validated_hash {
        println!("Content:  sha256 {}", hash);
    }
    if let Some(approval) = &job.approval {
        println!(
            "Approved: {} at {}{}",
            approval.approved_by,
            format_time(approval.approved_at),
            approval
                .note
                .as_deref()
                .map(|n| format!(" ({})", n))
                .unwrap_or_default()
        );
    }
    if job.attempts > 0 {
        println!("Attempts: {}", job.attempts);
    }
    if let Some(error) = &job.error {
        println!("Error:    {}", error);
    }
}

pub fn run_approve(
    ctx: &CliContext,
    job_id: &JobId,
    by: Option<String>,
    note: Option<String>,
) -> Result<Exit> {
    let pipeline = ctx.pipeline()?;
    let approver = by.unwrap_or_else(|| ctx.actor.clone());
    let job = pipeline.approve(job_id, &approver, note).map_err(explain)?;
    print_summary(&job);
    Ok(Exit::for_job(&job))
}

pub fn run_cancel(ctx: &CliContext, job_id: &JobId) -> Result<Exit> {
    let pipeline = ctx.pipeline()?;
    match pipeline.cancel(job_id, &ctx.actor).map_err(explain)? {
        CancelOutcome::Cancelled => println!("Job {} cancelled.", job_id),
        CancelOutcome::Requested => println!(
            "Cancellation requested; job {} stops before it touches the device.",
            job_id
        ),
    }
    Ok(Exit::Success)
}

pub fn run_rollback(ctx: &CliContext, job_id: &JobId) -> Result<Exit> {
    let pipeline = ctx.pipeline()?;
    let job = pipeline
        .request_rollback(job_id, &ctx.actor)
        .map_err(explain)?;
    println!(
        "Rollback requested for job {} ({}); it reverses at its next checkpoint.",
        job.id,
        job.state()
    );
    Ok(Exit::Success)
}

#[derive(Debug, Serialize)]
struct JobDetail<'a> {
    job: &'a DeploymentJob,
    audit: &'a [JobEvent],
}

pub fn run_show(ctx: &CliContext, job_id: &JobId, json: bool) -> Result<Exit> {
    let pipeline = ctx.pipeline()?;
    let job = pipeline.job(job_id).map_err(explain)?;
    let audit = pipeline.audit_trail(Some(job_id)).map_err(explain)?;

    if json {
        print_json(&JobDetail {
            job: &job,
            audit: &audit,
        })?;
        return Ok(Exit::Success);
    }

    print_summary(&job);

    if !job.findings.is_empty() {
        println!();
        let rows = job
            .findings
            .iter()
            .map(|f| {
                vec![
                    (f.severity.to_string(), Some(severity_color(f.severity))),
                    (f.rule.clone(), None),
                    (f.message.clone(), None),
                ]
            })
            .collect();
        print_table_colored(&["Severity", "Rule", "Message"], rows);
    }

    println!();
    let rows = job
        .history()
        .iter()
        .map(|t| {
            vec![
                (format_time(t.timestamp), None),
                (t.from.to_string(), None),
                (t.to.to_string(), Some(state_color(t.to))),
                (t.reason.clone().unwrap_or_default(), None),
            ]
        })
        .collect();
    print_table_colored(&["Time", "From", "To", "Reason"], rows);

    let operator_events: Vec<&JobEvent> = audit
        .iter()
        .filter(|e| e.actor.is_some())
        .collect();
    if !operator_events.is_empty() {
        println!();
        let rows = operator_events
            .into_iter()
            .map(|e| {
                vec![
                    (format_time(e.at), None),
                    (e.event.to_string(), None),
                    (e.actor.clone().unwrap_or_default(), None),
                    (e.reason.clone().unwrap_or_default(), None),
                ]
            })
            .collect();
        print_table_colored(&["Time", "Event", "Actor", "Reason"], rows);
    }
    Ok(Exit::Success)
}
