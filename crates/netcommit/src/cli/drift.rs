//! `drift-scan` and `drift-watch`.

use crate::cli::context::CliContext;
use crate::cli::error::explain;
use crate::cli::exit::Exit;
use crate::cli::output::{print_json, print_table_colored, short_id};
use anyhow::{Context, Result};
use comfy_table::Color;
use netcommit_ids::DeviceId;
use netcommit_pipeline::{CancellationToken, DriftOutcome, DriftReference};
use std::sync::Arc;
use tracing::info;

fn reference_label(reference: DriftReference) -> &'static str {
    match reference {
        DriftReference::Baseline => "baseline",
        DriftReference::FreshRender => "fresh render",
    }
}

pub fn run_scan(ctx: &CliContext, devices: Vec<DeviceId>, json: bool) -> Result<Exit> {
    let pipeline = ctx.pipeline()?;
    let monitor = pipeline.drift_monitor().map_err(explain)?;
    let targets = (!devices.is_empty()).then_some(devices.as_slice());
    let outcomes = monitor.scan_once(targets).map_err(explain)?;

    if json {
        print_json(&outcomes)?;
        return Ok(Exit::Success);
    }
    if outcomes.is_empty() {
        println!("No devices to scan.");
        return Ok(Exit::Success);
    }

    let threshold = ctx.config.drift.severity_threshold;
    let rows = outcomes
        .iter()
        .map(|outcome| match outcome {
            DriftOutcome::Report(report) => {
                let (status, color) = if report.is_clean() {
                    ("clean".to_string(), Some(Color::Green))
                } else if report.score >= threshold {
                    ("drifted".to_string(), Some(Color::Red))
                } else {
                    ("drifted (below threshold)".to_string(), Some(Color::Yellow))
                };
                let mut detail = reference_label(report.reference).to_string();
                if let Some(version) = report.baseline_version {
                    detail.push_str(&format!(" v{}", version));
                }
                if report.intent_changed {
                    detail.push_str(", intent changed since commit");
                }
                if let Some(job_id) = &report.candidate_job {
                    detail.push_str(&format!(", candidate {}", short_id(job_id.as_str())));
                }
                vec![
                    (report.device.to_string(), None),
                    (status, color),
                    (format!("{:.1}", report.score), None),
                    (report.entries.len().to_string(), None),
                    (detail, None),
                ]
            }
            DriftOutcome::Skipped { device, reason } => vec![
                (device.to_string(), None),
                ("skipped".to_string(), Some(Color::DarkGrey)),
                ("-".to_string(), None),
                ("-".to_string(), None),
                (reason.clone(), None),
            ],
        })
        .collect();
    print_table_colored(&["Device", "Status", "Score", "Lines", "Detail"], rows);

    for outcome in &outcomes {
        if let DriftOutcome::Report(report) = outcome {
            if let Some(job_id) = &report.candidate_job {
                println!(
                    "  {}: remediation awaits approval: netcommit approve --job {}",
                    report.device, job_id
                );
            }
        }
    }
    Ok(Exit::Success)
}

/// Cancel `token` on SIGINT/SIGTERM (Ctrl+C on Windows).
fn install_shutdown_handler(token: CancellationToken) -> Result<()> {
    #[cfg(unix)]
    {
        use signal_hook::consts::{SIGINT, SIGTERM};
        use signal_hook::iterator::Signals;

        let mut signals =
            Signals::new([SIGINT, SIGTERM]).context("Failed to install signal handlers")?;
        std::thread::spawn(move || {
            if let Some(sig) = signals.forever().next() {
                info!("Received signal {}, stopping drift monitor...", sig);
                token.cancel();
            }
        });
    }

    #[cfg(windows)]
    {
        ctrlc::set_handler(move || {
            info!("Received Ctrl+C, stopping drift monitor...");
            token.cancel();
        })
        .context("Failed to install Ctrl+C handler")?;
    }

    Ok(())
}

pub fn run_watch(ctx: &CliContext) -> Result<Exit> {
    let pipeline = ctx.pipeline()?;
    let monitor = Arc::new(pipeline.drift_monitor().map_err(explain)?);
    let shutdown = CancellationToken::new();
    install_shutdown_handler(shutdown.clone())?;

    println!(
        "Watching for drift every {}s (threshold {:.1}). Press Ctrl+C to stop.",
        ctx.config.drift.interval_secs, ctx.config.drift.severity_threshold
    );
    let handle = monitor
        .spawn(shutdown)
        .context("Failed to start drift monitor thread")?;
    if handle.join().is_err() {
        anyhow::bail!("drift monitor thread panicked");
    }
    Ok(Exit::Success)
}
