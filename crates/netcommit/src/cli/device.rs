//! `unlock` - clear a device halt left by a failed rollback.

use crate::cli::context::CliContext;
use crate::cli::error::{explain, HelpfulError};
use crate::cli::exit::Exit;
use crate::cli::output::format_time;
use anyhow::Result;
use netcommit_ids::DeviceId;

pub fn run_unlock(ctx: &CliContext, device: &DeviceId, reason: &str) -> Result<Exit> {
    if reason.trim().is_empty() {
        return Err(HelpfulError::new("An unlock reason is required")
            .with_context("The reason is written to the audit log next to the halt it clears")
            .with_suggestion(format!(
                "TRY: netcommit unlock --device {} --reason \"restored running config by hand\"",
                device
            ))
            .into());
    }

    let pipeline = ctx.pipeline()?;
    match pipeline
        .unlock(device, reason, &ctx.actor)
        .map_err(explain)?
    {
        Some(record) => {
            println!(
                "Device {} unlocked (halted by job {} at {}: {}).",
                device,
                record.job_id,
                format_time(record.halted_at),
                record.reason
            );
        }
        None => println!("Device {} was not halted.", device),
    }
    Ok(Exit::Success)
}
