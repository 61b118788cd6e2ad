//! Output formatting utilities for CLI commands
//!
//! Provides consistent formatting for:
//! - Tables with column alignment
//! - Job states and finding severities in color
//! - Timestamps

use chrono::{DateTime, Local, Utc};
use comfy_table::{presets::UTF8_FULL_CONDENSED, Cell, Color, ContentArrangement, Table};
use netcommit_job::JobState;
use netcommit_protocol::Severity;
use serde::Serialize;

/// Print a table with custom column colors
pub fn print_table_colored(headers: &[&str], rows: Vec<Vec<(String, Option<Color>)>>) {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic);

    let header_cells: Vec<Cell> = headers
        .iter()
        .map(|h| Cell::new(h).fg(Color::Cyan))
        .collect();
    table.set_header(header_cells);

    for row in rows {
        let cells: Vec<Cell> = row
            .into_iter()
            .map(|(text, color)| {
                let cell = Cell::new(text);
                if let Some(c) = color {
                    cell.fg(c)
                } else {
                    cell
                }
            })
            .collect();
        table.add_row(cells);
    }

    println!("{}", table);
}

/// Display color for a job state
pub fn state_color(state: JobState) -> Color {
    match state {
        JobState::Committed | JobState::Verified => Color::Green,
        JobState::AwaitingApproval => Color::Yellow,
        JobState::Rejected | JobState::Aborted | JobState::Cancelled => Color::DarkYellow,
        JobState::RolledBack | JobState::Failed | JobState::RollingBack => Color::Red,
        JobState::FailedFatal => Color::Magenta,
        JobState::Pending => Color::Grey,
        _ => Color::Cyan,
    }
}

/// Display color for a finding severity
pub fn severity_color(severity: Severity) -> Color {
    if severity.blocks_deployment() {
        Color::Red
    } else {
        Color::Yellow
    }
}

/// Format a UTC timestamp in local time
pub fn format_time(at: DateTime<Utc>) -> String {
    at.with_timezone(&Local)
        .format("%Y-%m-%d %H:%M:%S")
        .to_string()
}

/// Print a value as pretty JSON on stdout
pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Shorten a uuid to its first block for table display
pub fn short_id(id: &str) -> &str {
    id.split('-').next().unwrap_or(id)
}
