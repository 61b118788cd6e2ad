//! Helpful error types for CLI commands
//!
//! Every error includes:
//! - What went wrong
//! - Context about the situation
//! - Suggestions for how to fix it

use netcommit_ids::{DeviceId, JobId};
use netcommit_job::JobState;
use netcommit_pipeline::{PipelineError, RenderError};
use serde::Serialize;
use std::fmt;
use std::path::Path;

/// An error with helpful context and suggestions
#[derive(Debug)]
pub struct HelpfulError {
    /// The main error message
    pub message: String,
    /// Additional context about what was happening
    pub context: Option<String>,
    /// Suggestions for how to fix the error
    pub suggestions: Vec<String>,
}

impl HelpfulError {
    /// Create a new helpful error
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            context: None,
            suggestions: Vec::new(),
        }
    }

    /// Add context to the error
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Add a suggestion for fixing the error
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.push(suggestion.into());
        self
    }

    /// Add multiple suggestions
    pub fn with_suggestions(
        mut self,
        suggestions: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.suggestions
            .extend(suggestions.into_iter().map(|s| s.into()));
        self
    }

    // === Common error constructors ===

    /// Configuration file could not be loaded
    pub fn config_invalid(path: &Path, details: &str) -> Self {
        Self::new(format!("Invalid configuration: {}", path.display()))
            .with_context(details.to_string())
            .with_suggestions([
                "TRY: Print the effective configuration: netcommit config".to_string(),
                format!("TRY: Move the file aside to fall back to defaults: mv {0} {0}.bak", path.display()),
            ])
    }

    /// Job id did not parse or no such job exists
    pub fn job_not_found(job_id: &str) -> Self {
        Self::new(format!("Job not found: {}", job_id))
            .with_context("No job record with this id exists in the job store")
            .with_suggestion("TRY: List known jobs: netcommit jobs")
    }

    /// Another job still owns the device
    pub fn device_busy(device: &DeviceId, job_id: &JobId, state: JobState) -> Self {
        Self::new(format!("Device {} already has an active job", device))
            .with_context(format!("Job {} is {}", job_id, state))
            .with_suggestions([
                format!("TRY: Inspect it: netcommit job {}", job_id),
                format!("TRY: Approve it: netcommit approve --job {}", job_id),
                format!("TRY: Cancel it: netcommit cancel --job {}", job_id),
            ])
    }

    /// Template missing or failed to render
    pub fn render_failed(device: &DeviceId, err: &RenderError) -> Self {
        Self::new(format!("Rendering failed for {}", device))
            .with_context(err.to_string())
            .with_suggestions([
                "TRY: Check the template name passed with --template".to_string(),
                format!("TRY: Check the intent records for {}", device),
            ])
    }
}

impl fmt::Display for HelpfulError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "ERROR: {}", self.message)?;

        if let Some(ctx) = &self.context {
            writeln!(f, "CONTEXT: {}", ctx)?;
        }

        if !self.suggestions.is_empty() {
            writeln!(f)?;
            for suggestion in &self.suggestions {
                writeln!(f, "  {}", suggestion)?;
            }
        }

        Ok(())
    }
}

impl std::error::Error for HelpfulError {}

/// Attach suggestions to the pipeline errors an operator can act on.
pub fn explain(err: PipelineError) -> anyhow::Error {
    match err {
        PipelineError::JobNotFound(id) => HelpfulError::job_not_found(id.as_str()).into(),
        PipelineError::DeviceBusy {
            device,
            job_id,
            state,
        } => HelpfulError::device_busy(&device, &job_id, state).into(),
        PipelineError::NotAwaitingApproval { job_id, state } => {
            HelpfulError::new(format!("Job {} is not awaiting approval", job_id))
                .with_context(format!("Current state: {}", state))
                .with_suggestion(format!("TRY: netcommit job {}", job_id))
                .into()
        }
        PipelineError::NotCancellable { job_id, state } => {
            HelpfulError::new(format!("Job {} can no longer be cancelled", job_id))
                .with_context(format!(
                    "Current state: {}; jobs can only be cancelled before they touch the device",
                    state
                ))
                .with_suggestion(format!(
                    "TRY: Reverse an in-flight deployment instead: netcommit rollback --job {}",
                    job_id
                ))
                .into()
        }
        PipelineError::RollbackRefused { job_id, state } => {
            HelpfulError::new(format!("Rollback refused for job {}", job_id))
                .with_context(format!(
                    "Current state: {}; rollback is only accepted while deploying or post-checking",
                    state
                ))
                .into()
        }
        other => anyhow::Error::new(other),
    }
}

#[derive(Debug, Serialize)]
struct JsonError<'a> {
    error: &'a str,
    context: Option<&'a str>,
    suggestions: &'a [String],
}

/// Print an error as a single JSON object on stderr
pub fn print_json_error(err: &anyhow::Error) {
    let rendered;
    let body = match err.downcast_ref::<HelpfulError>() {
        Some(helpful) => JsonError {
            error: &helpful.message,
            context: helpful.context.as_deref(),
            suggestions: &helpful.suggestions,
        },
        None => {
            rendered = format!("{:#}", err);
            JsonError {
                error: &rendered,
                context: None,
                suggestions: &[],
            }
        }
    };
    match serde_json::to_string(&body) {
        Ok(line) => eprintln!("{}", line),
        Err(_) => eprintln!("{:#}", err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_helpful_error_display() {
        let err = HelpfulError::new("Something went wrong")
            .with_context("While deploying")
            .with_suggestion("Try again");

        let display = format!("{}", err);
        assert!(display.contains("ERROR: Something went wrong"));
        assert!(display.contains("CONTEXT: While deploying"));
        assert!(display.contains("Try again"));
    }

    #[test]
    fn test_config_invalid() {
        let err = HelpfulError::config_invalid(&PathBuf::from("/etc/netcommit.toml"), "bad key");
        let display = format!("{}", err);
        assert!(display.contains("/etc/netcommit.toml"));
        assert!(display.contains("bad key"));
        assert!(display.contains("TRY:"));
    }

    #[test]
    fn test_device_busy_points_at_job() {
        let device = DeviceId::parse("sw1").unwrap();
        let job_id = JobId::new();
        let err = explain(PipelineError::DeviceBusy {
            device,
            job_id: job_id.clone(),
            state: JobState::AwaitingApproval,
        });
        let helpful = err.downcast_ref::<HelpfulError>().unwrap();
        assert!(helpful
            .suggestions
            .iter()
            .any(|s| s.contains(job_id.as_str())));
    }
}
