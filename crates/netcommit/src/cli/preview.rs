//! `render` and `validate` - dry runs that never contact a device.

use crate::cli::context::CliContext;
use crate::cli::error::{explain, HelpfulError};
use crate::cli::exit::Exit;
use crate::cli::output::{print_json, print_table_colored, severity_color};
use anyhow::Result;
use netcommit_ids::DeviceId;
use netcommit_job::RenderedConfig;
use netcommit_pipeline::PipelineError;
use netcommit_protocol::Finding;
use serde::Serialize;

#[derive(Debug, Serialize)]
struct RenderOutput<'a> {
    device: &'a DeviceId,
    template: &'a str,
    template_version: &'a str,
    intent_version: u64,
    content_hash: &'a str,
    content: &'a str,
}

impl<'a> RenderOutput<'a> {
    fn from_rendered(rendered: &'a RenderedConfig) -> Self {
        Self {
            device: rendered.device(),
            template: rendered.template_name(),
            template_version: rendered.template_version(),
            intent_version: rendered.intent_version(),
            content_hash: rendered.content_hash(),
            content: rendered.content(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ValidateOutput<'a> {
    #[serde(flatten)]
    rendered: RenderOutput<'a>,
    passed: bool,
    findings: &'a [Finding],
}

/// Render errors are reported here so they keep their own exit status.
fn render_failure(device: &DeviceId, err: PipelineError) -> Result<Exit> {
    match err {
        PipelineError::Render(e) => {
            eprint!("{}", HelpfulError::render_failed(device, &e));
            Ok(Exit::Rejected)
        }
        other => Err(explain(other)),
    }
}

pub fn run_render(
    ctx: &CliContext,
    device: &DeviceId,
    template: &str,
    intent_version: Option<u64>,
    json: bool,
) -> Result<Exit> {
    let pipeline = ctx.pipeline()?;
    let rendered = match pipeline.render_preview(device, template, intent_version) {
        Ok(rendered) => rendered,
        Err(e) => return render_failure(device, e),
    };

    if json {
        print_json(&RenderOutput::from_rendered(&rendered))?;
    } else {
        print!("{}", rendered.content());
        eprintln!(
            "# {} template={}@{} intent=v{} sha256={}",
            device,
            rendered.template_name(),
            rendered.template_version(),
            rendered.intent_version(),
            rendered.content_hash()
        );
    }
    Ok(Exit::Success)
}

pub fn run_validate(
    ctx: &CliContext,
    device: &DeviceId,
    template: &str,
    intent_version: Option<u64>,
    json: bool,
) -> Result<Exit> {
    let pipeline = ctx.pipeline()?;
    let (rendered, result) = match pipeline.validate_preview(device, template, intent_version) {
        Ok(pair) => pair,
        Err(e) => return render_failure(device, e),
    };
    let exit = if result.passed() {
        Exit::Success
    } else {
        Exit::Rejected
    };

    if json {
        print_json(&ValidateOutput {
            rendered: RenderOutput::from_rendered(&rendered),
            passed: result.passed(),
            findings: &result.findings,
        })?;
        return Ok(exit);
    }

    if result.findings.is_empty() {
        println!("{}: no findings", device);
    } else {
        let rows = result
            .findings
            .iter()
            .map(|f| {
                vec![
                    (f.severity.to_string(), Some(severity_color(f.severity))),
                    (f.stage.to_string(), None),
                    (f.rule.clone(), None),
                    (
                        f.line.map(|l| l.to_string()).unwrap_or_else(|| "-".to_string()),
                        None,
                    ),
                    (f.message.clone(), None),
                ]
            })
            .collect();
        print_table_colored(&["Severity", "Stage", "Rule", "Line", "Message"], rows);
    }
    println!(
        "{}: {} ({} blocking, {} warning(s))",
        device,
        if result.passed() { "PASSED" } else { "REJECTED" },
        result.blocking().count(),
        result.warnings().count()
    );
    Ok(exit)
}
