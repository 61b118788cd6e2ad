//! netcommit command-line interface
//!
//! Drives the deployment pipeline against the file-backed intent store,
//! lab devices and job store under the netcommit home (`NETCOMMIT_HOME`,
//! default `~/.netcommit`).
//!
//! Exit codes: 0 success, 1 validation rejected, 2 deployment failed or
//! refused, 3 rollback failed and the device is halted.

use clap::{Parser, Subcommand};
use netcommit_ids::{DeviceId, JobId};
use netcommit_logging::{init_logging, LogConfig};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::debug;

mod cli;

use cli::context::CliContext;
use cli::exit::Exit;

#[derive(Parser, Debug)]
#[command(name = "netcommit", version, about = "Intent-driven network configuration deployment")]
struct Cli {
    /// Enable verbose logging (info/debug to stderr)
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    /// Configuration file (default: <home>/config.toml)
    #[arg(short = 'c', long, global = true, env = "NETCOMMIT_CONFIG")]
    config: Option<PathBuf>,

    /// Operator name recorded in the audit log
    #[arg(long, global = true, env = "NETCOMMIT_ACTOR", default_value = "operator")]
    actor: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Render a device's intent through a template (no device contact)
    Render {
        /// Device to render
        device: DeviceId,

        /// Template name
        #[arg(short, long, default_value = netcommit_protocol::defaults::DEFAULT_TEMPLATE_NAME)]
        template: String,

        /// Intent version (default: latest)
        #[arg(long)]
        intent_version: Option<u64>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Render and validate against the current baseline (no device contact)
    Validate {
        /// Device to validate
        device: DeviceId,

        /// Template name
        #[arg(short, long, default_value = netcommit_protocol::defaults::DEFAULT_TEMPLATE_NAME)]
        template: String,

        /// Intent version (default: latest)
        #[arg(long)]
        intent_version: Option<u64>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Deploy current intent to devices
    Deploy {
        /// Devices to deploy (repeatable)
        #[arg(short, long = "device", required_unless_present = "all", conflicts_with = "all")]
        devices: Vec<DeviceId>,

        /// Deploy every device with intent
        #[arg(long)]
        all: bool,

        /// Template name
        #[arg(short, long, default_value = netcommit_protocol::defaults::DEFAULT_TEMPLATE_NAME)]
        template: String,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Approve a job waiting at the approval gate and run it
    Approve {
        #[arg(long)]
        job: JobId,

        /// Approver (default: --actor)
        #[arg(long)]
        by: Option<String>,

        /// Change reference or comment
        #[arg(long)]
        note: Option<String>,
    },

    /// Cancel a job that has not touched its device
    Cancel {
        #[arg(long)]
        job: JobId,
    },

    /// Reverse a deployment that is applying or post-checking
    Rollback {
        #[arg(long)]
        job: JobId,
    },

    /// Compare live configuration with baselines once
    DriftScan {
        /// Devices to scan (default: all)
        #[arg(short, long = "device")]
        devices: Vec<DeviceId>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Scan for drift periodically until interrupted
    DriftWatch,

    /// List jobs
    Jobs {
        /// Only jobs for this device
        #[arg(short, long)]
        device: Option<DeviceId>,

        /// Only jobs that have not reached a terminal state
        #[arg(long)]
        active: bool,

        /// Maximum number of jobs to show (newest first)
        #[arg(short = 'n', long, default_value = "50")]
        limit: usize,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show one job with its history and audit trail
    Job {
        id: JobId,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Clear a device halt after manual recovery
    Unlock {
        #[arg(long)]
        device: DeviceId,

        /// Why the device is safe again (recorded in the audit log)
        #[arg(long)]
        reason: String,
    },

    /// Show the effective configuration and state paths
    Config {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

fn command_wants_json(command: &Commands) -> bool {
    match command {
        Commands::Render { json, .. }
        | Commands::Validate { json, .. }
        | Commands::Deploy { json, .. }
        | Commands::DriftScan { json, .. }
        | Commands::Jobs { json, .. }
        | Commands::Job { json, .. }
        | Commands::Config { json } => *json,
        _ => false,
    }
}

fn run_command(ctx: &CliContext, command: Commands) -> anyhow::Result<Exit> {
    debug!(command = ?command, "Starting");

    match command {
        Commands::Render {
            device,
            template,
            intent_version,
            json,
        } => cli::preview::run_render(ctx, &device, &template, intent_version, json),
        Commands::Validate {
            device,
            template,
            intent_version,
            json,
        } => cli::preview::run_validate(ctx, &device, &template, intent_version, json),
        Commands::Deploy {
            devices,
            all,
            template,
            json,
        } => cli::deploy::run(
            ctx,
            cli::deploy::DeployArgs {
                devices,
                all,
                template,
                json,
            },
        ),
        Commands::Approve { job, by, note } => cli::job::run_approve(ctx, &job, by, note),
        Commands::Cancel { job } => cli::job::run_cancel(ctx, &job),
        Commands::Rollback { job } => cli::job::run_rollback(ctx, &job),
        Commands::DriftScan { devices, json } => cli::drift::run_scan(ctx, devices, json),
        Commands::DriftWatch => cli::drift::run_watch(ctx),
        Commands::Jobs {
            device,
            active,
            limit,
            json,
        } => cli::jobs::run(
            ctx,
            cli::jobs::JobsArgs {
                device,
                active,
                limit,
                json,
            },
        ),
        Commands::Job { id, json } => cli::job::run_show(ctx, &id, json),
        Commands::Unlock { device, reason } => cli::device::run_unlock(ctx, &device, &reason),
        Commands::Config { json } => cli::config::run(ctx, json),
    }
}

fn main() -> ExitCode {
    let Cli {
        verbose,
        config,
        actor,
        command,
    } = Cli::parse();
    let json_mode = command_wants_json(&command);

    // Logs follow the configured state directory, so load config first
    let result = CliContext::load(config, actor).and_then(|ctx| {
        let _log_guard = match init_logging(LogConfig {
            app_name: "netcommit",
            log_dir: ctx.paths().logs_dir,
            verbose,
        }) {
            Ok(guard) => Some(guard),
            Err(err) => {
                eprintln!("Warning: failed to initialize logging: {:#}", err);
                None
            }
        };
        run_command(&ctx, command)
    });

    match result {
        Ok(exit) => exit.into(),
        Err(err) => {
            if json_mode {
                cli::error::print_json_error(&err);
            } else if err.downcast_ref::<cli::error::HelpfulError>().is_some() {
                eprint!("{}", err);
            } else {
                eprintln!("ERROR: {:#}", err);
            }
            Exit::for_error(&err).into()
        }
    }
}
