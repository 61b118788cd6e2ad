//! `config` - show where netcommit keeps its state and the settings in effect.

use crate::cli::context::CliContext;
use crate::cli::exit::Exit;
use crate::cli::output::print_json;
use anyhow::{Context, Result};
use netcommit_protocol::NetcommitConfig;
use serde::Serialize;
use std::path::PathBuf;

#[derive(Debug, Serialize)]
struct PathsOutput {
    home: PathBuf,
    config: PathBuf,
    config_found: bool,
    intent_dir: PathBuf,
    templates_dir: Option<PathBuf>,
    lab_dir: PathBuf,
    jobs_dir: PathBuf,
    baselines_dir: PathBuf,
    locks_dir: PathBuf,
    audit_log: PathBuf,
    logs_dir: PathBuf,
}

#[derive(Debug, Serialize)]
struct ConfigOutput<'a> {
    paths: PathsOutput,
    settings: &'a NetcommitConfig,
}

pub fn run(ctx: &CliContext, json: bool) -> Result<Exit> {
    let paths = ctx.paths();
    let output = ConfigOutput {
        paths: PathsOutput {
            home: paths.home,
            config: ctx.config_path.clone(),
            config_found: ctx.config_found,
            intent_dir: paths.intent_dir,
            templates_dir: paths.templates_dir,
            lab_dir: paths.lab_dir,
            jobs_dir: paths.jobs_dir,
            baselines_dir: paths.baselines_dir,
            locks_dir: paths.locks_dir,
            audit_log: paths.audit_log,
            logs_dir: paths.logs_dir,
        },
        settings: &ctx.config,
    };

    if json {
        print_json(&output)?;
        return Ok(Exit::Success);
    }

    let p = &output.paths;
    println!("Netcommit Configuration");
    println!();
    println!(
        "Config file:  {}{}",
        p.config.display(),
        if p.config_found { "" } else { " (not found, using defaults)" }
    );
    println!("Home:         {}", p.home.display());
    println!("Intent:       {}", p.intent_dir.display());
    match &p.templates_dir {
        Some(dir) => println!("Templates:    {} (overrides)", dir.display()),
        None => println!("Templates:    built-in"),
    }
    println!("Lab devices:  {}", p.lab_dir.display());
    println!("Jobs:         {}", p.jobs_dir.display());
    println!("Baselines:    {}", p.baselines_dir.display());
    println!("Locks:        {}", p.locks_dir.display());
    println!("Audit log:    {}", p.audit_log.display());
    println!("Logs:         {}", p.logs_dir.display());
    println!();

    let settings =
        toml::to_string_pretty(&ctx.config).context("Failed to serialize configuration")?;
    println!("{}", settings);
    Ok(Exit::Success)
}
