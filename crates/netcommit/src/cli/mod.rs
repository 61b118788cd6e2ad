//! CLI module for netcommit
//!
//! Each command opens the file-backed pipeline through [`context::CliContext`]
//! and reports an [`exit::Exit`] status.

pub mod context;
pub mod error;
pub mod exit;
pub mod output;

pub mod config;
pub mod deploy;
pub mod device;
pub mod drift;
pub mod job;
pub mod jobs;
pub mod preview;
