//! netcommit shared protocol.
//!
//! Types that cross crate boundaries: device families, operational
//! assertions, validation findings, the on-disk configuration model and the
//! canonical defaults/paths used by the pipeline and the CLI.

pub mod config;
pub mod defaults;
pub mod paths;
pub mod types;

pub use config::{ConfigError, NetcommitConfig};
pub use types::{Assertion, DeviceFamily, Finding, FamilyParseError, Severity, ValidationStage};
