//! Configuration module for NodeTune
//!
//! Provides the CLI surface, configuration files and the validated
//! run configuration record.

mod settings;

pub use settings::*;
