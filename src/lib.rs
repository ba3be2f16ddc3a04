//! # NodeTune - Node Tuning for Storage Hosts
//!
//! NodeTune applies an idempotent set of kernel and hardware settings to a
//! host running a latency-sensitive storage workload, and publishes a
//! per-node I/O capability profile.
//!
//! ## Features
//!
//! - **Device Resolution**: Map data directories to their base block devices
//! - **Environment Detection**: Cloud provider, instance type and distribution
//! - **I/O Profiles**: Published per-instance-type profiles with a conservative fallback
//! - **Tuner Units**: Independent, self-checking units for disks, IRQs, sysctls and CPU
//! - **Idempotent Runs**: Per-node flags make repeated runs no-ops
//!
//! ## Quick Start
//!
//! ```no_run
//! use nodetune::config::TuneConfig;
//! use nodetune::core::Orchestrator;
//! use nodetune::report::RunReport;
//! use std::path::PathBuf;
//!
//! let config = TuneConfig {
//!     directories: vec![PathBuf::from("/var/lib/data")],
//!     ..Default::default()
//! };
//!
//! let outcome = Orchestrator::new(config).unwrap().run().unwrap();
//! let report = RunReport::new(&outcome);
//! report.print();
//! std::process::exit(report.exit_code());
//! ```
//!
//! ## Checking Without Changes
//!
//! ```no_run
//! use nodetune::config::TuneConfig;
//! use nodetune::core::Orchestrator;
//!
//! let config = TuneConfig {
//!     check_only: true,
//!     ..Default::default()
//! };
//!
//! let outcome = Orchestrator::new(config).unwrap().run().unwrap();
//! for result in &outcome.run.results {
//!     println!("{} {}", result.id, result.status);
//! }
//! ```

#![warn(clippy::all)]

pub mod config;
pub mod core;
pub mod error;
pub mod profile;
pub mod report;
pub mod state;
pub mod system;
pub mod tuning;

// Re-export commonly used types
pub use config::TuneConfig;
pub use core::{Orchestrator, RunOutcome};
pub use error::{Result, TuneError};
pub use report::RunReport;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for convenient imports
pub mod prelude {
    //! Convenient re-exports for common usage
    //!
    //! ```no_run
    //! use nodetune::prelude::*;
    //! ```

    pub use crate::config::{TuneConfig, UnitSelection};
    pub use crate::core::{Orchestrator, RunOutcome};
    pub use crate::error::{Result, TuneError};
    pub use crate::profile::{IoProfile, ProfileTable};
    pub use crate::report::RunReport;
    pub use crate::state::{FileStateStore, MemoryStateStore, NodeFlags, StateStore};
    pub use crate::system::{CloudProvider, Host};
    pub use crate::tuning::{TunerKind, TuningRun, UnitStatus};
}
