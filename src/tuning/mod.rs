//! Tuning units and their execution
//!
//! A closed registry of idempotent units, the IRQ distributor they share,
//! the per-run context and the executor that drives them.

mod context;
pub mod executor;
pub mod irq;
mod kernel;
mod network;
mod storage;
pub mod units;

pub use context::RunContext;
pub use executor::{Deadline, Executor, TunerResult, TuningRun, UnitStatus};
pub use irq::{distribute, IrqAssignment, IrqPlan};
pub use units::{registry, ApplyOutcome, CheckOutcome, Target, TunerKind, TunerUnit};
