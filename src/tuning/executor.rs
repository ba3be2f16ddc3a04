//! Tuner executor
//!
//! Runs every enabled unit in registry order. A unit failure is recorded
//! and execution moves on; only the run deadline stops the loop early.

use super::units::{registry, CheckOutcome, TunerUnit};
use super::RunContext;
use crate::config::UnitSelection;
use crate::error::{ErrorKind, TuneError};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Outcome of a single unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitStatus {
    Success,
    Failed,
    Skipped,
}

impl std::fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => f.write_str("success"),
            Self::Failed => f.write_str("failed"),
            Self::Skipped => f.write_str("skipped"),
        }
    }
}

/// Recorded result of one unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunerResult {
    pub id: String,
    pub status: UnitStatus,
    /// Whether `apply` mutated the host
    pub changed: bool,
    /// Divergence, skip reason or error
    pub message: Option<String>,
}

impl TunerResult {
    fn new(id: String, status: UnitStatus, changed: bool, message: Option<String>) -> Self {
        Self {
            id,
            status,
            changed,
            message,
        }
    }
}

/// Ordered results of one pass over the registry
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TuningRun {
    pub results: Vec<TunerResult>,
    /// Sticky for the lifetime of the run
    reboot_required: bool,
    pub timed_out: bool,
    pub check_only: bool,
}

impl TuningRun {
    pub fn new(check_only: bool) -> Self {
        Self {
            check_only,
            ..Default::default()
        }
    }

    pub fn record(&mut self, result: TunerResult) {
        self.results.push(result);
    }

    /// Flag that a reboot is needed; never cleared within a run
    pub fn require_reboot(&mut self) {
        self.reboot_required = true;
    }

    pub fn reboot_required(&self) -> bool {
        self.reboot_required
    }

    fn count(&self, status: UnitStatus) -> usize {
        self.results.iter().filter(|r| r.status == status).count()
    }

    pub fn success_count(&self) -> usize {
        self.count(UnitStatus::Success)
    }

    pub fn failed_count(&self) -> usize {
        self.count(UnitStatus::Failed)
    }

    pub fn skipped_count(&self) -> usize {
        self.count(UnitStatus::Skipped)
    }

    pub fn changed_count(&self) -> usize {
        self.results.iter().filter(|r| r.changed).count()
    }

    /// No failures and no timeout
    pub fn is_success(&self) -> bool {
        !self.timed_out && self.failed_count() == 0
    }
}

/// Wall-clock budget of a run
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    start: Instant,
    limit: Duration,
}

impl Deadline {
    pub fn new(limit: Duration) -> Self {
        Self {
            start: Instant::now(),
            limit,
        }
    }

    /// A deadline that has already passed
    pub fn expired() -> Self {
        Self::new(Duration::ZERO)
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn is_expired(&self) -> bool {
        self.elapsed() >= self.limit
    }

    /// `Err(Timeout)` once the budget is spent
    pub fn check(&self) -> crate::error::Result<()> {
        if self.is_expired() {
            Err(TuneError::Timeout(self.limit.as_secs()))
        } else {
            Ok(())
        }
    }
}

/// Executes the unit registry against a run context
pub struct Executor {
    selection: UnitSelection,
    deadline: Deadline,
}

impl Executor {
    pub fn new(selection: UnitSelection, deadline: Deadline) -> Self {
        Self {
            selection,
            deadline,
        }
    }

    /// Run every enabled unit, recording results into `ctx.run`
    pub fn execute(&self, ctx: &mut RunContext<'_>) {
        let units = registry(&self.selection.kinds(), &ctx.devices);
        tracing::info!(
            "Executing {} units{}",
            units.len(),
            if ctx.run.check_only { " (check only)" } else { "" }
        );

        for unit in &units {
            if let Err(e) = self.deadline.check() {
                tracing::error!("{}; {} units not executed", e, units.len() - ctx.run.results.len());
                ctx.run.timed_out = true;
                break;
            }

            let (result, reboot) = self.run_unit(unit, ctx);
            match result.status {
                UnitStatus::Failed => tracing::warn!(
                    "{} failed: {}",
                    result.id,
                    result.message.as_deref().unwrap_or("")
                ),
                UnitStatus::Skipped => tracing::info!(
                    "{} skipped: {}",
                    result.id,
                    result.message.as_deref().unwrap_or("")
                ),
                UnitStatus::Success if result.changed => tracing::info!("{} applied", result.id),
                UnitStatus::Success => tracing::debug!("{} already satisfied", result.id),
            }
            if reboot {
                ctx.run.require_reboot();
            }
            ctx.run.record(result);
        }

        if !ctx.run.timed_out && self.deadline.is_expired() {
            tracing::error!("Run exceeded its time budget during the last unit");
            ctx.run.timed_out = true;
        }
    }

    /// Check, then apply on divergence; errors become failed or skipped
    fn run_unit(&self, unit: &TunerUnit, ctx: &RunContext<'_>) -> (TunerResult, bool) {
        let id = unit.id();

        let reason = match unit.check(ctx) {
            Ok(CheckOutcome::Satisfied) => {
                return (TunerResult::new(id, UnitStatus::Success, false, None), false)
            }
            Ok(CheckOutcome::Diverged(reason)) => reason,
            Err(e) => return (error_result(id, e), false),
        };

        if ctx.run.check_only {
            return (
                TunerResult::new(id, UnitStatus::Failed, false, Some(reason)),
                false,
            );
        }

        tracing::debug!("{}: {}", id, reason);
        match unit.apply(ctx) {
            Ok(outcome) => (
                TunerResult::new(id, UnitStatus::Success, true, Some(reason)),
                outcome.reboot_required,
            ),
            Err(e) => (error_result(id, e), false),
        }
    }
}

fn error_result(id: String, error: TuneError) -> TunerResult {
    let status = match error.kind() {
        ErrorKind::Unsupported => UnitStatus::Skipped,
        _ => UnitStatus::Failed,
    };
    TunerResult::new(id, status, false, Some(error.to_string()))
}
