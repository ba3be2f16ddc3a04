//! Typed view over a node's idempotency flags

use super::StateStore;
use crate::error::Result;
use crate::tuning::TuningRun;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const TUNED: &str = "tuned";
pub const TUNED_TIMESTAMP: &str = "tuned_timestamp";
pub const TUNE_ATTEMPTED: &str = "tune_attempted";
pub const TUNE_ATTEMPTED_TIMESTAMP: &str = "tune_attempted_timestamp";
pub const IOTUNE_COMPLETED: &str = "iotune_completed";
pub const IOTUNE_TIMESTAMP: &str = "iotune_timestamp";
pub const REBOOT_REQUIRED: &str = "reboot_required";
/// Published profile artifact
pub const IO_PROPERTIES: &str = "io_properties";

/// Keys cleared by a forced retune
pub const RESET_KEYS: &[&str] = &[
    TUNED,
    TUNED_TIMESTAMP,
    TUNE_ATTEMPTED,
    TUNE_ATTEMPTED_TIMESTAMP,
    IOTUNE_COMPLETED,
    IOTUNE_TIMESTAMP,
    REBOOT_REQUIRED,
];

/// Flags of one node
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeFlags {
    /// Last complete pass had no failures
    pub tuned: bool,
    pub tuned_timestamp: Option<DateTime<Utc>>,
    /// A complete pass ran, regardless of failures
    pub tune_attempted: bool,
    pub tune_attempted_timestamp: Option<DateTime<Utc>>,
    pub iotune_completed: bool,
    pub iotune_timestamp: Option<DateTime<Utc>>,
    pub reboot_required: bool,
}

fn flag(store: &dyn StateStore, node: &str, key: &str) -> Result<bool> {
    Ok(store.get(node, key)?.as_deref() == Some("true"))
}

fn timestamp(store: &dyn StateStore, node: &str, key: &str) -> Result<Option<DateTime<Utc>>> {
    Ok(store
        .get(node, key)?
        .and_then(|v| DateTime::parse_from_rfc3339(&v).ok())
        .map(|t| t.with_timezone(&Utc)))
}

impl NodeFlags {
    /// Read every flag of `node`
    pub fn load(store: &dyn StateStore, node: &str) -> Result<Self> {
        Ok(Self {
            tuned: flag(store, node, TUNED)?,
            tuned_timestamp: timestamp(store, node, TUNED_TIMESTAMP)?,
            tune_attempted: flag(store, node, TUNE_ATTEMPTED)?,
            tune_attempted_timestamp: timestamp(store, node, TUNE_ATTEMPTED_TIMESTAMP)?,
            iotune_completed: flag(store, node, IOTUNE_COMPLETED)?,
            iotune_timestamp: timestamp(store, node, IOTUNE_TIMESTAMP)?,
            reboot_required: flag(store, node, REBOOT_REQUIRED)?,
        })
    }

    /// Remove every flag of `node`
    pub fn clear(store: &dyn StateStore, node: &str) -> Result<()> {
        for key in RESET_KEYS {
            store.remove(node, key)?;
        }
        tracing::info!("Cleared tuning flags for {}", node);
        Ok(())
    }

    /// Record a complete, non-timed-out tuning pass
    ///
    /// `tuned` is only set when no unit failed. `reboot_required` stays set
    /// until the flags are cleared.
    pub fn record_tuning(
        store: &dyn StateStore,
        node: &str,
        run: &TuningRun,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let stamp = now.to_rfc3339();
        let fully_tuned = run.failed_count() == 0;

        store.set(node, TUNE_ATTEMPTED, "true")?;
        store.set(node, TUNE_ATTEMPTED_TIMESTAMP, &stamp)?;
        store.set(node, TUNED, &fully_tuned.to_string())?;
        if fully_tuned {
            store.set(node, TUNED_TIMESTAMP, &stamp)?;
        }
        if run.reboot_required() {
            store.set(node, REBOOT_REQUIRED, "true")?;
        } else if store.get(node, REBOOT_REQUIRED)?.is_none() {
            store.set(node, REBOOT_REQUIRED, "false")?;
        }
        Ok(())
    }

    /// Record that the I/O profile was produced
    pub fn record_iotune(store: &dyn StateStore, node: &str, now: DateTime<Utc>) -> Result<()> {
        store.set(node, IOTUNE_COMPLETED, "true")?;
        store.set(node, IOTUNE_TIMESTAMP, &now.to_rfc3339())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::MemoryStateStore;
    use crate::tuning::{TunerResult, UnitStatus};

    fn run_with(status: UnitStatus) -> TuningRun {
        let mut run = TuningRun::new(false);
        run.record(TunerResult {
            id: "swappiness".into(),
            status,
            changed: false,
            message: None,
        });
        run
    }

    #[test]
    fn test_clean_run_sets_tuned() {
        let store = MemoryStateStore::new();
        let now = Utc::now();
        NodeFlags::record_tuning(&store, "n1", &run_with(UnitStatus::Success), now).unwrap();

        let flags = NodeFlags::load(&store, "n1").unwrap();
        assert!(flags.tuned);
        assert!(flags.tune_attempted);
        assert!(!flags.reboot_required);
        assert_eq!(flags.tuned_timestamp.unwrap().timestamp(), now.timestamp());
    }

    #[test]
    fn test_failed_run_is_attempted_not_tuned() {
        let store = MemoryStateStore::new();
        NodeFlags::record_tuning(&store, "n1", &run_with(UnitStatus::Failed), Utc::now()).unwrap();

        let flags = NodeFlags::load(&store, "n1").unwrap();
        assert!(!flags.tuned);
        assert!(flags.tuned_timestamp.is_none());
        assert!(flags.tune_attempted);
    }

    #[test]
    fn test_reboot_flag_survives_later_runs() {
        let store = MemoryStateStore::new();
        let mut first = run_with(UnitStatus::Success);
        first.require_reboot();
        NodeFlags::record_tuning(&store, "n1", &first, Utc::now()).unwrap();
        NodeFlags::record_tuning(&store, "n1", &run_with(UnitStatus::Success), Utc::now())
            .unwrap();
        assert!(NodeFlags::load(&store, "n1").unwrap().reboot_required);

        NodeFlags::clear(&store, "n1").unwrap();
        assert_eq!(NodeFlags::load(&store, "n1").unwrap(), NodeFlags::default());
    }
}
