//! Tuner unit registry
//!
//! The registry is a fixed, ordered set of unit kinds. Per-device kinds
//! expand into one unit per resolved block device. Every unit exposes
//! `check`, which never mutates, and `apply`, which is only invoked after
//! `check` reported divergence.

use super::{kernel, network, storage, RunContext};
use crate::error::{Result, TuneError};
use crate::system::BlockDevice;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of tuning unit, in registry order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TunerKind {
    AioEvents,
    Swappiness,
    TransparentHugepages,
    DiskScheduler,
    DiskNomerges,
    DiskIrq,
    Cpu,
    Network,
    Clocksource,
    Coredump,
    BallastFile,
    Fstrim,
    DiskWriteCache,
}

impl TunerKind {
    /// Every kind in execution order
    pub const ALL: [TunerKind; 13] = [
        Self::AioEvents,
        Self::Swappiness,
        Self::TransparentHugepages,
        Self::DiskScheduler,
        Self::DiskNomerges,
        Self::DiskIrq,
        Self::Cpu,
        Self::Network,
        Self::Clocksource,
        Self::Coredump,
        Self::BallastFile,
        Self::Fstrim,
        Self::DiskWriteCache,
    ];

    /// Stable identifier used in configuration and reports
    pub fn id(&self) -> &'static str {
        match self {
            Self::AioEvents => "aio_events",
            Self::Swappiness => "swappiness",
            Self::TransparentHugepages => "transparent_hugepages",
            Self::DiskScheduler => "disk_scheduler",
            Self::DiskNomerges => "disk_nomerges",
            Self::DiskIrq => "disk_irq",
            Self::Cpu => "cpu",
            Self::Network => "network",
            Self::Clocksource => "clocksource",
            Self::Coredump => "coredump",
            Self::BallastFile => "ballast_file",
            Self::Fstrim => "fstrim",
            Self::DiskWriteCache => "disk_write_cache",
        }
    }

    pub fn from_id(id: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|k| k.id() == id)
    }

    /// Whether the kind runs once per block device
    pub fn is_per_device(&self) -> bool {
        matches!(
            self,
            Self::DiskScheduler | Self::DiskNomerges | Self::DiskIrq | Self::DiskWriteCache
        )
    }
}

impl fmt::Display for TunerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// What a unit acts on
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// The node as a whole
    Node,
    /// One block device
    Device(BlockDevice),
    /// A per-device kind with nothing resolved
    NoDevices,
}

/// Result of a non-mutating check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    /// Target state already holds
    Satisfied,
    /// Target state does not hold, with the observed difference
    Diverged(String),
}

impl CheckOutcome {
    pub fn diverged(reason: impl Into<String>) -> Self {
        Self::Diverged(reason.into())
    }

    pub fn is_satisfied(&self) -> bool {
        matches!(self, Self::Satisfied)
    }
}

/// Side effects of a successful apply beyond the mutation itself
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyOutcome {
    /// The change only takes full effect after a reboot
    pub reboot_required: bool,
}

/// One executable unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunerUnit {
    pub kind: TunerKind,
    pub target: Target,
}

impl TunerUnit {
    pub fn node(kind: TunerKind) -> Self {
        Self {
            kind,
            target: Target::Node,
        }
    }

    /// Result identifier: `kind` or `kind:device`
    pub fn id(&self) -> String {
        match &self.target {
            Target::Device(device) => format!("{}:{}", self.kind, device.name),
            Target::Node | Target::NoDevices => self.kind.to_string(),
        }
    }

    fn device(&self) -> Result<&BlockDevice> {
        match &self.target {
            Target::Device(device) => Ok(device),
            Target::Node | Target::NoDevices => Err(TuneError::not_found(format!(
                "{}: no block devices resolved",
                self.kind
            ))),
        }
    }

    /// Report whether the target state holds, without mutating anything
    pub fn check(&self, ctx: &RunContext<'_>) -> Result<CheckOutcome> {
        match self.kind {
            TunerKind::AioEvents => kernel::check_aio_events(ctx),
            TunerKind::Swappiness => kernel::check_swappiness(ctx),
            TunerKind::TransparentHugepages => kernel::check_transparent_hugepages(ctx),
            TunerKind::DiskScheduler => storage::check_disk_scheduler(ctx, self.device()?),
            TunerKind::DiskNomerges => storage::check_disk_nomerges(ctx, self.device()?),
            TunerKind::DiskIrq => storage::check_disk_irq(ctx, self.device()?),
            TunerKind::Cpu => kernel::check_cpu(ctx),
            TunerKind::Network => network::check_network(ctx),
            TunerKind::Clocksource => kernel::check_clocksource(ctx),
            TunerKind::Coredump => kernel::check_coredump(ctx),
            TunerKind::BallastFile => storage::check_ballast_file(ctx),
            TunerKind::Fstrim => storage::check_fstrim(ctx),
            TunerKind::DiskWriteCache => storage::check_disk_write_cache(ctx, self.device()?),
        }
    }

    /// Bring the target state about
    pub fn apply(&self, ctx: &RunContext<'_>) -> Result<ApplyOutcome> {
        match self.kind {
            TunerKind::AioEvents => kernel::apply_aio_events(ctx),
            TunerKind::Swappiness => kernel::apply_swappiness(ctx),
            TunerKind::TransparentHugepages => kernel::apply_transparent_hugepages(ctx),
            TunerKind::DiskScheduler => storage::apply_disk_scheduler(ctx, self.device()?),
            TunerKind::DiskNomerges => storage::apply_disk_nomerges(ctx, self.device()?),
            TunerKind::DiskIrq => storage::apply_disk_irq(ctx, self.device()?),
            TunerKind::Cpu => kernel::apply_cpu(ctx),
            TunerKind::Network => network::apply_network(ctx),
            TunerKind::Clocksource => kernel::apply_clocksource(ctx),
            TunerKind::Coredump => kernel::apply_coredump(ctx),
            TunerKind::BallastFile => storage::apply_ballast_file(ctx),
            TunerKind::Fstrim => storage::apply_fstrim(ctx),
            TunerKind::DiskWriteCache => storage::apply_disk_write_cache(ctx, self.device()?),
        }
    }
}

/// Expand enabled kinds into units, in registry order
pub fn registry(kinds: &[TunerKind], devices: &[BlockDevice]) -> Vec<TunerUnit> {
    let mut units = Vec::new();
    for kind in TunerKind::ALL.iter().filter(|k| kinds.contains(k)) {
        if !kind.is_per_device() {
            units.push(TunerUnit::node(*kind));
        } else if devices.is_empty() {
            units.push(TunerUnit {
                kind: *kind,
                target: Target::NoDevices,
            });
        } else {
            units.extend(devices.iter().map(|device| TunerUnit {
                kind: *kind,
                target: Target::Device(device.clone()),
            }));
        }
    }
    units
}
