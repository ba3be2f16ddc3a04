//! I/O profile resolution
//!
//! Resolves the storage performance profile of this node from a
//! provider/instance keyed table, falling back to a fixed conservative
//! profile, and emits the profile artifact consumed by the storage engine.

mod resolver;
pub mod table;

pub use resolver::{mountpoint_for, DiskProfile, ProfileArtifact, ProfileResolver, ResolvedProfile};
pub use table::ProfileTable;

use serde::{Deserialize, Serialize};

/// Achievable read/write IOPS and bandwidth (bytes per second)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IoProfile {
    pub read_iops: u64,
    pub read_bandwidth: u64,
    pub write_iops: u64,
    pub write_bandwidth: u64,
}

impl IoProfile {
    /// Profile used when nothing hardware-specific is known
    pub const CONSERVATIVE: IoProfile = IoProfile::new(10_000, 1_000_000_000, 5_000, 500_000_000);

    pub const fn new(
        read_iops: u64,
        read_bandwidth: u64,
        write_iops: u64,
        write_bandwidth: u64,
    ) -> Self {
        Self {
            read_iops,
            read_bandwidth,
            write_iops,
            write_bandwidth,
        }
    }
}

/// Where a resolved profile came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProfileSource {
    /// Exact table hit
    Table,
    /// Conservative fallback
    Conservative,
}

impl std::fmt::Display for ProfileSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Table => f.write_str("table"),
            Self::Conservative => f.write_str("conservative"),
        }
    }
}
