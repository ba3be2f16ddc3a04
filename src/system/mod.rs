//! Host discovery
//!
//! Rooted access to kernel interfaces, environment probing, device and
//! interface resolution, CPU topology and optional host tools.

mod host;
pub mod devices;
pub mod environment;
pub mod tools;
pub mod topology;

pub use devices::{strip_partition, BlockDevice, DeviceResolver, NetworkInterface};
pub use environment::{
    CloudProvider, DetectionSource, Distro, DistroFamily, EnvironmentInfo, EnvironmentProber,
    HttpMetadataClient, MetadataClient,
};
pub use host::*;
pub use tools::{HostTools, NicTool, PeriodicScheduler};
pub use topology::{CpuTopology, SysfsTopology};
