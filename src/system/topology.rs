//! CPU topology discovery
//!
//! The IRQ distributor needs the list of online CPUs. `hwloc-calc` is used
//! when installed on the live host; otherwise the list is read from sysfs,
//! and as a last resort derived from the CPU count.

use super::tools::{run_command, which};
use super::Host;

/// Source of the online CPU list
pub trait CpuTopology: Send + Sync {
    /// Implementation name, for logging
    fn name(&self) -> &'static str;

    /// Online logical CPU indices in ascending order
    fn online_cpus(&self) -> Vec<usize>;

    /// Number of online CPUs
    fn cpu_count(&self) -> usize {
        self.online_cpus().len()
    }
}

/// Topology read from `/sys/devices/system/cpu/online`
pub struct SysfsTopology {
    cpus: Vec<usize>,
}

impl SysfsTopology {
    /// Read the online CPU list from the host
    pub fn detect(host: &Host) -> Self {
        let cpus = host
            .read_opt("/sys/devices/system/cpu/online")
            .map(|list| parse_cpu_list(&list))
            .filter(|cpus| !cpus.is_empty())
            .unwrap_or_else(|| (0..num_cpus::get()).collect());
        Self { cpus }
    }
}

impl CpuTopology for SysfsTopology {
    fn name(&self) -> &'static str {
        "sysfs"
    }

    fn online_cpus(&self) -> Vec<usize> {
        self.cpus.clone()
    }
}

/// Topology computed by `hwloc-calc`
pub struct HwlocTopology {
    cpus: Vec<usize>,
}

impl HwlocTopology {
    /// Query hwloc; `None` when the tool is missing or its output is unusable
    pub fn detect() -> Option<Self> {
        which("hwloc-calc")?;
        let output = run_command("hwloc-calc", &["--physical-output", "--intersect", "PU", "all"])?;
        if !output.status.success() {
            return None;
        }
        let cpus = parse_cpu_list(String::from_utf8_lossy(&output.stdout).trim());
        if cpus.is_empty() {
            None
        } else {
            Some(Self { cpus })
        }
    }
}

impl CpuTopology for HwlocTopology {
    fn name(&self) -> &'static str {
        "hwloc"
    }

    fn online_cpus(&self) -> Vec<usize> {
        self.cpus.clone()
    }
}

/// Pick the best available topology source for a host
pub fn detect_topology(host: &Host) -> Box<dyn CpuTopology> {
    if host.is_system_root() {
        if let Some(hwloc) = HwlocTopology::detect() {
            tracing::debug!("CPU topology from hwloc-calc");
            return Box::new(hwloc);
        }
    }
    Box::new(SysfsTopology::detect(host))
}

/// Parse CPU list format (e.g., "0-3,8-11" -> [0,1,2,3,8,9,10,11])
pub fn parse_cpu_list(s: &str) -> Vec<usize> {
    let mut cpus = Vec::new();

    for part in s.split(',') {
        let part = part.trim();
        if let Some((start, end)) = part.split_once('-') {
            if let (Ok(start), Ok(end)) = (start.parse::<usize>(), end.parse::<usize>()) {
                cpus.extend(start..=end);
            }
        } else if let Ok(cpu) = part.parse::<usize>() {
            cpus.push(cpu);
        }
    }

    cpus.sort_unstable();
    cpus.dedup();
    cpus
}
