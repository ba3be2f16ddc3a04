//! Block device and network interface resolution
//!
//! Maps target directories to the physical block devices backing them and
//! enumerates the network interfaces worth tuning. Resolution only reads
//! host state; it never mutates anything.

use super::Host;
use crate::error::{Result, TuneError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

/// Interface name prefixes that are never tuned
const EXCLUDED_INTERFACE_PREFIXES: &[&str] = &[
    "docker", "br-", "cni", "cbr", "virbr", "veth", "flannel", "cali", "kube-",
];

/// Block device name prefixes skipped by the fallback enumeration
const EXCLUDED_DEVICE_PREFIXES: &[&str] = &["loop", "ram", "zram"];

/// A whole-disk block device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockDevice {
    /// Canonical base device name (`nvme0n1`, `sda`)
    pub name: String,
    /// Directories that resolved to this device
    pub sources: BTreeSet<PathBuf>,
}

impl BlockDevice {
    /// Device with no source directories
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sources: BTreeSet::new(),
        }
    }

    /// `/sys/block/<name>`
    pub fn sysfs_dir(&self) -> PathBuf {
        PathBuf::from("/sys/block").join(&self.name)
    }

    /// I/O scheduler control
    pub fn scheduler_path(&self) -> PathBuf {
        self.sysfs_dir().join("queue/scheduler")
    }

    /// Request merging control
    pub fn nomerges_path(&self) -> PathBuf {
        self.sysfs_dir().join("queue/nomerges")
    }

    /// Write cache mode control
    pub fn write_cache_path(&self) -> PathBuf {
        self.sysfs_dir().join("queue/write_cache")
    }

    /// Fail with `ResourceNotFound` when the device is absent from sysfs
    pub fn ensure_present(&self, host: &Host) -> Result<()> {
        if host.exists(self.sysfs_dir()) {
            Ok(())
        } else {
            Err(TuneError::not_found(format!(
                "block device {} not present in /sys/block",
                self.name
            )))
        }
    }

    /// Interrupt lines serving this device
    ///
    /// MSI vectors are read from the controller's sysfs node; when none are
    /// exposed, `/proc/interrupts` is searched for the controller name.
    pub fn irqs(&self, host: &Host) -> Vec<u32> {
        for dir in ["device/device/msi_irqs", "device/msi_irqs"] {
            let path = self.sysfs_dir().join(dir);
            if let Ok(names) = host.list_dir(&path) {
                let mut irqs: Vec<u32> = names.iter().filter_map(|n| n.parse().ok()).collect();
                if !irqs.is_empty() {
                    irqs.sort_unstable();
                    return irqs;
                }
            }
        }

        host.read_opt("/proc/interrupts")
            .map(|table| irqs_for_action(&table, controller_name(&self.name)))
            .unwrap_or_default()
    }
}

/// A link-layer network interface
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkInterface {
    /// Interface name
    pub name: String,
    /// MSI interrupt lines of the backing device
    pub irqs: Vec<u32>,
    /// Number of receive queues
    pub rx_queues: usize,
    /// Backed by a physical or virtio device
    pub has_device: bool,
}

impl NetworkInterface {
    /// Whether the NIC exposes more than one receive queue
    pub fn is_multiqueue(&self) -> bool {
        self.rx_queues > 1
    }

    /// Read interface details from sysfs
    pub fn probe(host: &Host, name: &str) -> Self {
        let base = PathBuf::from("/sys/class/net").join(name);
        let mut irqs: Vec<u32> = host
            .list_dir(base.join("device/msi_irqs"))
            .unwrap_or_default()
            .iter()
            .filter_map(|n| n.parse().ok())
            .collect();
        irqs.sort_unstable();

        let rx_queues = host
            .list_dir(base.join("queues"))
            .unwrap_or_default()
            .iter()
            .filter(|q| q.starts_with("rx-"))
            .count();

        Self {
            name: name.to_string(),
            irqs,
            rx_queues,
            has_device: host.exists(base.join("device")),
        }
    }
}

/// Major/minor pair of a block device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceNumber {
    pub major: u64,
    pub minor: u64,
}

/// Device number of the filesystem backing `path`
#[cfg(unix)]
pub fn device_number_of(path: &Path) -> std::io::Result<DeviceNumber> {
    use std::os::unix::fs::MetadataExt;

    let dev = std::fs::metadata(path)?.dev();
    Ok(DeviceNumber {
        major: nix::sys::stat::major(dev as nix::libc::dev_t) as u64,
        minor: nix::sys::stat::minor(dev as nix::libc::dev_t) as u64,
    })
}

#[cfg(not(unix))]
pub fn device_number_of(_path: &Path) -> std::io::Result<DeviceNumber> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "device numbers are not available on this platform",
    ))
}

type DeviceNumberFn<'a> = Box<dyn Fn(&Path) -> std::io::Result<DeviceNumber> + 'a>;

/// Resolves directories and device lists to whole-disk devices
pub struct DeviceResolver<'a> {
    host: &'a Host,
    device_number: DeviceNumberFn<'a>,
}

impl<'a> DeviceResolver<'a> {
    /// Resolver using `stat(2)` on the live filesystem
    pub fn new(host: &'a Host) -> Self {
        Self {
            host,
            device_number: Box::new(device_number_of),
        }
    }

    /// Resolver with a custom directory-to-device lookup
    pub fn with_device_number<F>(host: &'a Host, lookup: F) -> Self
    where
        F: Fn(&Path) -> std::io::Result<DeviceNumber> + 'a,
    {
        Self {
            host,
            device_number: Box::new(lookup),
        }
    }

    /// Resolve the device set for a run
    ///
    /// An explicit device list is used verbatim. Otherwise directories are
    /// resolved and deduplicated; if nothing resolves, every block device
    /// except loop and RAM devices is returned.
    pub fn resolve(&self, directories: &[PathBuf], explicit: &[String]) -> Vec<BlockDevice> {
        if !explicit.is_empty() {
            let names: BTreeSet<&String> = explicit.iter().collect();
            return names.into_iter().map(BlockDevice::new).collect();
        }

        let mut by_name: BTreeMap<String, BlockDevice> = BTreeMap::new();
        for dir in directories {
            match self.resolve_directory(dir) {
                Ok(name) => {
                    tracing::debug!("{} resolves to {}", dir.display(), name);
                    by_name
                        .entry(name.clone())
                        .or_insert_with(|| BlockDevice::new(name))
                        .sources
                        .insert(dir.clone());
                }
                Err(e) => tracing::warn!("Cannot resolve device for {}: {}", dir.display(), e),
            }
        }

        if !by_name.is_empty() {
            return by_name.into_values().collect();
        }

        tracing::warn!("No directory resolved to a block device, tuning all block devices");
        self.all_devices()
    }

    /// Resolve a single directory to its base block device name
    ///
    /// `dir` is a host path; the lookup sees it under the host root.
    pub fn resolve_directory(&self, dir: &Path) -> Result<String> {
        let rooted = self.host.path(dir);
        let number = (self.device_number)(&rooted).map_err(|e| TuneError::io(&rooted, e))?;
        let link = format!("/sys/dev/block/{}:{}", number.major, number.minor);
        if !self.host.exists(&link) {
            return Err(TuneError::not_found(format!(
                "{} is not backed by a block device ({}:{})",
                dir.display(),
                number.major,
                number.minor
            )));
        }
        let real = self.host.resolve_name(&link)?;
        Ok(strip_partition(&real).to_string())
    }

    /// Every block device except loop and RAM devices
    pub fn all_devices(&self) -> Vec<BlockDevice> {
        self.host
            .list_dir("/sys/block")
            .unwrap_or_default()
            .into_iter()
            .filter(|name| !EXCLUDED_DEVICE_PREFIXES.iter().any(|p| name.starts_with(p)))
            .map(BlockDevice::new)
            .collect()
    }
}

/// Strip a partition suffix from a device name
///
/// `nvme0n1p2` -> `nvme0n1`, `sda1` -> `sda`, `vda3` -> `vda`. Names matching
/// neither pattern are assumed to be base devices and returned unchanged.
pub fn strip_partition(name: &str) -> &str {
    if let Some(base) = strip_nvme_partition(name) {
        return base;
    }

    let letters = name.bytes().take_while(|b| b.is_ascii_lowercase()).count();
    let rest = &name[letters..];
    if letters > 0
        && !rest.is_empty()
        && rest.bytes().all(|b| b.is_ascii_digit())
        && !is_whole_numbered_device(&name[..letters])
    {
        return &name[..letters];
    }

    name
}

/// `nvme{N}n{M}p{P}` -> `nvme{N}n{M}`
fn strip_nvme_partition(name: &str) -> Option<&str> {
    let rest = name.strip_prefix("nvme")?;
    let ctrl = rest.bytes().take_while(|b| b.is_ascii_digit()).count();
    if ctrl == 0 {
        return None;
    }
    let rest = rest[ctrl..].strip_prefix('n')?;
    let ns = rest.bytes().take_while(|b| b.is_ascii_digit()).count();
    if ns == 0 {
        return None;
    }
    let part = rest[ns..].strip_prefix('p')?;
    if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some(&name[..4 + ctrl + 1 + ns])
}

/// Device families whose trailing number is part of the base name
///
/// `dm-N` never reaches this check: `-` ends the letter prefix, so the
/// name is returned unchanged.
fn is_whole_numbered_device(prefix: &str) -> bool {
    matches!(prefix, "md" | "loop" | "ram" | "zram" | "nbd" | "sr")
}

/// `nvme0n1` -> `nvme0`; other names are returned unchanged
pub fn controller_name(device: &str) -> &str {
    if device.starts_with("nvme") {
        if let Some(pos) = device[4..].find('n') {
            return &device[..4 + pos];
        }
    }
    device
}

/// IRQ numbers from `/proc/interrupts` whose action names mention `name`
pub fn irqs_for_action(table: &str, name: &str) -> Vec<u32> {
    let mut irqs: Vec<u32> = table
        .lines()
        .filter_map(|line| {
            let (irq, rest) = line.trim_start().split_once(':')?;
            let irq: u32 = irq.trim().parse().ok()?;
            let mentions = rest
                .split_whitespace()
                .any(|token| token.trim_end_matches(',').starts_with(name) && is_queue_of(token, name));
            mentions.then_some(irq)
        })
        .collect();
    irqs.sort_unstable();
    irqs.dedup();
    irqs
}

/// `nvme0q3` belongs to `nvme0`; `nvme10q1` does not
fn is_queue_of(token: &str, name: &str) -> bool {
    let rest = &token.trim_end_matches(',')[name.len()..];
    rest.is_empty() || !rest.starts_with(|c: char| c.is_ascii_digit())
}

/// Enumerate interfaces to tune
///
/// An explicit list is used verbatim; otherwise every interface under
/// `/sys/class/net` except loopback, bridges and virtual ethernet pairs.
pub fn resolve_interfaces(host: &Host, explicit: &[String]) -> Vec<NetworkInterface> {
    let names: Vec<String> = if explicit.is_empty() {
        host.list_dir("/sys/class/net")
            .unwrap_or_default()
            .into_iter()
            .filter(|name| is_tunable_interface(name))
            .collect()
    } else {
        explicit.to_vec()
    };

    names
        .iter()
        .map(|name| NetworkInterface::probe(host, name))
        .collect()
}

/// Whether an interface name passes the exclusion patterns
pub fn is_tunable_interface(name: &str) -> bool {
    name != "lo" && !EXCLUDED_INTERFACE_PREFIXES.iter().any(|p| name.starts_with(p))
}
