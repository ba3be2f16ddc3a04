//! End-to-end runs against a fake host tree

use nodetune::config::TuneConfig;
use nodetune::core::{Orchestrator, RunOutcome, SkippedPhase};
use nodetune::error::TuneError;
use nodetune::profile::{IoProfile, ProfileArtifact, ProfileSource};
use nodetune::report::RunReport;
use nodetune::state::{MemoryStateStore, NodeFlags, RunLock, StateStore};
use nodetune::system::{CloudProvider, Host, MetadataClient};
use nodetune::tuning::{Deadline, UnitStatus};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const NODE: &str = "node-a";

/// Metadata endpoints that never answer
struct Offline;

impl MetadataClient for Offline {
    fn get(&self, _url: &str, _headers: &[(&str, &str)]) -> Option<String> {
        None
    }

    fn put(&self, _url: &str, _headers: &[(&str, &str)]) -> Option<String> {
        None
    }
}

struct Node {
    root: TempDir,
    local: TempDir,
    store: Arc<MemoryStateStore>,
}

impl Node {
    /// Host tree where every unit either converges or is unsupported
    fn new() -> Self {
        let node = Self {
            root: TempDir::new().unwrap(),
            local: TempDir::new().unwrap(),
            store: Arc::new(MemoryStateStore::new()),
        };
        node.put("/proc/sys/fs/aio-max-nr", "65536\n");
        node.put("/proc/sys/vm/swappiness", "60\n");
        node.put(
            "/sys/kernel/mm/transparent_hugepage/enabled",
            "[always] madvise never\n",
        );
        node.put("/sys/block/sda/queue/scheduler", "[mq-deadline] none\n");
        node.put("/sys/block/sda/queue/nomerges", "0\n");
        node.put("/sys/block/sda/queue/write_cache", "write back\n");
        node.put(
            "/sys/devices/system/cpu/cpu0/cpufreq/scaling_governor",
            "powersave\n",
        );
        node.put("/sys/devices/system/cpu/online", "0-1\n");
        node.put("/proc/sys/net/core/rmem_max", "212992\n");
        node.put("/proc/sys/net/core/wmem_max", "212992\n");
        node.put("/proc/sys/net/core/somaxconn", "128\n");
        node.put("/proc/sys/net/core/netdev_max_backlog", "1000\n");
        node.put("/proc/sys/kernel/core_pattern", "core\n");
        node.put("/proc/sys/kernel/core_uses_pid", "0\n");
        node.put("/etc/os-release", "ID=ubuntu\nVERSION_ID=\"22.04\"\n");
        node
    }

    fn put(&self, path: &str, content: &str) {
        let full = self.root.path().join(path.trim_start_matches('/'));
        std::fs::create_dir_all(full.parent().unwrap()).unwrap();
        std::fs::write(full, content).unwrap();
    }

    fn config(&self) -> TuneConfig {
        TuneConfig {
            directories: vec!["/data".into()],
            devices: vec!["sda".into()],
            provider: Some(CloudProvider::Aws),
            instance_type: Some("i3.large".into()),
            node_name: Some(NODE.into()),
            host_root: self.root.path().to_path_buf(),
            state_file: self.local.path().join("state.json"),
            lock_file: self.local.path().join("nodetune.lock"),
            ballast_size: 64 * 1024,
            ..Default::default()
        }
    }

    fn orchestrator(&self, config: TuneConfig) -> Orchestrator {
        Orchestrator::new(config)
            .unwrap()
            .with_store(self.store.clone())
            .with_metadata_client(Box::new(Offline))
    }

    fn run(&self, config: TuneConfig) -> (RunOutcome, usize) {
        let orchestrator = self.orchestrator(config);
        let outcome = orchestrator.run().unwrap();
        (outcome, orchestrator.host().writes())
    }

    fn flags(&self) -> NodeFlags {
        NodeFlags::load(self.store.as_ref(), NODE).unwrap()
    }

    fn read(&self, path: &str) -> String {
        std::fs::read_to_string(self.root.path().join(path.trim_start_matches('/'))).unwrap()
    }
}

fn status_of(outcome: &RunOutcome, id: &str) -> UnitStatus {
    outcome
        .run
        .results
        .iter()
        .find(|r| r.id == id)
        .unwrap_or_else(|| panic!("no result for {}", id))
        .status
}

#[test]
fn test_first_run_tunes_and_records_flags() {
    let node = Node::new();
    let (outcome, writes) = node.run(node.config());

    assert!(outcome.is_success(), "{:?}", outcome.run.results);
    assert_eq!(RunReport::new(&outcome).exit_code(), 0);
    assert!(writes > 0);
    assert_eq!(outcome.devices, vec!["sda".to_string()]);

    assert_eq!(status_of(&outcome, "swappiness"), UnitStatus::Success);
    assert_eq!(status_of(&outcome, "disk_scheduler:sda"), UnitStatus::Success);
    assert_eq!(status_of(&outcome, "disk_irq:sda"), UnitStatus::Skipped);
    assert_eq!(status_of(&outcome, "disk_write_cache:sda"), UnitStatus::Skipped);

    assert_eq!(node.read("/proc/sys/vm/swappiness"), "1");
    assert_eq!(node.read("/sys/block/sda/queue/scheduler"), "none");
    assert!(node.root.path().join("data/ballast").exists());

    let flags = node.flags();
    assert!(flags.tuned);
    assert!(flags.tune_attempted);
    assert!(flags.iotune_completed);
    assert!(!flags.reboot_required);
}

#[test]
fn test_second_run_is_skipped_without_writes() {
    let node = Node::new();
    node.run(node.config());

    let (outcome, writes) = node.run(node.config());
    assert_eq!(writes, 0);
    assert!(outcome.run.results.is_empty());
    assert_eq!(
        outcome.skipped_phases,
        vec![SkippedPhase::AlreadyTuned, SkippedPhase::ProfileCurrent]
    );
    assert_eq!(RunReport::new(&outcome).exit_code(), 0);
}

#[test]
fn test_converged_host_has_nothing_to_change() {
    let node = Node::new();
    node.run(node.config());

    let check = TuneConfig {
        check_only: true,
        ..node.config()
    };
    let (outcome, writes) = node.run(check);
    assert_eq!(writes, 0);
    assert!(outcome.is_success(), "{:?}", outcome.run.results);
    assert_eq!(outcome.run.changed_count(), 0);

    let forced = TuneConfig {
        force_retune: true,
        ..node.config()
    };
    let (outcome, _) = node.run(forced);
    assert!(outcome.is_success());
    assert_eq!(outcome.run.changed_count(), 0);
}

#[test]
fn test_check_only_never_mutates() {
    let node = Node::new();
    let config = TuneConfig {
        check_only: true,
        ..node.config()
    };
    let (outcome, writes) = node.run(config);

    assert_eq!(writes, 0);
    assert_eq!(status_of(&outcome, "swappiness"), UnitStatus::Failed);
    assert_eq!(RunReport::new(&outcome).exit_code(), 1);
    assert_eq!(node.read("/proc/sys/vm/swappiness"), "60\n");
    assert_eq!(node.flags(), NodeFlags::default());

    let profile = outcome.profile.unwrap();
    assert!(profile.artifact.is_none());
    assert!(!node.root.path().join("etc/nodetune/io_properties.yaml").exists());
}

#[test]
fn test_failed_unit_does_not_stop_the_run() {
    let node = Node::new();
    let swappiness = node.root.path().join("proc/sys/vm/swappiness");
    std::fs::remove_file(&swappiness).unwrap();
    std::fs::create_dir(&swappiness).unwrap();

    let (outcome, _) = node.run(node.config());

    assert_eq!(status_of(&outcome, "swappiness"), UnitStatus::Failed);
    assert_eq!(status_of(&outcome, "coredump"), UnitStatus::Success);
    assert_eq!(status_of(&outcome, "fstrim"), UnitStatus::Success);
    assert_eq!(RunReport::new(&outcome).exit_code(), 1);

    let flags = node.flags();
    assert!(!flags.tuned);
    assert!(flags.tune_attempted);
}

#[test]
fn test_unknown_instance_gets_conservative_profile() {
    let node = Node::new();
    let config = TuneConfig {
        provider: None,
        instance_type: None,
        ..node.config()
    };
    let (outcome, _) = node.run(config);

    let profile = outcome.profile.unwrap();
    assert_eq!(profile.resolved.source, ProfileSource::Conservative);
    assert_eq!(profile.resolved.profile, IoProfile::CONSERVATIVE);

    let host = Host::new(node.root.path());
    let artifact = ProfileArtifact::read(&host, Path::new("/etc/nodetune/io_properties.yaml"))
        .unwrap();
    assert_eq!(artifact.disks.len(), 1);
    assert_eq!(artifact.disks[0].mountpoint, "/data");
    assert_eq!(artifact.disks[0].profile, IoProfile::CONSERVATIVE);
}

#[test]
fn test_profile_is_published_to_store() {
    let node = Node::new();
    let (outcome, _) = node.run(node.config());

    let profile = outcome.profile.unwrap();
    assert_eq!(profile.resolved.source, ProfileSource::Table);
    let published = node.store.get(NODE, "io_properties").unwrap().unwrap();
    let artifact = ProfileArtifact::from_yaml(&published).unwrap();
    assert_eq!(artifact.disks[0].profile, profile.resolved.profile);
}

#[test]
fn test_force_retune_reruns_tuned_node() {
    let node = Node::new();
    node.run(node.config());
    node.put("/proc/sys/vm/swappiness", "60\n");

    let (outcome, _) = node.run(node.config());
    assert!(outcome.run.results.is_empty());
    assert_eq!(node.read("/proc/sys/vm/swappiness"), "60\n");

    let forced = TuneConfig {
        force_retune: true,
        ..node.config()
    };
    let (outcome, _) = node.run(forced);
    assert!(outcome.skipped_phases.is_empty());
    assert_eq!(status_of(&outcome, "swappiness"), UnitStatus::Success);
    assert_eq!(node.read("/proc/sys/vm/swappiness"), "1");
    assert!(node.flags().tuned);
}

#[test]
fn test_timeout_writes_no_flags() {
    let node = Node::new();
    let orchestrator = node.orchestrator(node.config());
    let outcome = orchestrator.run_with_deadline(Deadline::expired()).unwrap();

    assert!(outcome.run.timed_out);
    assert!(outcome.run.results.is_empty());
    assert_eq!(RunReport::new(&outcome).exit_code(), 1);
    assert_eq!(node.flags(), NodeFlags::default());
}

#[cfg(unix)]
#[test]
fn test_budget_spent_mid_unit_writes_no_flags() {
    let node = Node::new();
    let swappiness = node.root.path().join("proc/sys/vm/swappiness");
    std::fs::remove_file(&swappiness).unwrap();
    nix::unistd::mkfifo(&swappiness, nix::sys::stat::Mode::S_IRWXU).unwrap();
    let writer = std::thread::spawn({
        let swappiness = swappiness.clone();
        move || {
            std::thread::sleep(Duration::from_millis(400));
            std::fs::write(swappiness, "1\n").unwrap();
        }
    });

    let config = TuneConfig {
        enable: vec!["swappiness".into()],
        ..node.config()
    };
    let outcome = node
        .orchestrator(config)
        .run_with_deadline(Deadline::new(Duration::from_millis(100)))
        .unwrap();
    writer.join().unwrap();

    assert!(outcome.run.timed_out);
    assert_eq!(outcome.run.results.len(), 1);
    assert_eq!(RunReport::new(&outcome).exit_code(), 1);
    assert_eq!(node.flags(), NodeFlags::default());
}

#[cfg(unix)]
#[test]
fn test_directory_resolved_under_host_root() {
    let node = Node::new();
    let data = node.root.path().join("data");
    std::fs::create_dir_all(&data).unwrap();
    let number = nodetune::system::devices::device_number_of(&data).unwrap();

    let part = node.root.path().join("sys/devices/pci0000:00/sda/sda1");
    std::fs::create_dir_all(&part).unwrap();
    std::fs::create_dir_all(node.root.path().join("sys/dev/block")).unwrap();
    std::os::unix::fs::symlink(
        &part,
        node.root
            .path()
            .join(format!("sys/dev/block/{}:{}", number.major, number.minor)),
    )
    .unwrap();

    let config = TuneConfig {
        devices: vec![],
        ..node.config()
    };
    let discovery = node.orchestrator(config.clone()).discover();
    assert_eq!(discovery.devices.len(), 1);
    assert_eq!(discovery.devices[0].name, "sda");
    assert!(discovery.devices[0].sources.contains(Path::new("/data")));

    let (outcome, _) = node.run(config);
    assert_eq!(outcome.devices, vec!["sda".to_string()]);
    assert_eq!(status_of(&outcome, "disk_scheduler:sda"), UnitStatus::Success);
}

#[test]
fn test_concurrent_run_is_rejected() {
    let node = Node::new();
    let config = node.config();
    let _held = RunLock::acquire(&config.lock_file).unwrap();

    let err = node.orchestrator(config).run().unwrap_err();
    assert!(matches!(err, TuneError::LockHeld(_)));
    assert_eq!(node.flags(), NodeFlags::default());
}

#[test]
fn test_reset_clears_flags() {
    let node = Node::new();
    node.run(node.config());
    assert!(node.flags().tuned);

    node.orchestrator(node.config()).reset().unwrap();
    assert_eq!(node.flags(), NodeFlags::default());
}

#[test]
fn test_invalid_unit_name_is_rejected() {
    let node = Node::new();
    let config = TuneConfig {
        enable: vec!["turbo".into()],
        ..node.config()
    };
    let err = Orchestrator::new(config).err().unwrap();
    assert!(matches!(err, TuneError::Config(_)));
}
