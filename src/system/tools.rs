//! Optional host tools behind capability interfaces
//!
//! `ethtool` and `systemctl` may or may not exist on a node. Each concern
//! has a trait with a tool-backed implementation and a pure sysfs/file
//! fallback, so tuner units never special-case a missing tool.

use super::devices::NetworkInterface;
use super::topology::{detect_topology, CpuTopology};
use super::Host;
use crate::error::{Result, TuneError};
use crate::tuning::irq::{cpus_mask, masks_equal};
use std::env;
use std::path::PathBuf;
use std::process::{Command, Output};

/// Receive-queue steering for a NIC
pub trait NicTool: Send + Sync {
    /// Implementation name, for logging
    fn name(&self) -> &'static str;

    /// Whether steering for `iface` already spreads across `cpus`
    fn steering_satisfied(&self, host: &Host, iface: &NetworkInterface, cpus: &[usize])
        -> Result<bool>;

    /// Spread steering for `iface` across `cpus`
    fn apply_steering(&self, host: &Host, iface: &NetworkInterface, cpus: &[usize]) -> Result<()>;
}

/// Channel counts via `ethtool -l` / `ethtool -L`
pub struct EthtoolNic;

impl EthtoolNic {
    fn channels(iface: &str) -> Result<(usize, usize)> {
        let output = run_command("ethtool", &["-l", iface])
            .ok_or_else(|| TuneError::command("ethtool -l", "failed to execute"))?;
        if !output.status.success() {
            return Err(TuneError::unsupported(format!(
                "{} does not report channel parameters",
                iface
            )));
        }
        parse_combined_channels(&String::from_utf8_lossy(&output.stdout)).ok_or_else(|| {
            TuneError::unsupported(format!("{} has no combined channels", iface))
        })
    }
}

impl NicTool for EthtoolNic {
    fn name(&self) -> &'static str {
        "ethtool"
    }

    fn steering_satisfied(
        &self,
        _host: &Host,
        iface: &NetworkInterface,
        cpus: &[usize],
    ) -> Result<bool> {
        let (max, current) = Self::channels(&iface.name)?;
        Ok(current == max.min(cpus.len()).max(1))
    }

    fn apply_steering(&self, _host: &Host, iface: &NetworkInterface, cpus: &[usize]) -> Result<()> {
        let (max, _) = Self::channels(&iface.name)?;
        let target = max.min(cpus.len()).max(1).to_string();
        tracing::info!("ethtool -L {} combined {}", iface.name, target);
        let output = run_command("ethtool", &["-L", &iface.name, "combined", &target])
            .ok_or_else(|| TuneError::command("ethtool -L", "failed to execute"))?;
        if output.status.success() {
            Ok(())
        } else {
            Err(TuneError::command(
                "ethtool -L",
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ))
        }
    }
}

/// Receive packet steering masks in sysfs
pub struct RpsNic;

impl RpsNic {
    fn rps_paths(host: &Host, iface: &NetworkInterface) -> Result<Vec<PathBuf>> {
        let queues = PathBuf::from("/sys/class/net").join(&iface.name).join("queues");
        let paths: Vec<PathBuf> = host
            .list_dir(&queues)
            .unwrap_or_default()
            .into_iter()
            .filter(|q| q.starts_with("rx-"))
            .map(|q| queues.join(q).join("rps_cpus"))
            .filter(|p| host.exists(p))
            .collect();
        if paths.is_empty() {
            return Err(TuneError::unsupported(format!(
                "{} exposes no rps_cpus controls",
                iface.name
            )));
        }
        Ok(paths)
    }
}

impl NicTool for RpsNic {
    fn name(&self) -> &'static str {
        "rps"
    }

    fn steering_satisfied(
        &self,
        host: &Host,
        iface: &NetworkInterface,
        cpus: &[usize],
    ) -> Result<bool> {
        let target = cpus_mask(cpus);
        for path in Self::rps_paths(host, iface)? {
            if !masks_equal(&host.read(&path)?, &target) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn apply_steering(&self, host: &Host, iface: &NetworkInterface, cpus: &[usize]) -> Result<()> {
        let target = cpus_mask(cpus);
        for path in Self::rps_paths(host, iface)? {
            if !masks_equal(&host.read(&path)?, &target) {
                host.write(&path, &target)?;
            }
        }
        Ok(())
    }
}

/// A job that should run periodically on the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeriodicJob {
    /// Short job name
    pub name: &'static str,
    /// systemd timer implementing the job
    pub timer: &'static str,
    /// Shell command run by the cron fallback
    pub command: &'static str,
}

/// Weekly filesystem discard
pub const FSTRIM_JOB: PeriodicJob = PeriodicJob {
    name: "fstrim",
    timer: "fstrim.timer",
    command: "fstrim --all || fstrim -a",
};

/// Scheduling of periodic jobs
pub trait PeriodicScheduler: Send + Sync {
    /// Implementation name, for logging
    fn name(&self) -> &'static str;

    /// Whether the job is already scheduled
    fn is_scheduled(&self, host: &Host, job: &PeriodicJob) -> Result<bool>;

    /// Schedule the job
    fn schedule(&self, host: &Host, job: &PeriodicJob) -> Result<()>;
}

/// systemd timers via `systemctl`
pub struct SystemdScheduler;

impl SystemdScheduler {
    fn query(verb: &str, unit: &str) -> Option<String> {
        let output = run_command("systemctl", &[verb, unit])?;
        Some(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Whether systemd manages `timer` on this host
    pub fn has_timer(timer: &str) -> bool {
        which("systemctl").is_some()
            && run_command("systemctl", &["cat", timer])
                .map(|o| o.status.success())
                .unwrap_or(false)
    }
}

impl PeriodicScheduler for SystemdScheduler {
    fn name(&self) -> &'static str {
        "systemd"
    }

    fn is_scheduled(&self, _host: &Host, job: &PeriodicJob) -> Result<bool> {
        let enabled = Self::query("is-enabled", job.timer).unwrap_or_default();
        let active = Self::query("is-active", job.timer).unwrap_or_default();
        Ok(enabled == "enabled" && active == "active")
    }

    fn schedule(&self, _host: &Host, job: &PeriodicJob) -> Result<()> {
        tracing::info!("systemctl enable --now {}", job.timer);
        let output = run_command("systemctl", &["enable", "--now", job.timer])
            .ok_or_else(|| TuneError::command("systemctl enable", "failed to execute"))?;
        if output.status.success() {
            Ok(())
        } else {
            Err(TuneError::command(
                "systemctl enable",
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ))
        }
    }
}

/// Weekly cron script fallback
pub struct CronScheduler;

impl CronScheduler {
    /// Script path for a job
    pub fn script_path(job: &PeriodicJob) -> PathBuf {
        PathBuf::from(format!("/etc/cron.weekly/nodetune-{}", job.name))
    }

    /// Script content for a job
    pub fn script(job: &PeriodicJob) -> String {
        format!("#!/bin/sh\n{}\n", job.command)
    }
}

impl PeriodicScheduler for CronScheduler {
    fn name(&self) -> &'static str {
        "cron"
    }

    fn is_scheduled(&self, host: &Host, job: &PeriodicJob) -> Result<bool> {
        Ok(host
            .read_opt(Self::script_path(job))
            .map(|current| current == Self::script(job).trim())
            .unwrap_or(false))
    }

    fn schedule(&self, host: &Host, job: &PeriodicJob) -> Result<()> {
        let path = Self::script_path(job);
        host.write_file_atomic(&path, &Self::script(job))?;
        #[cfg(unix)]
        host.set_mode(&path, 0o755)?;
        Ok(())
    }
}

/// Capability implementations chosen for a host
pub struct HostTools {
    /// Online CPU source
    pub topology: Box<dyn CpuTopology>,
    /// NIC queue steering
    pub nic: Box<dyn NicTool>,
    /// Periodic job scheduling
    pub scheduler: Box<dyn PeriodicScheduler>,
}

impl HostTools {
    /// Prefer installed tools on the live host, software fallbacks otherwise
    pub fn detect(host: &Host) -> Self {
        if !host.is_system_root() {
            return Self::fallback(host);
        }

        let nic: Box<dyn NicTool> = if which("ethtool").is_some() {
            Box::new(EthtoolNic)
        } else {
            Box::new(RpsNic)
        };
        let scheduler: Box<dyn PeriodicScheduler> = if SystemdScheduler::has_timer(FSTRIM_JOB.timer)
        {
            Box::new(SystemdScheduler)
        } else {
            Box::new(CronScheduler)
        };
        let tools = Self {
            topology: detect_topology(host),
            nic,
            scheduler,
        };
        tracing::debug!(
            "Host tools: topology={} nic={} scheduler={}",
            tools.topology.name(),
            tools.nic.name(),
            tools.scheduler.name()
        );
        tools
    }

    /// Software-only implementations
    pub fn fallback(host: &Host) -> Self {
        Self {
            topology: detect_topology(host),
            nic: Box::new(RpsNic),
            scheduler: Box::new(CronScheduler),
        }
    }
}

/// `(maximum, current)` combined channels from `ethtool -l` output
pub fn parse_combined_channels(output: &str) -> Option<(usize, usize)> {
    let mut values = output
        .lines()
        .filter_map(|line| line.trim().strip_prefix("Combined:"))
        .filter_map(|v| v.trim().parse::<usize>().ok());
    let max = values.next()?;
    let current = values.next()?;
    if max == 0 {
        None
    } else {
        Some((max, current))
    }
}

/// Find an executable on `PATH`
pub fn which(cmd: &str) -> Option<PathBuf> {
    env::var_os("PATH").and_then(|paths| {
        env::split_paths(&paths).find_map(|dir| {
            let full_path = dir.join(cmd);
            if full_path.is_file() {
                Some(full_path)
            } else {
                None
            }
        })
    })
}

/// Run a command to completion
pub fn run_command(cmd: &str, args: &[&str]) -> Option<Output> {
    Command::new(cmd).args(args).output().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_combined_channels() {
        let output = "Channel parameters for ens5:\n\
                      Pre-set maximums:\n\
                      RX:\t\tn/a\n\
                      TX:\t\tn/a\n\
                      Other:\t\tn/a\n\
                      Combined:\t8\n\
                      Current hardware settings:\n\
                      RX:\t\tn/a\n\
                      TX:\t\tn/a\n\
                      Other:\t\tn/a\n\
                      Combined:\t2\n";
        assert_eq!(parse_combined_channels(output), Some((8, 2)));
        assert_eq!(parse_combined_channels("Combined: 0\nCombined: 0\n"), None);
        assert_eq!(parse_combined_channels("nothing"), None);
    }

    #[test]
    fn test_rps_steering() {
        let dir = TempDir::new().unwrap();
        let queues = dir.path().join("sys/class/net/eth0/queues");
        for q in ["rx-0", "rx-1"] {
            std::fs::create_dir_all(queues.join(q)).unwrap();
            std::fs::write(queues.join(q).join("rps_cpus"), "0\n").unwrap();
        }
        let host = Host::new(dir.path());
        let iface = NetworkInterface::probe(&host, "eth0");
        let cpus = [1, 2, 3];

        assert!(!RpsNic.steering_satisfied(&host, &iface, &cpus).unwrap());
        RpsNic.apply_steering(&host, &iface, &cpus).unwrap();
        assert!(RpsNic.steering_satisfied(&host, &iface, &cpus).unwrap());
        assert_eq!(host.writes(), 2);

        RpsNic.apply_steering(&host, &iface, &cpus).unwrap();
        assert_eq!(host.writes(), 2);
    }

    #[test]
    fn test_rps_without_queues_is_unsupported() {
        let dir = TempDir::new().unwrap();
        let host = Host::new(dir.path());
        let iface = NetworkInterface::probe(&host, "eth9");
        let err = RpsNic.steering_satisfied(&host, &iface, &[1]).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Unsupported);
    }

    #[test]
    fn test_cron_scheduler() {
        let dir = TempDir::new().unwrap();
        let host = Host::new(dir.path());

        assert!(!CronScheduler.is_scheduled(&host, &FSTRIM_JOB).unwrap());
        CronScheduler.schedule(&host, &FSTRIM_JOB).unwrap();
        assert!(CronScheduler.is_scheduled(&host, &FSTRIM_JOB).unwrap());
        assert!(dir.path().join("etc/cron.weekly/nodetune-fstrim").is_file());
    }

    #[test]
    fn test_fallback_tools_for_rooted_host() {
        let dir = TempDir::new().unwrap();
        let host = Host::new(dir.path());
        let tools = HostTools::detect(&host);
        assert_eq!(tools.nic.name(), "rps");
        assert_eq!(tools.scheduler.name(), "cron");
    }
}
