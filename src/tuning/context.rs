//! Per-run context
//!
//! Everything a tuner unit may consult is carried here and passed
//! explicitly: the configuration record, the host handle, host tools,
//! the detected environment, the resolved targets and the accumulating
//! run record.

use super::executor::TuningRun;
use crate::config::TuneConfig;
use crate::system::devices::resolve_interfaces;
use crate::system::{BlockDevice, DeviceResolver, EnvironmentInfo, Host, HostTools, NetworkInterface};
use std::path::PathBuf;

/// State of one tuning run
pub struct RunContext<'a> {
    pub config: &'a TuneConfig,
    pub host: &'a Host,
    pub tools: &'a HostTools,
    pub environment: EnvironmentInfo,
    pub devices: Vec<BlockDevice>,
    pub interfaces: Vec<NetworkInterface>,
    pub run: TuningRun,
}

impl<'a> RunContext<'a> {
    /// Context with no resolved targets yet
    pub fn new(
        config: &'a TuneConfig,
        host: &'a Host,
        tools: &'a HostTools,
        environment: EnvironmentInfo,
    ) -> Self {
        Self {
            config,
            host,
            tools,
            environment,
            devices: Vec::new(),
            interfaces: Vec::new(),
            run: TuningRun::new(config.check_only),
        }
    }

    /// Resolve block devices and interfaces from the configuration
    pub fn resolve_targets(&mut self) {
        self.resolve_targets_with(&DeviceResolver::new(self.host));
    }

    /// Resolve targets with a specific device resolver
    pub fn resolve_targets_with(&mut self, resolver: &DeviceResolver<'_>) {
        self.devices = resolver.resolve(&self.config.directories, &self.config.devices);
        self.interfaces = resolve_interfaces(self.host, &self.config.interfaces);
        tracing::info!(
            "Targets: devices=[{}] interfaces=[{}]",
            self.devices.iter().map(|d| d.name.as_str()).collect::<Vec<_>>().join(", "),
            self.interfaces.iter().map(|i| i.name.as_str()).collect::<Vec<_>>().join(", ")
        );
    }

    /// Online CPUs of the host
    pub fn online_cpus(&self) -> Vec<usize> {
        self.tools.topology.online_cpus()
    }

    /// Ballast location: explicit path, else `<first directory>/ballast`
    pub fn ballast_path(&self) -> Option<PathBuf> {
        self.config.ballast_path.clone().or_else(|| {
            self.config
                .directories
                .first()
                .map(|dir| dir.join("ballast"))
        })
    }
}
