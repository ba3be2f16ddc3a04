//! End-to-end tuning run
//!
//! Ties discovery, profile resolution, unit execution and the state store
//! together. One [`Orchestrator`] can drive many runs; each run takes the
//! node lock, builds a fresh [`RunContext`] and reports a [`RunOutcome`].

use crate::config::TuneConfig;
use crate::error::Result;
use crate::profile::{mountpoint_for, ProfileArtifact, ProfileResolver, ProfileTable, ResolvedProfile};
use crate::state::flags::IO_PROPERTIES;
use crate::state::{FileStateStore, NodeFlags, RunLock, StateStore};
use crate::system::environment::{node_name, PROBE_TIMEOUT};
use crate::system::{
    BlockDevice, EnvironmentInfo, EnvironmentProber, Host, HostTools, HttpMetadataClient,
    MetadataClient, NetworkInterface,
};
use crate::tuning::{Deadline, Executor, RunContext, TuningRun};
use chrono::Utc;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// A phase left out of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkippedPhase {
    /// The node is already tuned and no retune was requested
    AlreadyTuned,
    /// A profile was already produced and is still on disk
    ProfileCurrent,
}

impl std::fmt::Display for SkippedPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AlreadyTuned => f.write_str("tuning (node already tuned)"),
            Self::ProfileCurrent => f.write_str("I/O profile (already completed)"),
        }
    }
}

/// Result of the profile phase
#[derive(Debug, Clone, Serialize)]
pub struct ProfileOutcome {
    pub resolved: ResolvedProfile,
    /// Host path the artifact was written to
    pub artifact: Option<PathBuf>,
    /// Why the artifact could not be written
    pub error: Option<String>,
}

/// Everything the reporter needs about a run
#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub node: String,
    pub environment: EnvironmentInfo,
    pub devices: Vec<String>,
    pub interfaces: Vec<String>,
    pub profile: Option<ProfileOutcome>,
    pub skipped_phases: Vec<SkippedPhase>,
    pub run: TuningRun,
    pub elapsed: Duration,
}

impl RunOutcome {
    /// No unit failed, the profile was written and the run finished in time
    pub fn is_success(&self) -> bool {
        self.run.is_success()
            && self
                .profile
                .as_ref()
                .map(|p| p.error.is_none())
                .unwrap_or(true)
    }
}

/// Discovered environment and targets, without running anything
#[derive(Debug, Clone, Serialize)]
pub struct Discovery {
    pub node: String,
    pub environment: EnvironmentInfo,
    pub devices: Vec<BlockDevice>,
    pub interfaces: Vec<NetworkInterface>,
    pub cpus: Vec<usize>,
}

/// Drives tuning runs for one node
pub struct Orchestrator {
    config: TuneConfig,
    host: Host,
    store: Arc<dyn StateStore>,
    metadata: Box<dyn MetadataClient>,
    profiles: ProfileTable,
}

impl Orchestrator {
    /// Build from a configuration record, rejecting invalid ones
    pub fn new(config: TuneConfig) -> Result<Self> {
        config.validate()?;
        let profiles = match &config.profile_table {
            Some(path) => ProfileTable::load(path)?,
            None => ProfileTable::builtin(),
        };
        Ok(Self {
            host: Host::new(&config.host_root),
            store: Arc::new(FileStateStore::new(&config.state_file)),
            metadata: Box::new(HttpMetadataClient::new(PROBE_TIMEOUT)?),
            profiles,
            config,
        })
    }

    /// Use a different state store
    pub fn with_store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.store = store;
        self
    }

    /// Use a different metadata client
    pub fn with_metadata_client(mut self, client: Box<dyn MetadataClient>) -> Self {
        self.metadata = client;
        self
    }

    pub fn config(&self) -> &TuneConfig {
        &self.config
    }

    pub fn host(&self) -> &Host {
        &self.host
    }

    pub fn node(&self) -> String {
        node_name(self.config.node_name.as_deref())
    }

    fn probe(&self) -> EnvironmentInfo {
        EnvironmentProber::new(&self.host, self.metadata.as_ref())
            .probe(self.config.provider, self.config.instance_type.as_deref())
    }

    /// Run with the configured time budget
    pub fn run(&self) -> Result<RunOutcome> {
        self.run_with_deadline(Deadline::new(self.config.timeout()))
    }

    /// Run against an explicit deadline
    pub fn run_with_deadline(&self, deadline: Deadline) -> Result<RunOutcome> {
        let _lock = RunLock::acquire(&self.config.lock_file)?;
        let store = self.store.as_ref();
        let check_only = self.config.check_only;
        let force = self.config.force_retune;

        let node = self.node();
        let environment = self.probe();

        if force && !check_only {
            NodeFlags::clear(store, &node)?;
        }
        let flags = NodeFlags::load(store, &node)?;

        let mut skipped_phases = Vec::new();
        let tune = force || check_only || !flags.tuned;
        if !tune {
            tracing::info!("{} is already tuned, skipping tuning units", node);
            skipped_phases.push(SkippedPhase::AlreadyTuned);
        }

        let tools = HostTools::detect(&self.host);
        let mut ctx = RunContext::new(&self.config, &self.host, &tools, environment);
        ctx.resolve_targets();

        let profile_current = !force
            && flags.iotune_completed
            && self.host.exists(&self.config.profile_path);
        let profile = if profile_current {
            tracing::info!("I/O profile already completed, skipping");
            skipped_phases.push(SkippedPhase::ProfileCurrent);
            None
        } else if deadline.is_expired() {
            ctx.run.timed_out = true;
            None
        } else {
            Some(self.profile_phase(&ctx, &node))
        };

        if tune && !ctx.run.timed_out {
            Executor::new(self.config.selection()?, deadline).execute(&mut ctx);
        }

        if deadline.is_expired() {
            ctx.run.timed_out = true;
        }
        if ctx.run.timed_out {
            tracing::error!("Run timed out; no state flags written");
        } else if !check_only {
            let now = Utc::now();
            if tune {
                NodeFlags::record_tuning(store, &node, &ctx.run, now)?;
            }
            if profile.as_ref().is_some_and(|p| p.artifact.is_some()) {
                NodeFlags::record_iotune(store, &node, now)?;
            }
        }

        Ok(RunOutcome {
            node,
            devices: ctx.devices.iter().map(|d| d.name.clone()).collect(),
            interfaces: ctx.interfaces.iter().map(|i| i.name.clone()).collect(),
            environment: ctx.environment,
            profile,
            skipped_phases,
            run: ctx.run,
            elapsed: deadline.elapsed(),
        })
    }

    /// Resolve and write the I/O profile only, regardless of flags
    pub fn run_profile(&self) -> Result<RunOutcome> {
        let deadline = Deadline::new(self.config.timeout());
        let _lock = RunLock::acquire(&self.config.lock_file)?;
        let node = self.node();
        let tools = HostTools::fallback(&self.host);
        let ctx = RunContext::new(&self.config, &self.host, &tools, self.probe());

        let profile = self.profile_phase(&ctx, &node);
        if profile.artifact.is_some() {
            NodeFlags::record_iotune(self.store.as_ref(), &node, Utc::now())?;
        }

        Ok(RunOutcome {
            node,
            environment: ctx.environment,
            devices: Vec::new(),
            interfaces: Vec::new(),
            profile: Some(profile),
            skipped_phases: Vec::new(),
            run: ctx.run,
            elapsed: deadline.elapsed(),
        })
    }

    /// Resolve the profile and, unless checking only, write and publish it
    fn profile_phase(&self, ctx: &RunContext<'_>, node: &str) -> ProfileOutcome {
        let resolved = ProfileResolver::new(self.profiles.clone()).resolve(&ctx.environment);
        tracing::info!(
            "I/O profile from {}: read {} IOPS, write {} IOPS",
            resolved.source,
            resolved.profile.read_iops,
            resolved.profile.write_iops
        );

        if ctx.run.check_only {
            return ProfileOutcome {
                resolved,
                artifact: None,
                error: None,
            };
        }

        let artifact = ProfileArtifact::new(mountpoint_for(&self.config.directories), resolved.profile);
        let path = &self.config.profile_path;
        let written = artifact.write(&self.host, path).and_then(|_| {
            let yaml = artifact.to_yaml()?;
            self.store.set(node, IO_PROPERTIES, &yaml)
        });

        match written {
            Ok(()) => ProfileOutcome {
                resolved,
                artifact: Some(path.clone()),
                error: None,
            },
            Err(e) => {
                tracing::error!("Failed to write I/O profile: {}", e);
                ProfileOutcome {
                    resolved,
                    artifact: None,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    /// Clear the node's flags
    pub fn reset(&self) -> Result<()> {
        let _lock = RunLock::acquire(&self.config.lock_file)?;
        NodeFlags::clear(self.store.as_ref(), &self.node())
    }

    /// Current flags of the node
    pub fn status(&self) -> Result<NodeFlags> {
        NodeFlags::load(self.store.as_ref(), &self.node())
    }

    /// Probe and resolve without touching the host
    pub fn discover(&self) -> Discovery {
        let tools = HostTools::detect(&self.host);
        let mut ctx = RunContext::new(&self.config, &self.host, &tools, self.probe());
        ctx.resolve_targets();
        Discovery {
            node: self.node(),
            cpus: ctx.online_cpus(),
            environment: ctx.environment,
            devices: ctx.devices,
            interfaces: ctx.interfaces,
        }
    }
}
