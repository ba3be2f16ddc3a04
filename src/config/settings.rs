//! Configuration settings for NodeTune
//!
//! Defines the CLI surface, the validated run configuration and its
//! defaults. A JSON configuration file may supply any field; flags given
//! on the command line override it.

use crate::error::{IoResultExt, Result, TuneError};
use crate::system::CloudProvider;
use crate::tuning::TunerKind;
use clap::{Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// NodeTune - kernel and hardware tuning for storage nodes
#[derive(Parser, Debug, Clone)]
#[command(name = "nodetune")]
#[command(author = "NodeTune Team")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Idempotent kernel and hardware tuning for storage nodes")]
#[command(long_about = r#"
NodeTune prepares a node for a latency-sensitive storage workload.

It detects the cloud environment, resolves the block devices behind the
data directories, writes an I/O profile, and applies a fixed set of
idempotent tuning units (disk scheduler, memory, CPU, network, clock
source, IRQ affinity). Completed runs are recorded per node so repeated
invocations are cheap.

Examples:
  nodetune -d /var/lib/data                 # Tune for a data directory
  nodetune check -d /var/lib/data           # Report divergence only
  nodetune --disable ballast_file,fstrim    # Skip some units
  nodetune --force-retune                   # Re-run even if already tuned
  nodetune agent --interval 1h --host-root /host
"#)]
pub struct CliArgs {
    /// Target data directory (repeatable)
    #[arg(short = 'd', long = "directory", value_name = "DIR")]
    pub directories: Vec<PathBuf>,

    /// Explicit block device, used without resolution (repeatable)
    #[arg(long = "device", value_name = "NAME")]
    pub devices: Vec<String>,

    /// Explicit network interface (repeatable)
    #[arg(long = "interface", value_name = "NAME")]
    pub interfaces: Vec<String>,

    /// Also edit kernel boot parameters (requires a reboot)
    #[arg(long)]
    pub tune_boot_params: bool,

    /// Only run these units (comma separated ids)
    #[arg(long, value_delimiter = ',', value_name = "UNITS")]
    pub enable: Vec<String>,

    /// Never run these units (comma separated ids)
    #[arg(long, value_delimiter = ',', value_name = "UNITS")]
    pub disable: Vec<String>,

    /// Report divergence without changing anything
    #[arg(long)]
    pub check_only: bool,

    /// Clear completion flags and tune again
    #[arg(long)]
    pub force_retune: bool,

    /// Cloud provider, skips metadata probing
    #[arg(long, value_enum, value_name = "PROVIDER")]
    pub provider: Option<CloudProvider>,

    /// Instance type, skips instance type lookup
    #[arg(long, value_name = "TYPE")]
    pub instance_type: Option<String>,

    /// Node identity used for state flags
    #[arg(long, env = "NODE_NAME", value_name = "NAME")]
    pub node_name: Option<String>,

    /// Root under which host paths are resolved
    #[arg(long, env = "NODETUNE_HOST_ROOT", value_name = "PATH")]
    pub host_root: Option<PathBuf>,

    /// Run time budget (e.g., 10m, 90s)
    #[arg(long, value_name = "DURATION")]
    pub timeout: Option<String>,

    /// State file holding per-node flags
    #[arg(long, value_name = "PATH")]
    pub state_file: Option<PathBuf>,

    /// Lock file guarding concurrent runs
    #[arg(long, value_name = "PATH")]
    pub lock_file: Option<PathBuf>,

    /// Where the I/O profile is written
    #[arg(long, value_name = "PATH")]
    pub profile_path: Option<PathBuf>,

    /// JSON profile table replacing the built-in one
    #[arg(long, value_name = "PATH")]
    pub profile_table: Option<PathBuf>,

    /// Directory receiving core dumps
    #[arg(long, value_name = "DIR")]
    pub coredump_dir: Option<PathBuf>,

    /// Ballast file location (default: <first directory>/ballast)
    #[arg(long, value_name = "PATH")]
    pub ballast_path: Option<PathBuf>,

    /// Ballast file size (e.g., 1G, 512M)
    #[arg(long, value_name = "SIZE")]
    pub ballast_size: Option<String>,

    /// JSON configuration file
    #[arg(short = 'c', long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Verbose output (can be repeated: -v, -vv, -vvv)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Quiet mode (warnings and errors only)
    #[arg(short = 'q', long)]
    pub quiet: bool,

    /// Output format for reports
    #[arg(long, value_enum, default_value = "text")]
    pub output_format: OutputFormat,

    /// Log line format
    #[arg(long, value_enum, default_value = "text")]
    pub log_format: LogFormat,

    /// Subcommands
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available subcommands
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Tune the node (default)
    #[command(name = "tune")]
    Tune,

    /// Report which units diverge, without changing anything
    #[command(name = "check")]
    Check,

    /// Resolve and write the I/O profile only
    #[command(name = "profile")]
    Profile,

    /// Show resolved block devices and interfaces
    #[command(name = "devices")]
    Devices,

    /// Show the node's state flags
    #[command(name = "status")]
    Status,

    /// Clear the node's state flags
    #[command(name = "reset")]
    Reset,

    /// Re-run tuning periodically until interrupted
    #[command(name = "agent")]
    Agent {
        /// Interval between runs (e.g., 1h, 30m)
        #[arg(long, default_value = "1h", value_name = "DURATION")]
        interval: String,
    },
}

/// Output format for reports
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// Human-readable text
    #[default]
    Text,
    /// JSON format
    Json,
}

/// Log line format
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Validated configuration record for one run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TuneConfig {
    /// Target data directories
    pub directories: Vec<PathBuf>,
    /// Explicit block devices
    pub devices: Vec<String>,
    /// Explicit network interfaces
    pub interfaces: Vec<String>,
    /// Edit kernel boot parameters
    pub tune_boot_params: bool,
    /// Units to run; empty means all
    pub enable: Vec<String>,
    /// Units never to run
    pub disable: Vec<String>,
    /// Report divergence only
    pub check_only: bool,
    /// Clear completion flags before running
    pub force_retune: bool,
    /// Provider override
    pub provider: Option<CloudProvider>,
    /// Instance type override
    pub instance_type: Option<String>,
    /// Node identity override
    pub node_name: Option<String>,
    /// Host filesystem root
    pub host_root: PathBuf,
    /// Run time budget in seconds
    pub timeout_secs: u64,
    /// State file path
    pub state_file: PathBuf,
    /// Lock file path
    pub lock_file: PathBuf,
    /// Profile artifact path (host path)
    pub profile_path: PathBuf,
    /// External profile table
    pub profile_table: Option<PathBuf>,
    /// Core dump directory (host path)
    pub coredump_dir: PathBuf,
    /// Ballast file override (host path)
    pub ballast_path: Option<PathBuf>,
    /// Ballast size in bytes
    pub ballast_size: u64,
}

impl Default for TuneConfig {
    fn default() -> Self {
        Self {
            directories: Vec::new(),
            devices: Vec::new(),
            interfaces: Vec::new(),
            tune_boot_params: false,
            enable: Vec::new(),
            disable: Vec::new(),
            check_only: false,
            force_retune: false,
            provider: None,
            instance_type: None,
            node_name: None,
            host_root: PathBuf::from("/"),
            timeout_secs: 600, // 10 minutes
            state_file: PathBuf::from("/var/lib/nodetune/state.json"),
            lock_file: PathBuf::from("/run/nodetune.lock"),
            profile_path: PathBuf::from("/etc/nodetune/io_properties.yaml"),
            profile_table: None,
            coredump_dir: PathBuf::from("/var/lib/nodetune/coredump"),
            ballast_path: None,
            ballast_size: 1024 * 1024 * 1024, // 1GiB
        }
    }
}

/// Which tuner units a run executes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnitSelection {
    enable: BTreeSet<TunerKind>,
    disable: BTreeSet<TunerKind>,
}

impl UnitSelection {
    /// Whether a unit kind runs under this selection
    pub fn is_enabled(&self, kind: TunerKind) -> bool {
        (self.enable.is_empty() || self.enable.contains(&kind)) && !self.disable.contains(&kind)
    }

    /// Enabled kinds in registry order
    pub fn kinds(&self) -> Vec<TunerKind> {
        TunerKind::ALL
            .iter()
            .copied()
            .filter(|k| self.is_enabled(*k))
            .collect()
    }
}

impl TuneConfig {
    /// Load a configuration file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).with_path(path)?;
        serde_json::from_str(&content)
            .map_err(|e| TuneError::config(format!("invalid config {}: {}", path.display(), e)))
    }

    /// Create config from CLI arguments, layered over the config file
    pub fn from_cli(args: &CliArgs) -> Result<Self> {
        let mut config = match &args.config {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };

        if !args.directories.is_empty() {
            config.directories = args.directories.clone();
        }
        if !args.devices.is_empty() {
            config.devices = args.devices.clone();
        }
        if !args.interfaces.is_empty() {
            config.interfaces = args.interfaces.clone();
        }
        if !args.enable.is_empty() {
            config.enable = args.enable.clone();
        }
        if !args.disable.is_empty() {
            config.disable = args.disable.clone();
        }
        config.tune_boot_params |= args.tune_boot_params;
        config.check_only |= args.check_only || args.command == Some(Commands::Check);
        config.force_retune |= args.force_retune;
        if config.force_retune && matches!(args.command, Some(Commands::Agent { .. })) {
            return Err(TuneError::config(
                "--force-retune cannot be combined with agent mode",
            ));
        }

        if args.provider.is_some() {
            config.provider = args.provider;
        }
        if args.instance_type.is_some() {
            config.instance_type = args.instance_type.clone();
        }
        if args.node_name.is_some() {
            config.node_name = args.node_name.clone();
        }
        if let Some(root) = &args.host_root {
            config.host_root = root.clone();
        }
        if let Some(timeout) = &args.timeout {
            config.timeout_secs = parse_duration(timeout)
                .map_err(|e| TuneError::config(format!("Invalid timeout: {}", e)))?
                .as_secs();
        }
        if let Some(path) = &args.state_file {
            config.state_file = path.clone();
        }
        if let Some(path) = &args.lock_file {
            config.lock_file = path.clone();
        }
        if let Some(path) = &args.profile_path {
            config.profile_path = path.clone();
        }
        if args.profile_table.is_some() {
            config.profile_table = args.profile_table.clone();
        }
        if let Some(dir) = &args.coredump_dir {
            config.coredump_dir = dir.clone();
        }
        if args.ballast_path.is_some() {
            config.ballast_path = args.ballast_path.clone();
        }
        if let Some(size) = &args.ballast_size {
            config.ballast_size = parse_size(size)
                .map_err(|e| TuneError::config(format!("Invalid ballast size: {}", e)))?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Parse the enable/disable lists
    pub fn selection(&self) -> Result<UnitSelection> {
        let parse = |ids: &[String]| -> Result<BTreeSet<TunerKind>> {
            ids.iter()
                .map(|id| {
                    TunerKind::from_id(id.trim())
                        .ok_or_else(|| TuneError::config(format!("unknown unit '{}'", id)))
                })
                .collect()
        };
        Ok(UnitSelection {
            enable: parse(&self.enable)?,
            disable: parse(&self.disable)?,
        })
    }

    /// Reject configurations no run can honour
    pub fn validate(&self) -> Result<()> {
        let selection = self.selection()?;
        if let Some(kind) = selection.enable.intersection(&selection.disable).next() {
            return Err(TuneError::config(format!(
                "unit '{}' is both enabled and disabled",
                kind
            )));
        }
        if self.timeout_secs == 0 {
            return Err(TuneError::config("timeout must be greater than zero"));
        }
        if self.ballast_size == 0 {
            return Err(TuneError::config("ballast size must be greater than zero"));
        }
        if self.devices.iter().any(|d| d.trim().is_empty()) {
            return Err(TuneError::config("empty device name"));
        }
        if self.interfaces.iter().any(|i| i.trim().is_empty()) {
            return Err(TuneError::config("empty interface name"));
        }
        if self.directories.iter().any(|d| d.as_os_str().is_empty()) {
            return Err(TuneError::config("empty directory"));
        }
        if self.node_name.as_deref() == Some("") {
            return Err(TuneError::config("empty node name"));
        }
        Ok(())
    }

    /// Run time budget
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Parse a human-readable duration (`10m`, `1h 30m`, `90s`)
pub fn parse_duration(value: &str) -> std::result::Result<Duration, String> {
    humantime::parse_duration(value.trim()).map_err(|e| e.to_string())
}

/// Parse human-readable size string to bytes
pub fn parse_size(size: &str) -> std::result::Result<u64, String> {
    let size = size.trim().to_uppercase();

    if size.is_empty() {
        return Err("Empty size string".to_string());
    }

    let (num_str, multiplier) = if size.ends_with("TB") || size.ends_with('T') {
        let num = size.trim_end_matches(['T', 'B']);
        (num, 1024u64 * 1024 * 1024 * 1024)
    } else if size.ends_with("GB") || size.ends_with('G') {
        let num = size.trim_end_matches(['G', 'B']);
        (num, 1024u64 * 1024 * 1024)
    } else if size.ends_with("MB") || size.ends_with('M') {
        let num = size.trim_end_matches(['M', 'B']);
        (num, 1024u64 * 1024)
    } else if size.ends_with("KB") || size.ends_with('K') {
        let num = size.trim_end_matches(['K', 'B']);
        (num, 1024u64)
    } else if size.ends_with('B') {
        (size.trim_end_matches('B'), 1u64)
    } else {
        (size.as_str(), 1u64)
    };

    let num: f64 = num_str
        .trim()
        .parse()
        .map_err(|_| format!("Invalid number: {}", num_str))?;
    if num < 0.0 {
        return Err(format!("Negative size: {}", num_str));
    }

    Ok((num * multiplier as f64) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn args(argv: &[&str]) -> CliArgs {
        let mut full = vec!["nodetune"];
        full.extend_from_slice(argv);
        CliArgs::parse_from(full)
    }

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("1024").unwrap(), 1024);
        assert_eq!(parse_size("1K").unwrap(), 1024);
        assert_eq!(parse_size("1KB").unwrap(), 1024);
        assert_eq!(parse_size("1M").unwrap(), 1024 * 1024);
        assert_eq!(parse_size("1G").unwrap(), 1024 * 1024 * 1024);
        assert_eq!(parse_size("1.5G").unwrap(), (1.5 * 1024.0 * 1024.0 * 1024.0) as u64);
        assert!(parse_size("").is_err());
        assert!(parse_size("lots").is_err());
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("10m").unwrap(), Duration::from_secs(600));
        assert_eq!(parse_duration("1h 30m").unwrap(), Duration::from_secs(5400));
        assert!(parse_duration("soon").is_err());
    }

    #[test]
    fn test_defaults() {
        let config = TuneConfig::from_cli(&args(&[])).unwrap();
        assert_eq!(config.timeout(), Duration::from_secs(600));
        assert_eq!(config.ballast_size, 1 << 30);
        assert_eq!(config.state_file, PathBuf::from("/var/lib/nodetune/state.json"));
        assert!(!config.check_only);
        assert_eq!(config.selection().unwrap().kinds().len(), TunerKind::ALL.len());
    }

    #[test]
    fn test_cli_flags() {
        let config = TuneConfig::from_cli(&args(&[
            "-d",
            "/var/lib/data",
            "--disable",
            "ballast_file,fstrim",
            "--provider",
            "gcp",
            "--timeout",
            "90s",
            "--ballast-size",
            "512M",
        ]))
        .unwrap();
        assert_eq!(config.directories, vec![PathBuf::from("/var/lib/data")]);
        assert_eq!(config.provider, Some(CloudProvider::Gcp));
        assert_eq!(config.timeout_secs, 90);
        assert_eq!(config.ballast_size, 512 * 1024 * 1024);

        let selection = config.selection().unwrap();
        assert!(!selection.is_enabled(TunerKind::BallastFile));
        assert!(!selection.is_enabled(TunerKind::Fstrim));
        assert!(selection.is_enabled(TunerKind::Swappiness));
    }

    #[test]
    fn test_check_subcommand_sets_check_only() {
        let config = TuneConfig::from_cli(&args(&["check"])).unwrap();
        assert!(config.check_only);
    }

    #[test]
    fn test_agent_rejects_force_retune() {
        let err = TuneConfig::from_cli(&args(&["--force-retune", "agent"])).unwrap_err();
        assert!(matches!(err, TuneError::Config(_)));

        let config = TuneConfig::from_cli(&args(&["agent", "--interval", "5m"])).unwrap();
        assert!(!config.force_retune);
    }

    #[test]
    fn test_enable_scopes_units() {
        let config = TuneConfig {
            enable: vec!["swappiness".into(), "cpu".into()],
            ..Default::default()
        };
        assert_eq!(
            config.selection().unwrap().kinds(),
            vec![TunerKind::Swappiness, TunerKind::Cpu]
        );
    }

    #[test]
    fn test_validation_rejects_bad_records() {
        let unknown = TuneConfig {
            enable: vec!["turbo".into()],
            ..Default::default()
        };
        assert_eq!(
            unknown.validate().unwrap_err().kind(),
            crate::error::ErrorKind::Config
        );

        let conflicting = TuneConfig {
            enable: vec!["cpu".into()],
            disable: vec!["cpu".into()],
            ..Default::default()
        };
        assert!(conflicting.validate().is_err());

        let zero_timeout = TuneConfig {
            timeout_secs: 0,
            ..Default::default()
        };
        assert!(zero_timeout.validate().is_err());

        let empty_device = TuneConfig {
            devices: vec![" ".into()],
            ..Default::default()
        };
        assert!(empty_device.validate().is_err());
    }

    #[test]
    fn test_config_file_with_cli_override() {
        let file = NamedTempFile::new().unwrap();
        std::fs::write(
            file.path(),
            r#"{"directories": ["/data"], "timeout_secs": 120, "provider": "aws"}"#,
        )
        .unwrap();
        let path = file.path().to_string_lossy().to_string();

        let config = TuneConfig::from_cli(&args(&["--config", &path, "--timeout", "5m"])).unwrap();
        assert_eq!(config.directories, vec![PathBuf::from("/data")]);
        assert_eq!(config.provider, Some(CloudProvider::Aws));
        assert_eq!(config.timeout_secs, 300);
        assert_eq!(config.lock_file, PathBuf::from("/run/nodetune.lock"));
    }
}
