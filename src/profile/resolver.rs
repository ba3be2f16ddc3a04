use super::{IoProfile, ProfileSource, ProfileTable};
use crate::error::Result;
use crate::system::{CloudProvider, EnvironmentInfo, Host};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Outcome of a profile lookup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedProfile {
    pub provider: CloudProvider,
    pub instance_type: Option<String>,
    pub profile: IoProfile,
    pub source: ProfileSource,
}

/// Resolves profiles against a table
pub struct ProfileResolver {
    table: ProfileTable,
}

impl ProfileResolver {
    pub fn new(table: ProfileTable) -> Self {
        Self { table }
    }

    /// Look up the profile for a detected environment
    ///
    /// An unknown instance type or a table miss yields
    /// [`IoProfile::CONSERVATIVE`].
    pub fn resolve(&self, env: &EnvironmentInfo) -> ResolvedProfile {
        let hit = env
            .instance_type
            .as_deref()
            .and_then(|it| self.table.lookup(env.provider, it));

        let (profile, source) = match hit {
            Some(profile) => (profile, ProfileSource::Table),
            None => {
                tracing::info!(
                    "No I/O profile for {}:{}, using conservative defaults",
                    env.provider,
                    env.instance_type.as_deref().unwrap_or("unknown")
                );
                (IoProfile::CONSERVATIVE, ProfileSource::Conservative)
            }
        };

        ResolvedProfile {
            provider: env.provider,
            instance_type: env.instance_type.clone(),
            profile,
            source,
        }
    }
}

/// One mount point entry of the artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskProfile {
    pub mountpoint: String,
    #[serde(flatten)]
    pub profile: IoProfile,
}

/// Profile document read by the storage engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileArtifact {
    pub disks: Vec<DiskProfile>,
}

impl ProfileArtifact {
    /// Artifact assigning `profile` to `mountpoint`
    pub fn new(mountpoint: impl Into<String>, profile: IoProfile) -> Self {
        Self {
            disks: vec![DiskProfile {
                mountpoint: mountpoint.into(),
                profile,
            }],
        }
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Write the artifact atomically to a host path
    pub fn write(&self, host: &Host, path: &Path) -> Result<()> {
        let yaml = self.to_yaml()?;
        host.write_file_atomic(path, &yaml)?;
        tracing::info!("Wrote I/O profile to {}", host.path(path).display());
        Ok(())
    }

    /// Read an artifact from a host path
    pub fn read(host: &Host, path: &Path) -> Result<Self> {
        Self::from_yaml(&host.read(path)?)
    }
}

/// Mount point recorded in the artifact: the first target directory, else `/`
pub fn mountpoint_for(directories: &[PathBuf]) -> String {
    directories
        .first()
        .map(|d| d.display().to_string())
        .unwrap_or_else(|| "/".to_string())
}
