//! Instance I/O profile lookup table

use super::IoProfile;
use crate::error::{IoResultExt, Result, TuneError};
use crate::system::CloudProvider;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Built-in profiles for common storage-optimised instance types
const BUILTIN: &[(&str, IoProfile)] = &[
    ("aws:i3.large", IoProfile::new(111_000, 653_925_080, 36_800, 215_066_473)),
    ("aws:i3.xlarge", IoProfile::new(200_800, 1_185_106_376, 53_180, 423_621_267)),
    ("aws:i3.2xlarge", IoProfile::new(411_200, 2_015_342_735, 181_500, 808_775_652)),
    ("aws:i3.4xlarge", IoProfile::new(822_600, 4_030_685_470, 363_000, 1_617_551_304)),
    ("aws:i3.8xlarge", IoProfile::new(1_645_200, 8_061_370_940, 726_000, 3_235_102_608)),
    ("aws:i3en.large", IoProfile::new(43_315, 330_301_440, 33_177, 165_675_008)),
    ("aws:i3en.xlarge", IoProfile::new(84_480, 666_894_336, 66_969, 333_447_168)),
    ("aws:i3en.2xlarge", IoProfile::new(168_959, 1_332_129_792, 133_905, 667_287_552)),
    ("aws:i3en.3xlarge", IoProfile::new(257_024, 2_259_792_896, 174_938, 1_003_835_136)),
    ("aws:i4i.large", IoProfile::new(54_987, 378_494_048, 30_459, 279_713_216)),
    ("aws:i4i.xlarge", IoProfile::new(109_954, 763_580_096, 61_008, 561_926_784)),
    ("aws:i4i.2xlarge", IoProfile::new(219_457, 1_546_691_456, 121_875, 1_130_129_408)),
    ("aws:i4i.4xlarge", IoProfile::new(442_316, 3_087_721_728, 246_074, 2_250_639_360)),
    ("gcp:n2-highmem-8", IoProfile::new(340_000, 1_398_101_333, 180_000, 764_587_463)),
    ("gcp:n2-highmem-16", IoProfile::new(680_000, 2_796_202_666, 360_000, 1_529_174_926)),
    ("gcp:n2-highmem-32", IoProfile::new(1_360_000, 5_592_405_333, 720_000, 3_058_349_852)),
    ("gcp:z3-highmem-88", IoProfile::new(2_750_000, 14_318_000_000, 1_500_000, 7_716_000_000)),
    ("azure:Standard_L8s_v3", IoProfile::new(400_000, 2_000_000_000, 200_000, 1_000_000_000)),
    ("azure:Standard_L16s_v3", IoProfile::new(800_000, 4_000_000_000, 400_000, 2_000_000_000)),
    ("azure:Standard_L32s_v3", IoProfile::new(1_500_000, 8_000_000_000, 800_000, 4_000_000_000)),
];

/// Exact-match table keyed by `"<provider>:<instance_type>"`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProfileTable {
    entries: BTreeMap<String, IoProfile>,
}

impl Default for ProfileTable {
    fn default() -> Self {
        Self::builtin()
    }
}

impl ProfileTable {
    /// Table shipped with the binary
    pub fn builtin() -> Self {
        Self {
            entries: BUILTIN
                .iter()
                .map(|(key, profile)| (key.to_string(), *profile))
                .collect(),
        }
    }

    /// Table with no entries
    pub fn empty() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// Load a replacement table from a JSON document
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).with_path(path)?;
        let table: Self = serde_json::from_str(&content).map_err(|e| {
            TuneError::config(format!("invalid profile table {}: {}", path.display(), e))
        })?;
        tracing::debug!("Loaded {} profiles from {}", table.len(), path.display());
        Ok(table)
    }

    /// Add or replace an entry
    pub fn insert(&mut self, provider: CloudProvider, instance_type: &str, profile: IoProfile) {
        self.entries.insert(key(provider, instance_type), profile);
    }

    /// Exact lookup; no prefix or family matching
    pub fn lookup(&self, provider: CloudProvider, instance_type: &str) -> Option<IoProfile> {
        self.entries.get(&key(provider, instance_type)).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Table key for a provider and instance type
pub fn key(provider: CloudProvider, instance_type: &str) -> String {
    format!("{}:{}", provider.as_str(), instance_type)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_exact_match_only() {
        let table = ProfileTable::builtin();
        assert!(table.lookup(CloudProvider::Aws, "i3.xlarge").is_some());
        assert!(table.lookup(CloudProvider::Aws, "i3").is_none());
        assert!(table.lookup(CloudProvider::Aws, "i3.xlarge2").is_none());
        assert!(table.lookup(CloudProvider::Gcp, "i3.xlarge").is_none());
    }

    #[test]
    fn test_load_external_table() {
        let file = NamedTempFile::new().unwrap();
        std::fs::write(
            file.path(),
            r#"{"aws:m5d.large": {"read_iops": 1, "read_bandwidth": 2, "write_iops": 3, "write_bandwidth": 4}}"#,
        )
        .unwrap();

        let table = ProfileTable::load(file.path()).unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(
            table.lookup(CloudProvider::Aws, "m5d.large"),
            Some(IoProfile::new(1, 2, 3, 4))
        );
        assert!(table.lookup(CloudProvider::Aws, "i3.xlarge").is_none());
    }

    #[test]
    fn test_invalid_table_is_config_error() {
        let file = NamedTempFile::new().unwrap();
        std::fs::write(file.path(), "not json").unwrap();
        let err = ProfileTable::load(file.path()).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Config);
    }
}
