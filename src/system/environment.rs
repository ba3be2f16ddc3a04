//! Environment detection
//!
//! Detects the cloud provider, instance type and OS distribution. Cloud
//! metadata endpoints are probed in order with a short timeout; the first
//! endpoint that answers wins. Explicit overrides always short-circuit
//! probing, and nothing here is ever fatal: an undetermined value is
//! reported as unknown and downstream components fall back.

use super::Host;
use crate::error::{Result, TuneError};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default timeout for a single metadata probe
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(1);

const AWS_TOKEN_URL: &str = "http://169.254.169.254/latest/api/token";
const AWS_INSTANCE_TYPE_URL: &str = "http://169.254.169.254/latest/meta-data/instance-type";
const GCP_MACHINE_TYPE_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/machine-type";
const AZURE_VM_SIZE_URL: &str =
    "http://169.254.169.254/metadata/instance/compute/vmSize?api-version=2021-02-01&format=text";

/// Cloud provider
#[derive(
    ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum CloudProvider {
    /// Amazon Web Services
    Aws,
    /// Google Cloud Platform
    Gcp,
    /// Microsoft Azure
    Azure,
    /// Bare metal or an unrecognised provider
    #[default]
    Unknown,
}

impl CloudProvider {
    /// Key prefix used by the I/O profile table
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Aws => "aws",
            Self::Gcp => "gcp",
            Self::Azure => "azure",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for CloudProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the provider value came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectionSource {
    /// Supplied by configuration
    Override,
    /// Answered by a metadata endpoint
    Metadata,
    /// No probe answered
    Undetected,
}

/// Operating system distribution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Distro {
    /// `ID` from os-release
    pub id: String,
    /// `VERSION_ID` from os-release
    pub version: Option<String>,
    /// Family the distribution belongs to
    pub family: DistroFamily,
}

/// Distribution family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistroFamily {
    Debian,
    Rhel,
    Suse,
    Arch,
    Other,
    Unknown,
}

impl Distro {
    /// Explicit unknown distribution
    pub fn unknown() -> Self {
        Self {
            id: "unknown".to_string(),
            version: None,
            family: DistroFamily::Unknown,
        }
    }

    /// Whether detection failed
    pub fn is_unknown(&self) -> bool {
        self.family == DistroFamily::Unknown
    }
}

/// Detected environment of this node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentInfo {
    /// Cloud provider
    pub provider: CloudProvider,
    /// Provider-specific instance type, if known
    pub instance_type: Option<String>,
    /// OS distribution
    pub distro: Distro,
    /// How the provider was determined
    pub source: DetectionSource,
}

impl EnvironmentInfo {
    /// Environment for a host with nothing detected
    pub fn unknown() -> Self {
        Self {
            provider: CloudProvider::Unknown,
            instance_type: None,
            distro: Distro::unknown(),
            source: DetectionSource::Undetected,
        }
    }
}

/// Minimal HTTP surface used by the metadata probes
pub trait MetadataClient: Send + Sync {
    /// GET `url`; `None` on any transport error, timeout or non-2xx status
    fn get(&self, url: &str, headers: &[(&str, &str)]) -> Option<String>;

    /// PUT `url` with an empty body
    fn put(&self, url: &str, headers: &[(&str, &str)]) -> Option<String>;
}

/// Metadata client backed by a blocking reqwest client
pub struct HttpMetadataClient {
    client: reqwest::blocking::Client,
}

impl HttpMetadataClient {
    /// Create a client whose requests are bounded by `timeout`
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .no_proxy()
            .build()
            .map_err(|e| TuneError::DetectionFailure(format!("HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    fn send(&self, request: reqwest::blocking::RequestBuilder) -> Option<String> {
        let response = request.send().ok()?;
        if !response.status().is_success() {
            return None;
        }
        response.text().ok()
    }
}

impl MetadataClient for HttpMetadataClient {
    fn get(&self, url: &str, headers: &[(&str, &str)]) -> Option<String> {
        let mut request = self.client.get(url);
        for (name, value) in headers {
            request = request.header(*name, *value);
        }
        self.send(request)
    }

    fn put(&self, url: &str, headers: &[(&str, &str)]) -> Option<String> {
        let mut request = self.client.put(url);
        for (name, value) in headers {
            request = request.header(*name, *value);
        }
        self.send(request)
    }
}

/// Environment prober
pub struct EnvironmentProber<'a> {
    host: &'a Host,
    client: &'a dyn MetadataClient,
}

impl<'a> EnvironmentProber<'a> {
    /// Create a prober
    pub fn new(host: &'a Host, client: &'a dyn MetadataClient) -> Self {
        Self { host, client }
    }

    /// Detect provider, instance type and distribution
    pub fn probe(
        &self,
        provider_override: Option<CloudProvider>,
        instance_override: Option<&str>,
    ) -> EnvironmentInfo {
        let distro = detect_distro(self.host);

        let (provider, instance_type, source) = match provider_override {
            Some(provider) => {
                let instance = match instance_override {
                    Some(it) => Some(it.to_string()),
                    None => self.instance_type(provider),
                };
                (provider, instance, DetectionSource::Override)
            }
            None => match self.detect_provider() {
                Some((provider, instance)) => {
                    let instance = instance_override.map(str::to_string).or(Some(instance));
                    (provider, instance, DetectionSource::Metadata)
                }
                None => (
                    CloudProvider::Unknown,
                    instance_override.map(str::to_string),
                    DetectionSource::Undetected,
                ),
            },
        };

        tracing::info!(
            "Environment: provider={} instance_type={:?} distro={} ({:?})",
            provider,
            instance_type,
            distro.id,
            source
        );

        EnvironmentInfo {
            provider,
            instance_type,
            distro,
            source,
        }
    }

    /// Probe providers in order; the first that answers wins
    fn detect_provider(&self) -> Option<(CloudProvider, String)> {
        for provider in probe_order(self.dmi_hint()) {
            match self.instance_type(provider) {
                Some(instance) => return Some((provider, instance)),
                None => tracing::debug!("{} metadata probe did not answer", provider),
            }
        }
        None
    }

    /// Provider-specific instance type lookup
    fn instance_type(&self, provider: CloudProvider) -> Option<String> {
        let raw = match provider {
            CloudProvider::Aws => self.aws_instance_type(),
            CloudProvider::Gcp => self
                .client
                .get(GCP_MACHINE_TYPE_URL, &[("Metadata-Flavor", "Google")])
                .map(|r| parse_gcp_machine_type(&r).to_string()),
            CloudProvider::Azure => self.client.get(AZURE_VM_SIZE_URL, &[("Metadata", "true")]),
            CloudProvider::Unknown => None,
        }?;
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    }

    /// IMDSv2 with an IMDSv1 fallback
    fn aws_instance_type(&self) -> Option<String> {
        match self.client.put(
            AWS_TOKEN_URL,
            &[("X-aws-ec2-metadata-token-ttl-seconds", "21600")],
        ) {
            Some(token) => self.client.get(
                AWS_INSTANCE_TYPE_URL,
                &[("X-aws-ec2-metadata-token", token.trim())],
            ),
            None => self.client.get(AWS_INSTANCE_TYPE_URL, &[]),
        }
    }

    /// Provider suggested by DMI strings, used only to order probes
    fn dmi_hint(&self) -> Option<CloudProvider> {
        for field in ["sys_vendor", "product_name", "bios_vendor"] {
            let value = match self.host.read_opt(format!("/sys/class/dmi/id/{}", field)) {
                Some(v) => v.to_lowercase(),
                None => continue,
            };
            let hint = match value.as_str() {
                s if s.contains("amazon") || s.contains("ec2") => Some(CloudProvider::Aws),
                s if s.contains("google") => Some(CloudProvider::Gcp),
                s if s.contains("microsoft") => Some(CloudProvider::Azure),
                _ => None,
            };
            if hint.is_some() {
                return hint;
            }
        }
        None
    }
}

/// Ordered list of providers to probe, hinted provider first
pub fn probe_order(hint: Option<CloudProvider>) -> Vec<CloudProvider> {
    let mut order = vec![CloudProvider::Aws, CloudProvider::Gcp, CloudProvider::Azure];
    if let Some(hint) = hint {
        if let Some(pos) = order.iter().position(|p| *p == hint) {
            let hinted = order.remove(pos);
            order.insert(0, hinted);
        }
    }
    order
}

/// `projects/123/machineTypes/n2-standard-8` -> `n2-standard-8`
pub fn parse_gcp_machine_type(response: &str) -> &str {
    response.trim().rsplit('/').next().unwrap_or("")
}

/// Detect the distribution from `/etc/os-release`
pub fn detect_distro(host: &Host) -> Distro {
    host.read_opt("/etc/os-release")
        .or_else(|| host.read_opt("/usr/lib/os-release"))
        .map(|content| parse_os_release(&content))
        .unwrap_or_else(Distro::unknown)
}

/// Parse os-release content
pub fn parse_os_release(content: &str) -> Distro {
    let mut id = None;
    let mut version = None;
    let mut id_like = String::new();

    for line in content.lines() {
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let value = value.trim().trim_matches('"').trim_matches('\'').to_string();
        match key.trim() {
            "ID" => id = Some(value.to_lowercase()),
            "VERSION_ID" => version = Some(value),
            "ID_LIKE" => id_like = value.to_lowercase(),
            _ => {}
        }
    }

    let Some(id) = id.filter(|i| !i.is_empty()) else {
        return Distro::unknown();
    };

    let family_of = |name: &str| match name {
        "debian" | "ubuntu" => Some(DistroFamily::Debian),
        "rhel" | "centos" | "fedora" | "rocky" | "almalinux" | "amzn" | "ol" => {
            Some(DistroFamily::Rhel)
        }
        "sles" | "suse" | "opensuse" | "opensuse-leap" => Some(DistroFamily::Suse),
        "arch" => Some(DistroFamily::Arch),
        _ => None,
    };

    let family = family_of(&id)
        .or_else(|| id_like.split_whitespace().find_map(family_of))
        .unwrap_or(DistroFamily::Other);

    Distro {
        id,
        version,
        family,
    }
}

/// Node identity: explicit name, `NODE_NAME`, then the hostname
pub fn node_name(explicit: Option<&str>) -> String {
    if let Some(name) = explicit.filter(|n| !n.is_empty()) {
        return name.to_string();
    }
    if let Ok(name) = std::env::var("NODE_NAME") {
        if !name.is_empty() {
            return name;
        }
    }
    hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "localhost".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Answers only for configured URLs and records every request
    #[derive(Default)]
    struct StubClient {
        answers: HashMap<String, String>,
        requests: Mutex<Vec<String>>,
    }

    impl StubClient {
        fn answer(mut self, url: &str, body: &str) -> Self {
            self.answers.insert(url.to_string(), body.to_string());
            self
        }
    }

    impl MetadataClient for StubClient {
        fn get(&self, url: &str, _headers: &[(&str, &str)]) -> Option<String> {
            self.requests.lock().unwrap().push(format!("GET {}", url));
            self.answers.get(url).cloned()
        }

        fn put(&self, url: &str, _headers: &[(&str, &str)]) -> Option<String> {
            self.requests.lock().unwrap().push(format!("PUT {}", url));
            self.answers.get(url).cloned()
        }
    }

    #[test]
    fn test_aws_detected_via_imdsv2() {
        let dir = TempDir::new().unwrap();
        let host = Host::new(dir.path());
        let client = StubClient::default()
            .answer(AWS_TOKEN_URL, "token")
            .answer(AWS_INSTANCE_TYPE_URL, "i3en.large\n");

        let env = EnvironmentProber::new(&host, &client).probe(None, None);
        assert_eq!(env.provider, CloudProvider::Aws);
        assert_eq!(env.instance_type.as_deref(), Some("i3en.large"));
        assert_eq!(env.source, DetectionSource::Metadata);
        assert!(env.distro.is_unknown());
    }

    #[test]
    fn test_gcp_machine_type_parsed() {
        let dir = TempDir::new().unwrap();
        let host = Host::new(dir.path());
        let client = StubClient::default()
            .answer(GCP_MACHINE_TYPE_URL, "projects/42/machineTypes/n2-highmem-16");

        let env = EnvironmentProber::new(&host, &client).probe(None, None);
        assert_eq!(env.provider, CloudProvider::Gcp);
        assert_eq!(env.instance_type.as_deref(), Some("n2-highmem-16"));
    }

    #[test]
    fn test_override_short_circuits_probing() {
        let dir = TempDir::new().unwrap();
        let host = Host::new(dir.path());
        let client = StubClient::default();

        let env = EnvironmentProber::new(&host, &client)
            .probe(Some(CloudProvider::Azure), Some("Standard_L8s_v3"));
        assert_eq!(env.provider, CloudProvider::Azure);
        assert_eq!(env.instance_type.as_deref(), Some("Standard_L8s_v3"));
        assert_eq!(env.source, DetectionSource::Override);
        assert!(client.requests.lock().unwrap().is_empty());
    }

    #[test]
    fn test_no_answer_is_unknown_not_error() {
        let dir = TempDir::new().unwrap();
        let host = Host::new(dir.path());
        let client = StubClient::default();

        let env = EnvironmentProber::new(&host, &client).probe(None, None);
        assert_eq!(env.provider, CloudProvider::Unknown);
        assert_eq!(env.instance_type, None);
        assert_eq!(env.source, DetectionSource::Undetected);
    }

    #[test]
    fn test_dmi_hint_orders_probes() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("sys/class/dmi/id")).unwrap();
        std::fs::write(dir.path().join("sys/class/dmi/id/sys_vendor"), "Google\n").unwrap();
        let host = Host::new(dir.path());
        let client = StubClient::default()
            .answer(GCP_MACHINE_TYPE_URL, "projects/1/machineTypes/n2-standard-4");

        EnvironmentProber::new(&host, &client).probe(None, None);
        let requests = client.requests.lock().unwrap();
        assert_eq!(requests[0], format!("GET {}", GCP_MACHINE_TYPE_URL));
    }

    #[test]
    fn test_probe_order() {
        assert_eq!(
            probe_order(Some(CloudProvider::Azure)),
            vec![CloudProvider::Azure, CloudProvider::Aws, CloudProvider::Gcp]
        );
        assert_eq!(probe_order(None)[0], CloudProvider::Aws);
    }

    #[test]
    fn test_os_release_parsing() {
        let ubuntu = parse_os_release("NAME=\"Ubuntu\"\nID=ubuntu\nVERSION_ID=\"22.04\"\nID_LIKE=debian\n");
        assert_eq!(ubuntu.id, "ubuntu");
        assert_eq!(ubuntu.version.as_deref(), Some("22.04"));
        assert_eq!(ubuntu.family, DistroFamily::Debian);

        let rocky = parse_os_release("ID=\"rocky\"\nID_LIKE=\"rhel centos fedora\"\n");
        assert_eq!(rocky.family, DistroFamily::Rhel);

        let custom = parse_os_release("ID=flatcar\n");
        assert_eq!(custom.family, DistroFamily::Other);

        assert!(parse_os_release("NAME=nothing\n").is_unknown());
    }

    #[test]
    fn test_node_name_explicit_wins() {
        assert_eq!(node_name(Some("worker-3")), "worker-3");
        assert!(!node_name(None).is_empty());
    }
}
