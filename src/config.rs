use serde::{
    Deserialize,
    Serialize,
};
use std::time::Duration;

/// Controller identity compared against the `controller` annotation.
pub const DEFAULT_CONTROLLER: &str = "dns-source";

pub const DEFAULT_CACHE_SYNC_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "kebab-case")]
pub enum SourceKind {
    Service,
    Ingress,
    Pod,
    Node,
    Unstructured,
    Crd,
}

impl std::str::FromStr for SourceKind {
    type Err = eyre::Report;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "service" => Ok(SourceKind::Service),
            "ingress" => Ok(SourceKind::Ingress),
            "pod" => Ok(SourceKind::Pod),
            "node" => Ok(SourceKind::Node),
            "unstructured" => Ok(SourceKind::Unstructured),
            "crd" => Ok(SourceKind::Crd),
            s => Err(eyre::eyre!("Invalid source: {s:?}")),
        }
    }
}

/// What happens when a DNSEndpoint object cannot be converted into its typed form.
#[derive(Debug, Default, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ConversionPolicy {
    /// Warn and continue with the next object.
    #[default]
    Skip,
    /// Fail the whole listing for the kind.
    Abort,
}

impl std::str::FromStr for ConversionPolicy {
    type Err = eyre::Report;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "skip" => Ok(ConversionPolicy::Skip),
            "abort" => Ok(ConversionPolicy::Abort),
            s => Err(eyre::eyre!("Invalid conversion policy: {s:?}")),
        }
    }
}

/// Which member of a merge group contributes TTL, provider specific properties and set identifier.
#[derive(Debug, Default, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum MergePrecedence {
    /// Members are ordered by their provenance label first, so the result does not depend on listing order.
    #[default]
    ByProvenance,
    /// The first member in listing order wins.
    FirstSeen,
}

impl std::str::FromStr for MergePrecedence {
    type Err = eyre::Report;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "by-provenance" => Ok(MergePrecedence::ByProvenance),
            "first-seen" => Ok(MergePrecedence::FirstSeen),
            s => Err(eyre::eyre!("Invalid merge precedence: {s:?}")),
        }
    }
}

/// Everything needed to construct the configured sources.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct SourceConfig {
    pub sources: Vec<SourceKind>,
    /// Restricts listing to one namespace. `None` watches all namespaces.
    pub namespace: Option<String>,
    pub label_selector: String,
    pub annotation_filter: String,

    pub fqdn_template: String,
    pub target_template: String,
    /// Comma separated `host:target` pairs.
    pub host_target_template: String,
    /// Union templated endpoints with annotation derived ones instead of using them as a fallback.
    pub combine_fqdn_annotation: bool,
    pub ignore_hostname_annotation: bool,
    pub controller: String,

    /// Publish the cluster IP of ClusterIP services.
    pub publish_internal: bool,
    /// Publish the host IP instead of the pod IP for headless services.
    pub publish_host_ip: bool,
    pub always_publish_not_ready: bool,
    pub headless_pod_records: bool,
    /// Service types to consider. Empty means all types.
    pub service_type_filter: Vec<String>,

    /// `resource.version.group` identifiers listed by the unstructured source.
    pub unstructured_resources: Vec<String>,
    pub hostname_paths: Vec<String>,
    pub target_paths: Vec<String>,

    pub conversion_policy: ConversionPolicy,
    pub merge_precedence: MergePrecedence,
    #[serde(with = "humantime_serde_compat")]
    pub cache_sync_timeout: Duration,
}

impl Default for SourceConfig {
    fn default() -> Self {
        SourceConfig {
            sources: vec![SourceKind::Service],
            namespace: None,
            label_selector: String::new(),
            annotation_filter: String::new(),
            fqdn_template: String::new(),
            target_template: String::new(),
            host_target_template: String::new(),
            combine_fqdn_annotation: false,
            ignore_hostname_annotation: false,
            controller: DEFAULT_CONTROLLER.to_string(),
            publish_internal: false,
            publish_host_ip: false,
            always_publish_not_ready: false,
            headless_pod_records: true,
            service_type_filter: Vec::new(),
            unstructured_resources: Vec::new(),
            hostname_paths: Vec::new(),
            target_paths: Vec::new(),
            conversion_policy: ConversionPolicy::default(),
            merge_precedence: MergePrecedence::default(),
            cache_sync_timeout: DEFAULT_CACHE_SYNC_TIMEOUT,
        }
    }
}

/// Durations are written the way the CLI accepts them, e.g. `90s` or `2m`.
mod humantime_serde_compat {
    use serde::{
        de::Error as _,
        Deserialize,
        Deserializer,
        Serializer,
    };
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&humantime::format_duration(*duration))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let value = String::deserialize(deserializer)?;
        humantime::parse_duration(&value).map_err(D::Error::custom)
    }
}
