use schemars::JsonSchema;
use serde::{
    Deserialize,
    Serialize,
};
use std::{
    collections::BTreeMap,
    fmt,
    net::{
        Ipv4Addr,
        Ipv6Addr,
    },
};

/// Label carrying the provenance of an endpoint: `<kind>/<namespace>/<name>`.
pub const RESOURCE_LABEL_KEY: &str = "resource";

/// Largest TTL (in seconds) that is accepted. Larger values are treated as unconfigured.
pub const MAX_TTL_SECONDS: i64 = i32::MAX as i64;

const MAX_LABEL_LENGTH: usize = 63;
const MAX_NAME_LENGTH: usize = 253;

/// The record types this crate synthesizes.
#[allow(clippy::upper_case_acronyms)]
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, JsonSchema)]
pub enum RecordType {
    #[serde(rename = "A")]
    A,
    #[serde(rename = "AAAA")]
    AAAA,
    #[serde(rename = "CNAME")]
    CNAME,
    #[serde(rename = "SRV")]
    SRV,
}

impl RecordType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordType::A => "A",
            RecordType::AAAA => "AAAA",
            RecordType::CNAME => "CNAME",
            RecordType::SRV => "SRV",
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RecordType {
    type Err = eyre::Report;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "A" => Ok(RecordType::A),
            "AAAA" => Ok(RecordType::AAAA),
            "CNAME" => Ok(RecordType::CNAME),
            "SRV" => Ok(RecordType::SRV),
            s => Err(eyre::eyre!("Invalid RecordType: {s:?}")),
        }
    }
}

/// Classify a target by its syntactic shape. SRV is never returned, SRV records are built from port data.
pub fn suitable_type(target: &str) -> RecordType {
    let target = target.trim_end_matches('.');
    if target.parse::<Ipv4Addr>().is_ok() {
        RecordType::A
    } else if target.parse::<Ipv6Addr>().is_ok() {
        RecordType::AAAA
    } else {
        RecordType::CNAME
    }
}

/// Record TTL in seconds. Unconfigured is distinct from a configured `0`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct Ttl(Option<i64>);

impl Ttl {
    pub const UNCONFIGURED: Ttl = Ttl(None);

    pub fn seconds(seconds: i64) -> Self {
        Ttl(Some(seconds))
    }

    pub fn is_configured(&self) -> bool {
        self.0.is_some()
    }

    pub fn get(&self) -> Option<i64> {
        self.0
    }
}

impl fmt::Display for Ttl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(ttl) => write!(f, "{ttl}"),
            None => f.write_str("-"),
        }
    }
}

/// Opaque key/value passed through to DNS providers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct ProviderSpecificProperty {
    pub name: String,
    pub value: String,
}

pub type ProviderSpecific = Vec<ProviderSpecificProperty>;

/// Grouping key of endpoints: lower-cased, dot-stripped name plus record type.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EndpointKey {
    pub dns_name: String,
    pub record_type: RecordType,
}

/// A DNS record intent derived from a cluster object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Endpoint {
    pub dns_name: String,
    pub record_type: RecordType,
    pub targets: Vec<String>,
    #[serde(rename = "recordTTL", default, skip_serializing_if = "Option::is_none")]
    ttl: Option<i64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub provider_specific: ProviderSpecific,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub set_identifier: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl Endpoint {
    /// Creates an endpoint. Returns `None` for malformed names or when no target remains after cleanup, an endpoint
    /// without targets is never created.
    pub fn new<I, T>(dns_name: &str, record_type: RecordType, targets: I) -> Option<Self>
    where
        I: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        let dns_name = normalize_dns_name(dns_name)?;

        let mut targets = targets
            .into_iter()
            .map(|target| target.as_ref().trim().trim_end_matches('.').to_string())
            .filter(|target| !target.is_empty())
            .collect::<Vec<_>>();
        targets.sort();
        targets.dedup();

        if targets.is_empty() {
            return None;
        }

        Some(Endpoint {
            dns_name,
            record_type,
            targets,
            ttl: None,
            provider_specific: Vec::new(),
            set_identifier: String::new(),
            labels: BTreeMap::new(),
        })
    }

    pub fn ttl(&self) -> Ttl {
        Ttl(self.ttl)
    }

    pub fn with_ttl(mut self, ttl: Ttl) -> Self {
        self.ttl = ttl.0;
        self
    }

    pub fn with_set_identifier(mut self, set_identifier: impl Into<String>) -> Self {
        self.set_identifier = set_identifier.into();
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Sets a provider specific property, replacing an existing property of the same name.
    pub fn with_provider_specific(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        let value = value.into();
        match self.provider_specific.iter_mut().find(|prop| prop.name == name) {
            Some(prop) => prop.value = value,
            None => self.provider_specific.push(ProviderSpecificProperty { name, value }),
        }
        self
    }

    pub fn provider_specific_property(&self, name: &str) -> Option<&str> {
        self.provider_specific
            .iter()
            .find(|prop| prop.name == name)
            .map(|prop| prop.value.as_str())
    }

    /// The provenance label, if any.
    pub fn resource(&self) -> Option<&str> {
        self.labels.get(RESOURCE_LABEL_KEY).map(String::as_str)
    }

    pub fn key(&self) -> EndpointKey {
        EndpointKey {
            dns_name: self.dns_name.to_ascii_lowercase(),
            record_type: self.record_type,
        }
    }

    /// Checks record type specific target syntax: SRV targets have a fixed shape, A, AAAA and CNAME targets must
    /// all classify as the record type.
    pub fn is_well_formed(&self) -> bool {
        match self.record_type {
            RecordType::SRV => self.targets.iter().all(|target| is_valid_srv_target(target)),
            record_type => self.targets.iter().all(|target| suitable_type(target) == record_type),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} IN {} {} [{}]",
            self.dns_name,
            self.ttl(),
            self.record_type,
            self.set_identifier,
            self.targets.join(";")
        )
    }
}

/// Strips surrounding whitespace and a single trailing dot and checks basic well-formedness.
pub fn normalize_dns_name(name: &str) -> Option<String> {
    let name = name.trim();
    let name = name.strip_suffix('.').unwrap_or(name);

    if name.is_empty() {
        return None;
    }
    if name.len() > MAX_NAME_LENGTH {
        warn!("dns name {name:?} is longer than {MAX_NAME_LENGTH} characters, cannot create endpoint");
        return None;
    }
    for label in name.split('.') {
        if label.is_empty() {
            warn!("dns name {name:?} contains an empty label, cannot create endpoint");
            return None;
        }
        if label.len() > MAX_LABEL_LENGTH {
            warn!("label {label:?} in {name:?} is longer than {MAX_LABEL_LENGTH} characters, cannot create endpoint");
            return None;
        }
    }

    Some(name.to_string())
}

/// SRV targets are `priority weight port host`, see RFC 2782.
pub fn is_valid_srv_target(target: &str) -> bool {
    let parts = target.split_whitespace().collect::<Vec<_>>();
    let [priority, weight, port, host] = parts[..] else {
        debug!("invalid SRV target {target:?}: expected 'priority weight port host'");
        return false;
    };
    if [priority, weight, port].iter().any(|part| part.parse::<u16>().is_err()) {
        debug!("invalid SRV target {target:?}: priority, weight and port must be 16 bit integers");
        return false;
    }
    !host.is_empty()
}
