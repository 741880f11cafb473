//! Turns hostnames and targets into typed endpoints.

use crate::{
    endpoint::{
        suitable_type,
        Endpoint,
        ProviderSpecific,
        RecordType,
        Ttl,
        RESOURCE_LABEL_KEY,
    },
    error::ExtractError,
};

/// Attributes every endpoint of one object carries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordMeta {
    pub ttl: Ttl,
    pub provider_specific: ProviderSpecific,
    pub set_identifier: String,
    /// Provenance label value, `<kind>/<namespace>/<name>`.
    pub resource: String,
}

impl RecordMeta {
    pub fn apply(&self, endpoint: Endpoint) -> Endpoint {
        let mut endpoint = endpoint
            .with_ttl(self.ttl)
            .with_set_identifier(self.set_identifier.clone())
            .with_label(RESOURCE_LABEL_KEY, self.resource.clone());
        for prop in &self.provider_specific {
            endpoint = endpoint.with_provider_specific(prop.name.clone(), prop.value.clone());
        }
        endpoint
    }
}

/// One endpoint per target class (A, AAAA, CNAME) that has at least one target.
pub fn endpoints_for_hostname<T: AsRef<str>>(hostname: &str, targets: &[T], meta: &RecordMeta) -> Vec<Endpoint> {
    let mut a = Vec::new();
    let mut aaaa = Vec::new();
    let mut cname = Vec::new();

    for target in targets {
        let target = target.as_ref().trim();
        if target.is_empty() {
            continue;
        }
        match suitable_type(target) {
            RecordType::A => a.push(target),
            RecordType::AAAA => aaaa.push(target),
            _ => cname.push(target),
        }
    }

    [(RecordType::A, a), (RecordType::AAAA, aaaa), (RecordType::CNAME, cname)]
        .into_iter()
        .filter(|(_, targets)| !targets.is_empty())
        .filter_map(|(record_type, targets)| Endpoint::new(hostname, record_type, targets))
        .map(|endpoint| meta.apply(endpoint))
        .collect()
}

/// Cross product of hostnames and targets. Hostnames are deduplicated and sorted first.
pub fn endpoints_for_hosts_and_targets<H, T>(hostnames: &[H], targets: &[T], meta: &RecordMeta) -> Vec<Endpoint>
where
    H: AsRef<str>,
    T: AsRef<str>,
{
    if targets.is_empty() {
        return Vec::new();
    }

    let mut hostnames = hostnames
        .iter()
        .map(|h| h.as_ref().trim().trim_end_matches('.'))
        .filter(|h| !h.is_empty())
        .collect::<Vec<_>>();
    hostnames.sort_unstable();
    hostnames.dedup();

    hostnames
        .into_iter()
        .flat_map(|hostname| endpoints_for_hostname(hostname, targets, meta))
        .collect()
}

/// Splits `host:target` entries at the first colon. Entries missing either side are dropped.
pub fn parse_host_target_pairs<S: AsRef<str>>(values: &[S]) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    for value in values {
        let value = value.as_ref();
        match value.split_once(':') {
            Some((host, target)) if !host.trim().is_empty() && !target.trim().is_empty() => {
                pairs.push((host.trim().to_string(), target.trim().to_string()));
            }
            _ => debug!(?value, "skipping incomplete host:target pair"),
        }
    }
    pairs
}

/// Endpoints from `host:target` pairs. Targets of the same host are grouped before classification.
pub fn endpoints_for_host_target_pairs(pairs: &[(String, String)], meta: &RecordMeta) -> Vec<Endpoint> {
    let mut by_host: Vec<(&str, Vec<&str>)> = Vec::new();
    for (host, target) in pairs {
        let host = host.trim_end_matches('.');
        match by_host.iter_mut().find(|(h, _)| *h == host) {
            Some((_, targets)) => targets.push(target.as_str()),
            None => by_host.push((host, vec![target.as_str()])),
        }
    }
    by_host.sort_by(|a, b| a.0.cmp(b.0));

    by_host
        .into_iter()
        .flat_map(|(host, targets)| endpoints_for_hostname(host, &targets, meta))
        .collect()
}

/// SRV record `_<port>._<protocol>.<hostname>` pointing at `0 50 <node_port> <hostname>`.
pub fn srv_endpoint(hostname: &str, port: &str, protocol: &str, node_port: i32, meta: &RecordMeta) -> Option<Endpoint> {
    let hostname = hostname.trim_end_matches('.');
    let name = format!("_{port}._{}.{hostname}", protocol.to_lowercase());
    let target = format!("0 50 {node_port} {hostname}");
    Endpoint::new(&name, RecordType::SRV, [target]).map(|endpoint| meta.apply(endpoint))
}

/// Combines endpoints derived from annotations and structure with templated ones.
///
/// With `combine` both sets are unioned. Otherwise `templated` only runs when `endpoints` is empty.
pub fn combine_with_templated<F>(
    mut endpoints: Vec<Endpoint>,
    template_present: bool,
    combine: bool,
    templated: F,
) -> Result<Vec<Endpoint>, ExtractError>
where
    F: FnOnce() -> Result<Vec<Endpoint>, ExtractError>,
{
    if !template_present || (!combine && !endpoints.is_empty()) {
        return Ok(endpoints);
    }
    endpoints.extend(templated()?);
    Ok(endpoints)
}
