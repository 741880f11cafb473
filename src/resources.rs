use crate::endpoint::{
    ProviderSpecific,
    RecordType,
};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{
    Deserialize,
    Serialize,
};
use std::collections::BTreeMap;

pub const DNS_ENDPOINT_GROUP: &str = "dnssource.io";
pub const DNS_ENDPOINT_VERSION: &str = "v1alpha1";

/// A list of DNS records published as they are written.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[kube(
    group = "dnssource.io",
    version = "v1alpha1",
    kind = "DNSEndpoint",
    shortname = "dnsep",
    namespaced,
    status = "DNSEndpointStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct DNSEndpointSpec {
    #[serde(default)]
    pub endpoints: Vec<EndpointSpec>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EndpointSpec {
    /// The hostname of the record (e.g. www.example.org)
    pub dns_name: String,
    /// Record contents. For SRV records `priority weight port host`.
    #[serde(default)]
    pub targets: Vec<String>,
    /// The type of the record (A, AAAA, CNAME or SRV). Inferred from the first target when absent.
    pub record_type: Option<RecordType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub set_identifier: Option<String>,
    /// TTL in seconds
    #[serde(rename = "recordTTL", default, skip_serializing_if = "Option::is_none")]
    pub record_ttl: Option<i64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub provider_specific: ProviderSpecific,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DNSEndpointStatus {
    /// The generation observed by the publisher.
    pub observed_generation: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::{
        CustomResourceExt as _,
        Resource as _,
    };

    #[test]
    fn crd_metadata() {
        let crd = DNSEndpoint::crd();
        assert_eq!(crd.spec.group, DNS_ENDPOINT_GROUP);
        assert_eq!(crd.spec.names.kind, "DNSEndpoint");
        assert_eq!(crd.spec.versions[0].name, DNS_ENDPOINT_VERSION);
        assert_eq!(DNSEndpoint::api_version(&()), "dnssource.io/v1alpha1");
    }

    #[test]
    fn deserializes_spec() {
        let spec: DNSEndpointSpec = serde_yaml::from_str(
            r#"
endpoints:
  - dnsName: www.example.org
    recordType: A
    targets: [1.2.3.4]
    recordTTL: 300
    providerSpecific:
      - name: alias
        value: "true"
  - dnsName: _http._tcp.example.org
    recordType: SRV
    targets: ["0 50 80 www.example.org"]
"#,
        )
        .unwrap();
        assert_eq!(spec.endpoints.len(), 2);
        assert_eq!(spec.endpoints[0].record_type, Some(RecordType::A));
        assert_eq!(spec.endpoints[0].record_ttl, Some(300));
        assert_eq!(spec.endpoints[0].provider_specific[0].name, "alias");
        assert_eq!(spec.endpoints[1].record_type, Some(RecordType::SRV));
    }
}
