use crate::{
    config::MergePrecedence,
    endpoint::{
        Endpoint,
        EndpointKey,
    },
};
use std::collections::BTreeMap;

/// Collapses endpoints that share a (name, record type) key.
///
/// Targets of a group are unioned and sorted. TTL, provider specific properties, set identifier and labels come from
/// the first member of the group, where "first" is determined by `precedence`. The result is sorted by key.
pub fn merge_endpoints(mut endpoints: Vec<Endpoint>, precedence: MergePrecedence) -> Vec<Endpoint> {
    if precedence == MergePrecedence::ByProvenance {
        endpoints.sort_by(|a, b| a.resource().unwrap_or_default().cmp(b.resource().unwrap_or_default()));
    }

    let mut groups: BTreeMap<EndpointKey, Endpoint> = BTreeMap::new();
    for endpoint in endpoints {
        match groups.get_mut(&endpoint.key()) {
            Some(merged) => {
                if merged.ttl() != endpoint.ttl() || merged.set_identifier != endpoint.set_identifier {
                    debug!(
                        key = %merged.dns_name,
                        record_type = %merged.record_type,
                        winner = ?merged.resource(),
                        loser = ?endpoint.resource(),
                        "conflicting metadata while merging, keeping the first"
                    );
                }
                merged.targets.extend(endpoint.targets);
            }
            None => {
                groups.insert(endpoint.key(), endpoint);
            }
        }
    }

    groups
        .into_values()
        .map(|mut endpoint| {
            endpoint.targets.sort();
            endpoint.targets.dedup();
            endpoint
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::{
        RecordType,
        Ttl,
        RESOURCE_LABEL_KEY,
    };

    fn ep(name: &str, record_type: RecordType, targets: &[&str], resource: &str, ttl: Ttl) -> Endpoint {
        Endpoint::new(name, record_type, targets)
            .unwrap()
            .with_ttl(ttl)
            .with_label(RESOURCE_LABEL_KEY, resource)
    }

    #[test]
    fn unions_targets_of_same_key() {
        let merged = merge_endpoints(
            vec![
                ep("svc.example.org", RecordType::A, &["1.2.3.5"], "service/default/b", Ttl::UNCONFIGURED),
                ep("SVC.example.org.", RecordType::A, &["1.2.3.4"], "service/default/a", Ttl::UNCONFIGURED),
            ],
            MergePrecedence::default(),
        );
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].targets, vec!["1.2.3.4", "1.2.3.5"]);
    }

    #[test]
    fn different_types_stay_separate_and_sorted() {
        let merged = merge_endpoints(
            vec![
                ep("b.example.org", RecordType::A, &["1.2.3.4"], "x", Ttl::UNCONFIGURED),
                ep("a.example.org", RecordType::CNAME, &["lb.example.org"], "x", Ttl::UNCONFIGURED),
                ep("a.example.org", RecordType::A, &["1.2.3.4"], "x", Ttl::UNCONFIGURED),
            ],
            MergePrecedence::FirstSeen,
        );
        let keys = merged
            .iter()
            .map(|ep| (ep.dns_name.as_str(), ep.record_type))
            .collect::<Vec<_>>();
        assert_eq!(
            keys,
            vec![
                ("a.example.org", RecordType::A),
                ("a.example.org", RecordType::CNAME),
                ("b.example.org", RecordType::A),
            ]
        );
    }

    #[test]
    fn merging_is_idempotent() {
        let endpoints = vec![
            ep("a.example.org", RecordType::A, &["1.2.3.5", "1.2.3.4"], "service/default/a", Ttl::seconds(10)),
            ep("b.example.org", RecordType::AAAA, &["2001:db8::1"], "service/default/b", Ttl::UNCONFIGURED),
            ep("a.example.org", RecordType::A, &["1.2.3.6"], "service/default/c", Ttl::seconds(20)),
        ];
        let once = merge_endpoints(endpoints, MergePrecedence::default());

        let mut doubled = once.clone();
        doubled.extend(once.clone());
        assert_eq!(merge_endpoints(doubled, MergePrecedence::default()), once);
        assert_eq!(merge_endpoints(once.clone(), MergePrecedence::FirstSeen), once);
    }

    #[test]
    fn metadata_precedence() {
        let listing = || {
            vec![
                ep("a.example.org", RecordType::A, &["1.2.3.4"], "service/ns/z", Ttl::seconds(300)),
                ep("a.example.org", RecordType::A, &["1.2.3.5"], "service/ns/a", Ttl::UNCONFIGURED),
            ]
        };

        let by_provenance = merge_endpoints(listing(), MergePrecedence::ByProvenance);
        assert_eq!(by_provenance[0].ttl(), Ttl::UNCONFIGURED);
        assert_eq!(by_provenance[0].resource(), Some("service/ns/a"));

        let mut reversed = listing();
        reversed.reverse();
        assert_eq!(merge_endpoints(reversed, MergePrecedence::ByProvenance), by_provenance);

        let first_seen = merge_endpoints(listing(), MergePrecedence::FirstSeen);
        assert_eq!(first_seen[0].ttl(), Ttl::seconds(300));
        assert_eq!(first_seen[0].targets, vec!["1.2.3.4", "1.2.3.5"]);
    }
}
