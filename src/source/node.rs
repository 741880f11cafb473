use super::{
    recover,
    Derived,
    Extractor,
    HostnameScope,
    SourceFilter,
};
use crate::{
    cache::ObjectLister,
    endpoint::Endpoint,
    error::SourceError,
    object::ObjectView,
};
use k8s_openapi::api::core::v1::Node;
use std::sync::Arc;

/// Publishes nodes under their name, the hostname annotation or the FQDN template.
pub struct NodeSource {
    nodes: Arc<dyn ObjectLister<Node>>,
    filter: SourceFilter,
    extractor: Extractor,
}

impl NodeSource {
    pub fn new(nodes: Arc<dyn ObjectLister<Node>>, filter: SourceFilter, extractor: Extractor) -> Self {
        NodeSource {
            nodes,
            filter,
            extractor,
        }
    }

    pub fn endpoints(&self) -> Result<Vec<Endpoint>, SourceError> {
        let mut endpoints = Vec::new();
        for node in self.nodes.list()? {
            let view = match ObjectView::from_resource(&*node) {
                Ok(view) => view,
                Err(err) => {
                    warn!("skipping node: {err}");
                    continue;
                }
            };
            if !self.filter.admits(&view) {
                trace!(node = %view.name(), "filtered out");
                continue;
            }

            let addresses = node_addresses(&[&*node]);
            if addresses.is_empty() {
                debug!(node = %view.name(), "node has no addresses");
            }
            let result = self.extractor.endpoints(&view, Some(view.name()), |_, scope, _| match scope {
                HostnameScope::External => Derived::targets(addresses.clone()),
                HostnameScope::Internal => Derived::targets(internal_addresses(&node)),
            });
            endpoints.extend(recover("node", &view.resource_label(), result));
        }

        debug!(count = endpoints.len(), "node endpoints");
        Ok(endpoints)
    }
}

fn addresses_of_type(node: &Node, address_type: &str) -> Vec<String> {
    node.status
        .as_ref()
        .and_then(|status| status.addresses.as_ref())
        .into_iter()
        .flatten()
        .filter(|address| address.type_ == address_type && !address.address.is_empty())
        .map(|address| address.address.clone())
        .collect()
}

fn internal_addresses(node: &Node) -> Vec<String> {
    addresses_of_type(node, "InternalIP")
}

/// External addresses of `nodes`, or their internal addresses when none of them has an external one.
pub(crate) fn node_addresses(nodes: &[&Node]) -> Vec<String> {
    let external = nodes
        .iter()
        .flat_map(|node| addresses_of_type(node, "ExternalIP"))
        .collect::<Vec<_>>();
    if !external.is_empty() {
        return external;
    }
    nodes.iter().flat_map(|node| internal_addresses(node)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        annotations::HOSTNAME_KEY,
        cache::StaticLister,
        endpoint::RecordType,
        template::TemplateSet,
    };
    use k8s_openapi::api::core::v1::{
        NodeAddress,
        NodeStatus,
    };
    use kube::api::ObjectMeta;

    fn node(name: &str, annotations: &[(&str, &str)], addresses: &[(&str, &str)]) -> Node {
        Node {
            metadata: ObjectMeta {
                name: Some(name.into()),
                labels: Some([("role".to_string(), "edge".to_string())].into()),
                annotations: Some(
                    annotations
                        .iter()
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .collect(),
                ),
                ..Default::default()
            },
            spec: None,
            status: Some(NodeStatus {
                addresses: Some(
                    addresses
                        .iter()
                        .map(|(type_, address)| NodeAddress {
                            type_: type_.to_string(),
                            address: address.to_string(),
                        })
                        .collect(),
                ),
                ..Default::default()
            }),
        }
    }

    fn source(nodes: Vec<Node>, extractor: Extractor) -> NodeSource {
        NodeSource::new(Arc::new(StaticLister::new(nodes)), SourceFilter::default(), extractor)
    }

    #[test]
    fn publishes_node_name_with_external_addresses() {
        let nodes = vec![node(
            "n1.example.org",
            &[],
            &[("InternalIP", "192.168.0.1"), ("ExternalIP", "1.1.1.1"), ("ExternalIP", "2001:db8::1")],
        )];
        let eps = source(nodes, Extractor::default()).endpoints().unwrap();
        assert_eq!(eps.len(), 2);
        assert_eq!(eps[0].dns_name, "n1.example.org");
        assert_eq!(eps[0].record_type, RecordType::A);
        assert_eq!(eps[0].targets, vec!["1.1.1.1"]);
        assert_eq!(eps[1].record_type, RecordType::AAAA);
        assert_eq!(eps[0].resource(), Some("node/n1.example.org"));
    }

    #[test]
    fn falls_back_to_internal_addresses() {
        let nodes = vec![node("n1", &[], &[("InternalIP", "192.168.0.1"), ("Hostname", "n1")])];
        let eps = source(nodes, Extractor::default()).endpoints().unwrap();
        assert_eq!(eps.len(), 1);
        assert_eq!(eps[0].targets, vec!["192.168.0.1"]);
    }

    #[test]
    fn hostname_annotation_and_template() {
        let nodes = vec![node(
            "n1",
            &[(HOSTNAME_KEY, "edge.example.org")],
            &[("ExternalIP", "1.1.1.1")],
        )];
        let eps = source(nodes.clone(), Extractor::default()).endpoints().unwrap();
        assert_eq!(eps[0].dns_name, "edge.example.org");

        let extractor = Extractor {
            templates: TemplateSet::new("{{ Name }}.{{ Labels.role }}.nodes.example.org", "", "").unwrap(),
            combine: true,
            ..Default::default()
        };
        let mut names = source(nodes, extractor)
            .endpoints()
            .unwrap()
            .into_iter()
            .map(|ep| ep.dns_name)
            .collect::<Vec<_>>();
        names.sort();
        assert_eq!(names, vec!["edge.example.org", "n1.edge.nodes.example.org"]);
    }

    #[test]
    fn node_without_addresses_yields_nothing() {
        let eps = source(vec![node("n1", &[], &[])], Extractor::default()).endpoints().unwrap();
        assert!(eps.is_empty());
    }
}
