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
use k8s_openapi::api::networking::v1::Ingress;
use std::sync::Arc;

/// Publishes the hosts of ingress rules and TLS sections, pointing at the load balancer of the ingress controller.
pub struct IngressSource {
    ingresses: Arc<dyn ObjectLister<Ingress>>,
    filter: SourceFilter,
    extractor: Extractor,
}

impl IngressSource {
    pub fn new(ingresses: Arc<dyn ObjectLister<Ingress>>, filter: SourceFilter, extractor: Extractor) -> Self {
        IngressSource {
            ingresses,
            filter,
            extractor,
        }
    }

    pub fn endpoints(&self) -> Result<Vec<Endpoint>, SourceError> {
        let mut endpoints = Vec::new();
        for ingress in self.ingresses.list()? {
            let view = match ObjectView::from_resource(&*ingress) {
                Ok(view) => view,
                Err(err) => {
                    warn!("skipping ingress: {err}");
                    continue;
                }
            };
            if !self.filter.admits(&view) {
                trace!(ingress = %view.resource_label(), "filtered out");
                continue;
            }

            let hosts = ingress_hosts(&ingress);
            let targets = load_balancer_targets(&ingress);
            if targets.is_empty() {
                debug!(ingress = %view.resource_label(), "no load balancer address reported yet");
            }
            let result = self
                .extractor
                .endpoints_with_hostnames(&view, &hosts, |_, scope, _| match scope {
                    HostnameScope::External => Derived::targets(targets.clone()),
                    HostnameScope::Internal => Derived::default(),
                });
            endpoints.extend(recover("ingress", &view.resource_label(), result));
        }

        debug!(count = endpoints.len(), "ingress endpoints");
        Ok(endpoints)
    }
}

/// Non-empty hosts of `spec.rules` followed by those of `spec.tls`, without duplicates.
fn ingress_hosts(ingress: &Ingress) -> Vec<String> {
    let Some(spec) = ingress.spec.as_ref() else {
        return Vec::new();
    };
    let rule_hosts = spec
        .rules
        .iter()
        .flatten()
        .filter_map(|rule| rule.host.clone());
    let tls_hosts = spec
        .tls
        .iter()
        .flatten()
        .flat_map(|tls| tls.hosts.iter().flatten().cloned());

    let mut hosts = Vec::new();
    for host in rule_hosts.chain(tls_hosts) {
        let host = host.trim().trim_end_matches('.').to_string();
        if !host.is_empty() && !hosts.contains(&host) {
            hosts.push(host);
        }
    }
    hosts
}

fn load_balancer_targets(ingress: &Ingress) -> Vec<String> {
    ingress
        .status
        .as_ref()
        .and_then(|status| status.load_balancer.as_ref())
        .and_then(|lb| lb.ingress.as_ref())
        .into_iter()
        .flatten()
        .flat_map(|lb| [lb.ip.clone(), lb.hostname.clone()])
        .flatten()
        .filter(|target| !target.is_empty())
        .collect()
}
