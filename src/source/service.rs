use super::{
    node::node_addresses,
    recover,
    Derived,
    Extractor,
    HostnameScope,
    SourceFilter,
};
use crate::{
    cache::ObjectLister,
    config::SourceConfig,
    endpoint::Endpoint,
    error::SourceError,
    object::ObjectView,
    selector::Selector,
    synth::{
        self,
        RecordMeta,
    },
};
use k8s_openapi::api::core::v1::{
    Node,
    Pod,
    Service,
};
use kube::ResourceExt as _;
use std::sync::Arc;

/// How targets of a service are derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceKind {
    LoadBalancer,
    NodePort,
    ClusterIp,
    /// ClusterIP services without a virtual IP (`clusterIP: None`).
    Headless,
    ExternalName,
}

impl ServiceKind {
    pub fn of(service: &Service) -> Self {
        let spec = service.spec.as_ref();
        match spec.and_then(|spec| spec.type_.as_deref()) {
            Some("LoadBalancer") => ServiceKind::LoadBalancer,
            Some("NodePort") => ServiceKind::NodePort,
            Some("ExternalName") => ServiceKind::ExternalName,
            _ if spec.and_then(|spec| spec.cluster_ip.as_deref()) == Some("None") => ServiceKind::Headless,
            _ => ServiceKind::ClusterIp,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceOptions {
    pub publish_internal: bool,
    pub publish_host_ip: bool,
    pub always_publish_not_ready: bool,
    pub headless_pod_records: bool,
    /// Values of `spec.type` to consider. Empty means all.
    pub service_type_filter: Vec<String>,
}

impl ServiceOptions {
    pub fn from_config(config: &SourceConfig) -> Self {
        ServiceOptions {
            publish_internal: config.publish_internal,
            publish_host_ip: config.publish_host_ip,
            always_publish_not_ready: config.always_publish_not_ready,
            headless_pod_records: config.headless_pod_records,
            service_type_filter: config.service_type_filter.clone(),
        }
    }
}

impl Default for ServiceOptions {
    fn default() -> Self {
        ServiceOptions::from_config(&SourceConfig::default())
    }
}

pub struct ServiceSource {
    services: Arc<dyn ObjectLister<Service>>,
    pods: Arc<dyn ObjectLister<Pod>>,
    nodes: Arc<dyn ObjectLister<Node>>,
    filter: SourceFilter,
    extractor: Extractor,
    options: ServiceOptions,
}

impl ServiceSource {
    pub fn new(
        services: Arc<dyn ObjectLister<Service>>,
        pods: Arc<dyn ObjectLister<Pod>>,
        nodes: Arc<dyn ObjectLister<Node>>,
        filter: SourceFilter,
        extractor: Extractor,
        options: ServiceOptions,
    ) -> Self {
        ServiceSource {
            services,
            pods,
            nodes,
            filter,
            extractor,
            options,
        }
    }

    pub fn endpoints(&self) -> Result<Vec<Endpoint>, SourceError> {
        let services = self.services.list()?;
        let pods = self.pods.list()?;
        let nodes = self.nodes.list()?;

        let mut endpoints = Vec::new();
        for service in services {
            let service_type = service
                .spec
                .as_ref()
                .and_then(|spec| spec.type_.as_deref())
                .unwrap_or("ClusterIP");
            if !self.options.service_type_filter.is_empty()
                && !self.options.service_type_filter.iter().any(|t| t == service_type)
            {
                trace!(service = %service.name_any(), %service_type, "service type not selected");
                continue;
            }

            let view = match ObjectView::from_resource(&*service) {
                Ok(view) => view,
                Err(err) => {
                    warn!("skipping service: {err}");
                    continue;
                }
            };
            if !self.filter.admits(&view) {
                trace!(service = %view.resource_label(), "filtered out");
                continue;
            }

            let kind = ServiceKind::of(&service);
            let result = self.extractor.endpoints(&view, None, |hostname, scope, meta| {
                self.derive(&service, kind, hostname, scope, meta, &pods, &nodes)
            });
            endpoints.extend(recover("service", &view.resource_label(), result));
        }

        debug!(count = endpoints.len(), "service endpoints");
        Ok(endpoints)
    }

    #[allow(clippy::too_many_arguments)]
    fn derive(
        &self,
        service: &Service,
        kind: ServiceKind,
        hostname: &str,
        scope: HostnameScope,
        meta: &RecordMeta,
        pods: &[Arc<Pod>],
        nodes: &[Arc<Node>],
    ) -> Derived {
        if scope == HostnameScope::Internal {
            return match kind {
                ServiceKind::Headless | ServiceKind::ExternalName => Derived::default(),
                _ => Derived::targets(cluster_ip(service)),
            };
        }

        match kind {
            ServiceKind::LoadBalancer => Derived::targets(load_balancer_targets(service)),
            ServiceKind::ClusterIp if self.options.publish_internal => Derived::targets(cluster_ip(service)),
            ServiceKind::ClusterIp => {
                trace!(service = %service.name_any(), "not publishing cluster IP");
                Derived::default()
            }
            ServiceKind::Headless if self.options.headless_pod_records => Derived {
                targets: Vec::new(),
                endpoints: self.headless_endpoints(service, hostname, meta, pods),
            },
            ServiceKind::Headless => Derived::default(),
            ServiceKind::NodePort => Derived {
                targets: node_port_targets(service, pods, nodes),
                endpoints: srv_endpoints(service, hostname, meta),
            },
            ServiceKind::ExternalName => Derived::targets(external_name_targets(service)),
        }
    }

    /// One record per backing pod: `<pod hostname>.<hostname>`, where pods without `spec.hostname` use their dashed
    /// address.
    fn headless_endpoints(&self, service: &Service, hostname: &str, meta: &RecordMeta, pods: &[Arc<Pod>]) -> Vec<Endpoint> {
        let publish_not_ready = self.options.always_publish_not_ready
            || service
                .spec
                .as_ref()
                .and_then(|spec| spec.publish_not_ready_addresses)
                .unwrap_or(false);

        let mut endpoints = Vec::new();
        for pod in selected_pods(service, pods) {
            if !publish_not_ready && !is_pod_ready(pod) {
                debug!(pod = %pod.name_any(), "skipping pod that is not ready");
                continue;
            }

            let status = pod.status.as_ref();
            let target = if self.options.publish_host_ip {
                status.and_then(|status| status.host_ip.as_deref())
            } else {
                status.and_then(|status| status.pod_ip.as_deref())
            };
            let Some(target) = target.filter(|target| !target.is_empty()) else {
                debug!(pod = %pod.name_any(), "pod has no address yet");
                continue;
            };

            let pod_hostname = pod
                .spec
                .as_ref()
                .and_then(|spec| spec.hostname.clone())
                .filter(|h| !h.is_empty())
                .unwrap_or_else(|| target.replace(['.', ':'], "-"));
            endpoints.extend(synth::endpoints_for_hostname(
                &format!("{pod_hostname}.{hostname}"),
                &[target],
                meta,
            ));
        }
        endpoints
    }
}

fn cluster_ip(service: &Service) -> Vec<String> {
    service
        .spec
        .as_ref()
        .and_then(|spec| spec.cluster_ip.clone())
        .filter(|ip| !ip.is_empty() && ip != "None")
        .into_iter()
        .collect()
}

fn external_ips(service: &Service) -> Vec<String> {
    service
        .spec
        .as_ref()
        .and_then(|spec| spec.external_ips.clone())
        .unwrap_or_default()
}

/// `spec.externalIPs` if set, otherwise the ingress points reported in the status.
fn load_balancer_targets(service: &Service) -> Vec<String> {
    let external_ips = external_ips(service);
    if !external_ips.is_empty() {
        return external_ips;
    }

    service
        .status
        .as_ref()
        .and_then(|status| status.load_balancer.as_ref())
        .and_then(|lb| lb.ingress.as_ref())
        .into_iter()
        .flatten()
        .flat_map(|ingress| [ingress.ip.clone(), ingress.hostname.clone()])
        .flatten()
        .filter(|target| !target.is_empty())
        .collect()
}

fn external_name_targets(service: &Service) -> Vec<String> {
    let external_ips = external_ips(service);
    if !external_ips.is_empty() {
        return external_ips;
    }
    service
        .spec
        .as_ref()
        .and_then(|spec| spec.external_name.clone())
        .into_iter()
        .collect()
}

/// Pods in the service namespace matched by its selector. A service without selector selects nothing.
fn selected_pods<'a>(service: &Service, pods: &'a [Arc<Pod>]) -> Vec<&'a Pod> {
    let Some(selector) = service
        .spec
        .as_ref()
        .and_then(|spec| spec.selector.as_ref())
        .filter(|selector| !selector.is_empty())
    else {
        return Vec::new();
    };
    let selector = Selector::from_match_labels(selector);
    let namespace = service.namespace();

    pods.iter()
        .map(|pod| &**pod)
        .filter(|pod| pod.namespace() == namespace)
        .filter(|pod| pod.metadata.deletion_timestamp.is_none())
        .filter(|pod| selector.matches(pod.labels()))
        .collect()
}

fn is_pod_ready(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|status| status.conditions.as_ref())
        .is_some_and(|conditions| {
            conditions
                .iter()
                .any(|condition| condition.type_ == "Ready" && condition.status == "True")
        })
}

/// Addresses of all nodes, or with `externalTrafficPolicy: Local` only of the nodes running selected pods.
fn node_port_targets(service: &Service, pods: &[Arc<Pod>], nodes: &[Arc<Node>]) -> Vec<String> {
    let local = service
        .spec
        .as_ref()
        .and_then(|spec| spec.external_traffic_policy.as_deref())
        == Some("Local");

    let nodes = if local {
        let node_names = selected_pods(service, pods)
            .into_iter()
            .filter_map(|pod| pod.spec.as_ref().and_then(|spec| spec.node_name.clone()))
            .collect::<Vec<_>>();
        nodes
            .iter()
            .map(|node| &**node)
            .filter(|node| node_names.contains(&node.name_any()))
            .collect::<Vec<_>>()
    } else {
        nodes.iter().map(|node| &**node).collect()
    };

    node_addresses(&nodes)
}

fn srv_endpoints(service: &Service, hostname: &str, meta: &RecordMeta) -> Vec<Endpoint> {
    let ports = service
        .spec
        .as_ref()
        .and_then(|spec| spec.ports.as_ref())
        .into_iter()
        .flatten();

    ports
        .filter_map(|port| {
            let node_port = port.node_port?;
            let label = port
                .name
                .clone()
                .filter(|name| !name.is_empty())
                .unwrap_or_else(|| port.port.to_string());
            let protocol = port.protocol.as_deref().unwrap_or("TCP");
            synth::srv_endpoint(hostname, &label, protocol, node_port, meta)
        })
        .collect()
}
