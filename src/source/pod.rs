use super::{
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
};
use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt as _;
use std::sync::Arc;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PodOptions {
    /// Point external hostnames at the node the pod runs on instead of the pod itself.
    pub publish_host_ip: bool,
}

impl PodOptions {
    pub fn from_config(config: &SourceConfig) -> Self {
        PodOptions {
            publish_host_ip: config.publish_host_ip,
        }
    }
}

/// Publishes pods named by the hostname annotations or the FQDN template, pointing at their addresses.
pub struct PodSource {
    pods: Arc<dyn ObjectLister<Pod>>,
    filter: SourceFilter,
    extractor: Extractor,
    options: PodOptions,
}

impl PodSource {
    pub fn new(pods: Arc<dyn ObjectLister<Pod>>, filter: SourceFilter, extractor: Extractor, options: PodOptions) -> Self {
        PodSource {
            pods,
            filter,
            extractor,
            options,
        }
    }

    pub fn endpoints(&self) -> Result<Vec<Endpoint>, SourceError> {
        let mut endpoints = Vec::new();
        for pod in self.pods.list()? {
            if pod.metadata.deletion_timestamp.is_some() {
                trace!(pod = %pod.name_any(), "pod is terminating");
                continue;
            }
            let view = match ObjectView::from_resource(&*pod) {
                Ok(view) => view,
                Err(err) => {
                    warn!("skipping pod: {err}");
                    continue;
                }
            };
            if !self.filter.admits(&view) {
                trace!(pod = %view.resource_label(), "filtered out");
                continue;
            }

            let pod_ips = pod_ips(&pod);
            if pod_ips.is_empty() {
                debug!(pod = %view.resource_label(), "pod has no address yet");
            }
            let result = self.extractor.endpoints(&view, None, |_, scope, _| match scope {
                HostnameScope::External if self.options.publish_host_ip => Derived::targets(host_ip(&pod)),
                _ => Derived::targets(pod_ips.clone()),
            });
            endpoints.extend(recover("pod", &view.resource_label(), result));
        }

        debug!(count = endpoints.len(), "pod endpoints");
        Ok(endpoints)
    }
}

/// All addresses in `status.podIPs`, or `status.podIP` for pods reported without the list.
fn pod_ips(pod: &Pod) -> Vec<String> {
    let Some(status) = pod.status.as_ref() else {
        return Vec::new();
    };
    let mut ips = status
        .pod_ips
        .iter()
        .flatten()
        .map(|pod_ip| pod_ip.ip.clone())
        .filter(|ip| !ip.is_empty())
        .collect::<Vec<_>>();
    if ips.is_empty() {
        ips.extend(status.pod_ip.clone().filter(|ip| !ip.is_empty()));
    }
    ips
}

fn host_ip(pod: &Pod) -> Vec<String> {
    pod.status
        .as_ref()
        .and_then(|status| status.host_ip.clone())
        .filter(|ip| !ip.is_empty())
        .into_iter()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        annotations::{
            HOSTNAME_KEY,
            INTERNAL_HOSTNAME_KEY,
            TARGET_KEY,
        },
        cache::StaticLister,
        endpoint::RecordType,
        template::TemplateSet,
    };
    use k8s_openapi::{
        api::core::v1::{
            PodIP,
            PodStatus,
        },
        apimachinery::pkg::apis::meta::v1::Time,
    };
    use kube::api::ObjectMeta;

    fn pod(name: &str, annotations: &[(&str, &str)], pod_ips: &[&str], host_ip: &str) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some(name.into()),
                namespace: Some("default".into()),
                annotations: Some(
                    annotations
                        .iter()
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .collect(),
                ),
                ..Default::default()
            },
            spec: None,
            status: Some(PodStatus {
                pod_ip: pod_ips.first().map(|ip| ip.to_string()),
                pod_ips: Some(pod_ips.iter().map(|ip| PodIP { ip: ip.to_string() }).collect()),
                host_ip: Some(host_ip.into()),
                ..Default::default()
            }),
        }
    }

    fn source(pods: Vec<Pod>, extractor: Extractor, options: PodOptions) -> PodSource {
        PodSource::new(Arc::new(StaticLister::new(pods)), SourceFilter::default(), extractor, options)
    }

    fn records(endpoints: &[Endpoint]) -> Vec<(&str, RecordType, Vec<&str>)> {
        endpoints
            .iter()
            .map(|ep| {
                (
                    ep.dns_name.as_str(),
                    ep.record_type,
                    ep.targets.iter().map(String::as_str).collect(),
                )
            })
            .collect()
    }

    #[test]
    fn publishes_pod_addresses() {
        let pods = vec![pod(
            "web-0",
            &[(HOSTNAME_KEY, "web.example.org"), (INTERNAL_HOSTNAME_KEY, "web.internal")],
            &["10.0.0.1", "fd00::1"],
            "192.168.0.1",
        )];
        let eps = source(pods, Extractor::default(), PodOptions::default()).endpoints().unwrap();
        assert_eq!(
            records(&eps),
            vec![
                ("web.example.org", RecordType::A, vec!["10.0.0.1"]),
                ("web.example.org", RecordType::AAAA, vec!["fd00::1"]),
                ("web.internal", RecordType::A, vec!["10.0.0.1"]),
                ("web.internal", RecordType::AAAA, vec!["fd00::1"]),
            ]
        );
        assert!(eps.iter().all(|ep| ep.resource() == Some("pod/default/web-0")));
    }

    #[test]
    fn host_ip_is_published_for_external_hostnames() {
        let pods = vec![pod(
            "web-0",
            &[(HOSTNAME_KEY, "web.example.org"), (INTERNAL_HOSTNAME_KEY, "web.internal")],
            &["10.0.0.1"],
            "192.168.0.1",
        )];
        let options = PodOptions {
            publish_host_ip: true,
        };
        let eps = source(pods, Extractor::default(), options).endpoints().unwrap();
        assert_eq!(
            records(&eps),
            vec![
                ("web.example.org", RecordType::A, vec!["192.168.0.1"]),
                ("web.internal", RecordType::A, vec!["10.0.0.1"]),
            ]
        );
    }

    #[test]
    fn target_annotation_and_template() {
        let pods = vec![
            pod("web-0", &[(HOSTNAME_KEY, "web.example.org"), (TARGET_KEY, "lb.example.net")], &["10.0.0.1"], ""),
            pod("web-1", &[], &["10.0.0.2"], ""),
        ];
        let extractor = Extractor {
            templates: TemplateSet::new("{{ Name }}.pods.example.org", "", "").unwrap(),
            ..Default::default()
        };
        let eps = source(pods, extractor, PodOptions::default()).endpoints().unwrap();
        assert_eq!(
            records(&eps),
            vec![
                ("web.example.org", RecordType::CNAME, vec!["lb.example.net"]),
                ("web-1.pods.example.org", RecordType::A, vec!["10.0.0.2"]),
            ]
        );
    }

    #[test]
    fn terminating_and_unscheduled_pods_yield_nothing() {
        let mut terminating = pod("web-0", &[(HOSTNAME_KEY, "web.example.org")], &["10.0.0.1"], "");
        terminating.metadata.deletion_timestamp = Some(Time(Default::default()));
        let pending = pod("web-1", &[(HOSTNAME_KEY, "web.example.org")], &[], "");

        let eps = source(vec![terminating, pending], Extractor::default(), PodOptions::default())
            .endpoints()
            .unwrap();
        assert!(eps.is_empty());
    }
}
