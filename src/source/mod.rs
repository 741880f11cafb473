//! Source adapters: one per resource kind, all sharing the [`Extractor`].

pub mod crd;
pub mod ingress;
pub mod node;
pub mod pod;
pub mod service;
pub mod unstructured;

use crate::{
    annotations::{
        self,
        AnnotationRules,
    },
    config::SourceConfig,
    endpoint::Endpoint,
    error::{
        ConfigError,
        ExtractError,
        SourceError,
    },
    object::{
        FieldPath,
        ObjectView,
    },
    selector::Selector,
    synth::{
        self,
        RecordMeta,
    },
    template::TemplateSet,
};

pub use crd::CrdSource;
pub use ingress::IngressSource;
pub use node::NodeSource;
pub use pod::PodSource;
pub use service::ServiceSource;
pub use unstructured::UnstructuredSource;

/// Which kind of hostname targets are derived for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostnameScope {
    /// Hostname annotation, field paths and templates.
    External,
    /// The internal hostname annotation. Points at cluster internal addresses.
    Internal,
}

/// Result of the kind specific target derivation for one hostname.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Derived {
    /// Targets that are classified into A/AAAA/CNAME records for the hostname.
    pub targets: Vec<String>,
    /// Finished records such as SRV or per-pod records.
    pub endpoints: Vec<Endpoint>,
}

impl Derived {
    pub fn targets(targets: Vec<String>) -> Self {
        Derived {
            targets,
            endpoints: Vec::new(),
        }
    }
}

/// Object selection shared by all adapters.
#[derive(Debug, Clone, Default)]
pub struct SourceFilter {
    pub namespace: Option<String>,
    pub label_selector: Selector,
    pub annotation_filter: Selector,
}

impl SourceFilter {
    pub fn from_config(config: &SourceConfig) -> Result<Self, ConfigError> {
        Ok(SourceFilter {
            namespace: config.namespace.clone().filter(|ns| !ns.is_empty()),
            label_selector: config.label_selector.parse()?,
            annotation_filter: config.annotation_filter.parse()?,
        })
    }

    pub fn admits(&self, view: &ObjectView) -> bool {
        if let Some(namespace) = &self.namespace {
            if !view.namespace().is_empty() && view.namespace() != namespace {
                return false;
            }
        }
        self.label_selector.matches(view.labels()) && self.annotation_filter.matches(view.annotations())
    }
}

/// Annotation rules, templates and field paths applied to every object of a source.
#[derive(Debug, Clone, Default)]
pub struct Extractor {
    pub rules: AnnotationRules,
    pub templates: TemplateSet,
    pub combine: bool,
    pub hostname_paths: Vec<FieldPath>,
    pub target_paths: Vec<FieldPath>,
}

impl Extractor {
    pub fn from_config(config: &SourceConfig) -> Result<Self, ConfigError> {
        Ok(Extractor {
            rules: AnnotationRules {
                controller: config.controller.clone(),
                ignore_hostname_annotation: config.ignore_hostname_annotation,
            },
            templates: TemplateSet::new(
                &config.fqdn_template,
                &config.target_template,
                &config.host_target_template,
            )?,
            combine: config.combine_fqdn_annotation,
            hostname_paths: parse_paths(&config.hostname_paths)?,
            target_paths: parse_paths(&config.target_paths)?,
        })
    }

    pub fn skip_reason(&self, view: &ObjectView) -> Option<String> {
        self.rules.skip_reason(view.annotations())
    }

    /// Metadata attached to every record of `view`.
    pub fn record_meta(&self, view: &ObjectView) -> RecordMeta {
        let resource = view.resource_label();
        let (provider_specific, set_identifier) = annotations::provider_specific(view.annotations());
        RecordMeta {
            ttl: annotations::ttl(view.annotations(), &resource),
            provider_specific,
            set_identifier,
            resource,
        }
    }

    /// Explicit targets: the target annotation, otherwise field paths and the target template.
    pub fn explicit_targets(&self, view: &ObjectView) -> Result<Vec<String>, ExtractError> {
        let targets = annotations::targets(view.annotations());
        if !targets.is_empty() {
            return Ok(targets);
        }

        let mut targets = self
            .target_paths
            .iter()
            .flat_map(|path| view.lookup_strings(path))
            .collect::<Vec<_>>();
        if let Some(template) = &self.templates.target {
            targets.extend(template.exec(view)?);
        }
        Ok(targets)
    }

    /// Runs the full rule set on one object.
    ///
    /// `default_hostname` is used when neither annotations, field paths nor templates can name the object. `derive`
    /// supplies kind specific targets for hostnames without explicit targets.
    pub fn endpoints<F>(
        &self,
        view: &ObjectView,
        default_hostname: Option<&str>,
        derive: F,
    ) -> Result<Vec<Endpoint>, ExtractError>
    where
        F: Fn(&str, HostnameScope, &RecordMeta) -> Derived,
    {
        self.extract(view, &[], default_hostname, derive)
    }

    /// Like [`Extractor::endpoints`] for objects that name their own hosts, such as ingress rules. `own_hostnames`
    /// are published next to the annotated hostnames, also when hostname annotations are ignored.
    pub fn endpoints_with_hostnames<F>(
        &self,
        view: &ObjectView,
        own_hostnames: &[String],
        derive: F,
    ) -> Result<Vec<Endpoint>, ExtractError>
    where
        F: Fn(&str, HostnameScope, &RecordMeta) -> Derived,
    {
        self.extract(view, own_hostnames, None, derive)
    }

    fn extract<F>(
        &self,
        view: &ObjectView,
        own_hostnames: &[String],
        default_hostname: Option<&str>,
        derive: F,
    ) -> Result<Vec<Endpoint>, ExtractError>
    where
        F: Fn(&str, HostnameScope, &RecordMeta) -> Derived,
    {
        if let Some(reason) = self.skip_reason(view) {
            debug!(object = %view.resource_label(), "skipping: {reason}");
            return Ok(Vec::new());
        }

        let meta = self.record_meta(view);
        let explicit_targets = self.explicit_targets(view)?;

        let mut hostnames = own_hostnames.to_vec();
        hostnames.extend(self.rules.hostnames(view.annotations()));
        for path in &self.hostname_paths {
            hostnames.extend(
                view.lookup_strings(path)
                    .into_iter()
                    .map(|h| h.trim_end_matches('.').to_string()),
            );
        }
        if hostnames.is_empty() && !self.templates.produces_hostnames() {
            hostnames.extend(default_hostname.map(str::to_string));
        }

        let mut endpoints = self.endpoints_for_hostnames(&hostnames, &explicit_targets, &meta, &derive);
        for hostname in self.rules.internal_hostnames(view.annotations()) {
            let derived = derive(&hostname, HostnameScope::Internal, &meta);
            endpoints.extend(synth::endpoints_for_hostname(&hostname, &derived.targets, &meta));
            endpoints.extend(derived.endpoints);
        }

        synth::combine_with_templated(endpoints, self.templates.produces_hostnames(), self.combine, || {
            self.templated_endpoints(view, &explicit_targets, &meta, &derive)
        })
    }

    fn templated_endpoints<F>(
        &self,
        view: &ObjectView,
        explicit_targets: &[String],
        meta: &RecordMeta,
        derive: &F,
    ) -> Result<Vec<Endpoint>, ExtractError>
    where
        F: Fn(&str, HostnameScope, &RecordMeta) -> Derived,
    {
        let mut endpoints = Vec::new();
        if let Some(template) = &self.templates.fqdn {
            let hostnames = template.exec(view)?;
            endpoints.extend(self.endpoints_for_hostnames(&hostnames, explicit_targets, meta, derive));
        }
        if let Some(template) = &self.templates.host_target {
            let pairs = synth::parse_host_target_pairs(&template.exec(view)?);
            endpoints.extend(synth::endpoints_for_host_target_pairs(&pairs, meta));
        }
        Ok(endpoints)
    }

    fn endpoints_for_hostnames<F>(
        &self,
        hostnames: &[String],
        explicit_targets: &[String],
        meta: &RecordMeta,
        derive: &F,
    ) -> Vec<Endpoint>
    where
        F: Fn(&str, HostnameScope, &RecordMeta) -> Derived,
    {
        if !explicit_targets.is_empty() {
            return synth::endpoints_for_hosts_and_targets(hostnames, explicit_targets, meta);
        }

        let mut endpoints = Vec::new();
        for hostname in hostnames {
            let derived = derive(hostname, HostnameScope::External, meta);
            endpoints.extend(synth::endpoints_for_hostname(hostname, &derived.targets, meta));
            endpoints.extend(derived.endpoints);
        }
        endpoints
    }
}

fn parse_paths(paths: &[String]) -> Result<Vec<FieldPath>, ConfigError> {
    paths.iter().map(|path| path.parse()).collect()
}

/// Logs and drops a failed object. Returns its endpoints otherwise.
pub(crate) fn recover(kind: &str, object: &str, result: Result<Vec<Endpoint>, ExtractError>) -> Vec<Endpoint> {
    match result {
        Ok(endpoints) => {
            trace!(%kind, %object, count = endpoints.len(), "extracted endpoints");
            endpoints
        }
        Err(err) => {
            warn!(%kind, %object, "skipping object: {err}");
            Vec::new()
        }
    }
}

/// A configured source adapter.
pub enum Source {
    Service(ServiceSource),
    Ingress(IngressSource),
    Pod(PodSource),
    Node(NodeSource),
    Unstructured(UnstructuredSource),
    Crd(CrdSource),
}

impl Source {
    pub fn name(&self) -> &'static str {
        match self {
            Source::Service(_) => "service",
            Source::Ingress(_) => "ingress",
            Source::Pod(_) => "pod",
            Source::Node(_) => "node",
            Source::Unstructured(_) => "unstructured",
            Source::Crd(_) => "crd",
        }
    }

    /// Extracts endpoints from the current snapshot. Per object problems are logged and skipped, listing problems
    /// fail the whole call.
    pub fn endpoints(&self) -> Result<Vec<Endpoint>, SourceError> {
        match self {
            Source::Service(source) => source.endpoints(),
            Source::Ingress(source) => source.endpoints(),
            Source::Pod(source) => source.endpoints(),
            Source::Node(source) => source.endpoints(),
            Source::Unstructured(source) => source.endpoints(),
            Source::Crd(source) => source.endpoints(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        annotations::{
            CONTROLLER_KEY,
            HOSTNAME_KEY,
            INTERNAL_HOSTNAME_KEY,
            TARGET_KEY,
            TTL_KEY,
        },
        endpoint::{
            RecordType,
            Ttl,
        },
        template::Template,
    };
    use k8s_openapi::api::core::v1::ConfigMap;
    use kube::api::ObjectMeta;

    fn view(annotations: &[(&str, &str)]) -> ObjectView {
        let cm = ConfigMap {
            metadata: ObjectMeta {
                name: Some("foo".into()),
                namespace: Some("default".into()),
                labels: Some([("team".to_string(), "web".to_string())].into()),
                annotations: Some(
                    annotations
                        .iter()
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .collect(),
                ),
                ..Default::default()
            },
            data: Some([("target".to_string(), "5.6.7.8".to_string())].into()),
            ..Default::default()
        };
        ObjectView::from_resource(&cm).unwrap()
    }

    fn no_derivation(_: &str, _: HostnameScope, _: &RecordMeta) -> Derived {
        Derived::default()
    }

    fn names(endpoints: &[Endpoint]) -> Vec<&str> {
        endpoints.iter().map(|ep| ep.dns_name.as_str()).collect()
    }

    #[test]
    fn annotation_round_trip() {
        let extractor = Extractor::default();
        let eps = extractor
            .endpoints(
                &view(&[(HOSTNAME_KEY, "a.example.org., b.example.org"), (TARGET_KEY, "1.2.3.4")]),
                None,
                no_derivation,
            )
            .unwrap();
        assert_eq!(names(&eps), vec!["a.example.org", "b.example.org"]);
        for ep in &eps {
            assert_eq!(ep.record_type, RecordType::A);
            assert_eq!(ep.targets, vec!["1.2.3.4"]);
            assert_eq!(ep.resource(), Some("configmap/default/foo"));
        }
    }

    #[test]
    fn bad_ttl_does_not_skip_object() {
        let eps = Extractor::default()
            .endpoints(
                &view(&[(HOSTNAME_KEY, "a.example.org"), (TARGET_KEY, "1.2.3.4"), (TTL_KEY, "-10")]),
                None,
                no_derivation,
            )
            .unwrap();
        assert_eq!(eps.len(), 1);
        assert_eq!(eps[0].ttl(), Ttl::UNCONFIGURED);
    }

    #[test]
    fn foreign_controller_is_skipped() {
        let eps = Extractor::default()
            .endpoints(
                &view(&[
                    (HOSTNAME_KEY, "a.example.org"),
                    (TARGET_KEY, "1.2.3.4"),
                    (CONTROLLER_KEY, "other"),
                ]),
                None,
                no_derivation,
            )
            .unwrap();
        assert!(eps.is_empty());
    }

    #[test]
    fn derivation_is_used_without_explicit_targets() {
        let derive = |hostname: &str, scope: HostnameScope, meta: &RecordMeta| match scope {
            HostnameScope::External => Derived {
                targets: vec!["lb.example.net".into()],
                endpoints: synth::srv_endpoint(hostname, "http", "TCP", 30080, meta).into_iter().collect(),
            },
            HostnameScope::Internal => Derived::targets(vec!["10.96.0.1".into()]),
        };
        let eps = Extractor::default()
            .endpoints(
                &view(&[(HOSTNAME_KEY, "a.example.org"), (INTERNAL_HOSTNAME_KEY, "a.internal")]),
                None,
                derive,
            )
            .unwrap();
        let records = eps
            .iter()
            .map(|ep| (ep.dns_name.as_str(), ep.record_type))
            .collect::<Vec<_>>();
        assert_eq!(
            records,
            vec![
                ("a.example.org", RecordType::CNAME),
                ("_http._tcp.a.example.org", RecordType::SRV),
                ("a.internal", RecordType::A),
            ]
        );
    }

    #[test]
    fn combination_mode() {
        let mut extractor = Extractor {
            templates: TemplateSet {
                fqdn: Template::parse("fqdn", "foo.tmpl.org").unwrap(),
                ..Default::default()
            },
            combine: true,
            ..Default::default()
        };
        let object = view(&[(HOSTNAME_KEY, "foo.example.org"), (TARGET_KEY, "1.2.3.4")]);

        let eps = extractor.endpoints(&object, None, no_derivation).unwrap();
        assert_eq!(names(&eps), vec!["foo.example.org", "foo.tmpl.org"]);

        extractor.combine = false;
        let eps = extractor.endpoints(&object, None, no_derivation).unwrap();
        assert_eq!(names(&eps), vec!["foo.example.org"]);

        let eps = extractor
            .endpoints(&view(&[(TARGET_KEY, "1.2.3.4")]), None, no_derivation)
            .unwrap();
        assert_eq!(names(&eps), vec!["foo.tmpl.org"]);
    }

    #[test]
    fn absent_map_key_in_template_keeps_annotated_endpoints() {
        let extractor = Extractor {
            templates: TemplateSet::new(r#"{{ Annotations | get(key="example.org/alt") }}"#, "", "").unwrap(),
            combine: true,
            ..Default::default()
        };
        let eps = extractor
            .endpoints(
                &view(&[(HOSTNAME_KEY, "foo.example.org"), (TARGET_KEY, "1.2.3.4")]),
                None,
                no_derivation,
            )
            .unwrap();
        assert_eq!(names(&eps), vec!["foo.example.org"]);
    }

    #[test]
    fn field_paths_and_target_template() {
        let extractor = Extractor {
            templates: TemplateSet::new("{{ Name }}.example.org", "", "").unwrap(),
            target_paths: vec!["data.target".parse().unwrap()],
            ..Default::default()
        };
        let eps = extractor.endpoints(&view(&[]), None, no_derivation).unwrap();
        assert_eq!(names(&eps), vec!["foo.example.org"]);
        assert_eq!(eps[0].targets, vec!["5.6.7.8"]);

        let extractor = Extractor {
            templates: TemplateSet::new("", "{{ Labels.team }}.lb.example.net", "").unwrap(),
            hostname_paths: vec!["metadata.name".parse().unwrap()],
            ..Default::default()
        };
        let eps = extractor.endpoints(&view(&[]), None, no_derivation).unwrap();
        assert_eq!(names(&eps), vec!["foo"]);
        assert_eq!(eps[0].targets, vec!["web.lb.example.net"]);
    }

    #[test]
    fn host_target_template() {
        let extractor = Extractor {
            templates: TemplateSet::new("", "", "{{ Name }}.example.org:{{ Object.data.target }}, broken").unwrap(),
            ..Default::default()
        };
        let eps = extractor.endpoints(&view(&[]), None, no_derivation).unwrap();
        assert_eq!(names(&eps), vec!["foo.example.org"]);
        assert_eq!(eps[0].targets, vec!["5.6.7.8"]);
    }

    #[test]
    fn default_hostname_only_without_templates() {
        let derive = |_: &str, _: HostnameScope, _: &RecordMeta| Derived::targets(vec!["1.2.3.4".into()]);
        let eps = Extractor::default()
            .endpoints(&view(&[]), Some("node-1"), derive)
            .unwrap();
        assert_eq!(names(&eps), vec!["node-1"]);

        let extractor = Extractor {
            templates: TemplateSet::new("{{ Name }}.nodes.example.org", "", "").unwrap(),
            ..Default::default()
        };
        let eps = extractor.endpoints(&view(&[]), Some("node-1"), derive).unwrap();
        assert_eq!(names(&eps), vec!["foo.nodes.example.org"]);
    }

    #[test]
    fn filter_matches_namespace_labels_and_annotations() {
        let object = view(&[(HOSTNAME_KEY, "a.example.org")]);
        assert!(SourceFilter::default().admits(&object));

        let filter = SourceFilter {
            namespace: Some("other".into()),
            ..Default::default()
        };
        assert!(!filter.admits(&object));

        let config = SourceConfig {
            label_selector: "team=web".into(),
            annotation_filter: HOSTNAME_KEY.into(),
            ..Default::default()
        };
        assert!(SourceFilter::from_config(&config).unwrap().admits(&object));

        let config = SourceConfig {
            annotation_filter: format!("{HOSTNAME_KEY} notin (a.example.org)"),
            ..Default::default()
        };
        assert!(!SourceFilter::from_config(&config).unwrap().admits(&object));
    }
}
