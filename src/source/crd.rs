use super::SourceFilter;
use crate::{
    annotations::AnnotationRules,
    cache::ObjectLister,
    config::ConversionPolicy,
    endpoint::{
        Endpoint,
        Ttl,
        MAX_TTL_SECONDS,
        RESOURCE_LABEL_KEY,
    },
    error::{
        ExtractError,
        SourceError,
    },
    object::ObjectView,
    resources::{
        DNSEndpoint,
        EndpointSpec,
    },
    synth::{
        self,
        RecordMeta,
    },
};
use kube::api::{
    ApiResource,
    DynamicObject,
};
use std::sync::Arc;

/// Publishes the records embedded in `DNSEndpoint` objects as they are written.
pub struct CrdSource {
    objects: Arc<dyn ObjectLister<DynamicObject>>,
    api_resource: ApiResource,
    filter: SourceFilter,
    rules: AnnotationRules,
    policy: ConversionPolicy,
}

impl CrdSource {
    pub fn new(
        objects: Arc<dyn ObjectLister<DynamicObject>>,
        filter: SourceFilter,
        rules: AnnotationRules,
        policy: ConversionPolicy,
    ) -> Self {
        CrdSource {
            objects,
            api_resource: ApiResource::erase::<DNSEndpoint>(&()),
            filter,
            rules,
            policy,
        }
    }

    pub fn endpoints(&self) -> Result<Vec<Endpoint>, SourceError> {
        let mut endpoints = Vec::new();
        for object in self.objects.list()? {
            let view = match ObjectView::from_dynamic(&object, &self.api_resource) {
                Ok(view) => view,
                Err(err) => {
                    self.conversion_failed(err)?;
                    continue;
                }
            };
            let resource = view.resource_label();
            if !self.filter.admits(&view) {
                trace!(%resource, "filtered out");
                continue;
            }
            if let Some(reason) = self.rules.skip_reason(view.annotations()) {
                debug!(%resource, "skipping: {reason}");
                continue;
            }

            let dns_endpoint = match (*object).clone().try_parse::<DNSEndpoint>() {
                Ok(dns_endpoint) => dns_endpoint,
                Err(err) => {
                    self.conversion_failed(ExtractError::Conversion {
                        object: resource,
                        kind: "DNSEndpoint",
                        message: err.to_string(),
                    })?;
                    continue;
                }
            };

            let before = endpoints.len();
            endpoints.extend(
                dns_endpoint
                    .spec
                    .endpoints
                    .iter()
                    .flat_map(|spec| convert_endpoints(spec, &resource)),
            );
            trace!(%resource, count = endpoints.len() - before, "extracted endpoints");
        }

        debug!(count = endpoints.len(), "crd endpoints");
        Ok(endpoints)
    }

    fn conversion_failed(&self, err: ExtractError) -> Result<(), SourceError> {
        match self.policy {
            ConversionPolicy::Skip => {
                warn!("skipping object: {err}");
                Ok(())
            }
            ConversionPolicy::Abort => Err(err.into()),
        }
    }
}

/// Validates one embedded record. Invalid records are dropped with a warning.
///
/// A typed record is published as is and all its targets must match the type. An untyped record is split into one
/// endpoint per target class.
fn convert_endpoints(spec: &EndpointSpec, resource: &str) -> Vec<Endpoint> {
    let name = spec.dns_name.as_str();

    if let Some(target) = spec.targets.iter().find(|target| target.ends_with('.')) {
        warn!(%resource, %name, ?target, "illegal target format, targets must not end with a dot");
        return Vec::new();
    }

    let ttl = match spec.record_ttl {
        Some(ttl) if (0..=MAX_TTL_SECONDS).contains(&ttl) => Ttl::seconds(ttl),
        Some(ttl) => {
            warn!(%resource, %name, "ignoring ttl {ttl} outside of 0..={MAX_TTL_SECONDS}");
            Ttl::UNCONFIGURED
        }
        None => Ttl::UNCONFIGURED,
    };
    let meta = RecordMeta {
        ttl,
        provider_specific: spec.provider_specific.clone(),
        set_identifier: spec.set_identifier.clone().unwrap_or_default(),
        resource: resource.to_string(),
    };

    let endpoints = match spec.record_type {
        Some(record_type) => {
            let Some(endpoint) = Endpoint::new(name, record_type, &spec.targets) else {
                warn!(%resource, %name, "invalid record, empty targets or malformed name");
                return Vec::new();
            };
            if !endpoint.is_well_formed() {
                warn!(%resource, %name, targets = ?spec.targets, "invalid {record_type} targets");
                return Vec::new();
            }
            vec![meta.apply(endpoint)]
        }
        None => {
            let endpoints = synth::endpoints_for_hostname(name, &spec.targets, &meta);
            if endpoints.is_empty() {
                warn!(%resource, %name, "invalid record, no type and no usable targets");
            }
            endpoints
        }
    };

    endpoints
        .into_iter()
        .map(|mut endpoint| {
            endpoint.labels.extend(spec.labels.clone());
            endpoint.with_label(RESOURCE_LABEL_KEY, resource)
        })
        .collect()
}
