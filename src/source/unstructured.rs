use super::{
    recover,
    Derived,
    Extractor,
    SourceFilter,
};
use crate::{
    cache::ObjectLister,
    endpoint::Endpoint,
    error::{
        ConfigError,
        SourceError,
    },
    object::ObjectView,
};
use kube::api::{
    ApiResource,
    DynamicObject,
};
use std::{
    fmt,
    str::FromStr,
    sync::Arc,
};

/// Identifies a resource as `resource.version.group`, e.g. `certificates.v1.cert-manager.io` or `configmaps.v1` for
/// the core group.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceId {
    pub resource: String,
    pub version: String,
    pub group: String,
}

impl ResourceId {
    pub fn group_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.group.is_empty() {
            write!(f, "{}.{}", self.resource, self.version)
        } else {
            write!(f, "{}.{}.{}", self.resource, self.version, self.group)
        }
    }
}

impl FromStr for ResourceId {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::ResourceId(s.to_string());

        let mut parts = s.trim().splitn(3, '.');
        let resource = parts.next().filter(|r| !r.is_empty()).ok_or_else(invalid)?;
        let version = parts.next().ok_or_else(invalid)?;
        let group = parts.next().unwrap_or_default();

        let version_ok = version.starts_with('v') && version[1..].starts_with(|c: char| c.is_ascii_digit());
        if !version_ok || resource.contains('/') {
            return Err(invalid());
        }
        if !group.is_empty() && group.split('.').any(str::is_empty) {
            return Err(invalid());
        }

        Ok(ResourceId {
            resource: resource.to_lowercase(),
            version: version.to_string(),
            group: group.to_string(),
        })
    }
}

/// Publishes arbitrary resources. Hostnames and targets come only from annotations, field paths and templates.
pub struct UnstructuredSource {
    resources: Vec<(ApiResource, Arc<dyn ObjectLister<DynamicObject>>)>,
    filter: SourceFilter,
    extractor: Extractor,
}

impl UnstructuredSource {
    pub fn new(
        resources: Vec<(ApiResource, Arc<dyn ObjectLister<DynamicObject>>)>,
        filter: SourceFilter,
        extractor: Extractor,
    ) -> Self {
        UnstructuredSource {
            resources,
            filter,
            extractor,
        }
    }

    pub fn endpoints(&self) -> Result<Vec<Endpoint>, SourceError> {
        let mut endpoints = Vec::new();
        for (api_resource, lister) in &self.resources {
            for object in lister.list()? {
                let view = match ObjectView::from_dynamic(&object, api_resource) {
                    Ok(view) => view,
                    Err(err) => {
                        warn!(kind = %api_resource.kind, "skipping object: {err}");
                        continue;
                    }
                };
                if !self.filter.admits(&view) {
                    trace!(object = %view.resource_label(), "filtered out");
                    continue;
                }

                let result = self.extractor.endpoints(&view, None, |_, _, _| Derived::default());
                endpoints.extend(recover(&api_resource.kind, &view.resource_label(), result));
            }
        }

        debug!(count = endpoints.len(), "unstructured endpoints");
        Ok(endpoints)
    }
}
