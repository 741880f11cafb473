use crate::{
    cache::{
        spawn_reflector,
        CachedLister,
        EventHandlers,
        ObjectLister,
    },
    config::{
        SourceConfig,
        SourceKind,
    },
    error::{
        ConfigError,
        SourceError,
    },
    pipeline::Pipeline,
    resources::DNSEndpoint,
    source::{
        pod::PodOptions,
        service::ServiceOptions,
        unstructured::ResourceId,
        CrdSource,
        Extractor,
        IngressSource,
        NodeSource,
        PodSource,
        ServiceSource,
        Source,
        SourceFilter,
        UnstructuredSource,
    },
};
use k8s_openapi::{
    api::{
        core::v1::{
            Node,
            Pod,
            Service,
        },
        networking::v1::Ingress,
    },
    NamespaceResourceScope,
};
use kube::{
    api::{
        ApiResource,
        DynamicObject,
    },
    core::GroupVersion,
    discovery::{
        self,
        Scope,
    },
    runtime::{
        reflector::{
            self,
            store::Writer,
            Lookup,
        },
        watcher,
    },
    Api,
    Resource,
};
use serde::de::DeserializeOwned;
use std::{
    fmt::Debug,
    hash::Hash,
    sync::Arc,
};

/// Holds what is shared by all sources built against one cluster.
pub struct Context {
    pub client: kube::Client,
    /// Notified on any change of a watched kind.
    pub handlers: EventHandlers,
}

impl Context {
    pub fn new(client: kube::Client) -> Self {
        Context {
            client,
            handlers: EventHandlers::default(),
        }
    }

    /// Validates `config`, starts the caches the configured sources need and waits for their initial sync.
    pub async fn build_pipeline(&self, config: &SourceConfig) -> Result<Pipeline, SourceError> {
        if config.sources.is_empty() {
            return Err(ConfigError::NoSources.into());
        }

        let filter = SourceFilter::from_config(config)?;
        let extractor = Extractor::from_config(config)?;
        let mut listers = Listers {
            ctx: self,
            config,
            nodes: None,
        };

        let mut sources = Vec::new();
        for kind in &config.sources {
            info!(source = ?kind, "starting source");
            let source = match kind {
                SourceKind::Service => Source::Service(ServiceSource::new(
                    listers.namespaced::<Service>("Service", listers.selected()).await?,
                    listers.namespaced::<Pod>("Pod", watcher::Config::default()).await?,
                    listers.nodes().await?,
                    filter.clone(),
                    extractor.clone(),
                    ServiceOptions::from_config(config),
                )),
                SourceKind::Ingress => Source::Ingress(IngressSource::new(
                    listers.namespaced::<Ingress>("Ingress", listers.selected()).await?,
                    filter.clone(),
                    extractor.clone(),
                )),
                SourceKind::Pod => Source::Pod(PodSource::new(
                    listers.namespaced::<Pod>("Pod", listers.selected()).await?,
                    filter.clone(),
                    extractor.clone(),
                    PodOptions::from_config(config),
                )),
                SourceKind::Node => Source::Node(NodeSource::new(listers.nodes().await?, filter.clone(), extractor.clone())),
                SourceKind::Unstructured => {
                    let mut resources = Vec::new();
                    for id in &config.unstructured_resources {
                        let id = id.parse::<ResourceId>()?;
                        let (api_resource, namespaced) = self.discover(&id).await?;
                        let lister = listers.dynamic(&api_resource, namespaced).await?;
                        resources.push((api_resource, lister));
                    }
                    if resources.is_empty() {
                        warn!("unstructured source without resources publishes nothing");
                    }
                    Source::Unstructured(UnstructuredSource::new(resources, filter.clone(), extractor.clone()))
                }
                SourceKind::Crd => {
                    let api_resource = ApiResource::erase::<DNSEndpoint>(&());
                    Source::Crd(CrdSource::new(
                        listers.dynamic(&api_resource, true).await?,
                        filter.clone(),
                        extractor.rules.clone(),
                        config.conversion_policy,
                    ))
                }
            };
            sources.push(source);
        }

        Ok(Pipeline::new(sources, config.merge_precedence, self.handlers.clone()))
    }

    /// Resolves a resource identifier into its API resource and whether it is namespaced.
    async fn discover(&self, id: &ResourceId) -> Result<(ApiResource, bool), SourceError> {
        let group = discovery::pinned_group(&self.client, &GroupVersion::gv(&id.group, &id.version)).await?;
        group
            .versioned_resources(&id.version)
            .into_iter()
            .find(|(api_resource, _)| api_resource.plural == id.resource)
            .map(|(api_resource, caps)| {
                debug!(resource = %id, kind = %api_resource.kind, "discovered resource");
                (api_resource, matches!(caps.scope, Scope::Namespaced))
            })
            .ok_or_else(|| SourceError::ResourceNotFound {
                resource: id.resource.clone(),
                group_version: id.group_version(),
            })
    }
}

/// Starts the reflectors a pipeline needs. The node cache is shared by the service and node sources.
struct Listers<'a> {
    ctx: &'a Context,
    config: &'a SourceConfig,
    nodes: Option<Arc<dyn ObjectLister<Node>>>,
}

impl Listers<'_> {
    /// Watch configuration for published kinds, narrowed by the label selector on the server.
    fn selected(&self) -> watcher::Config {
        let config = watcher::Config::default();
        match self.config.label_selector.trim() {
            "" => config,
            selector => config.labels(selector),
        }
    }

    fn namespace(&self) -> Option<&str> {
        self.config.namespace.as_deref().filter(|ns| !ns.is_empty())
    }

    async fn namespaced<K>(&self, kind: &str, config: watcher::Config) -> Result<Arc<dyn ObjectLister<K>>, SourceError>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Clone
            + DeserializeOwned
            + Debug
            + Send
            + Sync
            + 'static,
    {
        let api = match self.namespace() {
            Some(namespace) => Api::<K>::namespaced(self.ctx.client.clone(), namespace),
            None => Api::<K>::all(self.ctx.client.clone()),
        };
        let (_, writer) = reflector::store::<K>();
        self.synced(spawn_reflector(kind, api, config, writer, self.ctx.handlers.clone()))
            .await
    }

    /// Node labels are matched on the client, the service source needs every node.
    async fn nodes(&mut self) -> Result<Arc<dyn ObjectLister<Node>>, SourceError> {
        if let Some(nodes) = &self.nodes {
            return Ok(nodes.clone());
        }
        let (_, writer) = reflector::store::<Node>();
        let api = Api::<Node>::all(self.ctx.client.clone());
        let nodes = self
            .synced(spawn_reflector("Node", api, watcher::Config::default(), writer, self.ctx.handlers.clone()))
            .await?;
        self.nodes = Some(nodes.clone());
        Ok(nodes)
    }

    async fn dynamic(
        &self,
        api_resource: &ApiResource,
        namespaced: bool,
    ) -> Result<Arc<dyn ObjectLister<DynamicObject>>, SourceError> {
        let api = match self.namespace() {
            Some(namespace) if namespaced => Api::namespaced_with(self.ctx.client.clone(), namespace, api_resource),
            _ => Api::all_with(self.ctx.client.clone(), api_resource),
        };
        let writer = Writer::new(api_resource.clone());
        let lister = spawn_reflector(
            api_resource.kind.clone(),
            api,
            self.selected(),
            writer,
            self.ctx.handlers.clone(),
        );
        self.synced(lister).await
    }

    async fn synced<K>(&self, lister: CachedLister<K>) -> Result<Arc<dyn ObjectLister<K>>, SourceError>
    where
        K: Lookup + Clone + Send + Sync + 'static,
        K::DynamicType: Eq + Hash + Clone + Send + Sync,
    {
        lister.wait_for_sync(self.config.cache_sync_timeout).await?;
        Ok(Arc::new(lister))
    }
}
