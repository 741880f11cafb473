//! One extraction cycle over all configured sources.

use crate::{
    cache::{
        EventHandler,
        EventHandlers,
    },
    config::MergePrecedence,
    endpoint::Endpoint,
    error::SourceError,
    merge::merge_endpoints,
    source::Source,
};
use futures::future::try_join_all;
use std::sync::Arc;

/// The configured sources plus the merge policy applied to their combined output.
pub struct Pipeline {
    sources: Vec<Arc<Source>>,
    precedence: MergePrecedence,
    handlers: EventHandlers,
}

impl Pipeline {
    pub fn new(sources: Vec<Source>, precedence: MergePrecedence, handlers: EventHandlers) -> Self {
        Pipeline {
            sources: sources.into_iter().map(Arc::new).collect(),
            precedence,
            handlers,
        }
    }

    pub fn source_names(&self) -> Vec<&'static str> {
        self.sources.iter().map(|source| source.name()).collect()
    }

    /// Registers a callback invoked whenever one of the watched kinds changes.
    pub fn add_event_handler(&self, handler: EventHandler) {
        self.handlers.add(handler);
    }

    /// Runs every source on the blocking pool and merges once all of them finished. A failing source fails the
    /// whole cycle.
    pub async fn endpoints(&self) -> Result<Vec<Endpoint>, SourceError> {
        let tasks = self.sources.iter().cloned().map(|source| async move {
            let name = source.name();
            let endpoints = tokio::task::spawn_blocking(move || source.endpoints()).await??;
            trace!(source = name, count = endpoints.len(), "source finished");
            Ok::<_, SourceError>(endpoints)
        });

        let endpoints = try_join_all(tasks).await?.into_iter().flatten().collect::<Vec<_>>();
        let merged = merge_endpoints(endpoints, self.precedence);
        debug!(count = merged.len(), "extraction cycle complete");
        Ok(merged)
    }

    /// Same as [`Pipeline::endpoints`] on the calling thread, one source after the other.
    pub fn endpoints_blocking(&self) -> Result<Vec<Endpoint>, SourceError> {
        let mut endpoints = Vec::new();
        for source in &self.sources {
            endpoints.extend(source.endpoints()?);
        }
        Ok(merge_endpoints(endpoints, self.precedence))
    }
}
