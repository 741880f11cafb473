//! Object listing and change notification backed by kube reflectors.

use crate::error::SourceError;
use futures::StreamExt as _;
use kube::{
    runtime::{
        reflector::{
            self,
            store::Writer,
            Lookup,
            Store,
        },
        watcher,
        WatchStreamExt as _,
    },
    Api,
    Resource,
};
use serde::de::DeserializeOwned;
use std::{
    fmt::Debug,
    hash::Hash,
    ops::ControlFlow,
    sync::{
        atomic::{
            AtomicBool,
            Ordering,
        },
        Arc,
        PoisonError,
        RwLock,
    },
    time::Duration,
};

/// Snapshot access to the objects of one kind.
pub trait ObjectLister<K>: Send + Sync {
    fn list(&self) -> Result<Vec<Arc<K>>, SourceError>;
}

/// A fixed set of objects.
pub struct StaticLister<K> {
    items: Vec<Arc<K>>,
}

impl<K> StaticLister<K> {
    pub fn new(items: impl IntoIterator<Item = K>) -> Self {
        StaticLister {
            items: items.into_iter().map(Arc::new).collect(),
        }
    }
}

impl<K: Send + Sync> ObjectLister<K> for StaticLister<K> {
    fn list(&self) -> Result<Vec<Arc<K>>, SourceError> {
        Ok(self.items.clone())
    }
}

/// A reflector store whose watch task reports whether it is still running.
pub struct CachedLister<K>
where
    K: Lookup + Clone + 'static,
    K::DynamicType: Eq + Hash + Clone,
{
    kind: String,
    store: Store<K>,
    running: Arc<AtomicBool>,
}

impl<K> CachedLister<K>
where
    K: Lookup + Clone + 'static,
    K::DynamicType: Eq + Hash + Clone,
{
    /// Blocks until the initial listing has been received, at most `timeout`.
    pub async fn wait_for_sync(&self, timeout: Duration) -> Result<(), SourceError> {
        wait_for_cache_sync(&self.store, &self.kind, timeout).await
    }
}

impl<K> ObjectLister<K> for CachedLister<K>
where
    K: Lookup + Clone + Send + Sync + 'static,
    K::DynamicType: Eq + Hash + Clone + Send + Sync,
{
    fn list(&self) -> Result<Vec<Arc<K>>, SourceError> {
        if !self.running.load(Ordering::Acquire) {
            return Err(SourceError::CacheStopped {
                kind: self.kind.clone(),
            });
        }
        Ok(self.store.state())
    }
}

/// A handler returning `Break` is removed from its `EventHandlers`.
pub type EventHandler = Arc<dyn Fn() -> ControlFlow<()> + Send + Sync>;

/// Callbacks invoked on any add, update or delete seen by a reflector. Calls are not coalesced.
#[derive(Clone, Default)]
pub struct EventHandlers {
    handlers: Arc<RwLock<Vec<EventHandler>>>,
}

impl EventHandlers {
    pub fn add(&self, handler: EventHandler) {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handler);
    }

    pub fn notify(&self) {
        let handlers = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let finished = handlers
            .into_iter()
            .filter(|handler| handler().is_break())
            .collect::<Vec<_>>();
        if finished.is_empty() {
            return;
        }

        trace!(count = finished.len(), "removing finished event handlers");
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|handler| !finished.iter().any(|done| Arc::ptr_eq(done, handler)));
    }

    pub fn len(&self) -> usize {
        self.handlers.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for EventHandlers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventHandlers").field("len", &self.len()).finish()
    }
}

/// Starts a reflector for `api` on the tokio runtime. Events are forwarded to `handlers`.
pub fn spawn_reflector<K>(
    kind: impl Into<String>,
    api: Api<K>,
    config: watcher::Config,
    writer: Writer<K>,
    handlers: EventHandlers,
) -> CachedLister<K>
where
    K: Resource + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
    K::DynamicType: Eq + Hash + Clone + Send + Sync,
{
    let kind = kind.into();
    let store = writer.as_reader();
    let running = Arc::new(AtomicBool::new(true));

    let stream = reflector::reflector(writer, watcher(api, config)).default_backoff();
    let task_kind = kind.clone();
    let task_running = running.clone();
    tokio::spawn(async move {
        let mut stream = std::pin::pin!(stream);
        while let Some(event) = stream.next().await {
            match event {
                Ok(watcher::Event::Apply(_) | watcher::Event::Delete(_)) => handlers.notify(),
                Ok(watcher::Event::InitDone) => debug!(kind = %task_kind, "initial listing complete"),
                Ok(_) => {}
                Err(err) => warn!(kind = %task_kind, "watch failed: {err}"),
            }
        }
        task_running.store(false, Ordering::Release);
        error!(kind = %task_kind, "reflector stopped");
    });

    CachedLister { kind, store, running }
}

pub async fn wait_for_cache_sync<K>(store: &Store<K>, kind: &str, timeout: Duration) -> Result<(), SourceError>
where
    K: Lookup + Clone + 'static,
    K::DynamicType: Eq + Hash + Clone,
{
    match tokio::time::timeout(timeout, store.wait_until_ready()).await {
        Ok(Ok(())) => {
            debug!(%kind, "cache synced");
            Ok(())
        }
        Ok(Err(_)) => Err(SourceError::CacheStopped { kind: kind.to_string() }),
        Err(_) => Err(SourceError::CacheSyncTimeout {
            kind: kind.to_string(),
            timeout,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::Service;
    use kube::api::ObjectMeta;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn static_lister_returns_items() {
        let lister = StaticLister::new([Service {
            metadata: ObjectMeta {
                name: Some("web".into()),
                ..Default::default()
            },
            ..Default::default()
        }]);
        let items = lister.list().unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].metadata.name.as_deref(), Some("web"));
    }

    #[test]
    fn handlers_are_all_notified() {
        let handlers = EventHandlers::default();
        let count = Arc::new(AtomicUsize::new(0));
        for _ in 0..2 {
            let count = count.clone();
            handlers.add(Arc::new(move || {
                count.fetch_add(1, Ordering::SeqCst);
                ControlFlow::Continue(())
            }));
        }
        handlers.clone().notify();
        assert_eq!(handlers.len(), 2);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn finished_handlers_are_removed() {
        let handlers = EventHandlers::default();
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        handlers.add(Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            ControlFlow::Continue(())
        }));
        handlers.add(Arc::new(|| ControlFlow::Break(())));
        assert_eq!(handlers.len(), 2);

        handlers.notify();
        assert_eq!(handlers.len(), 1);
        handlers.notify();
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn unsynced_store_times_out() {
        let (store, _writer) = reflector::store::<Service>();
        let err = wait_for_cache_sync(&store, "Service", Duration::from_millis(10))
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::CacheSyncTimeout { .. }));
    }

    #[tokio::test]
    async fn dropped_writer_stops_the_cache() {
        let (store, writer) = reflector::store::<Service>();
        drop(writer);
        let err = wait_for_cache_sync(&store, "Service", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::CacheStopped { .. }));
    }
}
