use crate::{
    endpoint::Endpoint,
    pipeline::Pipeline,
};
use futures::Stream;
use std::{
    ops::ControlFlow,
    sync::Arc,
    time::Duration,
};
use tokio::{
    sync::mpsc::{
        self,
        error::TrySendError,
    },
    time::{
        Instant,
        MissedTickBehavior,
    },
};

/// When to re-run the extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchConfig {
    /// Periodic re-extraction, independent of change notifications.
    pub interval: Duration,
    /// Change notifications arriving faster than this are coalesced into one extraction.
    pub min_interval: Duration,
}

impl Default for WatchConfig {
    fn default() -> Self {
        WatchConfig {
            interval: Duration::from_secs(60),
            min_interval: Duration::from_secs(5),
        }
    }
}

/// Yields the merged endpoint set once at start and then whenever it differs from the previously yielded set.
///
/// Failed cycles are logged and retried on the next trigger. The change handler registered on the pipeline is
/// removed on the first notification after the stream was dropped.
pub fn watch_endpoints(pipeline: Arc<Pipeline>, config: WatchConfig) -> impl Stream<Item = Vec<Endpoint>> + Send + 'static {
    let (change_tx, mut change_rx) = mpsc::channel::<()>(1);
    pipeline.add_event_handler(Arc::new(move || match change_tx.try_send(()) {
        // a pending notification already covers this change
        Ok(()) | Err(TrySendError::Full(())) => ControlFlow::Continue(()),
        Err(TrySendError::Closed(())) => ControlFlow::Break(()),
    }));

    async_stream::stream! {
        let mut timer = tokio::time::interval(config.interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut last_run: Option<Instant> = None;
        let mut published: Option<Vec<Endpoint>> = None;

        loop {
            tokio::select! {
                _ = timer.tick() => {
                    trace!("periodic extraction");
                },

                Some(()) = change_rx.recv() => {
                    if let Some(last_run) = last_run {
                        tokio::time::sleep_until(last_run + config.min_interval).await;
                    }
                    // changes seen while waiting are part of this run
                    while change_rx.try_recv().is_ok() {}
                    trace!("extraction after change notification");
                },
            }

            last_run = Some(Instant::now());
            let endpoints = match pipeline.endpoints().await {
                Ok(endpoints) => endpoints,
                Err(err) => {
                    error!("Failed to extract endpoints: {err}");
                    continue;
                }
            };

            if published.as_ref() == Some(&endpoints) {
                debug!(count = endpoints.len(), "endpoints unchanged");
                continue;
            }

            info!(count = endpoints.len(), "endpoints changed");
            published = Some(endpoints.clone());
            yield endpoints;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        annotations::{
            HOSTNAME_KEY,
            TARGET_KEY,
        },
        cache::{
            EventHandlers,
            ObjectLister,
        },
        config::MergePrecedence,
        error::SourceError,
        source::{
            Extractor,
            NodeSource,
            Source,
            SourceFilter,
        },
    };
    use futures::StreamExt as _;
    use k8s_openapi::api::core::v1::Node;
    use kube::api::ObjectMeta;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MutableLister {
        nodes: Mutex<Vec<Arc<Node>>>,
    }

    impl MutableLister {
        fn set_target(&self, target: &str) {
            let node = Node {
                metadata: ObjectMeta {
                    name: Some("n1".into()),
                    annotations: Some(
                        [
                            (HOSTNAME_KEY.to_string(), "n1.example.org".to_string()),
                            (TARGET_KEY.to_string(), target.to_string()),
                        ]
                        .into(),
                    ),
                    ..Default::default()
                },
                ..Default::default()
            };
            *self.nodes.lock().unwrap() = vec![Arc::new(node)];
        }
    }

    impl ObjectLister<Node> for MutableLister {
        fn list(&self) -> Result<Vec<Arc<Node>>, SourceError> {
            Ok(self.nodes.lock().unwrap().clone())
        }
    }

    fn setup() -> (Arc<MutableLister>, EventHandlers, Arc<Pipeline>) {
        let lister = Arc::new(MutableLister::default());
        lister.set_target("1.2.3.4");
        let handlers = EventHandlers::default();
        let source = Source::Node(NodeSource::new(
            lister.clone(),
            SourceFilter::default(),
            Extractor::default(),
        ));
        let pipeline = Pipeline::new(vec![source], MergePrecedence::default(), handlers.clone());
        (lister, handlers, Arc::new(pipeline))
    }

    const CONFIG: WatchConfig = WatchConfig {
        interval: Duration::from_secs(3600),
        min_interval: Duration::from_millis(10),
    };

    #[tokio::test]
    async fn yields_initial_and_changed_sets() {
        let (lister, handlers, pipeline) = setup();
        let mut stream = Box::pin(watch_endpoints(pipeline, CONFIG));

        let first = stream.next().await.unwrap();
        assert_eq!(first[0].targets, vec!["1.2.3.4"]);

        lister.set_target("1.2.3.5");
        handlers.notify();
        let second = tokio::time::timeout(Duration::from_secs(5), stream.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(second[0].targets, vec!["1.2.3.5"]);
    }

    #[tokio::test]
    async fn unchanged_sets_are_not_yielded() {
        let (_lister, handlers, pipeline) = setup();
        let mut stream = Box::pin(watch_endpoints(pipeline, CONFIG));
        stream.next().await.unwrap();

        handlers.notify();
        handlers.notify();
        let next = tokio::time::timeout(Duration::from_millis(200), stream.next()).await;
        assert!(next.is_err());
    }

    #[tokio::test]
    async fn dropped_stream_deregisters_its_handler() {
        let (_lister, handlers, pipeline) = setup();
        let first = Box::pin(watch_endpoints(pipeline.clone(), CONFIG));
        let mut second = Box::pin(watch_endpoints(pipeline, CONFIG));
        assert_eq!(handlers.len(), 2);

        drop(first);
        handlers.notify();
        assert_eq!(handlers.len(), 1);

        second.next().await.unwrap();
        handlers.notify();
        assert_eq!(handlers.len(), 1);
    }
}
