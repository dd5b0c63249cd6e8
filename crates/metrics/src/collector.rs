//! Background collection on a fixed interval.

use std::sync::Arc;
use std::time::Instant;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::MetricsConfig;
use crate::error::Result;
use crate::event::{CollectionEvent, EventBus, EventSubscriber};
use crate::pipeline::{InMemoryPipeline, millis};

/// Runs [`InMemoryPipeline::collect_async`] every `collection_interval` and
/// publishes each snapshot on an [`EventBus`].
///
/// Each callback gets `callback_timeout`. The loop stops when the
/// cancellation token fires, either through [`shutdown`](Self::shutdown) or
/// a parent token. A pass already in flight is finished and published
/// first; it is bounded by `callback_timeout`.
pub struct PeriodicCollector {
    pipeline: Arc<InMemoryPipeline>,
    config: MetricsConfig,
    bus: Arc<EventBus>,
    cancel: CancellationToken,
}

impl PeriodicCollector {
    /// Create a collector for `pipeline`.
    ///
    /// Fails if `config` does not validate.
    pub fn new(
        pipeline: Arc<InMemoryPipeline>,
        config: MetricsConfig,
        cancel: CancellationToken,
    ) -> Result<Self> {
        config.validate()?;
        let bus = Arc::new(EventBus::new(config.event_capacity));
        Ok(Self {
            pipeline,
            config,
            bus,
            cancel,
        })
    }

    /// Subscribe to collection events.
    pub fn subscribe(&self) -> EventSubscriber {
        self.bus.subscribe()
    }

    /// Spawn the collection loop on the current runtime.
    ///
    /// The handle resolves to the number of passes run once the loop exits.
    pub fn start(&self) -> JoinHandle<u64> {
        let pipeline = Arc::clone(&self.pipeline);
        let bus = Arc::clone(&self.bus);
        let cancel = self.cancel.clone();
        let interval = self.config.collection_interval;
        let budget = self.config.callback_timeout;

        tokio::spawn(async move {
            let mut passes = 0_u64;
            tracing::debug!(interval_ms = millis(interval), "periodic collector started");

            loop {
                tokio::select! {
                    () = tokio::time::sleep(interval) => {}
                    () = cancel.cancelled() => break,
                }

                let started = Instant::now();
                let snapshot = pipeline.collect_async(budget).await;
                passes += 1;
                bus.emit(CollectionEvent::Collected {
                    snapshot: Arc::new(snapshot),
                    elapsed: started.elapsed(),
                });
            }

            bus.emit(CollectionEvent::Stopped { passes });
            tracing::debug!(passes, "periodic collector stopped");
            passes
        })
    }

    /// Stop the collection loop. A pass in flight completes and is published
    /// before [`CollectionEvent::Stopped`].
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for PeriodicCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeriodicCollector")
            .field("config", &self.config)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::meter::Meter;
    use crate::number::Number;

    fn fast_config() -> MetricsConfig {
        MetricsConfig::default()
            .with_collection_interval(Duration::from_millis(10))
            .with_callback_timeout(Duration::from_secs(1))
    }

    #[test]
    fn invalid_config_is_rejected() {
        let result = PeriodicCollector::new(
            Arc::new(InMemoryPipeline::new()),
            MetricsConfig::default().with_event_capacity(0),
            CancellationToken::new(),
        );
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn publishes_snapshots_until_shutdown() {
        let pipeline = Arc::new(InMemoryPipeline::new());
        let meter = Meter::new("test", pipeline.clone());
        let _observable = meter
            .counter("collector.value")
            .build_with_callback(|m| m.record(9));

        let collector =
            PeriodicCollector::new(pipeline.clone(), fast_config(), CancellationToken::new()).unwrap();
        let mut events = collector.subscribe();
        let handle = collector.start();

        let Some(CollectionEvent::Collected { snapshot, .. }) = events.recv().await else {
            panic!("expected a collected event");
        };
        assert_eq!(snapshot.observations_for("collector.value")[0].value, Number::Long(9));

        collector.shutdown();
        let passes = handle.await.unwrap();
        assert!(passes >= 1);
        assert!(pipeline.pass_count() >= passes);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn shutdown_finishes_the_pass_in_flight() {
        let pipeline = Arc::new(InMemoryPipeline::new());
        let meter = Meter::new("test", pipeline.clone());
        let entered = Arc::new(tokio::sync::Notify::new());
        let signal = Arc::clone(&entered);
        let _slow = meter.counter("collector.slow").build_with_callback(move |m| {
            signal.notify_one();
            std::thread::sleep(Duration::from_millis(100));
            m.record(4);
        });

        let collector =
            PeriodicCollector::new(pipeline, fast_config(), CancellationToken::new()).unwrap();
        let mut events = collector.subscribe();
        let handle = collector.start();

        entered.notified().await;
        collector.shutdown();

        assert_eq!(handle.await.unwrap(), 1);
        let Some(CollectionEvent::Collected { snapshot, .. }) = events.recv().await else {
            panic!("expected the in-flight pass to be published");
        };
        assert_eq!(snapshot.observations_for("collector.slow")[0].value, Number::Long(4));
        assert!(matches!(events.recv().await, Some(CollectionEvent::Stopped { passes: 1 })));
    }

    #[tokio::test]
    async fn parent_token_stops_the_loop() {
        let parent = CancellationToken::new();
        let collector = PeriodicCollector::new(
            Arc::new(InMemoryPipeline::new()),
            MetricsConfig::default(),
            parent.child_token(),
        )
        .unwrap();
        let mut events = collector.subscribe();
        let handle = collector.start();

        parent.cancel();

        assert_eq!(handle.await.unwrap(), 0);
        assert!(matches!(events.recv().await, Some(CollectionEvent::Stopped { passes: 0 })));
    }
}
