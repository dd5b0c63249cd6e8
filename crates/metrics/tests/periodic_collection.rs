//! Async collection and task-local context propagation.

use std::sync::Arc;
use std::time::Duration;

use nebula_metrics::{
    CollectionEvent, InMemoryPipeline, Meter, MetricsConfig, Number, PeriodicCollector,
    attributes,
};
use tokio_util::sync::CancellationToken;

#[cfg(feature = "async")]
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn context_survives_await_points() {
    use nebula_metrics::Context;

    let pipeline = Arc::new(InMemoryPipeline::new());
    let meter = Meter::new("async", pipeline.clone());
    let counter = meter.counter("async.requests").build();

    let cx = Context::new().with_baggage("tenant", "acme");
    let task_counter = counter.clone();
    tokio::spawn(cx.scope(async move {
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(1)).await;
        task_counter.add(1);
    }))
    .await
    .unwrap();
    counter.add(1);

    let points = pipeline.points();
    assert_eq!(points.len(), 2);
    assert_eq!(
        points[0].context.baggage().get("tenant"),
        Some(&"acme".into())
    );
    assert!(points[1].context.baggage().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn collector_reports_growing_sums() {
    let pipeline = Arc::new(InMemoryPipeline::new());
    let meter = Meter::new("async", pipeline.clone());
    let processed = meter.counter("async.processed").build();
    let source = pipeline.clone();
    let _mirror = meter
        .counter("async.mirror")
        .build_with_callback(move |m| {
            if let Some(Number::Long(total)) =
                source.sum("async", "async.processed", &attributes! { "queue" => "main" })
            {
                m.record_with_attributes(total, &attributes! { "queue" => "main" });
            }
        });

    let config = MetricsConfig::default()
        .with_collection_interval(Duration::from_millis(5))
        .with_callback_timeout(Duration::from_secs(1));
    let cancel = CancellationToken::new();
    let collector = PeriodicCollector::new(pipeline.clone(), config, cancel.clone()).unwrap();
    let mut events = collector.subscribe();
    let handle = collector.start();

    processed.add_with_attributes(3, &attributes! { "queue" => "main" });

    let mut seen = Vec::new();
    while seen.len() < 2 {
        match events.recv().await {
            Some(CollectionEvent::Collected { snapshot, .. }) => {
                if let Some(observation) = snapshot.observations_for("async.mirror").first() {
                    seen.push(observation.value);
                }
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    cancel.cancel();
    let passes = handle.await.unwrap();
    assert!(passes >= 2);
    assert!(seen.iter().all(|value| *value == Number::Long(3)));
}

#[tokio::test]
async fn collect_async_without_callbacks_is_empty() {
    let pipeline = InMemoryPipeline::new();
    let snapshot = pipeline.collect_async(Duration::from_millis(10)).await;
    assert_eq!(snapshot.pass, 1);
    assert_eq!(snapshot.invoked(), 0);
}
