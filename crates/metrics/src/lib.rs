#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! # Nebula Metrics
//!
//! Counter instruments for the Nebula workflow engine.
//!
//! This crate provides:
//! - [`Meter`] -- hands out [`CounterBuilder`]s and deduplicates instruments
//! - [`Counter`] / [`BoundCounter`] -- synchronous monotonic counters
//! - [`ObservableCounter`] -- callback-driven counters sampled per pass
//! - [`AttributeSet`] / [`Context`] -- series dimensions and correlation context
//! - [`InMemoryPipeline`] / [`PeriodicCollector`] -- a reference collection pipeline
//!
//! Recording never fails visibly: invalid values are dropped and reported
//! through [`diagnostics`].
//!
//! ```
//! use std::sync::Arc;
//! use nebula_metrics::{InMemoryPipeline, Meter, Number, attributes};
//!
//! let pipeline = Arc::new(InMemoryPipeline::new());
//! let meter = Meter::new("executor", pipeline.clone());
//!
//! let runs = meter.counter("workflow.runs").with_unit("1").build();
//! let attrs = attributes! { "workflow" => "ingest", "retry" => false };
//! runs.add_with_attributes(1, &attrs);
//! runs.bind(attrs.clone()).add(2);
//!
//! assert_eq!(pipeline.sum("executor", "workflow.runs", &attrs), Some(Number::Long(3)));
//! ```

pub mod attributes;
pub mod builder;
pub mod collector;
pub mod config;
pub mod context;
pub mod counter;
pub mod diagnostics;
pub mod error;
pub mod event;
pub mod instrument;
pub mod meter;
pub mod number;
pub mod observable;
pub mod pipeline;
pub mod point;
pub mod sink;

pub use attributes::{AttributeSet, AttributeValue, AttributesBuilder, KeyValue};
pub use builder::CounterBuilder;
pub use collector::PeriodicCollector;
pub use config::MetricsConfig;
pub use context::Context;
pub use counter::{BoundCounter, Counter};
pub use error::{MetricsError, Result};
pub use event::{CollectionEvent, EventBus, EventSubscriber};
pub use instrument::{InstrumentDescriptor, InstrumentId, InstrumentKind, NumberKind};
pub use meter::Meter;
pub use number::{CounterValue, Number};
pub use observable::{CallbackRegistration, ObservableCounter, ObservableMeasurement, RegistrationId};
pub use pipeline::{CallbackOutcome, CollectionSnapshot, InMemoryPipeline, SeriesKey, SeriesSnapshot};
pub use point::{DataPoint, Observation};
pub use sink::{BoundSink, ForwardingBoundSink, MeasurementSink, NoopSink};

/// Build an [`AttributeSet`] from `key => value` pairs.
///
/// ```
/// use nebula_metrics::attributes;
///
/// let set = attributes! { "region" => "us", "shard" => 3_i64 };
/// assert_eq!(set.len(), 2);
/// assert!(attributes! {}.is_empty());
/// ```
#[macro_export]
macro_rules! attributes {
    () => {
        $crate::AttributeSet::empty()
    };
    ($($key:expr => $value:expr),+ $(,)?) => {
        <$crate::AttributeSet as ::core::iter::FromIterator<$crate::KeyValue>>::from_iter([
            $($crate::KeyValue::new($key, $value)),+
        ])
    };
}
