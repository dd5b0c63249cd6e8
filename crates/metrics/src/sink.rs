//! Boundary between instruments and the collection pipeline.
//!
//! Instruments only ever talk to a [`MeasurementSink`]. Aggregation,
//! temporality and export are the sink's business.

use std::sync::Arc;

use crate::attributes::AttributeSet;
use crate::context::Context;
use crate::instrument::InstrumentDescriptor;
use crate::number::Number;
use crate::observable::{CallbackRegistration, RegistrationId};
use crate::point::DataPoint;

/// Receiver of validated measurements and callback registrations.
///
/// Implementations must tolerate concurrent calls from any number of
/// threads, and `record` must not block.
pub trait MeasurementSink: Send + Sync {
    /// Accept one synchronous data point.
    fn record(&self, point: DataPoint);

    /// Resolve `attributes` for `instrument` into a handle that records
    /// without per-call attribute lookups.
    ///
    /// Returning `None` (the default) makes bound counters fall back to
    /// [`ForwardingBoundSink`], which calls [`record`](Self::record).
    fn bind(
        &self,
        instrument: &Arc<InstrumentDescriptor>,
        attributes: &AttributeSet,
    ) -> Option<Arc<dyn BoundSink>> {
        let _ = (instrument, attributes);
        None
    }

    /// Start invoking `registration` on every collection pass.
    fn register_callback(&self, registration: Arc<CallbackRegistration>);

    /// Stop invoking the registration with `id`. Unknown ids are ignored.
    fn unregister_callback(&self, id: RegistrationId);
}

/// Pre-resolved recording destination for one `(instrument, attributes)`
/// series.
pub trait BoundSink: Send + Sync {
    /// Record an already validated value.
    fn record(&self, value: Number, context: &Context);
}

/// Bound handle for sinks that do not pre-resolve series.
pub struct ForwardingBoundSink {
    sink: Arc<dyn MeasurementSink>,
    instrument: Arc<InstrumentDescriptor>,
    attributes: AttributeSet,
}

impl ForwardingBoundSink {
    /// Forward to `sink` with fixed `instrument` and `attributes`.
    pub fn new(
        sink: Arc<dyn MeasurementSink>,
        instrument: Arc<InstrumentDescriptor>,
        attributes: AttributeSet,
    ) -> Self {
        Self {
            sink,
            instrument,
            attributes,
        }
    }
}

impl BoundSink for ForwardingBoundSink {
    fn record(&self, value: Number, context: &Context) {
        self.sink.record(DataPoint {
            instrument: Arc::clone(&self.instrument),
            value,
            attributes: self.attributes.clone(),
            context: context.clone(),
        });
    }
}

/// Sink that discards everything.
///
/// Backs [`crate::Meter::noop`] and instruments whose registration was
/// rejected by the meter.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl NoopSink {
    /// Create a noop sink.
    pub fn new() -> Self {
        Self
    }

    /// Create as an `Arc<dyn MeasurementSink>` for dependency injection.
    pub fn arc() -> Arc<dyn MeasurementSink> {
        Arc::new(Self)
    }
}

impl MeasurementSink for NoopSink {
    fn record(&self, _point: DataPoint) {}

    fn register_callback(&self, _registration: Arc<CallbackRegistration>) {}

    fn unregister_callback(&self, _id: RegistrationId) {}
}
