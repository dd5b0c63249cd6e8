//! Synchronous monotonic counters.
//!
//! [`Counter`] forwards every valid increment to its sink immediately and
//! keeps no value state of its own. [`BoundCounter`] fixes the attribute set
//! up front so the sink can skip per-call attribute resolution.
//!
//! Increments must be non-negative. A negative (or NaN) increment is dropped
//! and reported through [`diagnostics`](crate::diagnostics); it never panics
//! and never returns an error to the caller.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::attributes::AttributeSet;
use crate::context::Context;
use crate::diagnostics;
use crate::error::MetricsError;
use crate::instrument::InstrumentDescriptor;
use crate::number::CounterValue;
use crate::point::DataPoint;
use crate::sink::{BoundSink, ForwardingBoundSink, MeasurementSink};

const NEGATIVE_INCREMENT: &str = "counters only accept non-negative increments";

fn reject<T: CounterValue>(instrument: &InstrumentDescriptor, value: T) {
    diagnostics::handle_error(MetricsError::InvalidMeasurement {
        instrument: instrument.name().to_owned(),
        value: value.into_number(),
        reason: NEGATIVE_INCREMENT,
    });
}

/// A monotonic counter. `Counter<i64>` is the long variant, `Counter<f64>`
/// the double variant.
///
/// Thread-safe; clones share the same instrument.
pub struct Counter<T> {
    instrument: Arc<InstrumentDescriptor>,
    sink: Arc<dyn MeasurementSink>,
    _marker: PhantomData<fn(T)>,
}

impl<T> Clone for Counter<T> {
    fn clone(&self) -> Self {
        Self {
            instrument: Arc::clone(&self.instrument),
            sink: Arc::clone(&self.sink),
            _marker: PhantomData,
        }
    }
}

impl<T: CounterValue> Counter<T> {
    pub(crate) fn new(instrument: Arc<InstrumentDescriptor>, sink: Arc<dyn MeasurementSink>) -> Self {
        Self {
            instrument,
            sink,
            _marker: PhantomData,
        }
    }

    /// Instrument metadata.
    pub fn descriptor(&self) -> &InstrumentDescriptor {
        &self.instrument
    }

    /// Add `value` with no attributes, under the ambient context.
    pub fn add(&self, value: T) {
        self.add_with_context(value, &AttributeSet::empty(), &Context::current());
    }

    /// Add `value` for `attributes`, under the ambient context.
    pub fn add_with_attributes(&self, value: T, attributes: &AttributeSet) {
        self.add_with_context(value, attributes, &Context::current());
    }

    /// Add `value` for `attributes` under an explicit `context`.
    ///
    /// The ambient context is not consulted.
    pub fn add_with_context(&self, value: T, attributes: &AttributeSet, context: &Context) {
        if !value.is_valid_increment() {
            reject(&self.instrument, value);
            return;
        }
        self.sink.record(DataPoint {
            instrument: Arc::clone(&self.instrument),
            value: value.into_number(),
            attributes: attributes.clone(),
            context: context.clone(),
        });
    }

    /// Pre-resolve `attributes` into a [`BoundCounter`].
    ///
    /// Records nothing. Bound attributes must be fully known here: do not
    /// bind attributes that context-derived values (baggage) would later
    /// override.
    pub fn bind(&self, attributes: AttributeSet) -> BoundCounter<T> {
        let handle = self
            .sink
            .bind(&self.instrument, &attributes)
            .unwrap_or_else(|| {
                Arc::new(ForwardingBoundSink::new(
                    Arc::clone(&self.sink),
                    Arc::clone(&self.instrument),
                    attributes.clone(),
                ))
            });
        BoundCounter {
            instrument: Arc::clone(&self.instrument),
            attributes,
            handle,
            _marker: PhantomData,
        }
    }
}

impl<T> fmt::Debug for Counter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Counter")
            .field("instrument", &self.instrument)
            .finish_non_exhaustive()
    }
}

/// A counter with its attribute set fixed at bind time.
///
/// Independent of the counter it was bound from; released on drop. Two
/// handles bound with equal attribute sets feed the same series.
pub struct BoundCounter<T> {
    instrument: Arc<InstrumentDescriptor>,
    attributes: AttributeSet,
    handle: Arc<dyn BoundSink>,
    _marker: PhantomData<fn(T)>,
}

impl<T> Clone for BoundCounter<T> {
    fn clone(&self) -> Self {
        Self {
            instrument: Arc::clone(&self.instrument),
            attributes: self.attributes.clone(),
            handle: Arc::clone(&self.handle),
            _marker: PhantomData,
        }
    }
}

impl<T: CounterValue> BoundCounter<T> {
    /// Instrument metadata.
    pub fn descriptor(&self) -> &InstrumentDescriptor {
        &self.instrument
    }

    /// The attributes fixed at bind time.
    pub fn attributes(&self) -> &AttributeSet {
        &self.attributes
    }

    /// Add `value` under the ambient context.
    pub fn add(&self, value: T) {
        self.add_with_context(value, &Context::current());
    }

    /// Add `value` under an explicit `context`.
    pub fn add_with_context(&self, value: T, context: &Context) {
        if !value.is_valid_increment() {
            reject(&self.instrument, value);
            return;
        }
        self.handle.record(value.into_number(), context);
    }
}

impl<T> fmt::Debug for BoundCounter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundCounter")
            .field("instrument", &self.instrument)
            .field("attributes", &self.attributes)
            .finish_non_exhaustive()
    }
}
