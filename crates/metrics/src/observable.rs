//! Observable (callback-driven) counters.
//!
//! An [`ObservableCounter`] has no recording surface. Its callback is
//! registered with the sink and invoked by the collection pipeline, once per
//! pass, with a fresh [`ObservableMeasurement`] to report into.
//!
//! Callbacks must:
//! - complete in bounded time,
//! - be safe to invoke concurrently from several passes or threads,
//! - report cumulative values that never decrease for a given attribute set.
//!
//! Only the sign of each reported value is checked here. Monotonicity across
//! passes is the caller's obligation.

use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::Serialize;

use crate::attributes::AttributeSet;
use crate::diagnostics;
use crate::error::MetricsError;
use crate::instrument::InstrumentDescriptor;
use crate::meter::MeterInner;
use crate::number::CounterValue;
use crate::point::Observation;

static NEXT_REGISTRATION: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier of a callback registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct RegistrationId(u64);

impl RegistrationId {
    fn next() -> Self {
        Self(NEXT_REGISTRATION.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw numeric value.
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RegistrationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Write-only sink handed to an observable callback for one pass.
///
/// Not retained after the pass; state a callback needs across passes must
/// be captured by the callback itself.
pub struct ObservableMeasurement<T> {
    instrument: Arc<InstrumentDescriptor>,
    observations: Mutex<Vec<Observation>>,
    _marker: PhantomData<fn(T)>,
}

impl<T: CounterValue> ObservableMeasurement<T> {
    fn new(instrument: Arc<InstrumentDescriptor>) -> Self {
        Self {
            instrument,
            observations: Mutex::new(Vec::new()),
            _marker: PhantomData,
        }
    }

    /// Report `value` with no attributes.
    pub fn record(&self, value: T) {
        self.record_with_attributes(value, &AttributeSet::empty());
    }

    /// Report `value` for `attributes`.
    ///
    /// Negative values are dropped and reported through
    /// [`diagnostics`](crate::diagnostics).
    pub fn record_with_attributes(&self, value: T, attributes: &AttributeSet) {
        if !value.is_valid_increment() {
            diagnostics::handle_error(MetricsError::InvalidMeasurement {
                instrument: self.instrument.name().to_owned(),
                value: value.into_number(),
                reason: "observable counters only accept non-negative values",
            });
            return;
        }
        self.observations.lock().push(Observation {
            value: value.into_number(),
            attributes: attributes.clone(),
        });
    }

    /// The instrument being observed.
    pub fn instrument(&self) -> &InstrumentDescriptor {
        &self.instrument
    }

    fn into_observations(self) -> Vec<Observation> {
        self.observations.into_inner()
    }
}

impl<T> fmt::Debug for ObservableMeasurement<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObservableMeasurement")
            .field("instrument", &self.instrument.name())
            .field("observations", &self.observations.lock().len())
            .finish()
    }
}

/// Number-kind-erased callback, so the pipeline can hold long and double
/// callbacks side by side.
trait ErasedCallback: Send + Sync {
    fn observe(&self, instrument: &Arc<InstrumentDescriptor>) -> Vec<Observation>;
}

struct TypedCallback<T, F> {
    callback: F,
    _marker: PhantomData<fn(T)>,
}

impl<T, F> ErasedCallback for TypedCallback<T, F>
where
    T: CounterValue,
    F: Fn(&ObservableMeasurement<T>) + Send + Sync,
{
    fn observe(&self, instrument: &Arc<InstrumentDescriptor>) -> Vec<Observation> {
        let measurement = ObservableMeasurement::new(Arc::clone(instrument));
        (self.callback)(&measurement);
        measurement.into_observations()
    }
}

/// The `(instrument, callback)` record a sink keeps for one observable
/// counter.
pub struct CallbackRegistration {
    id: RegistrationId,
    instrument: Arc<InstrumentDescriptor>,
    callback: Box<dyn ErasedCallback>,
}

impl CallbackRegistration {
    pub(crate) fn new<T, F>(instrument: Arc<InstrumentDescriptor>, callback: F) -> Self
    where
        T: CounterValue,
        F: Fn(&ObservableMeasurement<T>) + Send + Sync + 'static,
    {
        Self {
            id: RegistrationId::next(),
            instrument,
            callback: Box::new(TypedCallback {
                callback,
                _marker: PhantomData,
            }),
        }
    }

    /// Registration identifier.
    pub fn id(&self) -> RegistrationId {
        self.id
    }

    /// The observed instrument.
    pub fn instrument(&self) -> &Arc<InstrumentDescriptor> {
        &self.instrument
    }

    /// Run the callback once on a fresh measurement and return what it
    /// reported, in call order.
    ///
    /// Panics from the callback propagate; isolating them is the caller's job.
    pub fn invoke(&self) -> Vec<Observation> {
        self.callback.observe(&self.instrument)
    }
}

impl fmt::Debug for CallbackRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackRegistration")
            .field("id", &self.id)
            .field("instrument", &self.instrument.name())
            .finish_non_exhaustive()
    }
}

/// Handle to a registered observable counter.
///
/// The registration stays active while the creating meter is alive.
/// Dropping this handle does not unregister; call [`close`](Self::close).
pub struct ObservableCounter<T> {
    instrument: Arc<InstrumentDescriptor>,
    id: RegistrationId,
    meter: Weak<MeterInner>,
    _marker: PhantomData<fn(T)>,
}

impl<T: CounterValue> ObservableCounter<T> {
    pub(crate) fn new(
        instrument: Arc<InstrumentDescriptor>,
        id: RegistrationId,
        meter: Weak<MeterInner>,
    ) -> Self {
        Self {
            instrument,
            id,
            meter,
            _marker: PhantomData,
        }
    }

    /// Instrument metadata.
    pub fn descriptor(&self) -> &InstrumentDescriptor {
        &self.instrument
    }

    /// Registration identifier, as seen by the sink.
    pub fn registration_id(&self) -> RegistrationId {
        self.id
    }

    /// Unregister the callback. No-op if the meter is already gone.
    pub fn close(self) {
        if let Some(meter) = self.meter.upgrade() {
            meter.unregister(self.id);
        }
    }
}

impl<T> fmt::Debug for ObservableCounter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObservableCounter")
            .field("instrument", &self.instrument)
            .field("id", &self.id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::KeyValue;
    use crate::diagnostics::testing;
    use crate::instrument::{InstrumentKind, NumberKind};
    use pretty_assertions::assert_eq;

    fn descriptor(name: &str) -> Arc<InstrumentDescriptor> {
        Arc::new(InstrumentDescriptor::new(
            name,
            InstrumentKind::ObservableCounter,
            NumberKind::Long,
        ))
    }

    #[test]
    fn invoke_returns_reported_pairs_in_order() {
        let host_a = AttributeSet::from([KeyValue::new("host", "a")]);
        let host_b = AttributeSet::from([KeyValue::new("host", "b")]);
        let (a, b) = (host_a.clone(), host_b.clone());
        let registration =
            CallbackRegistration::new(descriptor("obs.order"), move |m: &ObservableMeasurement<i64>| {
                m.record_with_attributes(1, &a);
                m.record_with_attributes(2, &b);
            });

        let observations = registration.invoke();
        assert_eq!(observations.len(), 2);
        assert_eq!(observations[0].attributes, host_a);
        assert_eq!(observations[1].attributes, host_b);
    }

    #[test]
    fn each_invoke_gets_a_fresh_measurement() {
        let registration =
            CallbackRegistration::new(descriptor("obs.fresh"), |m: &ObservableMeasurement<i64>| {
                m.record(7);
            });
        assert_eq!(registration.invoke().len(), 1);
        assert_eq!(registration.invoke().len(), 1);
    }

    #[test]
    fn negative_observation_is_dropped_and_reported() {
        let captured = testing::capture();
        let registration =
            CallbackRegistration::new(descriptor("obs.negative"), |m: &ObservableMeasurement<i64>| {
                m.record(-5);
                m.record(5);
            });

        let observations = registration.invoke();
        assert_eq!(observations.len(), 1);
        assert_eq!(captured.for_instrument("obs.negative").len(), 1);
    }

    #[test]
    fn registration_ids_are_unique() {
        let a = CallbackRegistration::new(descriptor("obs.id"), |_: &ObservableMeasurement<f64>| {});
        let b = CallbackRegistration::new(descriptor("obs.id"), |_: &ObservableMeasurement<f64>| {});
        assert_ne!(a.id(), b.id());
    }
}
