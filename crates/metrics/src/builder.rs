//! Counter builder.
//!
//! A builder collects description and unit, then finalizes into either a
//! synchronous [`Counter`] or a callback-backed [`ObservableCounter`].
//! Finalizing consumes the builder.

use std::marker::PhantomData;
use std::sync::Arc;

use crate::counter::Counter;
use crate::instrument::{InstrumentDescriptor, InstrumentKind};
use crate::meter::Meter;
use crate::number::CounterValue;
use crate::observable::{CallbackRegistration, ObservableCounter, ObservableMeasurement};

/// Configuration for one counter instrument.
///
/// Obtained from [`Meter::counter`]. `T` is `i64` for the long variant and
/// `f64` for the double variant.
#[derive(Debug)]
#[must_use = "a builder does nothing until `build` or `build_with_callback` is called"]
pub struct CounterBuilder<T> {
    meter: Meter,
    name: String,
    description: Option<String>,
    unit: Option<String>,
    _marker: PhantomData<fn(T)>,
}

impl<T: CounterValue> CounterBuilder<T> {
    pub(crate) fn new(meter: Meter, name: String) -> Self {
        Self {
            meter,
            name,
            description: None,
            unit: None,
            _marker: PhantomData,
        }
    }

    /// Set the human-readable description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set the unit of measure.
    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    /// Finalize into a synchronous counter.
    pub fn build(self) -> Counter<T> {
        let descriptor = self.descriptor(InstrumentKind::Counter);
        let resolved = self.meter.resolve(descriptor);
        Counter::new(resolved.instrument, resolved.sink)
    }

    /// Finalize into an observable counter whose values come from `callback`.
    ///
    /// The callback is registered with the meter's sink and invoked by the
    /// collection pipeline on every pass; it is never invoked here. See
    /// [`crate::observable`] for the obligations on its body.
    ///
    /// A rejected name yields a detached counter: nothing is registered and
    /// [`close`](ObservableCounter::close) does nothing.
    pub fn build_with_callback<F>(self, callback: F) -> ObservableCounter<T>
    where
        F: Fn(&ObservableMeasurement<T>) + Send + Sync + 'static,
    {
        let descriptor = self.descriptor(InstrumentKind::ObservableCounter);
        let resolved = self.meter.resolve(descriptor);
        let registration = CallbackRegistration::new(Arc::clone(&resolved.instrument), callback);
        let id = registration.id();
        if resolved.accepted {
            self.meter.register(&resolved.sink, registration);
        }
        ObservableCounter::new(resolved.instrument, id, self.meter.downgrade())
    }

    fn descriptor(&self, kind: InstrumentKind) -> InstrumentDescriptor {
        let mut descriptor = InstrumentDescriptor::new(self.name.as_str(), kind, T::KIND);
        if let Some(description) = &self.description {
            descriptor = descriptor.with_description(description.as_str());
        }
        if let Some(unit) = &self.unit {
            descriptor = descriptor.with_unit(unit.as_str());
        }
        descriptor
    }
}

impl CounterBuilder<i64> {
    /// Switch to the double variant, keeping name, description and unit.
    pub fn of_doubles(self) -> CounterBuilder<f64> {
        CounterBuilder {
            meter: self.meter,
            name: self.name,
            description: self.description,
            unit: self.unit,
            _marker: PhantomData,
        }
    }
}
