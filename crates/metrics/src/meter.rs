//! Meter: the factory that hands out counter builders.
//!
//! The meter owns instrument identity within its scope. Two builders with
//! the same name (case-insensitive), kind and number kind resolve to the
//! same [`InstrumentDescriptor`]; the first registration's metadata wins.
//! Every descriptor carries the meter's scope, so meters sharing a sink
//! never share series.
//!
//! # Examples
//!
//! ```
//! use std::sync::Arc;
//! use nebula_metrics::{AttributeSet, InMemoryPipeline, KeyValue, Meter};
//!
//! let pipeline = Arc::new(InMemoryPipeline::new());
//! let meter = Meter::new("checkout", pipeline.clone());
//!
//! let orders = meter.counter("orders").with_unit("1").build();
//! let us = AttributeSet::from([KeyValue::new("region", "us")]);
//! orders.add_with_attributes(5, &us);
//!
//! assert_eq!(pipeline.points().len(), 1);
//! ```

use std::fmt;
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;

use crate::builder::CounterBuilder;
use crate::diagnostics;
use crate::error::MetricsError;
use crate::instrument::{InstrumentDescriptor, InstrumentId};
use crate::observable::{CallbackRegistration, RegistrationId};
use crate::sink::{MeasurementSink, NoopSink};

pub(crate) struct MeterInner {
    scope: Arc<str>,
    sink: Arc<dyn MeasurementSink>,
    instruments: DashMap<InstrumentId, Arc<InstrumentDescriptor>>,
    registrations: Mutex<Vec<RegistrationId>>,
}

impl MeterInner {
    pub(crate) fn unregister(&self, id: RegistrationId) {
        let removed = {
            let mut registrations = self.registrations.lock();
            let before = registrations.len();
            registrations.retain(|r| *r != id);
            registrations.len() != before
        };
        if removed {
            self.sink.unregister_callback(id);
            tracing::debug!(meter = %self.scope, registration = %id, "unregistered observable callback");
        }
    }
}

impl Drop for MeterInner {
    fn drop(&mut self) {
        let registrations = std::mem::take(self.registrations.get_mut());
        for id in registrations {
            self.sink.unregister_callback(id);
        }
    }
}

/// Outcome of [`Meter::resolve`].
pub(crate) struct Resolved {
    pub(crate) instrument: Arc<InstrumentDescriptor>,
    pub(crate) sink: Arc<dyn MeasurementSink>,
    /// `false` when the descriptor was rejected and routed to a no-op sink.
    pub(crate) accepted: bool,
}

/// Named scope that creates instruments and forwards their data to a sink.
///
/// Cheap to clone; clones share instruments and registrations. When the last
/// clone drops, every observable callback it registered is unregistered.
#[derive(Clone)]
pub struct Meter {
    inner: Arc<MeterInner>,
}

impl Meter {
    /// Create a meter that forwards to `sink`.
    pub fn new(scope: impl Into<Arc<str>>, sink: Arc<dyn MeasurementSink>) -> Self {
        Self {
            inner: Arc::new(MeterInner {
                scope: scope.into(),
                sink,
                instruments: DashMap::new(),
                registrations: Mutex::new(Vec::new()),
            }),
        }
    }

    /// A meter whose instruments discard everything.
    pub fn noop() -> Self {
        Self::new("noop", NoopSink::arc())
    }

    /// Scope name this meter was created with.
    pub fn scope(&self) -> &str {
        &self.inner.scope
    }

    /// Start building a long counter named `name`.
    ///
    /// Call [`CounterBuilder::of_doubles`] for the double variant.
    pub fn counter(&self, name: impl Into<String>) -> CounterBuilder<i64> {
        CounterBuilder::new(self.clone(), name.into())
    }

    /// Number of distinct instruments resolved so far.
    pub fn instrument_count(&self) -> usize {
        self.inner.instruments.len()
    }

    /// Number of live callback registrations.
    pub fn registration_count(&self) -> usize {
        self.inner.registrations.lock().len()
    }

    /// Deduplicate `descriptor` and pick the sink its instrument records to.
    ///
    /// The descriptor is stamped with this meter's scope first. Blank names
    /// are reported and routed to a [`NoopSink`].
    pub(crate) fn resolve(&self, descriptor: InstrumentDescriptor) -> Resolved {
        let descriptor = descriptor.with_scope(Arc::clone(&self.inner.scope));
        if descriptor.name().trim().is_empty() {
            diagnostics::handle_error(MetricsError::InvalidInstrumentName {
                name: descriptor.name().to_owned(),
            });
            return Resolved {
                instrument: Arc::new(descriptor),
                sink: NoopSink::arc(),
                accepted: false,
            };
        }

        let (resolved, conflict) = match self.inner.instruments.entry(descriptor.id()) {
            Entry::Occupied(entry) => {
                let existing = Arc::clone(entry.get());
                let conflict = !existing.same_metadata(&descriptor);
                (existing, conflict)
            }
            Entry::Vacant(entry) => {
                let created = Arc::new(descriptor.clone());
                entry.insert(Arc::clone(&created));
                tracing::debug!(meter = %self.inner.scope, instrument = %created, "registered instrument");
                (created, false)
            }
        };

        if conflict {
            diagnostics::handle_error(MetricsError::DuplicateInstrument {
                name: descriptor.name().to_owned(),
                reason: format!(
                    "unit/description differ from the first registration (unit {:?}, description {:?}); keeping the first",
                    resolved.unit(),
                    resolved.description()
                ),
            });
        }

        Resolved {
            instrument: resolved,
            sink: Arc::clone(&self.inner.sink),
            accepted: true,
        }
    }

    /// Hand `registration` to `sink` and remember it for teardown.
    pub(crate) fn register(&self, sink: &Arc<dyn MeasurementSink>, registration: CallbackRegistration) {
        let id = registration.id();
        tracing::debug!(
            meter = %self.inner.scope,
            instrument = %registration.instrument(),
            registration = %id,
            "registered observable callback"
        );
        sink.register_callback(Arc::new(registration));
        self.inner.registrations.lock().push(id);
    }

    pub(crate) fn downgrade(&self) -> Weak<MeterInner> {
        Arc::downgrade(&self.inner)
    }
}

impl fmt::Debug for Meter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Meter")
            .field("scope", &self.inner.scope)
            .field("instruments", &self.inner.instruments.len())
            .finish_non_exhaustive()
    }
}
