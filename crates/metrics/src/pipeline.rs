//! In-memory reference pipeline.
//!
//! [`InMemoryPipeline`] folds every forwarded [`DataPoint`] into per-series
//! monotonic sums, keeps the most recent points up to
//! [`MetricsConfig::point_capacity`], and samples observable callbacks on
//! demand. It is meant for tests and for embedders that export by polling.
//!
//! Callback isolation:
//! - [`collect`](InMemoryPipeline::collect) runs callbacks inline on the
//!   calling thread. Panics are caught; overruns are reported after the fact.
//! - [`collect_async`](InMemoryPipeline::collect_async) runs each callback
//!   on the blocking pool under a timeout. A callback that never returns is
//!   abandoned (its thread is not killed) and the pass moves on.

use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::collections::hash_map::Entry;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::task::JoinSet;

use crate::attributes::AttributeSet;
use crate::config::MetricsConfig;
use crate::context::Context;
use crate::diagnostics;
use crate::error::MetricsError;
use crate::instrument::{InstrumentDescriptor, InstrumentId, InstrumentKind, NumberKind};
use crate::number::Number;
use crate::observable::{CallbackRegistration, RegistrationId};
use crate::point::{DataPoint, Observation};
use crate::sink::{BoundSink, MeasurementSink};

/// Aggregation key: one instrument, one attribute set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct SeriesKey {
    /// Instrument identity.
    pub instrument: InstrumentId,
    /// Series attributes.
    pub attributes: AttributeSet,
}

/// Running total of one series.
struct SeriesCell {
    instrument: Arc<InstrumentDescriptor>,
    total: Mutex<Number>,
}

impl SeriesCell {
    fn new(instrument: Arc<InstrumentDescriptor>) -> Self {
        let zero = match instrument.number_kind() {
            NumberKind::Long => Number::Long(0),
            NumberKind::Double => Number::Double(0.0),
        };
        Self {
            instrument,
            total: Mutex::new(zero),
        }
    }

    fn add(&self, value: Number) {
        let mut total = self.total.lock();
        *total = total.saturating_add(value);
    }
}

/// One aggregated series as returned by [`InMemoryPipeline::series`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SeriesSnapshot {
    /// Instrument metadata.
    pub instrument: Arc<InstrumentDescriptor>,
    /// Series attributes.
    pub attributes: AttributeSet,
    /// Sum of every increment recorded so far.
    pub value: Number,
}

/// How one callback invocation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CallbackOutcome {
    /// Returned within budget.
    Completed,
    /// Returned, but over budget. Observations are kept.
    Overran,
    /// Panicked. Observations are discarded.
    Panicked,
    /// Did not return within budget. Observations are discarded.
    TimedOut,
}

/// What one registration reported in one pass.
#[derive(Debug, Clone, Serialize)]
pub struct InstrumentObservations {
    /// The observed instrument.
    pub instrument: Arc<InstrumentDescriptor>,
    /// Which registration produced these.
    pub registration: RegistrationId,
    /// Deduplicated observations, in first-reported order.
    pub observations: Vec<Observation>,
    /// How the invocation ended.
    pub outcome: CallbackOutcome,
}

/// Result of one collection pass.
#[derive(Debug, Clone, Serialize)]
pub struct CollectionSnapshot {
    /// 1-based pass number within the pipeline.
    pub pass: u64,
    /// One entry per invoked registration, ordered by registration id.
    pub instruments: Vec<InstrumentObservations>,
}

impl CollectionSnapshot {
    /// All observations reported for the instrument named `name`
    /// (case-insensitive), across its registrations.
    pub fn observations_for(&self, name: &str) -> Vec<Observation> {
        self.instruments
            .iter()
            .filter(|entry| entry.instrument.name().eq_ignore_ascii_case(name))
            .flat_map(|entry| entry.observations.iter().cloned())
            .collect()
    }

    /// Total number of observations in the pass.
    pub fn observation_count(&self) -> usize {
        self.instruments.iter().map(|entry| entry.observations.len()).sum()
    }

    /// Number of registrations invoked in the pass.
    pub fn invoked(&self) -> usize {
        self.instruments.len()
    }
}

/// Ring of recent raw points. Full rings evict from the front.
struct PointLog {
    capacity: usize,
    points: Mutex<VecDeque<DataPoint>>,
    dropped: AtomicU64,
}

impl PointLog {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            points: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            dropped: AtomicU64::new(0),
        }
    }

    fn push(&self, point: DataPoint) {
        if self.capacity == 0 {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        }
        let mut points = self.points.lock();
        if points.len() >= self.capacity {
            points.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        points.push_back(point);
    }
}

/// Bound handle that writes straight into a pre-resolved series.
struct BoundSeries {
    points: Arc<PointLog>,
    cell: Arc<SeriesCell>,
    instrument: Arc<InstrumentDescriptor>,
    attributes: AttributeSet,
}

impl BoundSink for BoundSeries {
    fn record(&self, value: Number, context: &Context) {
        self.cell.add(value);
        self.points.push(DataPoint {
            instrument: Arc::clone(&self.instrument),
            value,
            attributes: self.attributes.clone(),
            context: context.clone(),
        });
    }
}

/// Reference [`MeasurementSink`] that stores everything in memory.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use nebula_metrics::{AttributeSet, InMemoryPipeline, KeyValue, Meter, Number};
///
/// let pipeline = Arc::new(InMemoryPipeline::new());
/// let meter = Meter::new("jobs", pipeline.clone());
///
/// let queued = AttributeSet::from([KeyValue::new("state", "queued")]);
/// meter
///     .counter("jobs.seen")
///     .build_with_callback(move |m| m.record_with_attributes(42, &queued));
///
/// let snapshot = pipeline.collect();
/// assert_eq!(snapshot.observations_for("jobs.seen")[0].value, Number::Long(42));
/// ```
pub struct InMemoryPipeline {
    config: MetricsConfig,
    points: Arc<PointLog>,
    series: DashMap<SeriesKey, Arc<SeriesCell>>,
    registrations: RwLock<Vec<Arc<CallbackRegistration>>>,
    passes: AtomicU64,
}

impl Default for InMemoryPipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryPipeline {
    /// Create a pipeline with [`MetricsConfig::default`].
    pub fn new() -> Self {
        Self::with_config(MetricsConfig::default())
    }

    /// Create a pipeline with explicit settings.
    pub fn with_config(config: MetricsConfig) -> Self {
        Self {
            points: Arc::new(PointLog::new(config.point_capacity)),
            config,
            series: DashMap::new(),
            registrations: RwLock::new(Vec::new()),
            passes: AtomicU64::new(0),
        }
    }

    /// Active settings.
    pub fn config(&self) -> &MetricsConfig {
        &self.config
    }

    /// Copy of the retained points, oldest first.
    pub fn points(&self) -> Vec<DataPoint> {
        self.points.points.lock().iter().cloned().collect()
    }

    /// Drain the retained points. Series totals are kept.
    pub fn take_points(&self) -> Vec<DataPoint> {
        self.points.points.lock().drain(..).collect()
    }

    /// Points evicted or never retained because of
    /// [`MetricsConfig::point_capacity`]. Their increments still count
    /// toward the series totals.
    pub fn dropped_points(&self) -> u64 {
        self.points.dropped.load(Ordering::Relaxed)
    }

    /// Total for the synchronous counter `name` created by the meter with
    /// scope `scope`, for `attributes`.
    ///
    /// Looks up the long variant first, then the double one. `None` if
    /// nothing was recorded for that series.
    pub fn sum(&self, scope: &str, name: &str, attributes: &AttributeSet) -> Option<Number> {
        let scope: Arc<str> = Arc::from(scope);
        let name: Arc<str> = name.to_ascii_lowercase().into();
        [NumberKind::Long, NumberKind::Double]
            .into_iter()
            .find_map(|number_kind| {
                let key = SeriesKey {
                    instrument: InstrumentId {
                        scope: Arc::clone(&scope),
                        name: Arc::clone(&name),
                        kind: InstrumentKind::Counter,
                        number_kind,
                    },
                    attributes: attributes.clone(),
                };
                self.series.get(&key).map(|cell| *cell.total.lock())
            })
    }

    /// Every aggregated series, ordered by meter scope then instrument name.
    pub fn series(&self) -> Vec<SeriesSnapshot> {
        let mut series: Vec<_> = self
            .series
            .iter()
            .map(|entry| SeriesSnapshot {
                instrument: Arc::clone(&entry.value().instrument),
                attributes: entry.key().attributes.clone(),
                value: *entry.value().total.lock(),
            })
            .collect();
        series.sort_by(|a, b| {
            (a.instrument.scope(), a.instrument.name()).cmp(&(b.instrument.scope(), b.instrument.name()))
        });
        series
    }

    /// Number of registered callbacks.
    pub fn registration_count(&self) -> usize {
        self.registrations.read().len()
    }

    /// Number of passes run so far.
    pub fn pass_count(&self) -> u64 {
        self.passes.load(Ordering::Relaxed)
    }

    fn cell(&self, instrument: &Arc<InstrumentDescriptor>, attributes: &AttributeSet) -> Arc<SeriesCell> {
        let key = SeriesKey {
            instrument: instrument.id(),
            attributes: attributes.clone(),
        };
        if let Some(cell) = self.series.get(&key) {
            return Arc::clone(cell.value());
        }
        Arc::clone(
            self.series
                .entry(key)
                .or_insert_with(|| Arc::new(SeriesCell::new(Arc::clone(instrument))))
                .value(),
        )
    }

    fn snapshot_registrations(&self) -> Vec<Arc<CallbackRegistration>> {
        self.registrations.read().clone()
    }

    fn next_pass(&self) -> u64 {
        self.passes.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Run one collection pass on the calling thread.
    ///
    /// Each registered callback is invoked exactly once. A panicking
    /// callback is reported and skipped; the others still run.
    pub fn collect(&self) -> CollectionSnapshot {
        let pass = self.next_pass();
        let started = Instant::now();
        let budget = self.config.callback_timeout;

        let instruments: Vec<_> = self
            .snapshot_registrations()
            .into_iter()
            .map(|registration| {
                let begun = Instant::now();
                let result = catch_unwind(AssertUnwindSafe(|| registration.invoke()));
                settle(&registration, result, begun.elapsed(), budget)
            })
            .collect();

        finish_pass(pass, instruments, started)
    }

    /// Run one collection pass with every callback on the blocking pool.
    ///
    /// Callbacks run concurrently; each gets `timeout`. Must be called from
    /// within a tokio runtime.
    pub async fn collect_async(&self, timeout: Duration) -> CollectionSnapshot {
        let pass = self.next_pass();
        let started = Instant::now();

        let mut tasks = JoinSet::new();
        for registration in self.snapshot_registrations() {
            tasks.spawn(async move {
                let begun = Instant::now();
                let worker = Arc::clone(&registration);
                let handle = tokio::task::spawn_blocking(move || {
                    catch_unwind(AssertUnwindSafe(|| worker.invoke()))
                });
                let result = tokio::time::timeout(timeout, handle).await;
                (registration, result, begun.elapsed())
            });
        }

        let mut instruments = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            let Ok((registration, result, elapsed)) = joined else {
                continue;
            };
            let entry = match result {
                Ok(Ok(invoked)) => settle(&registration, invoked, elapsed, timeout),
                Ok(Err(join_error)) => {
                    report_panic(&registration, join_error.to_string());
                    discarded(&registration, CallbackOutcome::Panicked)
                }
                Err(_) => {
                    diagnostics::handle_error(MetricsError::CallbackTimedOut {
                        instrument: registration.instrument().name().to_owned(),
                        elapsed_ms: millis(elapsed),
                        budget_ms: millis(timeout),
                    });
                    discarded(&registration, CallbackOutcome::TimedOut)
                }
            };
            instruments.push(entry);
        }
        instruments.sort_by_key(|entry| entry.registration);

        finish_pass(pass, instruments, started)
    }
}

fn finish_pass(pass: u64, instruments: Vec<InstrumentObservations>, started: Instant) -> CollectionSnapshot {
    let snapshot = CollectionSnapshot { pass, instruments };
    tracing::debug!(
        pass,
        callbacks = snapshot.invoked(),
        observations = snapshot.observation_count(),
        elapsed_ms = millis(started.elapsed()),
        "collection pass complete"
    );
    snapshot
}

fn settle(
    registration: &CallbackRegistration,
    result: std::thread::Result<Vec<Observation>>,
    elapsed: Duration,
    budget: Duration,
) -> InstrumentObservations {
    match result {
        Ok(observations) => {
            let outcome = if elapsed > budget {
                diagnostics::handle_error(MetricsError::CallbackTimedOut {
                    instrument: registration.instrument().name().to_owned(),
                    elapsed_ms: millis(elapsed),
                    budget_ms: millis(budget),
                });
                CallbackOutcome::Overran
            } else {
                CallbackOutcome::Completed
            };
            InstrumentObservations {
                instrument: Arc::clone(registration.instrument()),
                registration: registration.id(),
                observations: dedupe(registration.instrument(), observations),
                outcome,
            }
        }
        Err(payload) => {
            report_panic(registration, panic_message(payload.as_ref()));
            discarded(registration, CallbackOutcome::Panicked)
        }
    }
}

fn discarded(registration: &CallbackRegistration, outcome: CallbackOutcome) -> InstrumentObservations {
    InstrumentObservations {
        instrument: Arc::clone(registration.instrument()),
        registration: registration.id(),
        observations: Vec::new(),
        outcome,
    }
}

fn report_panic(registration: &CallbackRegistration, message: String) {
    diagnostics::handle_error(MetricsError::CallbackPanicked {
        instrument: registration.instrument().name().to_owned(),
        message,
    });
}

/// Collapse repeated attribute sets: the last value wins, the first
/// position is kept.
fn dedupe(instrument: &InstrumentDescriptor, observations: Vec<Observation>) -> Vec<Observation> {
    let mut positions: HashMap<AttributeSet, usize> = HashMap::with_capacity(observations.len());
    let mut unique: Vec<Observation> = Vec::with_capacity(observations.len());
    for observation in observations {
        match positions.entry(observation.attributes.clone()) {
            Entry::Occupied(slot) => {
                diagnostics::handle_error(MetricsError::DuplicateObservation {
                    instrument: instrument.name().to_owned(),
                    attributes: observation.attributes.clone(),
                });
                unique[*slot.get()] = observation;
            }
            Entry::Vacant(slot) => {
                slot.insert(unique.len());
                unique.push(observation);
            }
        }
    }
    unique
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}

pub(crate) fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl MeasurementSink for InMemoryPipeline {
    fn record(&self, point: DataPoint) {
        self.cell(&point.instrument, &point.attributes).add(point.value);
        self.points.push(point);
    }

    fn bind(
        &self,
        instrument: &Arc<InstrumentDescriptor>,
        attributes: &AttributeSet,
    ) -> Option<Arc<dyn BoundSink>> {
        Some(Arc::new(BoundSeries {
            points: Arc::clone(&self.points),
            cell: self.cell(instrument, attributes),
            instrument: Arc::clone(instrument),
            attributes: attributes.clone(),
        }))
    }

    fn register_callback(&self, registration: Arc<CallbackRegistration>) {
        self.registrations.write().push(registration);
    }

    fn unregister_callback(&self, id: RegistrationId) {
        self.registrations.write().retain(|r| r.id() != id);
    }
}

impl fmt::Debug for InMemoryPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryPipeline")
            .field("points", &self.points.points.lock().len())
            .field("dropped_points", &self.dropped_points())
            .field("series", &self.series.len())
            .field("registrations", &self.registration_count())
            .field("passes", &self.pass_count())
            .finish()
    }
}
