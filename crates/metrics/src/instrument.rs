//! Instrument identity and metadata.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

/// Instrument kinds covered by this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InstrumentKind {
    /// Synchronous monotonic counter.
    Counter,
    /// Callback-driven monotonic counter.
    ObservableCounter,
}

impl InstrumentKind {
    /// Whether values are pushed by application code.
    pub fn is_synchronous(&self) -> bool {
        matches!(self, InstrumentKind::Counter)
    }

    /// Whether values are sampled through a callback.
    pub fn is_asynchronous(&self) -> bool {
        !self.is_synchronous()
    }

    /// Both kinds produce non-decreasing sums.
    pub fn is_monotonic(&self) -> bool {
        true
    }
}

impl fmt::Display for InstrumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstrumentKind::Counter => f.write_str("counter"),
            InstrumentKind::ObservableCounter => f.write_str("observable_counter"),
        }
    }
}

/// Value type an instrument records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NumberKind {
    /// `i64` values.
    Long,
    /// `f64` values.
    Double,
}

/// Key under which a meter deduplicates instruments.
///
/// Names compare case-insensitively; unit and description are not part of
/// the key. Instruments from different meter scopes never share a key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct InstrumentId {
    /// Scope of the meter that owns the instrument.
    pub scope: Arc<str>,
    /// Lower-cased instrument name.
    pub name: Arc<str>,
    /// Instrument kind.
    pub kind: InstrumentKind,
    /// Number kind.
    pub number_kind: NumberKind,
}

/// Full description of one instrument.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct InstrumentDescriptor {
    scope: Arc<str>,
    name: Arc<str>,
    kind: InstrumentKind,
    number_kind: NumberKind,
    description: Option<Arc<str>>,
    unit: Option<Arc<str>>,
}

impl InstrumentDescriptor {
    /// Descriptor with no description or unit, outside any meter scope.
    pub fn new(name: impl Into<Arc<str>>, kind: InstrumentKind, number_kind: NumberKind) -> Self {
        Self {
            scope: Arc::from(""),
            name: name.into(),
            kind,
            number_kind,
            description: None,
            unit: None,
        }
    }

    /// Place the instrument in a meter's namespace.
    pub fn with_scope(mut self, scope: impl Into<Arc<str>>) -> Self {
        self.scope = scope.into();
        self
    }

    /// Attach a human-readable description.
    pub fn with_description(mut self, description: impl Into<Arc<str>>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Attach a unit of measure (e.g. `"1"`, `"By"`, `"ms"`).
    pub fn with_unit(mut self, unit: impl Into<Arc<str>>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    /// Scope of the owning meter; empty until a meter resolves it.
    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// Instrument name as given.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Instrument kind.
    pub fn kind(&self) -> InstrumentKind {
        self.kind
    }

    /// Number kind.
    pub fn number_kind(&self) -> NumberKind {
        self.number_kind
    }

    /// Description, if set.
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Unit, if set.
    pub fn unit(&self) -> Option<&str> {
        self.unit.as_deref()
    }

    /// Deduplication key.
    pub fn id(&self) -> InstrumentId {
        InstrumentId {
            scope: Arc::clone(&self.scope),
            name: Arc::from(self.name.to_ascii_lowercase()),
            kind: self.kind,
            number_kind: self.number_kind,
        }
    }

    /// Whether `other` carries the same metadata as `self`.
    pub(crate) fn same_metadata(&self, other: &InstrumentDescriptor) -> bool {
        self.description == other.description && self.unit == other.unit
    }
}

impl fmt::Display for InstrumentDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name, self.kind)
    }
}
