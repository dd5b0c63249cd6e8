//! What instruments hand to the pipeline.

use std::sync::Arc;

use serde::Serialize;

use crate::attributes::AttributeSet;
use crate::context::Context;
use crate::instrument::InstrumentDescriptor;
use crate::number::Number;

/// One synchronous recording, already validated.
#[derive(Debug, Clone, Serialize)]
pub struct DataPoint {
    /// Instrument the value was recorded on.
    pub instrument: Arc<InstrumentDescriptor>,
    /// Non-negative increment.
    pub value: Number,
    /// Series attributes.
    pub attributes: AttributeSet,
    /// Correlation context at the time of the call.
    #[serde(skip)]
    pub context: Context,
}

/// One `(value, attributes)` pair reported by an observable callback.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Observation {
    /// Cumulative, non-negative value.
    pub value: Number,
    /// Series attributes.
    pub attributes: AttributeSet,
}
