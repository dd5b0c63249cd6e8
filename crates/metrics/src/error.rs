//! Error types for the metrics API.
//!
//! Recording calls never return these. They travel out of band through
//! [`crate::diagnostics::handle_error`]; only configuration APIs return
//! [`Result`].
use thiserror::Error;

use crate::attributes::AttributeSet;
use crate::number::Number;

/// Result type for fallible configuration operations
pub type Result<T> = std::result::Result<T, MetricsError>;

/// Everything the metrics layer can report.
#[derive(Error, Debug, Clone)]
pub enum MetricsError {
    /// A negative (or NaN) value was recorded on a monotonic instrument
    #[error("Dropped measurement {value} on '{instrument}': {reason}")]
    InvalidMeasurement {
        /// Instrument name
        instrument: String,
        /// The rejected value
        value: Number,
        /// Why the value was rejected
        reason: &'static str,
    },

    /// An observable callback panicked during a collection pass
    #[error("Callback for '{instrument}' panicked: {message}")]
    CallbackPanicked {
        /// Instrument name
        instrument: String,
        /// Panic payload, if it was a string
        message: String,
    },

    /// An observable callback exceeded its time budget
    #[error("Callback for '{instrument}' took {elapsed_ms}ms, budget is {budget_ms}ms")]
    CallbackTimedOut {
        /// Instrument name
        instrument: String,
        /// Observed (or waited) duration in milliseconds
        elapsed_ms: u64,
        /// Configured budget in milliseconds
        budget_ms: u64,
    },

    /// A callback reported the same attribute set more than once in one pass
    #[error("Callback for '{instrument}' reported {attributes} more than once; keeping the last value")]
    DuplicateObservation {
        /// Instrument name
        instrument: String,
        /// The repeated attribute set
        attributes: AttributeSet,
    },

    /// Instrument name is empty or blank
    #[error("Invalid instrument name '{name}'")]
    InvalidInstrumentName {
        /// The rejected name
        name: String,
    },

    /// The same instrument was registered twice with different metadata
    #[error("Instrument '{name}' already registered: {reason}")]
    DuplicateInstrument {
        /// Instrument name
        name: String,
        /// What differed
        reason: String,
    },

    /// Configuration is invalid
    #[error("Configuration error: {message}")]
    InvalidConfig {
        /// The error message
        message: String,
    },
}

impl MetricsError {
    /// Short stable identifier for logs and tests.
    pub fn code(&self) -> &'static str {
        match self {
            MetricsError::InvalidMeasurement { .. } => "invalid_measurement",
            MetricsError::CallbackPanicked { .. } => "callback_panicked",
            MetricsError::CallbackTimedOut { .. } => "callback_timed_out",
            MetricsError::DuplicateObservation { .. } => "duplicate_observation",
            MetricsError::InvalidInstrumentName { .. } => "invalid_instrument_name",
            MetricsError::DuplicateInstrument { .. } => "duplicate_instrument",
            MetricsError::InvalidConfig { .. } => "invalid_config",
        }
    }

    /// Name of the instrument the error concerns, if any.
    pub fn instrument(&self) -> Option<&str> {
        match self {
            MetricsError::InvalidMeasurement { instrument, .. }
            | MetricsError::CallbackPanicked { instrument, .. }
            | MetricsError::CallbackTimedOut { instrument, .. }
            | MetricsError::DuplicateObservation { instrument, .. } => Some(instrument),
            MetricsError::InvalidInstrumentName { name }
            | MetricsError::DuplicateInstrument { name, .. } => Some(name),
            MetricsError::InvalidConfig { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_instrument() {
        let err = MetricsError::InvalidMeasurement {
            instrument: "requests".into(),
            value: Number::Long(-3),
            reason: "counters only accept non-negative increments",
        };
        assert_eq!(
            err.to_string(),
            "Dropped measurement -3 on 'requests': counters only accept non-negative increments"
        );
        assert_eq!(err.instrument(), Some("requests"));
        assert_eq!(err.code(), "invalid_measurement");
    }

    #[test]
    fn config_errors_have_no_instrument() {
        let err = MetricsError::InvalidConfig {
            message: "zero interval".into(),
        };
        assert_eq!(err.instrument(), None);
    }
}
