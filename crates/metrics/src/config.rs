//! Collection settings.
//!
//! ```
//! use std::time::Duration;
//! use nebula_metrics::MetricsConfig;
//!
//! let config: MetricsConfig =
//!     serde_json::from_str(r#"{ "collection_interval": "15s", "callback_timeout": "250ms" }"#)?;
//! assert_eq!(config.collection_interval, Duration::from_secs(15));
//! assert_eq!(config.event_capacity, 128);
//! assert_eq!(config.point_capacity, 10_000);
//! config.validate()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{MetricsError, Result};

/// Settings for [`InMemoryPipeline`](crate::InMemoryPipeline) and
/// [`PeriodicCollector`](crate::PeriodicCollector).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Time between collection passes.
    #[serde(with = "humantime_serde")]
    pub collection_interval: Duration,

    /// Budget for a single observable callback invocation.
    #[serde(with = "humantime_serde")]
    pub callback_timeout: Duration,

    /// Buffered collection events per subscriber before old ones are dropped.
    pub event_capacity: usize,

    /// Raw data points the in-memory pipeline retains; the oldest are
    /// evicted first. `0` keeps series totals only.
    pub point_capacity: usize,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            collection_interval: Duration::from_secs(60),
            callback_timeout: Duration::from_secs(10),
            event_capacity: 128,
            point_capacity: 10_000,
        }
    }
}

impl MetricsConfig {
    /// Set the collection interval.
    #[must_use]
    pub fn with_collection_interval(mut self, interval: Duration) -> Self {
        self.collection_interval = interval;
        self
    }

    /// Set the per-callback budget.
    #[must_use]
    pub fn with_callback_timeout(mut self, timeout: Duration) -> Self {
        self.callback_timeout = timeout;
        self
    }

    /// Set the event channel capacity.
    #[must_use]
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Set how many raw data points the pipeline retains.
    #[must_use]
    pub fn with_point_capacity(mut self, capacity: usize) -> Self {
        self.point_capacity = capacity;
        self
    }

    /// Reject zero durations and a zero event capacity.
    pub fn validate(&self) -> Result<()> {
        if self.collection_interval.is_zero() {
            return Err(MetricsError::InvalidConfig {
                message: "collection_interval must be greater than zero".into(),
            });
        }
        if self.callback_timeout.is_zero() {
            return Err(MetricsError::InvalidConfig {
                message: "callback_timeout must be greater than zero".into(),
            });
        }
        if self.event_capacity == 0 {
            return Err(MetricsError::InvalidConfig {
                message: "event_capacity must be greater than zero".into(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[test]
    fn default_is_valid() {
        let config = MetricsConfig::default();
        assert_eq!(config.collection_interval, Duration::from_secs(60));
        assert_eq!(config.callback_timeout, Duration::from_secs(10));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn missing_fields_take_defaults() {
        let config: MetricsConfig = serde_json::from_str(r#"{"event_capacity": 8}"#).unwrap();
        assert_eq!(config.event_capacity, 8);
        assert_eq!(config.collection_interval, Duration::from_secs(60));
        assert_eq!(config.point_capacity, 10_000);
    }

    #[test]
    fn zero_point_capacity_is_valid() {
        let config = MetricsConfig::default().with_point_capacity(0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn durations_serialize_human_readable() {
        let config = MetricsConfig::default().with_callback_timeout(Duration::from_millis(1500));
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["callback_timeout"], "1s 500ms");
        assert_eq!(json["collection_interval"], "1m");
    }

    #[rstest]
    #[case::zero_interval(MetricsConfig::default().with_collection_interval(Duration::ZERO))]
    #[case::zero_timeout(MetricsConfig::default().with_callback_timeout(Duration::ZERO))]
    #[case::zero_capacity(MetricsConfig::default().with_event_capacity(0))]
    fn invalid_configs_are_rejected(#[case] config: MetricsConfig) {
        let err = config.validate().unwrap_err();
        assert_eq!(err.code(), "invalid_config");
    }
}
