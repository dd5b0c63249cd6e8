//! Out-of-band reporting for instrumentation failures.
//!
//! Recording APIs return `()`: a dropped measurement or a misbehaving
//! callback must never surface in the instrumented program's control flow.
//! Failures are handed to [`handle_error`] instead, which forwards them to
//! the installed handler or, if none is installed, logs them via `tracing`.
//!
//! ```
//! use nebula_metrics::diagnostics::{handle_error, reset_error_handler, set_error_handler};
//! use nebula_metrics::MetricsError;
//!
//! set_error_handler(|err| eprintln!("metrics: {err}"));
//! handle_error(MetricsError::InvalidInstrumentName { name: String::new() });
//! reset_error_handler();
//! ```

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, LazyLock};

use arc_swap::ArcSwapOption;

use crate::error::MetricsError;

struct ErrorHandler(Box<dyn Fn(&MetricsError) + Send + Sync>);

static HANDLER: LazyLock<ArcSwapOption<ErrorHandler>> = LazyLock::new(ArcSwapOption::empty);

/// Install a process-wide error handler, replacing any previous one.
pub fn set_error_handler<F>(handler: F)
where
    F: Fn(&MetricsError) + Send + Sync + 'static,
{
    HANDLER.store(Some(Arc::new(ErrorHandler(Box::new(handler)))));
}

/// Remove the installed handler; errors go back to `tracing`.
pub fn reset_error_handler() {
    HANDLER.store(None);
}

/// Report an instrumentation failure.
///
/// Never panics: a panicking handler is contained and logged.
pub fn handle_error(err: MetricsError) {
    let guard = HANDLER.load();
    match &*guard {
        Some(handler) => {
            if catch_unwind(AssertUnwindSafe(|| (handler.0)(&err))).is_err() {
                tracing::error!(
                    target: "nebula_metrics",
                    code = err.code(),
                    "metrics error handler panicked"
                );
            }
        }
        None => log_error(&err),
    }
}

fn log_error(err: &MetricsError) {
    match err {
        MetricsError::InvalidConfig { .. } => {
            tracing::error!(target: "nebula_metrics", code = err.code(), error = %err, "metrics error");
        }
        _ => {
            tracing::warn!(
                target: "nebula_metrics",
                code = err.code(),
                instrument = err.instrument().unwrap_or_default(),
                error = %err,
                "metrics error"
            );
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Capture of reported errors for unit tests.

    use std::sync::{Arc, LazyLock};

    use parking_lot::{Mutex, MutexGuard};

    use super::{reset_error_handler, set_error_handler};
    use crate::error::MetricsError;

    // Serialization lock for tests that install the global handler
    static TEST_LOCK: LazyLock<Mutex<()>> = LazyLock::new(|| Mutex::new(()));

    /// Holds the test lock and the captured errors; uninstalls on drop.
    pub struct Captured {
        errors: Arc<Mutex<Vec<MetricsError>>>,
        _guard: MutexGuard<'static, ()>,
    }

    impl Captured {
        /// Errors reported for `instrument` so far.
        pub fn for_instrument(&self, instrument: &str) -> Vec<MetricsError> {
            self.errors
                .lock()
                .iter()
                .filter(|e| e.instrument() == Some(instrument))
                .cloned()
                .collect()
        }
    }

    impl Drop for Captured {
        fn drop(&mut self) {
            reset_error_handler();
        }
    }

    pub fn capture() -> Captured {
        let guard = TEST_LOCK.lock();
        let errors = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&errors);
        set_error_handler(move |err| sink.lock().push(err.clone()));
        Captured {
            errors,
            _guard: guard,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::number::Number;

    #[test]
    fn installed_handler_receives_errors() {
        let captured = testing::capture();
        handle_error(MetricsError::InvalidMeasurement {
            instrument: "diag.handler".into(),
            value: Number::Long(-1),
            reason: "negative",
        });
        assert_eq!(captured.for_instrument("diag.handler").len(), 1);
    }

    #[test]
    fn panicking_handler_is_contained() {
        let _captured = testing::capture();
        set_error_handler(|_| panic!("handler bug"));
        handle_error(MetricsError::InvalidInstrumentName {
            name: "diag.panic".into(),
        });
    }

    #[test]
    fn without_handler_errors_are_logged() {
        let captured = testing::capture();
        reset_error_handler();
        handle_error(MetricsError::InvalidInstrumentName {
            name: "diag.logged".into(),
        });
        assert!(captured.for_instrument("diag.logged").is_empty());
    }
}
