//! Correlation context carried alongside measurements.
//!
//! A [`Context`] is opaque to the instruments: they only read the ambient
//! one or accept an explicit one and hand it to the sink untouched. It holds
//! typed values (trace identifiers, request scopes, ...) and string baggage.
//!
//! # Ambient storage
//!
//! With the `async` feature (default), the ambient context lives in
//! `tokio::task_local!` storage and survives `.await` points in
//! multi-thread runtimes. Without it a `thread_local!` slot is used.
//!
//! ```
//! use nebula_metrics::context::Context;
//!
//! let cx = Context::new().with_baggage("tenant", "acme");
//! cx.scope_sync(|| {
//!     assert_eq!(Context::current().baggage().len(), 1);
//! });
//! assert!(Context::current().baggage().is_empty());
//! ```

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, LazyLock};

use crate::attributes::{AttributeSet, AttributeValue};

static ROOT: LazyLock<Context> = LazyLock::new(Context::default);

/// Immutable correlation context.
///
/// Every `with_*` call returns a new context; the receiver is unchanged.
/// Cloning is cheap.
#[derive(Clone, Default)]
pub struct Context {
    values: Arc<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
    baggage: AttributeSet,
}

impl Context {
    /// An empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// The shared empty context used when nothing is in scope.
    pub fn root() -> Self {
        ROOT.clone()
    }

    /// The ambient context, or [`Context::root`] when none is in scope.
    #[inline]
    pub fn current() -> Self {
        storage::current().unwrap_or_else(Self::root)
    }

    /// A copy of this context carrying `value`, replacing any previous value
    /// of the same type.
    pub fn with_value<T: Any + Send + Sync>(&self, value: T) -> Self {
        let mut values = (*self.values).clone();
        values.insert(TypeId::of::<T>(), Arc::new(value));
        Self {
            values: Arc::new(values),
            baggage: self.baggage.clone(),
        }
    }

    /// The value of type `T`, if one was attached.
    pub fn get<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.values
            .get(&TypeId::of::<T>())?
            .clone()
            .downcast::<T>()
            .ok()
    }

    /// A copy of this context with one more baggage entry.
    pub fn with_baggage(&self, key: &str, value: impl Into<AttributeValue>) -> Self {
        Self {
            values: Arc::clone(&self.values),
            baggage: self.baggage.to_builder().put(key, value).build(),
        }
    }

    /// Baggage entries propagated with this context.
    pub fn baggage(&self) -> &AttributeSet {
        &self.baggage
    }

    /// Run a synchronous closure with this context as the ambient one.
    ///
    /// Inner scopes shadow outer ones and restore on return.
    pub fn scope_sync<R>(self, f: impl FnOnce() -> R) -> R {
        storage::with_sync(self, f)
    }

    /// Run a future with this context as the ambient one.
    ///
    /// The context survives across `.await` points, even under work-stealing.
    #[cfg(feature = "async")]
    pub async fn scope<F: std::future::Future>(self, f: F) -> F::Output {
        storage::with_async(self, f).await
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("values", &self.values.len())
            .field("baggage", &self.baggage)
            .finish()
    }
}

#[cfg(feature = "async")]
mod storage {
    use super::Context;
    use std::future::Future;

    tokio::task_local! {
        static CURRENT: Context;
    }

    #[inline]
    pub fn current() -> Option<Context> {
        CURRENT.try_with(Clone::clone).ok()
    }

    pub async fn with_async<F: Future>(cx: Context, f: F) -> F::Output {
        CURRENT.scope(cx, f).await
    }

    pub fn with_sync<R>(cx: Context, f: impl FnOnce() -> R) -> R {
        CURRENT.sync_scope(cx, f)
    }
}

#[cfg(not(feature = "async"))]
mod storage {
    use super::Context;
    use std::cell::RefCell;

    thread_local! {
        static CURRENT: RefCell<Option<Context>> = const { RefCell::new(None) };
    }

    /// Restores the previous slot value even if the closure unwinds.
    struct Restore(Option<Context>);

    impl Drop for Restore {
        fn drop(&mut self) {
            let prev = self.0.take();
            CURRENT.with(|cell| *cell.borrow_mut() = prev);
        }
    }

    #[inline]
    pub fn current() -> Option<Context> {
        CURRENT.with(|cell| cell.borrow().clone())
    }

    pub fn with_sync<R>(cx: Context, f: impl FnOnce() -> R) -> R {
        let prev = CURRENT.with(|cell| cell.borrow_mut().replace(cx));
        let _restore = Restore(prev);
        f()
    }
}
