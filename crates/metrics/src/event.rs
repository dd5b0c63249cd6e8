//! Collection lifecycle events.
//!
//! [`PeriodicCollector`](crate::PeriodicCollector) publishes one
//! [`CollectionEvent`] per pass over a [`tokio::sync::broadcast`] channel.
//! Delivery is best effort: with no subscribers the event is dropped, and a
//! lagging subscriber skips what it missed.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::broadcast;

use crate::pipeline::CollectionSnapshot;

/// Something the collector did.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CollectionEvent {
    /// A pass finished.
    Collected {
        /// What the pass gathered.
        snapshot: Arc<CollectionSnapshot>,
        /// Wall time of the pass.
        #[serde(with = "humantime_serde")]
        elapsed: Duration,
    },
    /// The collector stopped.
    Stopped {
        /// Passes run before stopping.
        passes: u64,
    },
}

/// Broadcast bus for [`CollectionEvent`]s.
///
/// # Examples
///
/// ```
/// use nebula_metrics::event::{CollectionEvent, EventBus};
///
/// let bus = EventBus::new(16);
/// let mut sub = bus.subscribe();
///
/// bus.emit(CollectionEvent::Stopped { passes: 3 });
///
/// assert!(matches!(sub.try_recv(), Some(CollectionEvent::Stopped { passes: 3 })));
/// assert_eq!(bus.total_emitted(), 1);
/// ```
#[derive(Debug)]
pub struct EventBus {
    sender: broadcast::Sender<CollectionEvent>,
    emitted: AtomicU64,
}

impl EventBus {
    /// Create a bus buffering up to `capacity` events per subscriber.
    ///
    /// `capacity` must be non-zero; [`MetricsConfig::validate`](crate::MetricsConfig::validate)
    /// enforces this for configured buses.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            emitted: AtomicU64::new(0),
        }
    }

    /// Publish `event` to every current subscriber.
    pub fn emit(&self, event: CollectionEvent) {
        self.emitted.fetch_add(1, Ordering::Relaxed);
        // No receivers is fine.
        let _ = self.sender.send(event);
    }

    /// Subscribe to events emitted from now on.
    pub fn subscribe(&self) -> EventSubscriber {
        EventSubscriber {
            receiver: self.sender.subscribe(),
        }
    }

    /// Events emitted since creation.
    #[must_use]
    pub fn total_emitted(&self) -> u64 {
        self.emitted.load(Ordering::Relaxed)
    }

    /// Active subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// Receiving end of an [`EventBus`].
#[derive(Debug)]
pub struct EventSubscriber {
    receiver: broadcast::Receiver<CollectionEvent>,
}

impl EventSubscriber {
    /// Wait for the next event. `None` once the bus is gone.
    ///
    /// Lagged events are skipped.
    pub async fn recv(&mut self) -> Option<CollectionEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "collection event subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Take the next event if one is ready.
    pub fn try_recv(&mut self) -> Option<CollectionEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(_)) => {}
                Err(_) => return None,
            }
        }
    }
}
