//! Typed notifications for cache and record activity.
//!
//! The event bus distributes engine notifications to subscribers,
//! enabling:
//! - Host-side cache observability
//! - Reactive invalidation in the consuming application
//! - Surfacing background auto-save failures
//!
//! # Usage
//!
//! ```
//! use shelfdb_core::{EventBus, StoreEvent};
//!
//! let bus = EventBus::new();
//! let rx = bus.subscribe();
//!
//! bus.emit(StoreEvent::CacheHit { collection: "users".into() });
//! assert!(matches!(rx.recv().unwrap(), StoreEvent::CacheHit { .. }));
//! ```

use parking_lot::RwLock;
use std::sync::mpsc::{self, Receiver, Sender};

/// A single engine notification.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    /// A collection was served from the cache.
    CacheHit {
        /// Collection name.
        collection: String,
    },
    /// A collection had to be loaded from disk.
    CacheMiss {
        /// Collection name.
        collection: String,
    },
    /// A collection was pushed out of the cache (LRU or TTL).
    CacheEvicted {
        /// Collection name.
        collection: String,
    },
    /// A record was created.
    RecordCreated {
        /// Collection name.
        collection: String,
        /// Record id.
        id: String,
    },
    /// A record was mutated.
    RecordUpdated {
        /// Collection name.
        collection: String,
        /// Record id.
        id: String,
    },
    /// A record was deleted.
    RecordDeleted {
        /// Collection name.
        collection: String,
        /// Record id.
        id: String,
    },
    /// A collection and its file were destroyed.
    CollectionDropped {
        /// Collection name.
        collection: String,
    },
    /// A background auto-save write failed; it will be retried.
    AutoSaveError {
        /// Collection name.
        collection: String,
        /// Failure description.
        message: String,
    },
}

/// Distributes engine notifications to subscribers.
///
/// The bus:
/// - Preserves emission order per subscriber
/// - Supports multiple subscribers
/// - Drops subscribers whose receiver is gone
/// - Keeps a bounded history for polling
pub struct EventBus {
    subscribers: RwLock<Vec<Sender<StoreEvent>>>,
    history: RwLock<Vec<StoreEvent>>,
    max_history: usize,
}

impl EventBus {
    /// Creates a new event bus.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_history(1000)
    }

    /// Creates an event bus with a specific history limit.
    #[must_use]
    pub fn with_max_history(max_history: usize) -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
            history: RwLock::new(Vec::new()),
            max_history,
        }
    }

    /// Subscribes to future events.
    ///
    /// The receiver should be drained regularly; a dropped receiver
    /// unsubscribes on the next emission.
    pub fn subscribe(&self) -> Receiver<StoreEvent> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.write().push(tx);
        rx
    }

    /// Emits an event to all subscribers.
    pub fn emit(&self, event: StoreEvent) {
        {
            let mut history = self.history.write();
            history.push(event.clone());
            if history.len() > self.max_history {
                let overflow = history.len() - self.max_history;
                history.drain(0..overflow);
            }
        }

        let mut subscribers = self.subscribers.write();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Returns the most recent `n` events, oldest first.
    #[must_use]
    pub fn recent(&self, n: usize) -> Vec<StoreEvent> {
        let history = self.history.read();
        let start = history.len().saturating_sub(n);
        history[start..].to_vec()
    }

    /// Returns the number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(name: &str) -> StoreEvent {
        StoreEvent::CacheHit {
            collection: name.to_string(),
        }
    }

    #[test]
    fn emit_and_receive() {
        let bus = EventBus::new();
        let rx = bus.subscribe();

        bus.emit(hit("users"));
        assert_eq!(rx.recv().unwrap(), hit("users"));
    }

    #[test]
    fn multiple_subscribers_each_get_a_copy() {
        let bus = EventBus::new();
        let rx1 = bus.subscribe();
        let rx2 = bus.subscribe();

        bus.emit(hit("users"));
        assert_eq!(rx1.recv().unwrap(), hit("users"));
        assert_eq!(rx2.recv().unwrap(), hit("users"));
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let bus = EventBus::new();
        let rx = bus.subscribe();
        drop(rx);

        bus.emit(hit("users"));
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn history_is_bounded() {
        let bus = EventBus::with_max_history(3);
        for i in 0..5 {
            bus.emit(hit(&format!("c{i}")));
        }
        let recent = bus.recent(10);
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0], hit("c2"));
        assert_eq!(recent[2], hit("c4"));
    }

    #[test]
    fn emission_order_is_preserved() {
        let bus = EventBus::new();
        let rx = bus.subscribe();
        for i in 0..4 {
            bus.emit(hit(&format!("c{i}")));
        }
        for i in 0..4 {
            assert_eq!(rx.recv().unwrap(), hit(&format!("c{i}")));
        }
    }
}
