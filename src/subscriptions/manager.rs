//! Subscription manager for broadcasting cart events.

use crate::types::{CartItem, Revision};
use crossbeam_channel::{bounded, Sender};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use super::types::{CartEvent, DropReason, SubscriptionConfig, SubscriptionHandle, SubscriptionId};

/// Internal subscription state.
struct Subscription {
    config: SubscriptionConfig,
    /// Channel sized `buffer_size + 1`; the last slot is kept for `Dropped`.
    sender: Sender<CartEvent>,
    /// Events allowed in flight before the subscriber counts as slow.
    buffer_size: usize,
    /// Dead once the handle is dropped.
    handle: Weak<()>,
}

/// Outcome of sending to one subscriber.
enum Delivery {
    Sent,
    Overflow,
    Gone,
}

impl Subscription {
    /// Try to send an event without touching the reserved slot.
    fn try_send(&self, event: CartEvent) -> Delivery {
        if self.sender.len() >= self.buffer_size {
            return Delivery::Overflow;
        }
        match self.sender.try_send(event) {
            Ok(()) => Delivery::Sent,
            Err(crossbeam_channel::TrySendError::Full(_)) => Delivery::Overflow,
            Err(crossbeam_channel::TrySendError::Disconnected(_)) => Delivery::Gone,
        }
    }

    fn is_abandoned(&self) -> bool {
        self.handle.strong_count() == 0
    }

    fn wants_changes(&self) -> bool {
        self.config.filter.include_changes
    }

    fn wants_persist_failures(&self) -> bool {
        self.config.filter.include_persist_failures
    }
}

/// Manages subscriptions and broadcasts events.
pub struct SubscriptionManager {
    /// Active subscriptions by ID.
    subscriptions: RwLock<HashMap<SubscriptionId, Subscription>>,
    /// Counter for generating subscription IDs.
    next_id: AtomicU64,
}

impl SubscriptionManager {
    pub fn new() -> Self {
        Self {
            subscriptions: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Create a new subscription.
    ///
    /// Subscribers that want changes get `initial` as their first event, so
    /// they can render before the next mutation happens.
    pub fn subscribe(
        &self,
        config: SubscriptionConfig,
        initial: Vec<CartItem>,
        revision: Revision,
    ) -> SubscriptionHandle {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let buffer_size = config.buffer_size.max(1);
        let (sender, receiver) = bounded(buffer_size + 1);
        let alive = Arc::new(());

        let subscription = Subscription {
            config,
            sender,
            buffer_size,
            handle: Arc::downgrade(&alive),
        };

        if subscription.wants_changes() {
            // Fresh channel with room for at least one event
            let _ = subscription.try_send(CartEvent::Changed {
                items: initial,
                revision,
            });
        }

        self.subscriptions.write().insert(id, subscription);

        SubscriptionHandle {
            id,
            receiver,
            _alive: alive,
        }
    }

    /// Unsubscribe and clean up.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        let mut subs = self.subscriptions.write();
        if let Some(sub) = subs.remove(&id) {
            // Send dropped event (best effort)
            let _ = sub.sender.try_send(CartEvent::Dropped {
                reason: DropReason::Unsubscribed,
            });
        }
    }

    /// Get subscription count.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.read().len()
    }

    // --- Broadcasting ---

    /// Broadcast the cart contents after a mutation.
    pub fn broadcast_changed(&self, items: &[CartItem], revision: Revision) {
        let event = CartEvent::Changed {
            items: items.to_vec(),
            revision,
        };

        self.broadcast(Subscription::wants_changes, event);
    }

    /// Broadcast a persistence failure.
    pub fn broadcast_persist_failed(&self, revision: Revision, error: &str) {
        let event = CartEvent::PersistFailed {
            revision,
            error: error.to_string(),
        };

        self.broadcast(Subscription::wants_persist_failures, event);
    }

    /// Internal broadcast helper.
    ///
    /// Slow subscribers are dropped with a final `Dropped` event. Subscribers
    /// whose handle is gone are removed whether or not they match `filter`.
    fn broadcast<F>(&self, filter: F, event: CartEvent)
    where
        F: Fn(&Subscription) -> bool,
    {
        let mut overflowed = Vec::new();
        let mut abandoned = Vec::new();

        {
            let subs = self.subscriptions.read();
            for (id, sub) in subs.iter() {
                if sub.is_abandoned() {
                    abandoned.push(*id);
                    continue;
                }
                if !filter(sub) {
                    continue;
                }
                match sub.try_send(event.clone()) {
                    Delivery::Sent => {}
                    Delivery::Overflow => overflowed.push(*id),
                    Delivery::Gone => abandoned.push(*id),
                }
            }
        }

        if overflowed.is_empty() && abandoned.is_empty() {
            return;
        }

        let mut subs = self.subscriptions.write();
        for id in overflowed {
            if let Some(sub) = subs.remove(&id) {
                tracing::debug!(subscription = id.0, "dropping slow cart subscriber");
                // Lands in the reserved slot
                let _ = sub.sender.try_send(CartEvent::Dropped {
                    reason: DropReason::BufferOverflow,
                });
            }
        }
        for id in abandoned {
            subs.remove(&id);
        }
    }
}

impl Default for SubscriptionManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subscriptions::SubscriptionFilter;
    use std::time::Duration;

    fn shirt(quantity: u32) -> CartItem {
        let mut item = CartItem::new("a", "Shirt", "u", 10.0);
        item.quantity = quantity;
        item
    }

    #[test]
    fn test_subscribe_unsubscribe() {
        let manager = SubscriptionManager::new();

        let handle = manager.subscribe(SubscriptionConfig::default(), vec![], Revision(0));
        assert_eq!(manager.subscription_count(), 1);

        manager.unsubscribe(handle.id);
        assert_eq!(manager.subscription_count(), 0);

        let events = handle.drain();
        assert!(matches!(
            events.last(),
            Some(CartEvent::Dropped {
                reason: DropReason::Unsubscribed
            })
        ));
    }

    #[test]
    fn test_initial_snapshot() {
        let manager = SubscriptionManager::new();
        let handle = manager.subscribe(SubscriptionConfig::default(), vec![shirt(2)], Revision(5));

        match handle.recv_timeout(Duration::from_millis(100)).unwrap() {
            CartEvent::Changed { items, revision } => {
                assert_eq!(items, vec![shirt(2)]);
                assert_eq!(revision, Revision(5));
            }
            other => panic!("Expected Changed event, got {:?}", other),
        }
    }

    #[test]
    fn test_filter_skips_changes() {
        let manager = SubscriptionManager::new();
        let config = SubscriptionConfig {
            filter: SubscriptionFilter::persist_failures(),
            ..Default::default()
        };
        let handle = manager.subscribe(config, vec![], Revision(0));

        manager.broadcast_changed(&[shirt(1)], Revision(1));
        assert!(handle.recv_timeout(Duration::from_millis(50)).is_err());

        manager.broadcast_persist_failed(Revision(1), "disk full");
        match handle.recv_timeout(Duration::from_millis(100)).unwrap() {
            CartEvent::PersistFailed { revision, error } => {
                assert_eq!(revision, Revision(1));
                assert_eq!(error, "disk full");
            }
            other => panic!("Expected PersistFailed event, got {:?}", other),
        }
    }

    #[test]
    fn test_drop_slow_subscriber() {
        let manager = SubscriptionManager::new();
        let config = SubscriptionConfig {
            buffer_size: 2,
            filter: SubscriptionFilter::changes(),
        };
        let handle = manager.subscribe(config, vec![], Revision(0));

        // Flood with events
        for i in 1..10 {
            manager.broadcast_changed(&[shirt(i)], Revision(u64::from(i)));
        }

        assert_eq!(manager.subscription_count(), 0);

        // Initial snapshot, one change, then the drop notice
        let events = handle.drain();
        assert_eq!(events.len(), 3);
        assert!(matches!(events[1], CartEvent::Changed { revision: Revision(1), .. }));
        assert!(matches!(
            events.last(),
            Some(CartEvent::Dropped {
                reason: DropReason::BufferOverflow
            })
        ));
    }

    #[test]
    fn test_abandoned_handle_removed_on_any_broadcast() {
        let manager = SubscriptionManager::new();
        let config = SubscriptionConfig {
            filter: SubscriptionFilter::persist_failures(),
            ..Default::default()
        };
        let handle = manager.subscribe(config, vec![], Revision(0));
        assert_eq!(manager.subscription_count(), 1);

        drop(handle);

        // A change event does not match the filter but still prunes the entry
        manager.broadcast_changed(&[shirt(1)], Revision(1));
        assert_eq!(manager.subscription_count(), 0);
    }
}
