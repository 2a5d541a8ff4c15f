//! The cart store: in-memory cart state kept in sync with storage.

use crate::error::{CartError, Result};
use crate::storage::KeyValueStore;
use crate::subscriptions::{
    SubscriptionConfig, SubscriptionHandle, SubscriptionId, SubscriptionManager,
};
use crate::types::{CartItem, CartTotals, Revision};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::Duration;

/// Storage key of the serialized cart.
pub const DEFAULT_STORAGE_KEY: &str = "@cart-store:items";

/// Where `add_to_cart` leaves an item that was already in the cart.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AddOrdering {
    /// Move the updated item to the end of the list.
    #[default]
    MoveToEnd,
    /// Keep the updated item at its current position.
    InPlace,
}

/// Retry policy for storage writes.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// Total attempts per write, including the first. Values below 1 act as 1.
    pub max_attempts: u32,

    /// Delay before the first retry. Doubles on each further retry.
    pub initial_backoff: Duration,

    /// Upper bound on the delay between attempts.
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(25),
            max_backoff: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    /// Delay after the given failed attempt (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.initial_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }
}

/// Cart store configuration.
#[derive(Clone, Debug)]
pub struct CartConfig {
    /// Key the cart is persisted under.
    pub storage_key: String,

    /// Placement of re-added items.
    pub add_ordering: AddOrdering,

    /// Retry policy for storage writes.
    pub retry: RetryPolicy,

    /// Fail `open` when the persisted cart can't be read or parsed,
    /// instead of starting empty.
    pub strict_load: bool,
}

impl Default for CartConfig {
    fn default() -> Self {
        Self {
            storage_key: DEFAULT_STORAGE_KEY.to_string(),
            add_ordering: AddOrdering::default(),
            retry: RetryPolicy::default(),
            strict_load: false,
        }
    }
}

/// Items plus the revision they belong to.
#[derive(Default)]
struct CartState {
    items: Vec<CartItem>,
    revision: Revision,
}

/// Shopping cart state backed by a key-value store.
///
/// A `CartStore` only exists once [`CartStore::open`] has loaded the
/// persisted cart, so holding one is proof the cart is initialized. Share it
/// with consumers through an `Arc`.
///
/// Every mutation:
/// 1. updates the in-memory items and bumps the revision
/// 2. writes the full post-mutation item list to storage (with retries)
/// 3. notifies subscribers
///
/// Mutations are serialized, so storage always receives writes in revision
/// order and each write carries the newest items. A failed write keeps the
/// in-memory change; the failure is returned, logged and broadcast.
pub struct CartStore {
    config: CartConfig,

    /// Backing storage.
    storage: Arc<dyn KeyValueStore>,

    /// Current cart contents.
    state: RwLock<CartState>,

    /// Held across mutate-then-persist.
    write_lock: Mutex<()>,

    /// Change subscribers.
    subscriptions: SubscriptionManager,

    /// Why the persisted cart was discarded at open, if it was.
    load_error: Option<String>,
}

impl CartStore {
    /// Open the cart, loading any previously persisted items.
    ///
    /// With no stored cart the store starts empty. An unreadable or
    /// malformed stored cart is logged and replaced by an empty cart, unless
    /// `config.strict_load` is set, in which case the error is returned.
    pub fn open(config: CartConfig, storage: Arc<dyn KeyValueStore>) -> Result<Self> {
        let (items, load_error) = match Self::load_items(storage.as_ref(), &config.storage_key) {
            Ok(items) => (items, None),
            Err(e) if config.strict_load => return Err(e),
            Err(e) => {
                tracing::error!(
                    key = %config.storage_key,
                    error = %e,
                    "discarding unreadable persisted cart, starting empty"
                );
                (Vec::new(), Some(e.to_string()))
            }
        };

        tracing::debug!(key = %config.storage_key, items = items.len(), "cart loaded");

        Ok(Self {
            config,
            storage,
            state: RwLock::new(CartState {
                items,
                revision: Revision(0),
            }),
            write_lock: Mutex::new(()),
            subscriptions: SubscriptionManager::new(),
            load_error,
        })
    }

    fn load_items(storage: &dyn KeyValueStore, key: &str) -> Result<Vec<CartItem>> {
        match storage.get(key)? {
            Some(blob) => serde_json::from_str(&blob)
                .map_err(|e| CartError::Deserialization(e.to_string())),
            None => Ok(Vec::new()),
        }
    }

    // --- Mutations ---

    /// Add one unit of a product.
    ///
    /// The input quantity is ignored. A product whose `id` is not yet in the
    /// cart is appended with quantity 1; otherwise the existing entry gains
    /// one unit and is placed per [`CartConfig::add_ordering`]. The existing
    /// entry's title, image and price are kept.
    ///
    /// A price that is NaN or infinite is rejected before the cart changes,
    /// since it could not be written back out as JSON.
    pub fn add_to_cart(&self, item: CartItem) -> Result<()> {
        if !item.price.is_finite() {
            return Err(CartError::InvalidItem(format!(
                "price of {:?} is not a finite number: {}",
                item.title, item.price
            )));
        }

        let ordering = self.config.add_ordering;

        self.mutate(move |items| {
            match items.iter().position(|existing| existing.id == item.id) {
                None => {
                    let mut item = item;
                    item.quantity = 1;
                    items.push(item);
                }
                Some(index) => match ordering {
                    AddOrdering::MoveToEnd => {
                        let mut existing = items.remove(index);
                        existing.quantity = existing.quantity.saturating_add(1);
                        items.push(existing);
                    }
                    AddOrdering::InPlace => {
                        let existing = &mut items[index];
                        existing.quantity = existing.quantity.saturating_add(1);
                    }
                },
            }
        })
    }

    /// Add one unit to every item with this id. Unknown ids change nothing.
    pub fn increment(&self, id: &str) -> Result<()> {
        self.mutate(|items| {
            for item in items.iter_mut().filter(|item| item.has_id(id)) {
                item.quantity = item.quantity.saturating_add(1);
            }
        })
    }

    /// Remove one unit from every item with this id.
    ///
    /// Quantities stop at zero and the item stays in the cart.
    pub fn decrement(&self, id: &str) -> Result<()> {
        self.mutate(|items| {
            for item in items.iter_mut().filter(|item| item.has_id(id)) {
                item.quantity = item.quantity.saturating_sub(1);
            }
        })
    }

    /// Empty the cart and delete the persisted copy.
    pub fn clear(&self) -> Result<()> {
        let _lock = self.write_lock.lock();

        let revision = {
            let mut state = self.state.write();
            state.items.clear();
            state.revision = state.revision.next();
            state.revision
        };

        let key = self.config.storage_key.as_str();
        let result = self.with_retry(revision, || self.storage.remove(key).map(|_| ()));
        self.notify(&[], revision, &result);
        result
    }

    /// Write the current items to storage again.
    ///
    /// Used to retry after a mutation reported a persistence failure.
    pub fn persist(&self) -> Result<()> {
        let _lock = self.write_lock.lock();

        let (items, revision) = {
            let state = self.state.read();
            (state.items.clone(), state.revision)
        };

        let result = self.write_items(&items, revision);
        if let Err(e) = &result {
            self.subscriptions
                .broadcast_persist_failed(revision, &e.to_string());
        }
        result
    }

    /// Apply a change to the items, persist the result and notify.
    fn mutate<F>(&self, apply: F) -> Result<()>
    where
        F: FnOnce(&mut Vec<CartItem>),
    {
        let _lock = self.write_lock.lock();

        let (items, revision) = {
            let mut state = self.state.write();
            apply(&mut state.items);
            state.revision = state.revision.next();
            (state.items.clone(), state.revision)
        };

        let result = self.write_items(&items, revision);
        self.notify(&items, revision, &result);
        result
    }

    fn notify(&self, items: &[CartItem], revision: Revision, result: &Result<()>) {
        self.subscriptions.broadcast_changed(items, revision);
        if let Err(e) = result {
            self.subscriptions
                .broadcast_persist_failed(revision, &e.to_string());
        }
    }

    fn write_items(&self, items: &[CartItem], revision: Revision) -> Result<()> {
        let payload = serde_json::to_string(items)?;
        let key = self.config.storage_key.as_str();

        self.with_retry(revision, || self.storage.set(key, &payload))?;

        tracing::debug!(?revision, bytes = payload.len(), "cart persisted");
        Ok(())
    }

    /// Run a storage call under the retry policy.
    fn with_retry<F>(&self, revision: Revision, mut call: F) -> Result<()>
    where
        F: FnMut() -> Result<()>,
    {
        let policy = &self.config.retry;
        let max_attempts = policy.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            match call() {
                Ok(()) => return Ok(()),
                Err(e) if attempt < max_attempts => {
                    let delay = policy.backoff(attempt);
                    tracing::warn!(
                        ?revision,
                        attempt,
                        error = %e,
                        "cart write failed, retrying in {:?}",
                        delay
                    );
                    std::thread::sleep(delay);
                }
                Err(e) => {
                    tracing::warn!(
                        ?revision,
                        attempts = attempt,
                        error = %e,
                        "cart write failed, giving up"
                    );
                    return Err(CartError::PersistFailed {
                        revision,
                        attempts: attempt,
                        message: e.to_string(),
                    });
                }
            }
        }
    }

    // --- Reads ---

    /// Snapshot of the current items, in cart order.
    pub fn items(&self) -> Vec<CartItem> {
        self.state.read().items.clone()
    }

    /// The item with this id, if present.
    pub fn get(&self, id: &str) -> Option<CartItem> {
        self.state.read().items.iter().find(|item| item.has_id(id)).cloned()
    }

    /// Number of product lines, including lines at quantity zero.
    pub fn len(&self) -> usize {
        self.state.read().items.len()
    }

    /// Whether the cart has no product lines.
    pub fn is_empty(&self) -> bool {
        self.state.read().items.is_empty()
    }

    /// Revision of the current items. Zero right after `open`.
    pub fn revision(&self) -> Revision {
        self.state.read().revision
    }

    /// Line count, unit count and subtotal of the current items.
    pub fn totals(&self) -> CartTotals {
        CartTotals::from_items(&self.state.read().items)
    }

    /// Error that caused the persisted cart to be discarded at open.
    pub fn load_error(&self) -> Option<&str> {
        self.load_error.as_deref()
    }

    /// Configuration the store was opened with.
    pub fn config(&self) -> &CartConfig {
        &self.config
    }

    // --- Subscriptions ---

    /// Subscribe to cart events. The first event is the current cart.
    pub fn subscribe(&self, config: SubscriptionConfig) -> SubscriptionHandle {
        // Hold the write lock so no mutation slips between snapshot and registration
        let _lock = self.write_lock.lock();
        let (items, revision) = {
            let state = self.state.read();
            (state.items.clone(), state.revision)
        };
        self.subscriptions.subscribe(config, items, revision)
    }

    /// Remove a subscription; it receives a final `Dropped` event.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.subscriptions.unsubscribe(id);
    }

    /// Number of live subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.subscription_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    fn open_empty() -> (Arc<MemoryStore>, CartStore) {
        let backend = Arc::new(MemoryStore::new());
        let cart = CartStore::open(CartConfig::default(), backend.clone()).unwrap();
        (backend, cart)
    }

    fn persisted(backend: &MemoryStore) -> Vec<CartItem> {
        let blob = backend.get(DEFAULT_STORAGE_KEY).unwrap().unwrap();
        serde_json::from_str(&blob).unwrap()
    }

    #[test]
    fn test_add_sets_quantity_to_one() {
        let (_, cart) = open_empty();

        let mut item = CartItem::new("a", "Shirt", "u", 10.0);
        item.quantity = 42;
        cart.add_to_cart(item).unwrap();

        assert_eq!(cart.get("a").unwrap().quantity, 1);
    }

    #[test]
    fn test_readd_moves_to_end() {
        let (_, cart) = open_empty();

        cart.add_to_cart(CartItem::new("a", "Shirt", "u", 10.0)).unwrap();
        cart.add_to_cart(CartItem::new("b", "Socks", "u", 2.0)).unwrap();
        cart.add_to_cart(CartItem::new("a", "Shirt", "u", 10.0)).unwrap();

        let ids: Vec<_> = cart
            .items()
            .iter()
            .map(|item| item.id.clone().unwrap().0)
            .collect();
        assert_eq!(ids, vec!["b", "a"]);
        assert_eq!(cart.get("a").unwrap().quantity, 2);
    }

    #[test]
    fn test_readd_in_place() {
        let backend = Arc::new(MemoryStore::new());
        let config = CartConfig {
            add_ordering: AddOrdering::InPlace,
            ..Default::default()
        };
        let cart = CartStore::open(config, backend).unwrap();

        cart.add_to_cart(CartItem::new("a", "Shirt", "u", 10.0)).unwrap();
        cart.add_to_cart(CartItem::new("b", "Socks", "u", 2.0)).unwrap();
        cart.add_to_cart(CartItem::new("a", "Shirt", "u", 10.0)).unwrap();

        let items = cart.items();
        assert!(items[0].has_id("a"));
        assert_eq!(items[0].quantity, 2);
        assert!(items[1].has_id("b"));
    }

    #[test]
    fn test_readd_keeps_existing_details() {
        let (_, cart) = open_empty();

        cart.add_to_cart(CartItem::new("a", "Shirt", "u", 10.0)).unwrap();
        cart.add_to_cart(CartItem::new("a", "Renamed", "v", 99.0)).unwrap();

        let item = cart.get("a").unwrap();
        assert_eq!(item.title, "Shirt");
        assert_eq!(item.price, 10.0);
    }

    #[test]
    fn test_non_finite_price_rejected() {
        let (backend, cart) = open_empty();
        cart.add_to_cart(CartItem::new("a", "Shirt", "u", 10.0)).unwrap();

        for price in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let result = cart.add_to_cart(CartItem::new("b", "Broken", "u", price));
            assert!(matches!(result, Err(CartError::InvalidItem(_))));
        }

        // Nothing changed, and the stored cart still reloads
        assert_eq!(cart.len(), 1);
        assert_eq!(cart.revision(), Revision(1));
        let reopened = CartStore::open(CartConfig::default(), backend).unwrap();
        assert_eq!(reopened.items(), cart.items());
        assert!(reopened.load_error().is_none());
    }

    #[test]
    fn test_items_without_id_merge() {
        let (_, cart) = open_empty();

        cart.add_to_cart(CartItem::without_id("Gift card", "g", 25.0)).unwrap();
        cart.add_to_cart(CartItem::without_id("Gift card", "g", 25.0)).unwrap();

        assert_eq!(cart.len(), 1);
        assert_eq!(cart.items()[0].quantity, 2);
    }

    #[test]
    fn test_persisted_copy_tracks_every_mutation() {
        let (backend, cart) = open_empty();

        cart.add_to_cart(CartItem::new("a", "Shirt", "u", 10.0)).unwrap();
        assert_eq!(persisted(&backend), cart.items());

        cart.increment("a").unwrap();
        assert_eq!(persisted(&backend), cart.items());

        cart.decrement("a").unwrap();
        cart.decrement("a").unwrap();
        assert_eq!(persisted(&backend), cart.items());
        assert_eq!(persisted(&backend)[0].quantity, 0);
    }

    #[test]
    fn test_revision_bumps() {
        let (_, cart) = open_empty();
        assert_eq!(cart.revision(), Revision(0));

        cart.add_to_cart(CartItem::new("a", "Shirt", "u", 10.0)).unwrap();
        cart.increment("missing").unwrap();
        assert_eq!(cart.revision(), Revision(2));
    }

    #[test]
    fn test_clear_removes_blob() {
        let (backend, cart) = open_empty();

        cart.add_to_cart(CartItem::new("a", "Shirt", "u", 10.0)).unwrap();
        cart.clear().unwrap();

        assert!(cart.is_empty());
        assert!(backend.get(DEFAULT_STORAGE_KEY).unwrap().is_none());
    }

    #[test]
    fn test_custom_storage_key() {
        let backend = Arc::new(MemoryStore::new());
        let config = CartConfig {
            storage_key: "@shop:cart".to_string(),
            ..Default::default()
        };
        let cart = CartStore::open(config, backend.clone()).unwrap();
        cart.add_to_cart(CartItem::new("a", "Shirt", "u", 10.0)).unwrap();

        assert_eq!(backend.keys(), vec!["@shop:cart".to_string()]);
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(35),
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(10));
        assert_eq!(policy.backoff(2), Duration::from_millis(20));
        assert_eq!(policy.backoff(3), Duration::from_millis(35));
        assert_eq!(policy.backoff(40), Duration::from_millis(35));
    }
}
