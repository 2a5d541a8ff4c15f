//! Change notifications for cart consumers.
//!
//! A UI layer subscribes to the cart store and re-renders whenever an event
//! arrives:
//! - Cart changes (full item snapshot after every mutation)
//! - Persistence failures (the in-memory cart is ahead of storage)
//!
//! Each subscription receives the current items as its first event and uses
//! a bounded buffer; subscribers that fall behind are dropped.
//!
//! # Example
//!
//! ```ignore
//! let handle = cart.subscribe(SubscriptionConfig::default());
//!
//! loop {
//!     match handle.recv() {
//!         Ok(CartEvent::Changed { items, .. }) => render(&items),
//!         Ok(CartEvent::PersistFailed { error, .. }) => show_notice(&error),
//!         Ok(CartEvent::Dropped { .. }) | Err(_) => break,
//!     }
//! }
//! ```

mod manager;
mod types;

pub use manager::SubscriptionManager;
pub use types::{
    CartEvent, DropReason, SubscriptionConfig, SubscriptionFilter, SubscriptionHandle,
    SubscriptionId,
};
