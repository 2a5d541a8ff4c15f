//! # Cart Store
//!
//! A shopping-cart state container for client applications. The cart lives
//! in memory as the source of truth for rendering and is written through to a
//! key-value store after every change, so it survives restarts.
//!
//! ## Core Concepts
//!
//! - **Cart items**: product lines with a quantity that never drops below zero
//! - **Storage**: any [`KeyValueStore`]; memory and file backends included
//! - **Revisions**: every mutation bumps a counter carried by events and writes
//! - **Subscriptions**: consumers receive the full cart after each change
//!
//! ## Example
//!
//! ```ignore
//! use cart_store::{CartConfig, CartItem, CartStore, FileStore, FileStoreConfig};
//! use std::sync::Arc;
//!
//! let storage = FileStore::open(FileStoreConfig {
//!     path: "./cart-data".into(),
//!     ..Default::default()
//! })?;
//! let cart = Arc::new(CartStore::open(CartConfig::default(), Arc::new(storage))?);
//!
//! cart.add_to_cart(CartItem::new("sku-1", "Shirt", "https://img/shirt.png", 19.9))?;
//! cart.increment("sku-1")?;
//! assert_eq!(cart.get("sku-1").unwrap().quantity, 2);
//! ```

pub mod error;
pub mod storage;
pub mod store;
pub mod subscriptions;
pub mod types;

// Re-exports
pub use error::{CartError, Result};
pub use storage::{FileStore, FileStoreConfig, KeyValueStore, MemoryStore};
pub use store::{AddOrdering, CartConfig, CartStore, RetryPolicy, DEFAULT_STORAGE_KEY};
pub use subscriptions::{
    CartEvent, DropReason, SubscriptionConfig, SubscriptionFilter, SubscriptionHandle,
    SubscriptionId, SubscriptionManager,
};
pub use types::*;
