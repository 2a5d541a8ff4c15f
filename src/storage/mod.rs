//! Key-value storage backends for persisted cart data.
//!
//! The cart store only needs a string-keyed, string-valued store. Two
//! backends ship with the crate:
//!
//! - [`MemoryStore`]: process-local map, for tests and ephemeral sessions
//! - [`FileStore`]: one checksummed file per key in a locked directory

mod file;
mod memory;

pub use file::{FileStore, FileStoreConfig};
pub use memory::MemoryStore;

use crate::error::Result;

/// Durable key-value storage used by the cart store.
///
/// Implementations must be safe to share between threads. Every call may
/// fail; callers decide whether to retry.
pub trait KeyValueStore: Send + Sync {
    /// Read the value stored under `key`, if any.
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Overwrite the value stored under `key`.
    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Delete the value under `key`. Returns whether a value existed.
    fn remove(&self, key: &str) -> Result<bool>;
}
