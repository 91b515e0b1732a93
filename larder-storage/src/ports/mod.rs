//! Durable store ports.
//!
//! Backends never talk to a storage engine directly. They are handed one
//! of these two ports, which lets the factory probe availability and lets
//! tests substitute in-memory doubles.
//!
//! - [`SyncDurableStore`]: a synchronous string key-value store (the
//!   durable-sync and isolated variants).
//! - [`AsyncDurableStore`]: an asynchronous record store scoped by store id
//!   (the durable-async variant).

mod lmdb;
mod memory;

pub use lmdb::{LmdbAsyncStore, LmdbKvStore, LmdbStoreError};
pub use memory::{MemoryAsyncStore, MemoryKvStore};

use async_trait::async_trait;
use larder_core::{Entry, LarderResult, StoreId};

/// Key used by availability probes.
pub const PROBE_KEY: &str = "__larder_probe__";

/// Synchronous string key-value store.
pub trait SyncDurableStore: Send + Sync {
    fn get_item(&self, key: &str) -> LarderResult<Option<String>>;

    fn set_item(&self, key: &str, value: &str) -> LarderResult<()>;

    /// Returns whether the key existed.
    fn remove_item(&self, key: &str) -> LarderResult<bool>;

    /// Every key starting with `prefix`.
    fn keys(&self, prefix: &str) -> LarderResult<Vec<String>>;

    /// Whether the store accepts a write and a removal right now.
    fn probe(&self) -> bool {
        self.set_item(PROBE_KEY, PROBE_KEY)
            .and_then(|_| self.remove_item(PROBE_KEY))
            .is_ok()
    }
}

/// Asynchronous record store, partitioned by store id.
#[async_trait]
pub trait AsyncDurableStore: Send + Sync {
    async fn get(&self, store: &StoreId, key: &str) -> LarderResult<Option<Entry>>;

    async fn put(&self, store: &StoreId, key: &str, entry: &Entry) -> LarderResult<()>;

    /// Returns whether the record existed.
    async fn delete(&self, store: &StoreId, key: &str) -> LarderResult<bool>;

    /// Remove every record of `store`, returning how many were removed.
    async fn clear(&self, store: &StoreId) -> LarderResult<u64>;

    /// Every record of `store`.
    async fn load_all(&self, store: &StoreId) -> LarderResult<Vec<(String, Entry)>>;

    /// Whether the store accepts a write and a removal right now.
    async fn probe(&self) -> bool {
        let store = StoreId::new(PROBE_KEY);
        let entry = Entry::persistent(serde_json::Value::Null);
        match self.put(&store, PROBE_KEY, &entry).await {
            Ok(()) => self.delete(&store, PROBE_KEY).await.is_ok(),
            Err(_) => false,
        }
    }
}
