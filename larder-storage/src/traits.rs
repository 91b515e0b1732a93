//! Storage backend trait.
//!
//! A backend holds root entries for one logical store. Every variant keeps
//! an in-process mirror so the synchronous operations never block on I/O;
//! the asynchronous forms may additionally consult a durable store.
//!
//! # Consistency
//!
//! - Synchronous reads are served from the mirror only.
//! - A write is visible to subsequent reads on the same instance as soon
//!   as the call returns, even when the durable write is still queued.
//! - Shared variants broadcast every mutation to peers on the coherence bus.

use std::collections::BTreeMap;

use async_trait::async_trait;
use larder_core::{BackendKind, Entry, LarderResult, StoreId};

/// A storage backend for root entries.
///
/// Implementations must be thread-safe; the facade shares one backend
/// behind an `Arc` across tasks.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// The concrete variant of this backend. Never `Auto`.
    fn kind(&self) -> BackendKind;

    /// The logical store this backend serves.
    fn store_id(&self) -> &StoreId;

    /// Read a root entry from the mirror.
    fn get(&self, key: &str) -> LarderResult<Option<Entry>>;

    /// Write a root entry, replacing any previous one.
    fn set(&self, key: &str, entry: Entry) -> LarderResult<()>;

    /// Whether a root entry exists.
    fn has(&self, key: &str) -> LarderResult<bool>;

    /// Remove one root entry, or every entry when `key` is `None`.
    ///
    /// Returns whether anything was removed.
    fn delete(&self, key: Option<&str>) -> LarderResult<bool>;

    /// Snapshot of every root entry, ordered by key.
    fn get_all(&self) -> LarderResult<BTreeMap<String, Entry>>;

    /// Number of root entries.
    fn len(&self) -> usize;

    /// Whether the backend holds no entries.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sum of key length plus serialized entry length over all entries.
    fn approximate_byte_size(&self) -> usize;

    /// Whether the mirror has been populated from durable storage.
    fn is_initialized(&self) -> bool {
        true
    }

    /// Populate the mirror. Idempotent.
    async fn initialize(&self) -> LarderResult<()> {
        Ok(())
    }

    /// Reload the mirror from the canonical store.
    async fn reconcile(&self) -> LarderResult<()> {
        Ok(())
    }

    /// Wait until every queued durable write has been attempted.
    async fn flush(&self) -> LarderResult<()> {
        Ok(())
    }

    async fn get_async(&self, key: &str) -> LarderResult<Option<Entry>> {
        self.get(key)
    }

    async fn set_async(&self, key: &str, entry: Entry) -> LarderResult<()> {
        self.set(key, entry)
    }

    async fn has_async(&self, key: &str) -> LarderResult<bool> {
        self.has(key)
    }

    async fn delete_async(&self, key: Option<&str>) -> LarderResult<bool> {
        self.delete(key)
    }

    async fn get_all_async(&self) -> LarderResult<BTreeMap<String, Entry>> {
        self.get_all()
    }
}
