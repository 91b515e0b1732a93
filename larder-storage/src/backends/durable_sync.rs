//! Write-through backend over a synchronous durable store.
//!
//! The canonical data lives in a [`SyncDurableStore`] under keys of the form
//! `"{namespace}/{store}/{sub}/{key}"`. The mirror is loaded from a prefix
//! scan when the backend opens; every write goes to the store first, then
//! the mirror, then out on the bus.
//!
//! The isolated variant is the same machinery with no bus membership: each
//! instance is handed its own store and never hears from peers.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use larder_core::{BackendKind, Entry, LarderResult, Notification, StorageError, StoreId};
use tracing::{debug, warn};

use super::Coherence;
use crate::bus::CoherenceBus;
use crate::mirror::Mirror;
use crate::ports::SyncDurableStore;
use crate::traits::StorageBackend;

/// Prefix under which one store id's keys live.
pub fn key_prefix(namespace: &str, store_id: &StoreId) -> String {
    format!(
        "{}/{}/{}/",
        namespace,
        store_id.name(),
        store_id.sub().unwrap_or("")
    )
}

pub struct DurableSyncBackend {
    kind: BackendKind,
    store_id: StoreId,
    prefix: String,
    store: Arc<dyn SyncDurableStore>,
    mirror: Mirror,
    coherence: Option<Coherence>,
}

impl std::fmt::Debug for DurableSyncBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DurableSyncBackend")
            .field("kind", &self.kind)
            .field("store_id", &self.store_id)
            .field("prefix", &self.prefix)
            .field("entries", &self.mirror.len())
            .finish()
    }
}

impl DurableSyncBackend {
    /// Open a shared durable-sync backend and load its mirror.
    pub fn open(
        store: Arc<dyn SyncDurableStore>,
        store_id: StoreId,
        namespace: &str,
        bus: Arc<CoherenceBus>,
    ) -> LarderResult<Self> {
        Self::open_as(BackendKind::DurableSync, store, store_id, namespace, Some(bus))
    }

    /// Open an isolated backend: same persistence, no bus membership.
    pub fn isolated(
        store: Arc<dyn SyncDurableStore>,
        store_id: StoreId,
        namespace: &str,
    ) -> LarderResult<Self> {
        Self::open_as(BackendKind::Isolated, store, store_id, namespace, None)
    }

    fn open_as(
        kind: BackendKind,
        store: Arc<dyn SyncDurableStore>,
        store_id: StoreId,
        namespace: &str,
        bus: Option<Arc<CoherenceBus>>,
    ) -> LarderResult<Self> {
        // Subscribe before the scan so no peer write falls in between.
        let coherence = bus.map(|bus| Coherence::join(bus, &store_id));
        let backend = Self {
            kind,
            prefix: key_prefix(namespace, &store_id),
            store_id,
            store,
            mirror: Mirror::new(),
            coherence,
        };
        backend.reload()?;
        debug!(
            kind = %backend.kind,
            store = %backend.store_id,
            entries = backend.mirror.len(),
            "Opened durable backend"
        );
        Ok(backend)
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    /// Rebuild the mirror from the canonical store.
    fn reload(&self) -> LarderResult<()> {
        let since = self.mirror.generation()?;
        let mut loaded = Vec::new();
        for full_key in self.store.keys(&self.prefix)? {
            let Some(raw) = self.store.get_item(&full_key)? else {
                continue;
            };
            let key = full_key[self.prefix.len()..].to_string();
            match Entry::from_json_str(&raw) {
                Ok(entry) => loaded.push((key, entry)),
                Err(e) => {
                    warn!(store = %self.store_id, key = %key, error = %e, "Skipping undecodable entry");
                }
            }
        }
        // Writes from other threads that raced the scan stay as they are.
        self.mirror.merge_snapshot(loaded, since).map(|_| ())
    }

    /// Apply pending peer notifications; reload if any were lost.
    fn catch_up(&self) -> LarderResult<()> {
        if let Some(coherence) = &self.coherence {
            let report = coherence.drain_into(&self.mirror);
            if report.lost_notifications() {
                debug!(store = %self.store_id, lagged = report.lagged, "Reloading lagged mirror");
                self.reload()?;
            }
        }
        Ok(())
    }

    /// Drop the keys a failed clear already removed from the store, here and
    /// on every peer, so the mirror keeps matching the store.
    fn forget_partial_clear(&self, cleared: &[String]) -> LarderResult<()> {
        warn!(
            store = %self.store_id,
            removed = cleared.len(),
            "Clear failed part way"
        );
        for full_key in cleared {
            let key = &full_key[self.prefix.len()..];
            self.mirror.remove(key)?;
            self.publish(Notification::Unset {
                key: key.to_string(),
            });
        }
        Ok(())
    }

    fn publish(&self, notification: Notification) {
        if let Some(coherence) = &self.coherence {
            coherence.publish(notification);
        }
    }
}

#[async_trait]
impl StorageBackend for DurableSyncBackend {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn store_id(&self) -> &StoreId {
        &self.store_id
    }

    fn get(&self, key: &str) -> LarderResult<Option<Entry>> {
        self.catch_up()?;
        self.mirror.get(key)
    }

    fn set(&self, key: &str, entry: Entry) -> LarderResult<()> {
        self.catch_up()?;
        let raw = entry.to_json_string().map_err(StorageError::from)?;
        self.store.set_item(&self.full_key(key), &raw)?;
        self.mirror.insert(key, entry.clone())?;
        self.publish(Notification::Sync {
            key: key.to_string(),
            value: entry,
        });
        Ok(())
    }

    fn has(&self, key: &str) -> LarderResult<bool> {
        self.catch_up()?;
        self.mirror.contains(key)
    }

    fn delete(&self, key: Option<&str>) -> LarderResult<bool> {
        self.catch_up()?;
        match key {
            Some(key) => {
                let in_store = self.store.remove_item(&self.full_key(key))?;
                let in_mirror = self.mirror.remove(key)?;
                let removed = in_store || in_mirror;
                if removed {
                    self.publish(Notification::Unset {
                        key: key.to_string(),
                    });
                }
                Ok(removed)
            }
            None => {
                let mut in_store = false;
                let mut cleared = Vec::new();
                for full_key in self.store.keys(&self.prefix)? {
                    match self.store.remove_item(&full_key) {
                        Ok(found) => {
                            in_store |= found;
                            cleared.push(full_key);
                        }
                        Err(e) => {
                            self.forget_partial_clear(&cleared)?;
                            return Err(e);
                        }
                    }
                }
                let in_mirror = self.mirror.clear()?;
                let removed = in_store || in_mirror;
                if removed {
                    self.publish(Notification::Clear);
                }
                Ok(removed)
            }
        }
    }

    fn get_all(&self) -> LarderResult<BTreeMap<String, Entry>> {
        self.catch_up()?;
        self.mirror.snapshot()
    }

    fn len(&self) -> usize {
        if let Err(e) = self.catch_up() {
            warn!(store = %self.store_id, error = %e, "Catch-up failed");
        }
        self.mirror.len()
    }

    fn approximate_byte_size(&self) -> usize {
        if let Err(e) = self.catch_up() {
            warn!(store = %self.store_id, error = %e, "Catch-up failed");
        }
        self.mirror.approximate_byte_size()
    }

    async fn reconcile(&self) -> LarderResult<()> {
        self.reload()
    }
}
