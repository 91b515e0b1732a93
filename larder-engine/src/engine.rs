//! The hybrid cache facade.

use std::collections::BTreeMap;
use std::sync::Arc;

use larder_core::{
    expires_at, now_millis, BackendKind, CacheOptions, Entry, JsonValue, KeyPath, LarderResult,
    ResolvedPath, RetrievedEntry, TimestampMs, Ttl, ValidationError,
};
use larder_storage::{StorageBackend, StorageEnvironment, StorageFactory};
use serde::Serialize;
use tracing::{debug, trace};

use crate::document::{self, UnsetPlan};
use crate::stats::{CacheStats, Counters};

/// Outcome of reading one path.
enum Read {
    Found(RetrievedEntry),
    Missing,
    /// Expired and due for removal under the remove-expired policy.
    Evict,
}

/// Key-path document cache over a storage backend.
///
/// Every operation exists in two forms. The `_sync` form never suspends and
/// only sees the backend's mirror. The async form may wait on the durable
/// layer: it initializes a durable-async backend on first use, falls back
/// to the durable store on a mirror miss, and reports durable write
/// failures to the caller.
pub struct HybridCache {
    backend: Arc<dyn StorageBackend>,
    options: CacheOptions,
    counters: Counters,
}

impl std::fmt::Debug for HybridCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HybridCache")
            .field("kind", &self.backend.kind())
            .field("store", self.backend.store_id())
            .field("options", &self.options)
            .finish()
    }
}

fn resolve(path: impl Into<KeyPath>) -> LarderResult<ResolvedPath> {
    Ok(path.into().resolve()?)
}

fn to_json(value: impl Serialize) -> LarderResult<JsonValue> {
    Ok(serde_json::to_value(value)?)
}

impl HybridCache {
    /// Select a backend for `options` in `env` and initialize it.
    pub async fn open(options: CacheOptions, env: StorageEnvironment) -> LarderResult<Self> {
        options.validate()?;
        let backend = StorageFactory::new(env)
            .with_namespace(options.namespace.clone())
            .create(options.storage, options.store_id())
            .await?;
        backend.initialize().await?;
        debug!(
            kind = %backend.kind(),
            store = %backend.store_id(),
            entries = backend.len(),
            "Cache opened"
        );
        Ok(Self::with_backend(backend, options))
    }

    /// Wrap an existing backend. It is not initialized here.
    pub fn with_backend(backend: Arc<dyn StorageBackend>, options: CacheOptions) -> Self {
        Self {
            backend,
            options,
            counters: Counters::default(),
        }
    }

    pub fn options(&self) -> &CacheOptions {
        &self.options
    }

    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.backend
    }

    /// The backend kind actually in use. Never `Auto`.
    pub fn backend_kind(&self) -> BackendKind {
        self.backend.kind()
    }

    /// Number of root entries.
    pub fn len(&self) -> usize {
        self.backend.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backend.is_empty()
    }

    pub fn approximate_byte_size(&self) -> usize {
        self.backend.approximate_byte_size()
    }

    pub fn stats(&self) -> CacheStats {
        self.counters
            .snapshot(self.backend.len(), self.backend.approximate_byte_size())
    }

    pub async fn initialize(&self) -> LarderResult<()> {
        self.backend.initialize().await
    }

    /// Reload the backend's mirror from its canonical store.
    pub async fn reconcile(&self) -> LarderResult<()> {
        self.backend.reconcile().await
    }

    /// Wait for queued durable writes.
    pub async fn flush(&self) -> LarderResult<()> {
        self.backend.flush().await
    }

    fn expiry(&self, ttl: Option<Ttl>) -> TimestampMs {
        expires_at(&ttl.unwrap_or(self.options.ttl), now_millis())
    }

    fn classify(
        &self,
        entry: Option<Entry>,
        resolved: &ResolvedPath,
        remove_expired: Option<bool>,
    ) -> Read {
        let found = entry.and_then(|entry| document::extract(&entry, &resolved.rest, now_millis()));
        let Some(found) = found else {
            self.counters.miss();
            return Read::Missing;
        };

        if found.is_expired {
            self.counters.expired();
            if remove_expired.unwrap_or(self.options.remove_expired) {
                self.counters.miss();
                debug!(key = %resolved.root, "Evicting expired entry");
                return Read::Evict;
            }
        }
        self.counters.hit();
        Read::Found(found)
    }

    fn split_expired(
        &self,
        entries: BTreeMap<String, Entry>,
        remove_expired: Option<bool>,
    ) -> (BTreeMap<String, RetrievedEntry>, Vec<String>) {
        let remove = remove_expired.unwrap_or(self.options.remove_expired);
        let now = now_millis();
        let mut kept = BTreeMap::new();
        let mut evicted = Vec::new();
        for (key, entry) in entries {
            let seen = entry.observe(entry.value.clone(), now);
            if seen.is_expired {
                self.counters.expired();
                if remove {
                    evicted.push(key);
                    continue;
                }
            }
            kept.insert(key, seen);
        }
        (kept, evicted)
    }

    fn documents<K, V>(docs: impl IntoIterator<Item = (K, V)>) -> LarderResult<Vec<(String, JsonValue)>>
    where
        K: Into<String>,
        V: Serialize,
    {
        docs.into_iter()
            .map(|(key, value)| -> LarderResult<(String, JsonValue)> {
                let key: String = key.into();
                // Each key must read back as the same root through a dotted path.
                let resolved = KeyPath::from(key.as_str()).resolve()?;
                if !resolved.is_root() || resolved.root != key {
                    return Err(ValidationError::InvalidKeyPath {
                        path: key,
                        reason: "reset keys must be plain root keys".to_string(),
                    }
                    .into());
                }
                Ok((key, to_json(value)?))
            })
            .collect()
    }

    // ========================================================================
    // SYNCHRONOUS FORMS
    // ========================================================================

    /// Place `value` at `path`, creating intermediate containers.
    ///
    /// `ttl` defaults to the configured TTL and applies to the whole root
    /// entry.
    pub fn set_sync(
        &self,
        path: impl Into<KeyPath>,
        value: impl Serialize,
        ttl: Option<Ttl>,
    ) -> LarderResult<()> {
        let resolved = resolve(path)?;
        let value = to_json(value)?;
        let existing = if resolved.is_root() {
            None
        } else {
            self.backend.get(&resolved.root)?
        };
        let entry = document::place(existing, &resolved.rest, value, self.expiry(ttl));
        trace!(key = %resolved.root, expires_at = entry.expires_at, "set");
        self.backend.set(&resolved.root, entry)
    }

    /// Read the value at `path`.
    ///
    /// Expired values come back with `is_expired` set, unless the
    /// remove-expired policy (`remove_expired`, else the configured
    /// default) removes the root entry and reports a miss.
    pub fn get_sync(
        &self,
        path: impl Into<KeyPath>,
        remove_expired: Option<bool>,
    ) -> LarderResult<Option<RetrievedEntry>> {
        let resolved = resolve(path)?;
        self.get_resolved_sync(&resolved, remove_expired)
    }

    fn get_resolved_sync(
        &self,
        resolved: &ResolvedPath,
        remove_expired: Option<bool>,
    ) -> LarderResult<Option<RetrievedEntry>> {
        let entry = self.backend.get(&resolved.root)?;
        match self.classify(entry, resolved, remove_expired) {
            Read::Found(found) => Ok(Some(found)),
            Read::Missing => Ok(None),
            Read::Evict => {
                self.backend.delete(Some(&resolved.root))?;
                Ok(None)
            }
        }
    }

    /// Whether `path` holds a value. A nested `null` counts as absent.
    pub fn has_sync(&self, path: impl Into<KeyPath>) -> LarderResult<bool> {
        let resolved = resolve(path)?;
        if resolved.is_root() {
            return self.backend.has(&resolved.root);
        }
        Ok(self
            .get_resolved_sync(&resolved, None)?
            .map_or(false, |found| !found.value.is_null()))
    }

    /// Remove the value at `path`. Returns whether anything changed.
    ///
    /// Object fields are deleted and array slots become `null`. A root
    /// document left empty is removed.
    pub fn unset_sync(&self, path: impl Into<KeyPath>) -> LarderResult<bool> {
        let resolved = resolve(path)?;
        let Some(entry) = self.backend.get(&resolved.root)? else {
            return Ok(false);
        };
        match document::plan_unset(entry, &resolved.rest) {
            UnsetPlan::Unchanged => Ok(false),
            UnsetPlan::DeleteRoot => self.backend.delete(Some(&resolved.root)),
            UnsetPlan::Replace(entry) => {
                self.backend.set(&resolved.root, entry)?;
                Ok(true)
            }
        }
    }

    /// Remove every entry of the store. Returns whether anything was removed.
    pub fn clear_sync(&self) -> LarderResult<bool> {
        self.backend.delete(None)
    }

    /// Every root entry, observed now.
    pub fn get_all_sync(
        &self,
        remove_expired: Option<bool>,
    ) -> LarderResult<BTreeMap<String, RetrievedEntry>> {
        let (kept, evicted) = self.split_expired(self.backend.get_all()?, remove_expired);
        for key in &evicted {
            self.backend.delete(Some(key))?;
        }
        Ok(kept)
    }

    /// Every root document as one JSON object.
    pub fn get_json_sync(&self, remove_expired: Option<bool>) -> LarderResult<JsonValue> {
        Ok(json_view(self.get_all_sync(remove_expired)?))
    }

    /// Clear the store, then set every document with one TTL.
    pub fn reset_with_sync<K, V>(
        &self,
        docs: impl IntoIterator<Item = (K, V)>,
        ttl: Option<Ttl>,
    ) -> LarderResult<()>
    where
        K: Into<String>,
        V: Serialize,
    {
        let docs = Self::documents(docs)?;
        let expires = self.expiry(ttl);
        self.backend.delete(None)?;
        for (key, value) in docs {
            self.backend.set(&key, Entry::new(value, expires))?;
        }
        Ok(())
    }

    // ========================================================================
    // ASYNCHRONOUS FORMS
    // ========================================================================

    /// Async form of [`set_sync`](Self::set_sync); waits for durability.
    pub async fn set(
        &self,
        path: impl Into<KeyPath>,
        value: impl Serialize,
        ttl: Option<Ttl>,
    ) -> LarderResult<()> {
        let resolved = resolve(path)?;
        let value = to_json(value)?;
        let existing = if resolved.is_root() {
            None
        } else {
            self.backend.get_async(&resolved.root).await?
        };
        let entry = document::place(existing, &resolved.rest, value, self.expiry(ttl));
        trace!(key = %resolved.root, expires_at = entry.expires_at, "set");
        self.backend.set_async(&resolved.root, entry).await
    }

    pub async fn get(
        &self,
        path: impl Into<KeyPath>,
        remove_expired: Option<bool>,
    ) -> LarderResult<Option<RetrievedEntry>> {
        let resolved = resolve(path)?;
        self.get_resolved(&resolved, remove_expired).await
    }

    async fn get_resolved(
        &self,
        resolved: &ResolvedPath,
        remove_expired: Option<bool>,
    ) -> LarderResult<Option<RetrievedEntry>> {
        let entry = self.backend.get_async(&resolved.root).await?;
        match self.classify(entry, resolved, remove_expired) {
            Read::Found(found) => Ok(Some(found)),
            Read::Missing => Ok(None),
            Read::Evict => {
                self.backend.delete_async(Some(&resolved.root)).await?;
                Ok(None)
            }
        }
    }

    pub async fn has(&self, path: impl Into<KeyPath>) -> LarderResult<bool> {
        let resolved = resolve(path)?;
        if resolved.is_root() {
            return self.backend.has_async(&resolved.root).await;
        }
        Ok(self
            .get_resolved(&resolved, None)
            .await?
            .map_or(false, |found| !found.value.is_null()))
    }

    pub async fn unset(&self, path: impl Into<KeyPath>) -> LarderResult<bool> {
        let resolved = resolve(path)?;
        let Some(entry) = self.backend.get_async(&resolved.root).await? else {
            return Ok(false);
        };
        match document::plan_unset(entry, &resolved.rest) {
            UnsetPlan::Unchanged => Ok(false),
            UnsetPlan::DeleteRoot => self.backend.delete_async(Some(&resolved.root)).await,
            UnsetPlan::Replace(entry) => {
                self.backend.set_async(&resolved.root, entry).await?;
                Ok(true)
            }
        }
    }

    pub async fn clear(&self) -> LarderResult<bool> {
        self.backend.delete_async(None).await
    }

    pub async fn get_all(
        &self,
        remove_expired: Option<bool>,
    ) -> LarderResult<BTreeMap<String, RetrievedEntry>> {
        let entries = self.backend.get_all_async().await?;
        let (kept, evicted) = self.split_expired(entries, remove_expired);
        for key in &evicted {
            self.backend.delete_async(Some(key)).await?;
        }
        Ok(kept)
    }

    pub async fn get_json(&self, remove_expired: Option<bool>) -> LarderResult<JsonValue> {
        Ok(json_view(self.get_all(remove_expired).await?))
    }

    pub async fn reset_with<K, V>(
        &self,
        docs: impl IntoIterator<Item = (K, V)>,
        ttl: Option<Ttl>,
    ) -> LarderResult<()>
    where
        K: Into<String>,
        V: Serialize,
    {
        let docs = Self::documents(docs)?;
        let expires = self.expiry(ttl);
        self.backend.delete_async(None).await?;
        for (key, value) in docs {
            self.backend.set_async(&key, Entry::new(value, expires)).await?;
        }
        Ok(())
    }
}

fn json_view(entries: BTreeMap<String, RetrievedEntry>) -> JsonValue {
    JsonValue::Object(
        entries
            .into_iter()
            .map(|(key, found)| (key, found.value))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use larder_core::{LarderError, StoreId};
    use larder_storage::VolatileBackend;
    use serde_json::json;

    fn cache() -> HybridCache {
        HybridCache::with_backend(
            Arc::new(VolatileBackend::new(StoreId::new("unit"))),
            CacheOptions::new(),
        )
    }

    #[test]
    fn test_set_then_get_nested() {
        let cache = cache();
        cache.set_sync("user.name", "Jane", None).unwrap();
        let found = cache.get_sync("user.name", None).unwrap().unwrap();
        assert_eq!(found.value, json!("Jane"));
        assert!(!found.is_expired);
        assert_eq!(found.expires_at, 0);
    }

    #[test]
    fn test_invalid_paths_are_rejected() {
        let cache = cache();
        for bad in ["", ".a", "a[", "a[]"] {
            assert!(cache.set_sync(bad, 1, None).is_err(), "{:?}", bad);
            assert!(cache.get_sync(bad, None).is_err(), "{:?}", bad);
        }
    }

    #[test]
    fn test_has_treats_nested_null_as_absent() {
        let cache = cache();
        cache.set_sync("doc", json!({"a": null, "b": 0}), None).unwrap();
        assert!(cache.has_sync("doc").unwrap());
        assert!(!cache.has_sync("doc.a").unwrap());
        assert!(cache.has_sync("doc.b").unwrap());
        assert_eq!(cache.get_sync("doc.a", None).unwrap().unwrap().value, json!(null));
    }

    #[test]
    fn test_segments_path_keeps_dots_in_keys() {
        let cache = cache();
        cache.set_sync(["a.b", "c"], 1, None).unwrap();
        assert!(cache.has_sync(["a.b"]).unwrap());
        assert!(!cache.has_sync("a").unwrap());
        assert_eq!(cache.get_json_sync(None).unwrap(), json!({"a.b": {"c": 1}}));
    }

    #[test]
    fn test_default_ttl_applies() {
        let cache = HybridCache::with_backend(
            Arc::new(VolatileBackend::new(StoreId::new("unit"))),
            CacheOptions::new().with_ttl(60_000u64),
        );
        let before = now_millis();
        cache.set_sync("k", "v", None).unwrap();
        let found = cache.get_sync("k", None).unwrap().unwrap();
        assert!(found.expires_at >= before + 60_000);

        cache.set_sync("p", "v", Some(Ttl::NEVER)).unwrap();
        assert_eq!(cache.get_sync("p", None).unwrap().unwrap().expires_at, 0);
    }

    #[test]
    fn test_reset_with_rejects_empty_key_before_clearing() {
        let cache = cache();
        cache.set_sync("keep", 1, None).unwrap();
        let err = cache.reset_with_sync([("", json!(1))], None);
        assert!(err.is_err());
        assert!(cache.has_sync("keep").unwrap());
    }

    #[test]
    fn test_reset_with_rejects_keys_that_are_paths() {
        let cache = cache();
        cache.set_sync("keep", 1, None).unwrap();
        for key in ["a.b", "items[0]", "a["] {
            let err = cache.reset_with_sync([(key, json!(1))], None).unwrap_err();
            assert!(
                matches!(err, LarderError::Validation(ValidationError::InvalidKeyPath { .. })),
                "{}",
                key
            );
        }
        assert!(cache.has_sync("keep").unwrap());

        cache.reset_with_sync([("plain", json!(1))], None).unwrap();
        assert_eq!(cache.get_sync("plain", None).unwrap().unwrap().value, json!(1));
        assert!(!cache.has_sync("keep").unwrap());
    }

    #[test]
    fn test_stats_count_reads() {
        let cache = cache();
        cache.set_sync("k", 1, None).unwrap();
        cache.get_sync("k", None).unwrap();
        cache.get_sync("missing", None).unwrap();
        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entry_count, 1);
        assert!(stats.approximate_bytes > 0);
    }

    #[tokio::test]
    async fn test_async_forms_on_volatile() {
        let cache = cache();
        cache.set("profile", json!({"a": 1, "b": 2}), None).await.unwrap();
        assert!(cache.unset("profile.a").await.unwrap());
        assert_eq!(
            cache.get("profile", None).await.unwrap().unwrap().value,
            json!({"b": 2})
        );
        assert!(cache.clear().await.unwrap());
        assert!(!cache.clear().await.unwrap());
    }
}
