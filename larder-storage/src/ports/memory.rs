//! In-memory durable stores.
//!
//! Stand-ins for a real storage engine in tests and embedded use. Both
//! can be switched unavailable, or made to fail writes, to exercise the
//! factory's fallback and the backends' error paths.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use larder_core::{Entry, LarderResult, StorageError, StoreId};

fn unavailable() -> StorageError {
    StorageError::TransactionFailed {
        reason: "store unavailable".to_string(),
    }
}

fn write_rejected() -> StorageError {
    StorageError::TransactionFailed {
        reason: "write rejected".to_string(),
    }
}

/// Synchronous key-value store held in memory.
#[derive(Debug)]
pub struct MemoryKvStore {
    items: RwLock<BTreeMap<String, String>>,
    available: AtomicBool,
    fail_writes: AtomicBool,
    write_budget: AtomicU64,
}

impl Default for MemoryKvStore {
    fn default() -> Self {
        Self {
            items: RwLock::new(BTreeMap::new()),
            available: AtomicBool::new(true),
            fail_writes: AtomicBool::new(false),
            write_budget: AtomicU64::new(u64::MAX),
        }
    }
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// An unavailable store rejects every operation, including probes.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// While set, writes and removals fail but reads succeed.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Let `writes` more writes or removals succeed, then fail the rest.
    pub fn fail_writes_after(&self, writes: u64) {
        self.write_budget.store(writes, Ordering::SeqCst);
    }

    /// Raw value under `key`, bypassing availability switches.
    pub fn raw(&self, key: &str) -> Option<String> {
        self.items.read().ok().and_then(|items| items.get(key).cloned())
    }

    pub fn raw_len(&self) -> usize {
        self.items.read().map(|items| items.len()).unwrap_or(0)
    }

    fn check_read(&self) -> LarderResult<()> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(unavailable().into());
        }
        Ok(())
    }

    fn check_write(&self) -> LarderResult<()> {
        self.check_read()?;
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(write_rejected().into());
        }
        let spent = self
            .write_budget
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| match left {
                u64::MAX => Some(u64::MAX),
                0 => None,
                n => Some(n - 1),
            });
        if spent.is_err() {
            return Err(write_rejected().into());
        }
        Ok(())
    }
}

impl super::SyncDurableStore for MemoryKvStore {
    fn get_item(&self, key: &str) -> LarderResult<Option<String>> {
        self.check_read()?;
        let items = self.items.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(items.get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> LarderResult<()> {
        self.check_write()?;
        let mut items = self.items.write().map_err(|_| StorageError::LockPoisoned)?;
        items.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> LarderResult<bool> {
        self.check_write()?;
        let mut items = self.items.write().map_err(|_| StorageError::LockPoisoned)?;
        Ok(items.remove(key).is_some())
    }

    fn keys(&self, prefix: &str) -> LarderResult<Vec<String>> {
        self.check_read()?;
        let items = self.items.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(items
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect())
    }
}

/// Asynchronous record store held in memory.
#[derive(Debug)]
pub struct MemoryAsyncStore {
    records: tokio::sync::RwLock<HashMap<StoreId, BTreeMap<String, Entry>>>,
    available: AtomicBool,
    fail_writes: AtomicBool,
    write_delay_ms: AtomicU64,
    read_delay_ms: AtomicU64,
    writes: AtomicU64,
}

impl Default for MemoryAsyncStore {
    fn default() -> Self {
        Self {
            records: tokio::sync::RwLock::new(HashMap::new()),
            available: AtomicBool::new(true),
            fail_writes: AtomicBool::new(false),
            write_delay_ms: AtomicU64::new(0),
            read_delay_ms: AtomicU64::new(0),
            writes: AtomicU64::new(0),
        }
    }
}

impl MemoryAsyncStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Delay applied before every write lands.
    pub fn set_write_delay(&self, delay: Duration) {
        self.write_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Delay applied after every read has taken its data and before it
    /// returns, so callers act on a value that may since have changed.
    pub fn set_read_delay(&self, delay: Duration) {
        self.read_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Number of writes that landed.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Records of `store`, bypassing availability switches.
    pub async fn snapshot(&self, store: &StoreId) -> BTreeMap<String, Entry> {
        self.records
            .read()
            .await
            .get(store)
            .cloned()
            .unwrap_or_default()
    }

    fn check_read(&self) -> LarderResult<()> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(unavailable().into());
        }
        Ok(())
    }

    async fn read_pause(&self) {
        let delay = self.read_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
    }

    async fn check_write(&self) -> LarderResult<()> {
        let delay = self.write_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        self.check_read()?;
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(write_rejected().into());
        }
        Ok(())
    }
}

#[async_trait]
impl super::AsyncDurableStore for MemoryAsyncStore {
    async fn get(&self, store: &StoreId, key: &str) -> LarderResult<Option<Entry>> {
        self.check_read()?;
        let found = self
            .records
            .read()
            .await
            .get(store)
            .and_then(|records| records.get(key).cloned());
        self.read_pause().await;
        Ok(found)
    }

    async fn put(&self, store: &StoreId, key: &str, entry: &Entry) -> LarderResult<()> {
        self.check_write().await?;
        self.records
            .write()
            .await
            .entry(store.clone())
            .or_default()
            .insert(key.to_string(), entry.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn delete(&self, store: &StoreId, key: &str) -> LarderResult<bool> {
        self.check_write().await?;
        let removed = self
            .records
            .write()
            .await
            .get_mut(store)
            .map(|records| records.remove(key).is_some())
            .unwrap_or(false);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(removed)
    }

    async fn clear(&self, store: &StoreId) -> LarderResult<u64> {
        self.check_write().await?;
        let removed = self
            .records
            .write()
            .await
            .remove(store)
            .map(|records| records.len() as u64)
            .unwrap_or(0);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(removed)
    }

    async fn load_all(&self, store: &StoreId) -> LarderResult<Vec<(String, Entry)>> {
        self.check_read()?;
        let loaded = self
            .records
            .read()
            .await
            .get(store)
            .map(|records| {
                records
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect()
            })
            .unwrap_or_default();
        self.read_pause().await;
        Ok(loaded)
    }
}

#[cfg(test)]
mod tests {
    use super::super::{AsyncDurableStore, SyncDurableStore};
    use super::*;
    use serde_json::json;

    #[test]
    fn test_kv_prefix_scan_is_bounded() {
        let store = MemoryKvStore::new();
        store.set_item("a/1", "x").unwrap();
        store.set_item("a/2", "y").unwrap();
        store.set_item("b/1", "z").unwrap();
        assert_eq!(store.keys("a/").unwrap(), vec!["a/1", "a/2"]);
        assert!(store.keys("c/").unwrap().is_empty());
    }

    #[test]
    fn test_kv_unavailable_fails_probe() {
        let store = MemoryKvStore::new();
        assert!(store.probe());
        store.set_available(false);
        assert!(!store.probe());
        assert!(store.get_item("a").is_err());
    }

    #[test]
    fn test_kv_fail_writes_keeps_reads() {
        let store = MemoryKvStore::new();
        store.set_item("a", "1").unwrap();
        store.set_fail_writes(true);
        assert!(store.set_item("a", "2").is_err());
        assert_eq!(store.get_item("a").unwrap().as_deref(), Some("1"));
    }

    #[test]
    fn test_kv_write_budget_runs_out() {
        let store = MemoryKvStore::new();
        store.fail_writes_after(2);
        store.set_item("a", "1").unwrap();
        store.set_item("b", "2").unwrap();
        assert!(store.set_item("c", "3").is_err());
        assert!(store.remove_item("a").is_err());
        assert_eq!(store.raw_len(), 2);
    }

    #[tokio::test]
    async fn test_async_store_basic_operations() {
        let store = MemoryAsyncStore::new();
        let id = StoreId::new("s");
        store.put(&id, "k", &Entry::persistent(json!(1))).await.unwrap();
        assert_eq!(store.load_all(&id).await.unwrap().len(), 1);
        assert_eq!(store.write_count(), 1);
        assert!(store.delete(&id, "k").await.unwrap());
        assert_eq!(store.clear(&id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_async_store_failure_switches() {
        let store = MemoryAsyncStore::new();
        let id = StoreId::new("s");
        store.set_fail_writes(true);
        assert!(store.put(&id, "k", &Entry::persistent(json!(1))).await.is_err());
        assert!(!store.probe().await);
        store.set_fail_writes(false);
        store.set_available(false);
        assert!(store.load_all(&id).await.is_err());
        assert!(!store.probe().await);
    }
}
