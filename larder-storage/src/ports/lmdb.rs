//! LMDB-backed durable stores.
//!
//! Uses the heed crate (Rust bindings for LMDB). [`LmdbKvStore`] is the
//! synchronous key-value port; [`LmdbAsyncStore`] wraps the same environment
//! and moves every transaction onto the blocking pool.
//!
//! # Key Layout
//!
//! The async store keeps records of every store id in one database, keyed
//! by `"{store}\u{1f}{key}"`, so clearing a store is a prefix scan.

use std::path::Path;

use async_trait::async_trait;
use heed::types::Str;
use heed::{Database, Env, EnvOpenOptions, RoTxn, RwTxn};
use larder_core::{Entry, LarderError, LarderResult, StorageError, StoreId};

use super::{AsyncDurableStore, SyncDurableStore};

const RECORD_SEPARATOR: char = '\u{1f}';

/// Error type for LMDB store operations.
#[derive(Debug, thiserror::Error)]
pub enum LmdbStoreError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open the database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    /// Transaction error.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// Stored record could not be decoded.
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// Blocking task failed.
    #[error("Blocking task failed: {0}")]
    Join(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<LmdbStoreError> for LarderError {
    fn from(e: LmdbStoreError) -> Self {
        LarderError::Storage(StorageError::TransactionFailed {
            reason: e.to_string(),
        })
    }
}

fn txn_err(e: heed::Error) -> LmdbStoreError {
    LmdbStoreError::Transaction(e.to_string())
}

/// Synchronous string key-value store on LMDB.
///
/// Cloning is cheap; clones share the environment.
#[derive(Clone)]
pub struct LmdbKvStore {
    env: Env,
    db: Database<Str, Str>,
}

impl std::fmt::Debug for LmdbKvStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LmdbKvStore")
            .field("path", &self.env.path())
            .finish()
    }
}

impl LmdbKvStore {
    /// Open (or create) a store in `path`.
    ///
    /// # Arguments
    ///
    /// * `path` - Directory where LMDB files will be stored
    /// * `max_size_mb` - Maximum size of the database in megabytes
    pub fn open<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, LmdbStoreError> {
        std::fs::create_dir_all(&path)?;

        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb * 1024 * 1024)
                .max_dbs(1)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbStoreError::EnvOpen(e.to_string()))?;

        let mut wtxn = env.write_txn().map_err(txn_err)?;
        let db: Database<Str, Str> = env
            .create_database(&mut wtxn, None)
            .map_err(|e| LmdbStoreError::DbOpen(e.to_string()))?;
        wtxn.commit().map_err(txn_err)?;

        Ok(Self { env, db })
    }

    fn read<T>(
        &self,
        f: impl FnOnce(&RoTxn<'_>, Database<Str, Str>) -> heed::Result<T>,
    ) -> Result<T, LmdbStoreError> {
        let rtxn = self.env.read_txn().map_err(txn_err)?;
        f(&rtxn, self.db).map_err(txn_err)
    }

    fn write<T>(
        &self,
        f: impl FnOnce(&mut RwTxn<'_>, Database<Str, Str>) -> heed::Result<T>,
    ) -> Result<T, LmdbStoreError> {
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        let out = f(&mut wtxn, self.db).map_err(txn_err)?;
        wtxn.commit().map_err(txn_err)?;
        Ok(out)
    }

    /// Every (key, value) pair whose key starts with `prefix`.
    pub fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, String)>, LmdbStoreError> {
        self.read(|rtxn, db| {
            let mut pairs = Vec::new();
            for item in db.prefix_iter(rtxn, prefix)? {
                let (key, value) = item?;
                pairs.push((key.to_string(), value.to_string()));
            }
            Ok(pairs)
        })
    }

    /// Delete every key starting with `prefix` in one transaction.
    pub fn remove_prefix(&self, prefix: &str) -> Result<u64, LmdbStoreError> {
        let keys: Vec<String> = self
            .scan_prefix(prefix)?
            .into_iter()
            .map(|(key, _)| key)
            .collect();
        self.write(|wtxn, db| {
            let mut deleted = 0u64;
            for key in &keys {
                if db.delete(wtxn, key)? {
                    deleted += 1;
                }
            }
            Ok(deleted)
        })
    }

    fn raw_get(&self, key: &str) -> Result<Option<String>, LmdbStoreError> {
        self.read(|rtxn, db| Ok(db.get(rtxn, key)?.map(str::to_string)))
    }

    fn raw_put(&self, key: &str, value: &str) -> Result<(), LmdbStoreError> {
        self.write(|wtxn, db| db.put(wtxn, key, value))
    }

    fn raw_delete(&self, key: &str) -> Result<bool, LmdbStoreError> {
        self.write(|wtxn, db| db.delete(wtxn, key))
    }
}

impl SyncDurableStore for LmdbKvStore {
    fn get_item(&self, key: &str) -> LarderResult<Option<String>> {
        Ok(self.raw_get(key)?)
    }

    fn set_item(&self, key: &str, value: &str) -> LarderResult<()> {
        Ok(self.raw_put(key, value)?)
    }

    fn remove_item(&self, key: &str) -> LarderResult<bool> {
        Ok(self.raw_delete(key)?)
    }

    fn keys(&self, prefix: &str) -> LarderResult<Vec<String>> {
        Ok(self
            .scan_prefix(prefix)?
            .into_iter()
            .map(|(key, _)| key)
            .collect())
    }
}

fn record_prefix(store: &StoreId) -> String {
    format!("{}{}", store, RECORD_SEPARATOR)
}

fn record_key(store: &StoreId, key: &str) -> String {
    format!("{}{}", record_prefix(store), key)
}

/// Asynchronous record store on LMDB.
#[derive(Debug, Clone)]
pub struct LmdbAsyncStore {
    kv: LmdbKvStore,
}

impl LmdbAsyncStore {
    pub fn open<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, LmdbStoreError> {
        Ok(Self::from_kv(LmdbKvStore::open(path, max_size_mb)?))
    }

    /// Share an already open environment.
    pub fn from_kv(kv: LmdbKvStore) -> Self {
        Self { kv }
    }

    async fn blocking<T, F>(&self, f: F) -> LarderResult<T>
    where
        T: Send + 'static,
        F: FnOnce(LmdbKvStore) -> Result<T, LmdbStoreError> + Send + 'static,
    {
        let kv = self.kv.clone();
        let out = tokio::task::spawn_blocking(move || f(kv))
            .await
            .map_err(|e| LmdbStoreError::Join(e.to_string()))??;
        Ok(out)
    }
}

fn decode(raw: &str) -> Result<Entry, LmdbStoreError> {
    Entry::from_json_str(raw).map_err(|e| LmdbStoreError::Deserialization(e.to_string()))
}

#[async_trait]
impl AsyncDurableStore for LmdbAsyncStore {
    async fn get(&self, store: &StoreId, key: &str) -> LarderResult<Option<Entry>> {
        let full = record_key(store, key);
        self.blocking(move |kv| kv.raw_get(&full)?.as_deref().map(decode).transpose())
            .await
    }

    async fn put(&self, store: &StoreId, key: &str, entry: &Entry) -> LarderResult<()> {
        let full = record_key(store, key);
        let raw = entry.to_json_string().map_err(StorageError::from)?;
        self.blocking(move |kv| kv.raw_put(&full, &raw)).await
    }

    async fn delete(&self, store: &StoreId, key: &str) -> LarderResult<bool> {
        let full = record_key(store, key);
        self.blocking(move |kv| kv.raw_delete(&full)).await
    }

    async fn clear(&self, store: &StoreId) -> LarderResult<u64> {
        let prefix = record_prefix(store);
        self.blocking(move |kv| kv.remove_prefix(&prefix)).await
    }

    async fn load_all(&self, store: &StoreId) -> LarderResult<Vec<(String, Entry)>> {
        let prefix = record_prefix(store);
        self.blocking(move |kv| {
            let mut records = Vec::new();
            for (full, raw) in kv.scan_prefix(&prefix)? {
                let key = full[prefix.len()..].to_string();
                match decode(&raw) {
                    Ok(entry) => records.push((key, entry)),
                    Err(e) => {
                        tracing::warn!(key = %key, error = %e, "Skipping undecodable record");
                    }
                }
            }
            Ok(records)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn kv() -> (LmdbKvStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = LmdbKvStore::open(dir.path(), 10).unwrap();
        (store, dir)
    }

    #[test]
    fn test_kv_roundtrip() {
        let (store, _dir) = kv();
        store.set_item("a", "1").unwrap();
        assert_eq!(store.get_item("a").unwrap().as_deref(), Some("1"));
        assert!(store.remove_item("a").unwrap());
        assert!(!store.remove_item("a").unwrap());
        assert!(store.get_item("a").unwrap().is_none());
    }

    #[test]
    fn test_kv_keys_by_prefix() {
        let (store, _dir) = kv();
        store.set_item("ns/app//x", "1").unwrap();
        store.set_item("ns/app//y", "2").unwrap();
        store.set_item("ns/other//z", "3").unwrap();
        store.set_item("ns/app2//x", "4").unwrap();
        store.set_item("ns/ap", "5").unwrap();

        let keys = store.keys("ns/app//").unwrap();
        assert_eq!(keys, vec!["ns/app//x", "ns/app//y"]);
        assert!(store.keys("ns/zzz").unwrap().is_empty());
        assert_eq!(store.remove_prefix("ns/app//").unwrap(), 2);
        assert_eq!(
            store.keys("ns/").unwrap(),
            vec!["ns/ap", "ns/app2//x", "ns/other//z"]
        );
    }

    #[test]
    fn test_kv_probe() {
        let (store, _dir) = kv();
        assert!(store.probe());
        assert!(store.get_item(super::super::PROBE_KEY).unwrap().is_none());
    }

    #[test]
    fn test_reopen_preserves_data() {
        let dir = TempDir::new().unwrap();
        {
            let store = LmdbKvStore::open(dir.path(), 10).unwrap();
            store.set_item("k", "v").unwrap();
        }
        let store = LmdbKvStore::open(dir.path(), 10).unwrap();
        assert_eq!(store.get_item("k").unwrap().as_deref(), Some("v"));
    }

    #[tokio::test]
    async fn test_async_store_partitions_by_store_id() {
        let (kv, _dir) = kv();
        let store = LmdbAsyncStore::from_kv(kv);
        let a = StoreId::new("a");
        let a_sub = StoreId::with_sub("a", "prefs");

        store
            .put(&a, "user", &Entry::persistent(json!({"name": "Jane"})))
            .await
            .unwrap();
        store
            .put(&a_sub, "theme", &Entry::new(json!("dark"), 99))
            .await
            .unwrap();

        let loaded = store.load_all(&a).await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].0, "user");

        let theme = store.get(&a_sub, "theme").await.unwrap().unwrap();
        assert_eq!(theme.expires_at, 99);

        assert_eq!(store.clear(&a).await.unwrap(), 1);
        assert!(store.load_all(&a).await.unwrap().is_empty());
        assert_eq!(store.load_all(&a_sub).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_async_store_delete_and_probe() {
        let (kv, _dir) = kv();
        let store = LmdbAsyncStore::from_kv(kv);
        let id = StoreId::new("s");
        assert!(store.probe().await);

        store.put(&id, "k", &Entry::persistent(json!(1))).await.unwrap();
        assert!(store.delete(&id, "k").await.unwrap());
        assert!(!store.delete(&id, "k").await.unwrap());
        assert!(store.get(&id, "k").await.unwrap().is_none());
    }
}
