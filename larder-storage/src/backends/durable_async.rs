//! Mirrored backend over an asynchronous durable store.
//!
//! Two cooperating layers behind one interface:
//!
//! - the [`Mirror`], authoritative for every synchronous call;
//! - an [`AsyncDurableStore`] sink, fed by a single write queue so durable
//!   writes land in the order the mirror saw them.
//!
//! `initialize` bulk-loads the mirror and starts the queue worker. Until it
//! completes, synchronous reads miss and synchronous writes are rejected
//! with `BackendUninitialized`; the load is the only writer to the mirror
//! while it runs. Asynchronous operations initialize on first use.
//!
//! Synchronous writes are fire-and-forget: the mirror is updated and the
//! change published before the durable write is queued, and a failed
//! durable write is only logged. Asynchronous writes wait for the durable
//! outcome and surface a `TransactionFailed` error; the mirror keeps the
//! optimistic value either way.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use larder_core::{BackendKind, Entry, LarderResult, Notification, StorageError, StoreId};
use once_cell::sync::OnceCell;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, error, warn};

use super::Coherence;
use crate::bus::CoherenceBus;
use crate::mirror::Mirror;
use crate::ports::AsyncDurableStore;
use crate::traits::StorageBackend;

type Ack<T> = oneshot::Sender<LarderResult<T>>;

enum WriteOp {
    Put {
        key: String,
        entry: Entry,
        ack: Option<Ack<()>>,
    },
    Delete {
        key: String,
        ack: Option<Ack<()>>,
    },
    Clear {
        ack: Option<Ack<()>>,
    },
    Barrier(oneshot::Sender<()>),
}

impl WriteOp {
    fn describe(&self) -> &'static str {
        match self {
            WriteOp::Put { .. } => "put",
            WriteOp::Delete { .. } => "delete",
            WriteOp::Clear { .. } => "clear",
            WriteOp::Barrier(_) => "barrier",
        }
    }
}

fn queue_closed() -> StorageError {
    StorageError::TransactionFailed {
        reason: "durable write queue closed".to_string(),
    }
}

pub struct DurableAsyncBackend {
    store_id: StoreId,
    durable: Arc<dyn AsyncDurableStore>,
    mirror: Mirror,
    coherence: Coherence,
    initialized: AtomicBool,
    stale: AtomicBool,
    init_lock: Mutex<()>,
    queue: OnceCell<mpsc::UnboundedSender<WriteOp>>,
}

impl std::fmt::Debug for DurableAsyncBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DurableAsyncBackend")
            .field("store_id", &self.store_id)
            .field("initialized", &self.is_initialized())
            .field("entries", &self.mirror.len())
            .finish()
    }
}

impl DurableAsyncBackend {
    /// Create an uninitialized backend. Joins the store's bus channel right
    /// away so notifications published during the bulk load are not lost.
    pub fn new(durable: Arc<dyn AsyncDurableStore>, store_id: StoreId, bus: Arc<CoherenceBus>) -> Self {
        let coherence = Coherence::join(bus, &store_id);
        Self {
            store_id,
            durable,
            mirror: Mirror::new(),
            coherence,
            initialized: AtomicBool::new(false),
            stale: AtomicBool::new(false),
            init_lock: Mutex::new(()),
            queue: OnceCell::new(),
        }
    }

    fn require_initialized(&self) -> LarderResult<()> {
        if !self.is_initialized() {
            return Err(StorageError::BackendUninitialized {
                store: self.store_id.to_string(),
            }
            .into());
        }
        Ok(())
    }

    /// Apply pending peer notifications. Lost notifications mark the mirror
    /// stale; the next asynchronous call reloads it.
    fn catch_up(&self) {
        let report = self.coherence.drain_into(&self.mirror);
        if report.lost_notifications() {
            warn!(store = %self.store_id, lagged = report.lagged, "Mirror marked stale");
            self.stale.store(true, Ordering::SeqCst);
        }
    }

    /// Initialize if needed, catch up, and reload a stale mirror.
    async fn ready(&self) -> LarderResult<()> {
        self.initialize().await?;
        self.catch_up();
        if self.stale.load(Ordering::SeqCst) {
            self.reconcile().await?;
        }
        Ok(())
    }

    fn start_writer(&self) {
        let (tx, rx) = mpsc::unbounded_channel();
        if self.queue.set(tx).is_ok() {
            tokio::spawn(run_write_queue(
                Arc::clone(&self.durable),
                self.store_id.clone(),
                rx,
            ));
        }
    }

    fn enqueue(&self, op: WriteOp) -> LarderResult<()> {
        let queue = self.queue.get().ok_or_else(|| StorageError::BackendUninitialized {
            store: self.store_id.to_string(),
        })?;
        queue.send(op).map_err(|_| queue_closed())?;
        Ok(())
    }

    async fn enqueue_and_wait(&self, make: impl FnOnce(Ack<()>) -> WriteOp) -> LarderResult<()> {
        let (tx, rx) = oneshot::channel();
        self.enqueue(make(tx))?;
        rx.await.map_err(|_| queue_closed())?
    }

    fn write_local(&self, key: &str, entry: &Entry) -> LarderResult<()> {
        self.mirror.insert(key, entry.clone())?;
        self.coherence.publish(Notification::Sync {
            key: key.to_string(),
            value: entry.clone(),
        });
        Ok(())
    }

    fn remove_local(&self, key: Option<&str>) -> LarderResult<bool> {
        match key {
            Some(key) => {
                let removed = self.mirror.remove(key)?;
                if removed {
                    self.coherence.publish(Notification::Unset {
                        key: key.to_string(),
                    });
                }
                Ok(removed)
            }
            None => {
                let removed = self.mirror.clear()?;
                self.coherence.publish(Notification::Clear);
                Ok(removed)
            }
        }
    }
}

/// Drain the write queue in order until every sender is gone.
async fn run_write_queue(
    durable: Arc<dyn AsyncDurableStore>,
    store_id: StoreId,
    mut rx: mpsc::UnboundedReceiver<WriteOp>,
) {
    debug!(store = %store_id, "Durable write queue started");
    while let Some(op) = rx.recv().await {
        let action = op.describe();
        match op {
            WriteOp::Put { key, entry, ack } => {
                let result = durable.put(&store_id, &key, &entry).await;
                settle(&store_id, action, Some(&key), result, ack);
            }
            WriteOp::Delete { key, ack } => {
                let result = durable.delete(&store_id, &key).await.map(|_| ());
                settle(&store_id, action, Some(&key), result, ack);
            }
            WriteOp::Clear { ack } => {
                let result = durable.clear(&store_id).await.map(|_| ());
                settle(&store_id, action, None, result, ack);
            }
            WriteOp::Barrier(done) => {
                let _ = done.send(());
            }
        }
    }
    debug!(store = %store_id, "Durable write queue stopped");
}

fn settle(
    store_id: &StoreId,
    action: &'static str,
    key: Option<&str>,
    result: LarderResult<()>,
    ack: Option<Ack<()>>,
) {
    match ack {
        Some(ack) => {
            let _ = ack.send(result);
        }
        None => {
            if let Err(e) = result {
                error!(
                    store = %store_id,
                    action = action,
                    key = key.unwrap_or(""),
                    error = %e,
                    "Durable write failed"
                );
            }
        }
    }
}

#[async_trait]
impl StorageBackend for DurableAsyncBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::DurableAsync
    }

    fn store_id(&self) -> &StoreId {
        &self.store_id
    }

    fn get(&self, key: &str) -> LarderResult<Option<Entry>> {
        if !self.is_initialized() {
            debug!(store = %self.store_id, key = key, "Read before initialization");
            return Ok(None);
        }
        self.catch_up();
        self.mirror.get(key)
    }

    fn set(&self, key: &str, entry: Entry) -> LarderResult<()> {
        self.require_initialized()?;
        self.catch_up();
        self.write_local(key, &entry)?;
        self.enqueue(WriteOp::Put {
            key: key.to_string(),
            entry,
            ack: None,
        })
    }

    fn has(&self, key: &str) -> LarderResult<bool> {
        if !self.is_initialized() {
            return Ok(false);
        }
        self.catch_up();
        self.mirror.contains(key)
    }

    fn delete(&self, key: Option<&str>) -> LarderResult<bool> {
        self.require_initialized()?;
        self.catch_up();
        let removed = self.remove_local(key)?;
        match key {
            Some(key) => self.enqueue(WriteOp::Delete {
                key: key.to_string(),
                ack: None,
            })?,
            None => self.enqueue(WriteOp::Clear { ack: None })?,
        }
        Ok(removed)
    }

    fn get_all(&self) -> LarderResult<BTreeMap<String, Entry>> {
        if !self.is_initialized() {
            return Ok(BTreeMap::new());
        }
        self.catch_up();
        self.mirror.snapshot()
    }

    fn len(&self) -> usize {
        if self.is_initialized() {
            self.catch_up();
        }
        self.mirror.len()
    }

    fn approximate_byte_size(&self) -> usize {
        if self.is_initialized() {
            self.catch_up();
        }
        self.mirror.approximate_byte_size()
    }

    fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    async fn initialize(&self) -> LarderResult<()> {
        if self.is_initialized() {
            return Ok(());
        }
        let _guard = self.init_lock.lock().await;
        if self.is_initialized() {
            return Ok(());
        }

        let records = self.durable.load_all(&self.store_id).await?;
        let loaded = records.len();
        self.mirror.replace_all(records)?;
        self.start_writer();
        self.initialized.store(true, Ordering::SeqCst);
        // Peers may have published while the load was in flight.
        self.catch_up();

        debug!(store = %self.store_id, entries = loaded, "Durable-async backend initialized");
        Ok(())
    }

    async fn reconcile(&self) -> LarderResult<()> {
        if !self.is_initialized() {
            return self.initialize().await;
        }
        let since = self.mirror.generation()?;
        self.flush().await?;
        let records = self.durable.load_all(&self.store_id).await?;
        self.stale.store(false, Ordering::SeqCst);
        let loaded = records.len();
        // Writes made while the load was in flight stay on top of it.
        let applied = self.mirror.merge_snapshot(records, since)?;
        debug!(store = %self.store_id, entries = loaded, applied, "Mirror reconciled");
        Ok(())
    }

    async fn flush(&self) -> LarderResult<()> {
        if self.queue.get().is_none() {
            return Ok(());
        }
        let (tx, rx) = oneshot::channel();
        self.enqueue(WriteOp::Barrier(tx))?;
        rx.await.map_err(|_| queue_closed())?;
        Ok(())
    }

    async fn get_async(&self, key: &str) -> LarderResult<Option<Entry>> {
        self.ready().await?;
        if let Some(entry) = self.mirror.get(key)? {
            return Ok(Some(entry));
        }

        // Queued local deletes must land before the durable store is asked.
        let since = self.mirror.generation()?;
        self.flush().await?;
        match self.durable.get(&self.store_id, key).await? {
            Some(entry) => {
                debug!(store = %self.store_id, key = key, "Mirror miss served from durable store");
                self.mirror.fill(key, entry, since)
            }
            None => self.mirror.get(key),
        }
    }

    async fn set_async(&self, key: &str, entry: Entry) -> LarderResult<()> {
        self.ready().await?;
        self.write_local(key, &entry)?;
        let key = key.to_string();
        self.enqueue_and_wait(|ack| WriteOp::Put {
            key,
            entry,
            ack: Some(ack),
        })
        .await
    }

    async fn has_async(&self, key: &str) -> LarderResult<bool> {
        Ok(self.get_async(key).await?.is_some())
    }

    async fn delete_async(&self, key: Option<&str>) -> LarderResult<bool> {
        self.ready().await?;
        let removed = self.remove_local(key)?;
        match key {
            Some(key) => {
                let key = key.to_string();
                self.enqueue_and_wait(|ack| WriteOp::Delete {
                    key,
                    ack: Some(ack),
                })
                .await?
            }
            None => {
                self.enqueue_and_wait(|ack| WriteOp::Clear { ack: Some(ack) })
                    .await?
            }
        }
        Ok(removed)
    }

    async fn get_all_async(&self) -> LarderResult<BTreeMap<String, Entry>> {
        self.ready().await?;
        self.mirror.snapshot()
    }
}
