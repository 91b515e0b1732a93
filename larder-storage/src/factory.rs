//! Backend selection.
//!
//! A [`StorageEnvironment`] describes what one execution context can reach:
//! the shared durable stores, its own isolated store, and the coherence
//! bus. The [`StorageFactory`] probes those ports and builds a backend for
//! a requested kind, walking [`AUTO_PRIORITY`] when the kind is `Auto`.

use std::sync::Arc;

use larder_core::{
    BackendKind, LarderResult, StorageError, StoreId, AUTO_PRIORITY, DEFAULT_NAMESPACE,
};
use tracing::{debug, warn};

use crate::backends::{DurableAsyncBackend, DurableSyncBackend, VolatileBackend};
use crate::bus::CoherenceBus;
use crate::ports::{AsyncDurableStore, SyncDurableStore};
use crate::traits::StorageBackend;

/// Storage reachable from one execution context.
///
/// Contexts that should share data hand the same durable stores and bus to
/// their environments; the isolated store should be unique per context.
#[derive(Clone, Default)]
pub struct StorageEnvironment {
    durable_sync: Option<Arc<dyn SyncDurableStore>>,
    durable_async: Option<Arc<dyn AsyncDurableStore>>,
    isolated: Option<Arc<dyn SyncDurableStore>>,
    bus: Option<Arc<CoherenceBus>>,
}

impl std::fmt::Debug for StorageEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageEnvironment")
            .field("durable_sync", &self.durable_sync.is_some())
            .field("durable_async", &self.durable_async.is_some())
            .field("isolated", &self.isolated.is_some())
            .field("bus", &self.bus.is_some())
            .finish()
    }
}

impl StorageEnvironment {
    /// An environment with no durable storage; only volatile backends.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_durable_sync(mut self, store: Arc<dyn SyncDurableStore>) -> Self {
        self.durable_sync = Some(store);
        self
    }

    pub fn with_durable_async(mut self, store: Arc<dyn AsyncDurableStore>) -> Self {
        self.durable_async = Some(store);
        self
    }

    pub fn with_isolated(mut self, store: Arc<dyn SyncDurableStore>) -> Self {
        self.isolated = Some(store);
        self
    }

    /// Use a private bus instead of the process-wide one.
    pub fn with_bus(mut self, bus: Arc<CoherenceBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// The injected bus, or the process-wide one.
    pub fn bus(&self) -> Arc<CoherenceBus> {
        self.bus.clone().unwrap_or_else(CoherenceBus::global)
    }
}

/// Builds storage backends for an environment.
#[derive(Debug, Clone)]
pub struct StorageFactory {
    env: StorageEnvironment,
    namespace: String,
}

impl StorageFactory {
    pub fn new(env: StorageEnvironment) -> Self {
        Self {
            env,
            namespace: DEFAULT_NAMESPACE.to_string(),
        }
    }

    /// Key prefix for durable-sync and isolated stores.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn environment(&self) -> &StorageEnvironment {
        &self.env
    }

    /// Probe whether `kind` can be constructed right now.
    pub async fn is_available(&self, kind: BackendKind) -> bool {
        match kind {
            BackendKind::Volatile | BackendKind::Auto => true,
            BackendKind::DurableSync => self
                .env
                .durable_sync
                .as_ref()
                .map_or(false, |store| store.probe()),
            BackendKind::DurableAsync => match &self.env.durable_async {
                Some(store) => store.probe().await,
                None => false,
            },
            BackendKind::Isolated => self
                .env
                .isolated
                .as_ref()
                .map_or(false, |store| store.probe()),
        }
    }

    /// Build a backend for `requested`.
    ///
    /// A concrete kind that fails its probe is an error. `Auto` takes the
    /// first available kind in [`AUTO_PRIORITY`], ending at volatile.
    pub async fn create(
        &self,
        requested: BackendKind,
        store_id: StoreId,
    ) -> LarderResult<Arc<dyn StorageBackend>> {
        if requested != BackendKind::Auto {
            if !self.is_available(requested).await {
                warn!(kind = %requested, store = %store_id, "Requested backend unavailable");
                return Err(StorageError::BackendUnavailable { kind: requested }.into());
            }
            return self.construct(requested, store_id);
        }

        for kind in AUTO_PRIORITY {
            if !self.is_available(kind).await {
                debug!(kind = %kind, "Skipping unavailable backend");
                continue;
            }
            match self.construct(kind, store_id.clone()) {
                Ok(backend) => {
                    debug!(kind = %kind, store = %store_id, "Selected backend");
                    return Ok(backend);
                }
                Err(e) => {
                    warn!(kind = %kind, error = %e, "Backend construction failed, trying next");
                }
            }
        }
        self.construct(BackendKind::Volatile, store_id)
    }

    fn construct(
        &self,
        kind: BackendKind,
        store_id: StoreId,
    ) -> LarderResult<Arc<dyn StorageBackend>> {
        let missing = || StorageError::BackendUnavailable { kind };
        let backend: Arc<dyn StorageBackend> = match kind {
            BackendKind::Volatile | BackendKind::Auto => Arc::new(VolatileBackend::new(store_id)),
            BackendKind::DurableSync => {
                let store = self.env.durable_sync.clone().ok_or_else(missing)?;
                Arc::new(DurableSyncBackend::open(
                    store,
                    store_id,
                    &self.namespace,
                    self.env.bus(),
                )?)
            }
            BackendKind::DurableAsync => {
                let store = self.env.durable_async.clone().ok_or_else(missing)?;
                Arc::new(DurableAsyncBackend::new(store, store_id, self.env.bus()))
            }
            BackendKind::Isolated => {
                let store = self.env.isolated.clone().ok_or_else(missing)?;
                Arc::new(DurableSyncBackend::isolated(store, store_id, &self.namespace)?)
            }
        };
        Ok(backend)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{MemoryAsyncStore, MemoryKvStore};
    use larder_core::{Entry, LarderError};
    use serde_json::json;

    fn full_env() -> (StorageEnvironment, Arc<MemoryKvStore>, Arc<MemoryAsyncStore>) {
        let kv = MemoryKvStore::shared();
        let records = MemoryAsyncStore::shared();
        let env = StorageEnvironment::new()
            .with_durable_sync(kv.clone())
            .with_durable_async(records.clone())
            .with_isolated(MemoryKvStore::shared())
            .with_bus(Arc::new(CoherenceBus::new(16)));
        (env, kv, records)
    }

    #[tokio::test]
    async fn test_auto_prefers_durable_sync() {
        let (env, _, _) = full_env();
        let backend = StorageFactory::new(env)
            .create(BackendKind::Auto, StoreId::new("s"))
            .await
            .unwrap();
        assert_eq!(backend.kind(), BackendKind::DurableSync);
    }

    #[tokio::test]
    async fn test_auto_walks_priority_order() {
        let (env, kv, records) = full_env();
        let factory = StorageFactory::new(env);

        kv.set_available(false);
        let backend = factory.create(BackendKind::Auto, StoreId::new("s")).await.unwrap();
        assert_eq!(backend.kind(), BackendKind::DurableAsync);

        records.set_available(false);
        let backend = factory.create(BackendKind::Auto, StoreId::new("s")).await.unwrap();
        assert_eq!(backend.kind(), BackendKind::Isolated);
    }

    #[tokio::test]
    async fn test_auto_ends_at_volatile() {
        let backend = StorageFactory::new(StorageEnvironment::new())
            .create(BackendKind::Auto, StoreId::new("s"))
            .await
            .unwrap();
        assert_eq!(backend.kind(), BackendKind::Volatile);
    }

    #[tokio::test]
    async fn test_explicit_unavailable_kind_fails() {
        let factory = StorageFactory::new(StorageEnvironment::new());
        for kind in [
            BackendKind::DurableSync,
            BackendKind::DurableAsync,
            BackendKind::Isolated,
        ] {
            let err = factory.create(kind, StoreId::new("s")).await.err().unwrap();
            assert_eq!(
                err,
                LarderError::Storage(StorageError::BackendUnavailable { kind })
            );
        }
    }

    #[tokio::test]
    async fn test_failed_probe_makes_kind_unavailable() {
        let (env, kv, _) = full_env();
        kv.set_fail_writes(true);
        let factory = StorageFactory::new(env);
        assert!(!factory.is_available(BackendKind::DurableSync).await);
        assert!(factory
            .create(BackendKind::DurableSync, StoreId::new("s"))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_explicit_kinds_construct() {
        let (env, _, _) = full_env();
        let factory = StorageFactory::new(env);
        for kind in BackendKind::CONCRETE {
            let backend = factory.create(kind, StoreId::new("s")).await.unwrap();
            assert_eq!(backend.kind(), kind);
        }
    }

    #[tokio::test]
    async fn test_namespace_prefixes_durable_keys() {
        let (env, kv, _) = full_env();
        let backend = StorageFactory::new(env)
            .with_namespace("tenant")
            .create(BackendKind::DurableSync, StoreId::with_sub("s", "sub"))
            .await
            .unwrap();
        backend.set("k", Entry::persistent(json!(1))).unwrap();
        assert!(kv.raw("tenant/s/sub/k").is_some());
    }

    #[test]
    fn test_environment_defaults_to_global_bus() {
        let env = StorageEnvironment::new();
        assert!(Arc::ptr_eq(&env.bus(), &CoherenceBus::global()));
    }
}
