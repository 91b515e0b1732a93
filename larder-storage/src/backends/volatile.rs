//! Volatile backend: a process-local mirror and nothing else.

use std::collections::BTreeMap;

use async_trait::async_trait;
use larder_core::{BackendKind, Entry, LarderResult, StoreId};

use crate::mirror::Mirror;
use crate::traits::StorageBackend;

/// In-memory backend. Data dies with the instance and is never shared.
#[derive(Debug)]
pub struct VolatileBackend {
    store_id: StoreId,
    mirror: Mirror,
}

impl VolatileBackend {
    pub fn new(store_id: StoreId) -> Self {
        Self {
            store_id,
            mirror: Mirror::new(),
        }
    }
}

#[async_trait]
impl StorageBackend for VolatileBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Volatile
    }

    fn store_id(&self) -> &StoreId {
        &self.store_id
    }

    fn get(&self, key: &str) -> LarderResult<Option<Entry>> {
        self.mirror.get(key)
    }

    fn set(&self, key: &str, entry: Entry) -> LarderResult<()> {
        self.mirror.insert(key, entry)
    }

    fn has(&self, key: &str) -> LarderResult<bool> {
        self.mirror.contains(key)
    }

    fn delete(&self, key: Option<&str>) -> LarderResult<bool> {
        match key {
            Some(key) => self.mirror.remove(key),
            None => self.mirror.clear(),
        }
    }

    fn get_all(&self) -> LarderResult<BTreeMap<String, Entry>> {
        self.mirror.snapshot()
    }

    fn len(&self) -> usize {
        self.mirror.len()
    }

    fn approximate_byte_size(&self) -> usize {
        self.mirror.approximate_byte_size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_volatile_crud() {
        let backend = VolatileBackend::new(StoreId::new("v"));
        assert_eq!(backend.kind(), BackendKind::Volatile);
        assert!(backend.is_initialized());

        backend.set("a", Entry::persistent(json!(1))).unwrap();
        assert!(backend.has("a").unwrap());
        assert_eq!(backend.len(), 1);
        assert!(backend.delete(Some("a")).unwrap());
        assert!(!backend.delete(Some("a")).unwrap());
        assert!(backend.is_empty());
    }

    #[test]
    fn test_volatile_clear_reports_content() {
        let backend = VolatileBackend::new(StoreId::new("v"));
        backend.set("a", Entry::persistent(json!(1))).unwrap();
        assert!(backend.delete(None).unwrap());
        assert!(!backend.delete(None).unwrap());
    }

    #[tokio::test]
    async fn test_volatile_async_forms_match_sync() {
        let backend = VolatileBackend::new(StoreId::new("v"));
        backend.initialize().await.unwrap();
        backend
            .set_async("a", Entry::persistent(json!("x")))
            .await
            .unwrap();
        assert_eq!(backend.get("a").unwrap().unwrap().value, json!("x"));
        assert!(backend.has_async("a").await.unwrap());
        assert_eq!(backend.get_all_async().await.unwrap().len(), 1);
    }
}
