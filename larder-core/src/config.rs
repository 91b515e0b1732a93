//! Configuration types

use serde::{Deserialize, Serialize};

use crate::{BackendKind, ConfigError, LarderError, LarderResult, StoreId, Ttl};

/// Default logical store name.
pub const DEFAULT_STORE_NAME: &str = "larder";
/// Default key prefix for durable-sync stores.
pub const DEFAULT_NAMESPACE: &str = "larder";

/// Options recognized by the cache facade.
///
/// Every field has a default, so `{}` is a valid options document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CacheOptions {
    /// Default TTL when `set` omits one. Zero means never expires.
    pub ttl: Ttl,
    /// Whether reads delete expired entries they encounter.
    pub remove_expired: bool,
    /// Requested backend kind.
    pub storage: BackendKind,
    /// Logical store name; instances with equal names share data.
    pub store_name: String,
    /// Optional sub-store inside the logical store.
    pub sub_store_name: Option<String>,
    /// Key prefix used by durable-sync stores.
    pub namespace: String,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            ttl: Ttl::NEVER,
            remove_expired: false,
            storage: BackendKind::Auto,
            store_name: DEFAULT_STORE_NAME.to_string(),
            sub_store_name: None,
            namespace: DEFAULT_NAMESPACE.to_string(),
        }
    }
}

impl CacheOptions {
    /// Create options with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse options from a JSON document.
    pub fn from_json(raw: &str) -> LarderResult<Self> {
        let options: Self = serde_json::from_str(raw).map_err(|e| ConfigError::Malformed {
            reason: e.to_string(),
        })?;
        options.validate()?;
        Ok(options)
    }

    /// Set the default TTL.
    pub fn with_ttl(mut self, ttl: impl Into<Ttl>) -> Self {
        self.ttl = ttl.into();
        self
    }

    /// Set the default expired-entry removal policy.
    pub fn with_remove_expired(mut self, remove_expired: bool) -> Self {
        self.remove_expired = remove_expired;
        self
    }

    /// Set the requested backend kind.
    pub fn with_storage(mut self, storage: BackendKind) -> Self {
        self.storage = storage;
        self
    }

    /// Set the logical store name.
    pub fn with_store_name(mut self, name: impl Into<String>) -> Self {
        self.store_name = name.into();
        self
    }

    /// Set the sub-store name.
    pub fn with_sub_store_name(mut self, name: impl Into<String>) -> Self {
        self.sub_store_name = Some(name.into());
        self
    }

    /// Set the durable-sync key namespace.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// The logical store identity these options select.
    pub fn store_id(&self) -> StoreId {
        match &self.sub_store_name {
            Some(sub) => StoreId::with_sub(self.store_name.clone(), sub.clone()),
            None => StoreId::new(self.store_name.clone()),
        }
    }

    /// Validate the options.
    pub fn validate(&self) -> LarderResult<()> {
        if self.store_name.trim().is_empty() {
            return Err(LarderError::Config(ConfigError::InvalidValue {
                field: "storeName".to_string(),
                value: self.store_name.clone(),
                reason: "store name must not be empty".to_string(),
            }));
        }

        if self.store_name.contains('/') {
            return Err(LarderError::Config(ConfigError::InvalidValue {
                field: "storeName".to_string(),
                value: self.store_name.clone(),
                reason: "store name must not contain '/'".to_string(),
            }));
        }

        if let Some(sub) = &self.sub_store_name {
            if sub.trim().is_empty() || sub.contains('/') {
                return Err(LarderError::Config(ConfigError::InvalidValue {
                    field: "subStoreName".to_string(),
                    value: sub.clone(),
                    reason: "sub-store name must be non-empty and must not contain '/'"
                        .to_string(),
                }));
            }
        }

        if self.namespace.contains('/') {
            return Err(LarderError::Config(ConfigError::InvalidValue {
                field: "namespace".to_string(),
                value: self.namespace.clone(),
                reason: "namespace must not contain '/'".to_string(),
            }));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TtlSpan;

    #[test]
    fn test_defaults() {
        let options = CacheOptions::default();
        assert_eq!(options.ttl, Ttl::NEVER);
        assert!(!options.remove_expired);
        assert_eq!(options.storage, BackendKind::Auto);
        assert_eq!(options.store_id(), StoreId::new(DEFAULT_STORE_NAME));
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let options = CacheOptions::new()
            .with_ttl(TtlSpan::minutes(5.0))
            .with_remove_expired(true)
            .with_storage(BackendKind::DurableSync)
            .with_store_name("app")
            .with_sub_store_name("prefs")
            .with_namespace("ns");

        assert_eq!(options.ttl.to_millis(), 300_000.0);
        assert!(options.remove_expired);
        assert_eq!(options.storage, BackendKind::DurableSync);
        assert_eq!(options.store_id(), StoreId::with_sub("app", "prefs"));
        assert_eq!(options.namespace, "ns");
    }

    #[test]
    fn test_from_json_option_table() {
        let options = CacheOptions::from_json(
            r#"{"ttl": {"seconds": 30}, "removeExpired": true, "storage": "durable-async"}"#,
        )
        .unwrap();
        assert_eq!(options.ttl.to_millis(), 30_000.0);
        assert!(options.remove_expired);
        assert_eq!(options.storage, BackendKind::DurableAsync);
        assert_eq!(options.store_name, DEFAULT_STORE_NAME);
    }

    #[test]
    fn test_from_json_unknown_storage_is_volatile() {
        let options = CacheOptions::from_json(r#"{"storage": "floppy"}"#).unwrap();
        assert_eq!(options.storage, BackendKind::Volatile);
    }

    #[test]
    fn test_from_json_malformed() {
        let result = CacheOptions::from_json("{");
        assert!(matches!(
            result,
            Err(LarderError::Config(ConfigError::Malformed { .. }))
        ));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let cases = [
            (CacheOptions::new().with_store_name("  "), "storeName"),
            (CacheOptions::new().with_sub_store_name(""), "subStoreName"),
            (CacheOptions::new().with_store_name("a/b"), "storeName"),
            (CacheOptions::new().with_sub_store_name("x/y"), "subStoreName"),
            (CacheOptions::new().with_namespace("a/b"), "namespace"),
        ];
        for (options, expected) in cases {
            match options.validate() {
                Err(LarderError::Config(ConfigError::InvalidValue { field, .. })) => {
                    assert_eq!(field, expected)
                }
                other => panic!("expected invalid {}, got {:?}", expected, other),
            }
        }
    }
}
