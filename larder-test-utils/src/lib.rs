//! Larder Test Utilities
//!
//! Shared test infrastructure for the larder workspace:
//! - Proptest generators for documents, key paths, TTLs and entries
//! - Fixtures that build storage environments modelling execution contexts
//! - Custom assertions for larder error variants
//! - Tracing setup for tests

// Re-export the in-memory ports from their source crate
pub use larder_storage::{CoherenceBus, MemoryAsyncStore, MemoryKvStore, StorageEnvironment};

// Re-export core types for convenience
pub use larder_core::{
    BackendKind, CacheOptions, ConfigError, Entry, JsonValue, KeyPath, LarderError,
    LarderResult, StorageError, StoreId, Ttl, TtlSpan, ValidationError,
};

use std::sync::Arc;

/// Install a `tracing` subscriber that writes through the test harness.
///
/// Honors `RUST_LOG`; safe to call from every test.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for larder data.

    use super::*;
    use proptest::prelude::*;

    /// A field name that never parses as an array index.
    pub fn arb_field_name() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9_]{0,7}"
    }

    /// A path of one to three field names.
    pub fn arb_field_path() -> impl Strategy<Value = Vec<String>> {
        prop::collection::vec(arb_field_name(), 1..4)
    }

    /// The dotted form of [`arb_field_path`].
    pub fn arb_dotted_path() -> impl Strategy<Value = String> {
        arb_field_path().prop_map(|segments| segments.join("."))
    }

    /// A scalar JSON value.
    pub fn arb_json_leaf() -> impl Strategy<Value = JsonValue> {
        prop_oneof![
            Just(JsonValue::Null),
            any::<bool>().prop_map(JsonValue::from),
            any::<i32>().prop_map(JsonValue::from),
            "[a-zA-Z0-9 ]{0,12}".prop_map(JsonValue::from),
        ]
    }

    /// A JSON document up to three levels deep.
    pub fn arb_json_document() -> impl Strategy<Value = JsonValue> {
        arb_json_leaf().prop_recursive(3, 24, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(JsonValue::Array),
                prop::collection::btree_map(arb_field_name(), inner, 0..4)
                    .prop_map(|fields| JsonValue::Object(fields.into_iter().collect())),
            ]
        })
    }

    /// A non-empty JSON object.
    pub fn arb_json_object() -> impl Strategy<Value = JsonValue> {
        prop::collection::btree_map(arb_field_name(), arb_json_document(), 1..4)
            .prop_map(|fields| JsonValue::Object(fields.into_iter().collect()))
    }

    /// A TTL in any accepted shape, including "never".
    pub fn arb_ttl() -> impl Strategy<Value = Ttl> {
        prop_oneof![
            Just(Ttl::NEVER),
            (1u64..86_400_000).prop_map(Ttl::from),
            (1.0f64..120.0).prop_map(|secs| Ttl::Span(TtlSpan::seconds(secs))),
            (1.0f64..48.0).prop_map(|hours| Ttl::Span(TtlSpan::hours(hours))),
        ]
    }

    /// Any backend kind, `Auto` included.
    pub fn arb_backend_kind() -> impl Strategy<Value = BackendKind> {
        prop_oneof![
            Just(BackendKind::Volatile),
            Just(BackendKind::DurableSync),
            Just(BackendKind::DurableAsync),
            Just(BackendKind::Isolated),
            Just(BackendKind::Auto),
        ]
    }

    /// An entry with either no expiry or an absolute one.
    pub fn arb_entry() -> impl Strategy<Value = Entry> {
        (
            arb_json_document(),
            prop_oneof![Just(0i64), 1i64..4_102_444_800_000],
        )
            .prop_map(|(value, expires_at)| Entry::new(value, expires_at))
    }

    /// A store id, with or without a sub-store.
    pub fn arb_store_id() -> impl Strategy<Value = StoreId> {
        (arb_field_name(), prop::option::of(arb_field_name())).prop_map(|(name, sub)| match sub {
            Some(sub) => StoreId::with_sub(name, sub),
            None => StoreId::new(name),
        })
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built storage environments and options.
    //!
    //! A [`StorageEnvironment`] stands for one execution context. Contexts
    //! built from the same [`SharedStores`] see the same durable stores and
    //! bus, while each gets its own isolated store.

    use super::*;
    use larder_storage::{LmdbAsyncStore, LmdbKvStore, LmdbStoreError};
    use tempfile::TempDir;
    use uuid::Uuid;

    /// Durable stores and bus shared by several contexts, in memory.
    #[derive(Debug, Clone)]
    pub struct SharedStores {
        pub kv: Arc<MemoryKvStore>,
        pub records: Arc<MemoryAsyncStore>,
        pub bus: Arc<CoherenceBus>,
    }

    impl SharedStores {
        pub fn new() -> Self {
            Self::with_bus_capacity(64)
        }

        pub fn with_bus_capacity(capacity: usize) -> Self {
            Self {
                kv: MemoryKvStore::shared(),
                records: MemoryAsyncStore::shared(),
                bus: Arc::new(CoherenceBus::new(capacity)),
            }
        }

        /// A new execution context over these stores.
        pub fn context(&self) -> StorageEnvironment {
            StorageEnvironment::new()
                .with_durable_sync(self.kv.clone())
                .with_durable_async(self.records.clone())
                .with_isolated(MemoryKvStore::shared())
                .with_bus(self.bus.clone())
        }
    }

    impl Default for SharedStores {
        fn default() -> Self {
            Self::new()
        }
    }

    /// Durable stores on LMDB in temporary directories.
    ///
    /// The directories are removed when this value is dropped.
    pub struct LmdbStores {
        pub kv: Arc<LmdbKvStore>,
        pub records: Arc<LmdbAsyncStore>,
        pub bus: Arc<CoherenceBus>,
        _kv_dir: TempDir,
        _records_dir: TempDir,
    }

    impl LmdbStores {
        pub fn new() -> Result<Self, LmdbStoreError> {
            let kv_dir = TempDir::new()?;
            let records_dir = TempDir::new()?;
            let kv = LmdbKvStore::open(kv_dir.path(), 10)?;
            let records = LmdbAsyncStore::open(records_dir.path(), 10)?;
            Ok(Self {
                kv: Arc::new(kv),
                records: Arc::new(records),
                bus: Arc::new(CoherenceBus::new(64)),
                _kv_dir: kv_dir,
                _records_dir: records_dir,
            })
        }

        pub fn context(&self) -> StorageEnvironment {
            StorageEnvironment::new()
                .with_durable_sync(self.kv.clone())
                .with_durable_async(self.records.clone())
                .with_isolated(MemoryKvStore::shared())
                .with_bus(self.bus.clone())
        }
    }

    /// A context with nothing but a private bus.
    pub fn volatile_context() -> StorageEnvironment {
        StorageEnvironment::new().with_bus(Arc::new(CoherenceBus::new(64)))
    }

    /// A store name no other test will pick.
    pub fn unique_store_name(prefix: &str) -> String {
        format!("{}-{}", prefix, Uuid::now_v7().simple())
    }

    /// Options for `kind` on `store_name`.
    pub fn options(kind: BackendKind, store_name: &str) -> CacheOptions {
        CacheOptions::new()
            .with_storage(kind)
            .with_store_name(store_name)
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions for larder error variants.

    use super::*;

    /// Assert that a LarderResult is Ok.
    #[track_caller]
    pub fn assert_ok<T: std::fmt::Debug>(result: &LarderResult<T>) {
        assert!(result.is_ok(), "Expected Ok, got Err: {:?}", result);
    }

    /// Assert that a LarderResult is Err.
    #[track_caller]
    pub fn assert_err<T: std::fmt::Debug>(result: &LarderResult<T>) {
        assert!(result.is_err(), "Expected Err, got Ok: {:?}", result);
    }

    #[track_caller]
    pub fn assert_invalid_key_path<T: std::fmt::Debug>(result: &LarderResult<T>) {
        match result {
            Err(LarderError::Validation(ValidationError::InvalidKeyPath { .. })) => {}
            other => panic!("Expected InvalidKeyPath, got: {:?}", other),
        }
    }

    /// Assert that construction failed because `kind` was unavailable.
    #[track_caller]
    pub fn assert_backend_unavailable<T>(result: &LarderResult<T>, kind: BackendKind) {
        match result {
            Err(LarderError::Storage(StorageError::BackendUnavailable { kind: got })) => {
                assert_eq!(*got, kind, "Wrong kind in BackendUnavailable error");
            }
            Err(other) => panic!("Expected BackendUnavailable for {}, got: {:?}", kind, other),
            Ok(_) => panic!("Expected BackendUnavailable for {}, got Ok", kind),
        }
    }

    #[track_caller]
    pub fn assert_uninitialized<T: std::fmt::Debug>(result: &LarderResult<T>) {
        match result {
            Err(LarderError::Storage(StorageError::BackendUninitialized { .. })) => {}
            other => panic!("Expected BackendUninitialized, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_transaction_failed<T: std::fmt::Debug>(result: &LarderResult<T>) {
        match result {
            Err(e) if e.is_transaction_failure() => {}
            other => panic!("Expected TransactionFailed, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_config_error<T: std::fmt::Debug>(result: &LarderResult<T>) {
        match result {
            Err(LarderError::Config(_)) => {}
            other => panic!("Expected Config error, got: {:?}", other),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
