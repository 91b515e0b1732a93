//! Larder Core - Data Model
//!
//! Entries, key paths, TTL rules, backend kinds, options and errors shared
//! by every larder crate. Nothing here touches storage.

pub mod config;
pub mod entry;
pub mod enums;
pub mod error;
pub mod path;
pub mod ttl;

pub use config::{CacheOptions, DEFAULT_NAMESPACE, DEFAULT_STORE_NAME};
pub use entry::{Entry, Notification, RetrievedEntry, StoreId};
pub use enums::{BackendKind, BackendKindParseError, AUTO_PRIORITY};
pub use error::{ConfigError, LarderError, LarderResult, StorageError, ValidationError};
pub use path::{KeyPath, Removal, ResolvedPath, Segment, MAX_ARRAY_INDEX};
pub use ttl::{expires_at, is_expired, now_millis, TimestampMs, Ttl, TtlSpan};

/// JSON document type stored under a root key.
pub type JsonValue = serde_json::Value;
