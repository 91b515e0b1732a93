//! Larder - Hybrid Cache Engine
//!
//! A client-side cache of JSON documents addressed by key paths, with
//! per-entry TTLs, over pluggable storage backends that keep an in-process
//! mirror and converge across instances through a coherence bus.
//!
//! # Example
//!
//! ```ignore
//! use larder_engine::{CacheOptions, HybridCache, StorageEnvironment, TtlSpan};
//!
//! let cache = HybridCache::open(CacheOptions::new(), StorageEnvironment::new()).await?;
//!
//! cache.set("user.name", "Jane", None).await?;
//! cache.set("session", token, Some(TtlSpan::minutes(30.0).into())).await?;
//!
//! let name = cache.get_sync("user.name", None)?;
//! cache.unset("user.name").await?;
//! ```

mod document;
mod engine;
mod stats;

pub use engine::HybridCache;
pub use stats::CacheStats;

// Re-export what callers need to configure and open a cache
pub use larder_core::{
    BackendKind, CacheOptions, JsonValue, KeyPath, LarderError, LarderResult, RetrievedEntry, Ttl,
    TtlSpan,
};
pub use larder_storage::{CoherenceBus, StorageEnvironment};
