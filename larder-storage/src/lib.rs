//! Larder Storage - Backends and Coherence
//!
//! Storage backends behind one trait, the durable store ports they sit on,
//! the coherence bus that keeps mirrors of a shared store converging, and
//! the factory that picks a backend for a context.

pub mod backends;
pub mod bus;
pub mod factory;
pub mod mirror;
pub mod ports;
pub mod traits;

pub use backends::{key_prefix, DurableAsyncBackend, DurableSyncBackend, VolatileBackend};
pub use bus::{BusSubscription, CoherenceBus, DrainReport, Envelope, DEFAULT_BUS_CAPACITY};
pub use factory::{StorageEnvironment, StorageFactory};
pub use mirror::Mirror;
pub use ports::{
    AsyncDurableStore, LmdbAsyncStore, LmdbKvStore, LmdbStoreError, MemoryAsyncStore,
    MemoryKvStore, SyncDurableStore, PROBE_KEY,
};
pub use traits::StorageBackend;
