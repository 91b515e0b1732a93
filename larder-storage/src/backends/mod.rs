//! Storage backend variants.
//!
//! | Variant        | Mirror | Canonical store          | Shared via bus |
//! |----------------|--------|--------------------------|----------------|
//! | Volatile       | yes    | none                     | no             |
//! | DurableSync    | yes    | `SyncDurableStore`       | yes            |
//! | DurableAsync   | yes    | `AsyncDurableStore`      | yes            |
//! | Isolated       | yes    | `SyncDurableStore`       | no             |

mod durable_async;
mod durable_sync;
mod volatile;

pub use durable_async::DurableAsyncBackend;
pub use durable_sync::{key_prefix, DurableSyncBackend};
pub use volatile::VolatileBackend;

use std::sync::Arc;

use larder_core::{Notification, StoreId};
use tracing::warn;
use uuid::Uuid;

use crate::bus::{BusSubscription, CoherenceBus, DrainReport};
use crate::mirror::Mirror;

/// A backend's membership in its store's bus channel.
#[derive(Debug)]
pub(crate) struct Coherence {
    bus: Arc<CoherenceBus>,
    channel: String,
    origin: Uuid,
    subscription: BusSubscription,
}

impl Coherence {
    pub(crate) fn join(bus: Arc<CoherenceBus>, store_id: &StoreId) -> Self {
        let channel = store_id.channel();
        let origin = Uuid::now_v7();
        let subscription = bus.subscribe(&channel, origin);
        Self {
            bus,
            channel,
            origin,
            subscription,
        }
    }

    pub(crate) fn publish(&self, notification: Notification) {
        self.bus.publish(&self.channel, self.origin, notification);
    }

    /// Apply every pending peer notification to `mirror`.
    pub(crate) fn drain_into(&self, mirror: &Mirror) -> DrainReport {
        self.subscription.drain(|notification| {
            if let Err(e) = mirror.apply(&notification) {
                warn!(
                    channel = %self.channel,
                    action = notification.action(),
                    error = %e,
                    "Failed to apply peer notification"
                );
            }
        })
    }
}
