//! Coherence bus.
//!
//! Publish/subscribe fan-out of change notifications between cache
//! instances that share a logical store. Each store id maps to one named
//! channel; a subscriber only sees notifications published after it
//! subscribed, and never the ones its own instance published.
//!
//! Delivery is asynchronous: receivers drain their pending notifications at
//! the start of every backend operation. A receiver that falls further
//! behind than the channel capacity is told how many notifications it lost
//! so it can reload from the canonical store.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock, RwLockWriteGuard};

use larder_core::Notification;
use once_cell::sync::Lazy;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

/// Notifications buffered per channel before slow receivers lag.
pub const DEFAULT_BUS_CAPACITY: usize = 1024;

static GLOBAL_BUS: Lazy<Arc<CoherenceBus>> =
    Lazy::new(|| Arc::new(CoherenceBus::new(DEFAULT_BUS_CAPACITY)));

/// A notification tagged with the instance that published it.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub origin: Uuid,
    pub notification: Notification,
}

/// Process-wide registry of named broadcast channels.
#[derive(Debug)]
pub struct CoherenceBus {
    channels: RwLock<HashMap<String, broadcast::Sender<Envelope>>>,
    capacity: usize,
}

impl CoherenceBus {
    /// Create a bus whose channels buffer `capacity` notifications.
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// The bus shared by every cache in this process unless one is injected.
    pub fn global() -> Arc<CoherenceBus> {
        Arc::clone(&GLOBAL_BUS)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn channels_mut(&self) -> RwLockWriteGuard<'_, HashMap<String, broadcast::Sender<Envelope>>> {
        match self.channels.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn sender(&self, channel: &str) -> broadcast::Sender<Envelope> {
        if let Ok(channels) = self.channels.read() {
            if let Some(tx) = channels.get(channel) {
                return tx.clone();
            }
        }

        self.channels_mut()
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }

    /// Receivers are created under the map lock so a concurrent prune never
    /// removes a channel that just gained a subscriber.
    fn receiver(&self, channel: &str) -> broadcast::Receiver<Envelope> {
        if let Ok(channels) = self.channels.read() {
            if let Some(tx) = channels.get(channel) {
                return tx.subscribe();
            }
        }

        self.channels_mut()
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Drop `channel` if nobody listens on it any more.
    fn prune(&self, channel: &str) {
        let mut channels = self.channels_mut();
        if channels
            .get(channel)
            .is_some_and(|tx| tx.receiver_count() == 0)
        {
            channels.remove(channel);
            debug!(channel = channel, "Pruned idle bus channel");
        }
    }

    /// Publish a notification on `channel`.
    ///
    /// Returns the number of receivers that will see it, including the
    /// publisher's own subscription, which filters it out on drain.
    pub fn publish(&self, channel: &str, origin: Uuid, notification: Notification) -> usize {
        let action = notification.action();
        match self.sender(channel).send(Envelope {
            origin,
            notification,
        }) {
            Ok(receiver_count) => {
                debug!(
                    channel = channel,
                    action = action,
                    receivers = receiver_count,
                    "Published change notification"
                );
                receiver_count
            }
            Err(_) => {
                debug!(channel = channel, action = action, "No subscribers for notification");
                self.prune(channel);
                0
            }
        }
    }

    /// Subscribe `origin` to `channel`.
    pub fn subscribe(&self, channel: &str, origin: Uuid) -> BusSubscription {
        BusSubscription {
            channel: channel.to_string(),
            origin,
            rx: Mutex::new(self.receiver(channel)),
        }
    }

    /// Number of live subscriptions on `channel`.
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.channels
            .read()
            .ok()
            .and_then(|channels| channels.get(channel).map(|tx| tx.receiver_count()))
            .unwrap_or(0)
    }

    /// Number of channels currently held open.
    pub fn channel_count(&self) -> usize {
        self.channels
            .read()
            .map(|channels| channels.len())
            .unwrap_or(0)
    }
}

/// Outcome of draining a subscription.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Notifications handed to the handler.
    pub delivered: usize,
    /// Notifications dropped because the receiver fell behind.
    pub lagged: u64,
}

impl DrainReport {
    pub fn lost_notifications(&self) -> bool {
        self.lagged > 0
    }
}

/// One instance's receiving end of a bus channel.
#[derive(Debug)]
pub struct BusSubscription {
    channel: String,
    origin: Uuid,
    rx: Mutex<broadcast::Receiver<Envelope>>,
}

impl BusSubscription {
    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn origin(&self) -> Uuid {
        self.origin
    }

    /// Hand every pending peer notification to `handler`, without waiting.
    pub fn drain(&self, mut handler: impl FnMut(Notification)) -> DrainReport {
        let mut rx = match self.rx.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        let mut report = DrainReport::default();
        loop {
            match rx.try_recv() {
                Ok(envelope) => {
                    if envelope.origin != self.origin {
                        handler(envelope.notification);
                        report.delivered += 1;
                    }
                }
                Err(TryRecvError::Lagged(skipped)) => {
                    warn!(
                        channel = %self.channel,
                        skipped = skipped,
                        "Coherence subscriber lagged"
                    );
                    report.lagged += skipped;
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            }
        }
        report
    }

    /// Consume the subscription and deliver peer notifications to `handler`
    /// from a background task until the channel closes.
    pub fn spawn_listener<F>(self, mut handler: F) -> JoinHandle<()>
    where
        F: FnMut(Notification) + Send + 'static,
    {
        let BusSubscription {
            channel,
            origin,
            rx,
        } = self;
        let mut rx = match rx.into_inner() {
            Ok(rx) => rx,
            Err(poisoned) => poisoned.into_inner(),
        };

        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(envelope) if envelope.origin == origin => continue,
                    Ok(envelope) => handler(envelope.notification),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(channel = %channel, skipped = skipped, "Coherence listener lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            debug!(channel = %channel, "Coherence listener finished");
        })
    }
}
