//! Stored entries, read results and coherence notifications.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::ttl::{self, TimestampMs};

// ============================================================================
// ENTRY
// ============================================================================

/// The unit physically stored under one root key.
///
/// Persisted as `{"value": <document>, "expiresAt": <ms, 0 = never>}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub value: Value,
    #[serde(rename = "expiresAt", default)]
    pub expires_at: TimestampMs,
}

impl Entry {
    pub fn new(value: Value, expires_at: TimestampMs) -> Self {
        Self { value, expires_at }
    }

    /// An entry that never expires.
    pub fn persistent(value: Value) -> Self {
        Self::new(value, 0)
    }

    /// Whether this entry has elapsed at `now`.
    pub fn is_expired_at(&self, now: TimestampMs) -> bool {
        ttl::is_expired(self.expires_at, now)
    }

    /// Serialize to the persisted JSON record.
    pub fn to_json_string(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parse a persisted JSON record.
    pub fn from_json_str(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    /// Approximate footprint of this entry under `key`, in bytes of its
    /// persisted JSON form.
    pub fn approximate_size(&self, key: &str) -> usize {
        key.len() + self.to_json_string().map(|s| s.len()).unwrap_or(0)
    }

    /// Observe this entry at `now`, producing a read result.
    pub fn observe(&self, value: Value, now: TimestampMs) -> RetrievedEntry {
        RetrievedEntry {
            value,
            expires_at: self.expires_at,
            is_expired: self.is_expired_at(now),
        }
    }
}

/// An entry as seen by a reader. `is_expired` is derived at read time and
/// never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievedEntry {
    pub value: Value,
    #[serde(rename = "expiresAt")]
    pub expires_at: TimestampMs,
    #[serde(rename = "isExpired")]
    pub is_expired: bool,
}

// ============================================================================
// STORE IDENTITY
// ============================================================================

/// Logical store identity: a store name plus an optional sub-store.
///
/// Two cache instances with equal `StoreId`s share durable data and a
/// coherence-bus channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StoreId {
    name: String,
    sub: Option<String>,
}

impl StoreId {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sub: None,
        }
    }

    pub fn with_sub(name: impl Into<String>, sub: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sub: Some(sub.into()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sub(&self) -> Option<&str> {
        self.sub.as_deref()
    }

    /// Channel name used on the coherence bus.
    pub fn channel(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for StoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.sub {
            Some(sub) => write!(f, "{}/{}", self.name, sub),
            None => f.write_str(&self.name),
        }
    }
}

// ============================================================================
// NOTIFICATION
// ============================================================================

/// Cache-invalidation hint exchanged over the coherence bus.
///
/// Wire form:
///
/// ```text
/// { "action": "sync",  "key": string, "value": Entry }
/// { "action": "unset", "key": string }
/// { "action": "clear" }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum Notification {
    /// Overwrite the mirror entry for `key`.
    Sync { key: String, value: Entry },
    /// Drop `key` from the mirror.
    Unset { key: String },
    /// Empty the mirror.
    Clear,
}

impl Notification {
    pub fn action(&self) -> &'static str {
        match self {
            Notification::Sync { .. } => "sync",
            Notification::Unset { .. } => "unset",
            Notification::Clear => "clear",
        }
    }

    pub fn key(&self) -> Option<&str> {
        match self {
            Notification::Sync { key, .. } | Notification::Unset { key } => Some(key.as_str()),
            Notification::Clear => None,
        }
    }
}
