//! Enum types for backend selection

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// BACKEND KIND
// ============================================================================

/// Requested or effective storage backend.
///
/// `Auto` is only ever *requested*; the factory resolves it to one of the
/// concrete kinds by walking [`AUTO_PRIORITY`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(from = "String", into = "String")]
pub enum BackendKind {
    /// Process-only map, no persistence and no sharing.
    Volatile,
    /// Synchronous text key/value store, fully mirrored.
    DurableSync,
    /// Transactional store reachable only asynchronously, mirrored.
    DurableAsync,
    /// Persistent store scoped to a single execution context.
    Isolated,
    /// Probe the concrete kinds in priority order.
    #[default]
    Auto,
}

/// Probe order used when [`BackendKind::Auto`] is requested.
pub const AUTO_PRIORITY: [BackendKind; 4] = [
    BackendKind::DurableSync,
    BackendKind::DurableAsync,
    BackendKind::Isolated,
    BackendKind::Volatile,
];

impl BackendKind {
    /// Every concrete (non-`Auto`) kind.
    pub const CONCRETE: [BackendKind; 4] = AUTO_PRIORITY;

    /// Convert to the canonical string form.
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Volatile => "volatile",
            BackendKind::DurableSync => "durable-sync",
            BackendKind::DurableAsync => "durable-async",
            BackendKind::Isolated => "isolated",
            BackendKind::Auto => "auto",
        }
    }

    /// Parse a kind, falling back to `Volatile` for anything unrecognized.
    pub fn from_str_lossy(s: &str) -> Self {
        s.parse().unwrap_or(BackendKind::Volatile)
    }

    /// Whether mutations on this kind are shared with other instances
    /// through the coherence bus.
    pub fn is_shared(&self) -> bool {
        matches!(self, BackendKind::DurableSync | BackendKind::DurableAsync)
    }

    /// Whether this kind survives process restarts.
    pub fn is_persistent(&self) -> bool {
        matches!(
            self,
            BackendKind::DurableSync | BackendKind::DurableAsync | BackendKind::Isolated
        )
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = BackendKindParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "volatile" | "memory" => Ok(BackendKind::Volatile),
            "durable-sync" | "durablesync" => Ok(BackendKind::DurableSync),
            "durable-async" | "durableasync" => Ok(BackendKind::DurableAsync),
            "isolated" => Ok(BackendKind::Isolated),
            "auto" => Ok(BackendKind::Auto),
            _ => Err(BackendKindParseError(s.to_string())),
        }
    }
}

impl From<String> for BackendKind {
    fn from(s: String) -> Self {
        BackendKind::from_str_lossy(&s)
    }
}

impl From<BackendKind> for String {
    fn from(kind: BackendKind) -> Self {
        kind.as_str().to_string()
    }
}

/// Error when parsing an invalid backend kind string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendKindParseError(pub String);

impl fmt::Display for BackendKindParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid backend kind: {}", self.0)
    }
}

impl std::error::Error for BackendKindParseError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auto_priority_order() {
        assert_eq!(
            AUTO_PRIORITY,
            [
                BackendKind::DurableSync,
                BackendKind::DurableAsync,
                BackendKind::Isolated,
                BackendKind::Volatile,
            ]
        );
        assert!(!AUTO_PRIORITY.contains(&BackendKind::Auto));
    }

    #[test]
    fn test_parse_roundtrip() {
        for kind in BackendKind::CONCRETE.iter().chain([BackendKind::Auto].iter()) {
            assert_eq!(kind.as_str().parse::<BackendKind>().unwrap(), *kind);
        }
        assert_eq!("DURABLE_SYNC".parse::<BackendKind>().unwrap(), BackendKind::DurableSync);
    }

    #[test]
    fn test_unknown_kind_falls_back_to_volatile() {
        assert!("cookie".parse::<BackendKind>().is_err());
        assert_eq!(BackendKind::from_str_lossy("cookie"), BackendKind::Volatile);

        let kind: BackendKind = serde_json::from_str("\"websql\"").unwrap();
        assert_eq!(kind, BackendKind::Volatile);
    }

    #[test]
    fn test_serde_uses_canonical_strings() {
        let json = serde_json::to_string(&BackendKind::DurableAsync).unwrap();
        assert_eq!(json, "\"durable-async\"");
    }

    #[test]
    fn test_sharing_and_persistence() {
        assert!(BackendKind::DurableSync.is_shared());
        assert!(BackendKind::DurableAsync.is_shared());
        assert!(!BackendKind::Isolated.is_shared());
        assert!(!BackendKind::Volatile.is_shared());
        assert!(BackendKind::Isolated.is_persistent());
        assert!(!BackendKind::Volatile.is_persistent());
    }
}
