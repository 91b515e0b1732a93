//! Error types for larder operations

use crate::BackendKind;
use thiserror::Error;

/// Storage layer errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Backend unavailable: {kind} failed its availability probe")]
    BackendUnavailable { kind: BackendKind },

    #[error("Backend uninitialized: store {store} has not completed its initial load")]
    BackendUninitialized { store: String },

    #[error("Transaction failed: {reason}")]
    TransactionFailed { reason: String },

    #[error("Serialization failed: {reason}")]
    Serialization { reason: String },

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

/// Validation errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Invalid key path {path:?}: {reason}")]
    InvalidKeyPath { path: String, reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Malformed options: {reason}")]
    Malformed { reason: String },
}

/// Master error type for all larder errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LarderError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl LarderError {
    /// True when the error is a durable transaction failure.
    pub fn is_transaction_failure(&self) -> bool {
        matches!(
            self,
            LarderError::Storage(StorageError::TransactionFailed { .. })
        )
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        StorageError::Serialization {
            reason: e.to_string(),
        }
    }
}

impl From<serde_json::Error> for LarderError {
    fn from(e: serde_json::Error) -> Self {
        LarderError::Storage(e.into())
    }
}

/// Result type alias for larder operations.
pub type LarderResult<T> = Result<T, LarderError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_unavailable_names_kind() {
        let err = StorageError::BackendUnavailable {
            kind: BackendKind::DurableAsync,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("Backend unavailable"));
        assert!(msg.contains("durable-async"));
    }

    #[test]
    fn test_invalid_key_path_display() {
        let err = ValidationError::InvalidKeyPath {
            path: "a[".to_string(),
            reason: "unterminated bracket".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("a["));
        assert!(msg.contains("unterminated bracket"));
    }

    #[test]
    fn test_config_error_display_invalid_value() {
        let err = ConfigError::InvalidValue {
            field: "storeName".to_string(),
            value: "0".to_string(),
            reason: "must be positive".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("storeName"));
        assert!(msg.contains("must be positive"));
    }

    #[test]
    fn test_larder_error_from_variants() {
        let storage = LarderError::from(StorageError::LockPoisoned);
        assert!(matches!(storage, LarderError::Storage(_)));

        let validation = LarderError::from(ValidationError::InvalidKeyPath {
            path: String::new(),
            reason: "empty".to_string(),
        });
        assert!(matches!(validation, LarderError::Validation(_)));

        let config = LarderError::from(ConfigError::Malformed {
            reason: "eof".to_string(),
        });
        assert!(matches!(config, LarderError::Config(_)));
    }

    #[test]
    fn test_transaction_failure_predicate() {
        let err = LarderError::from(StorageError::TransactionFailed {
            reason: "aborted".to_string(),
        });
        assert!(err.is_transaction_failure());
        assert!(!LarderError::from(StorageError::LockPoisoned).is_transaction_failure());
    }

    #[test]
    fn test_serde_json_error_maps_to_serialization() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err = LarderError::from(json_err);
        assert!(matches!(
            err,
            LarderError::Storage(StorageError::Serialization { .. })
        ));
    }
}
