//! Error types for STRATA operations

use thiserror::Error;

/// Storage layer errors raised while talking to the backing store or to
/// notification sinks.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Range fetch failed for table {table}: {reason}")]
    FetchFailed { table: String, reason: String },

    #[error("Row cursor failed for table {table}: {reason}")]
    CursorFailed { table: String, reason: String },

    #[error("Notification sink failed for table {table}: {reason}")]
    SinkFailed { table: String, reason: String },

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

/// Validation errors. These indicate caller bugs and are never recovered
/// inside the cache.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Inverted interval: min {min} is greater than max {max}")]
    InvertedInterval { min: String, max: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all STRATA errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StrataError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type alias for STRATA operations.
pub type StrataResult<T> = Result<T, StrataError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_error_display_fetch_failed() {
        let err = StorageError::FetchFailed {
            table: "orders".to_string(),
            reason: "connection reset".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("Range fetch failed"));
        assert!(msg.contains("orders"));
        assert!(msg.contains("connection reset"));
    }

    #[test]
    fn test_validation_error_display_inverted_interval() {
        let err = ValidationError::InvertedInterval {
            min: "(9)".to_string(),
            max: "(3)".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("Inverted interval"));
        assert!(msg.contains("(9)"));
        assert!(msg.contains("(3)"));
    }

    #[test]
    fn test_config_error_display_invalid_value() {
        let err = ConfigError::InvalidValue {
            field: "table".to_string(),
            value: " ".to_string(),
            reason: "must not be blank".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("table"));
        assert!(msg.contains("must not be blank"));
    }

    #[test]
    fn test_strata_error_from_variants() {
        let storage = StrataError::from(StorageError::LockPoisoned);
        assert!(matches!(storage, StrataError::Storage(_)));

        let validation = StrataError::from(ValidationError::InvalidValue {
            field: "key".to_string(),
            reason: "empty".to_string(),
        });
        assert!(matches!(validation, StrataError::Validation(_)));

        let config = StrataError::from(ConfigError::MissingRequired {
            field: "table".to_string(),
        });
        assert!(matches!(config, StrataError::Config(_)));
    }

    #[test]
    fn test_storage_error_display_lock_poisoned() {
        let err = StorageError::LockPoisoned;
        assert_eq!(format!("{}", err), "Storage lock poisoned");
    }
}
