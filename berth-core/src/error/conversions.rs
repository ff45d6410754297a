//! Error conversion implementations for BerthError
//!
//! This module provides From trait implementations for converting
//! external error types into BerthError variants.

use super::types::BerthError;

// Storage error conversions
impl From<redb::TransactionError> for BerthError {
    fn from(err: redb::TransactionError) -> Self {
        BerthError::storage("transaction", err)
    }
}

impl From<redb::TableError> for BerthError {
    fn from(err: redb::TableError) -> Self {
        BerthError::storage("open_table", err)
    }
}

impl From<redb::StorageError> for BerthError {
    fn from(err: redb::StorageError) -> Self {
        BerthError::storage("storage_operation", err)
    }
}

impl From<redb::DatabaseError> for BerthError {
    fn from(err: redb::DatabaseError) -> Self {
        BerthError::storage("open_database", err)
    }
}

impl From<redb::CommitError> for BerthError {
    fn from(err: redb::CommitError) -> Self {
        BerthError::storage("commit", err)
    }
}

impl From<redb::Error> for BerthError {
    fn from(err: redb::Error) -> Self {
        BerthError::storage("database", err)
    }
}

// Serialization error conversions
impl From<bincode::Error> for BerthError {
    fn from(err: bincode::Error) -> Self {
        BerthError::serialization("bincode", err)
    }
}

impl From<serde_json::Error> for BerthError {
    fn from(err: serde_json::Error) -> Self {
        BerthError::serialization("json", err)
    }
}

impl From<serde_yaml::Error> for BerthError {
    fn from(err: serde_yaml::Error) -> Self {
        BerthError::serialization("yaml", err)
    }
}

impl From<toml::de::Error> for BerthError {
    fn from(err: toml::de::Error) -> Self {
        BerthError::ConfigurationError {
            component: "toml".to_string(),
            message: format!("Failed to parse configuration: {}", err),
        }
    }
}

// System error conversions
impl From<std::io::Error> for BerthError {
    fn from(err: std::io::Error) -> Self {
        BerthError::IoError(Box::new(err))
    }
}

impl From<std::num::ParseIntError> for BerthError {
    fn from(err: std::num::ParseIntError) -> Self {
        BerthError::ConfigurationError {
            component: "numeric_value".to_string(),
            message: format!("Invalid numeric value: {}", err),
        }
    }
}

impl From<std::num::ParseFloatError> for BerthError {
    fn from(err: std::num::ParseFloatError) -> Self {
        BerthError::ConfigurationError {
            component: "numeric_value".to_string(),
            message: format!("Invalid numeric value: {}", err),
        }
    }
}

impl From<tokio::task::JoinError> for BerthError {
    fn from(err: tokio::task::JoinError) -> Self {
        if err.is_cancelled() {
            BerthError::internal("Task was cancelled")
        } else {
            BerthError::internal(format!("Task failed: {}", err))
        }
    }
}
