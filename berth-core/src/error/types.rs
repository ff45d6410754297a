//! Core error types for Berth
//!
//! This module contains the main BerthError enum with all error variants
//! and associated type aliases for Result types.

use thiserror::Error;

/// Error type for Berth operations
///
/// The placement variants map the hard-stop cases of a planning call. Storage,
/// serialization and configuration variants come from the ledger stores and the
/// configuration loader.
#[derive(Error, Debug)]
pub enum BerthError {
    // Placement hard stops
    #[error("Zone {zone_id} is not available for this deployment: {reason}")]
    ZoneUnavailable { zone_id: u64, reason: String },

    #[error("Dedication conflict for VM {vm_id}: {message}")]
    DedicationConflict { vm_id: u64, message: String },

    #[error("Affinity group '{group}' cannot be applied: {message}")]
    AffinityConflict { group: String, message: String },

    #[error("Invalid profile for VM {vm_id}: {message}")]
    InvalidProfile { vm_id: u64, message: String },

    // Resource errors
    #[error("Resource not found: {resource}")]
    NotFound { resource: String },

    #[error("Resource already exists: {resource}")]
    AlreadyExists { resource: String },

    // Configuration errors
    #[error("Configuration error in {component}: {message}")]
    ConfigurationError { component: String, message: String },

    // Storage errors
    #[error("Storage operation '{operation}' failed")]
    Storage {
        operation: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Storage policy check failed for pool {pool_id}: {message}")]
    StoragePolicy { pool_id: u64, message: String },

    #[error("Serialization operation '{operation}' failed")]
    Serialization {
        operation: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    // System errors
    #[error("IO error: {0}")]
    IoError(#[from] Box<std::io::Error>),

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl BerthError {
    /// Whether the error is a non-retryable placement failure.
    ///
    /// Retrying the same plan with a fresh exclude list produces the same
    /// error for every hard stop.
    pub fn is_hard_stop(&self) -> bool {
        matches!(
            self,
            BerthError::ZoneUnavailable { .. }
                | BerthError::DedicationConflict { .. }
                | BerthError::AffinityConflict { .. }
                | BerthError::InvalidProfile { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, BerthError>;

/// Type alias for Berth results
pub type BerthResult<T> = Result<T>;
