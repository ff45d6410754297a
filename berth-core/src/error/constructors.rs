//! Error constructor helpers for BerthError
//!
//! This module provides convenient constructor methods for creating
//! BerthError variants with proper context and source information.

use super::types::BerthError;

impl BerthError {
    /// Create a Storage error with a boxed source
    pub fn storage<E: std::error::Error + Send + Sync + 'static>(
        operation: impl Into<String>,
        source: E,
    ) -> Self {
        BerthError::Storage {
            operation: operation.into(),
            source: Box::new(source),
        }
    }

    /// Create a Serialization error with a boxed source
    pub fn serialization<E: std::error::Error + Send + Sync + 'static>(
        operation: impl Into<String>,
        source: E,
    ) -> Self {
        BerthError::Serialization {
            operation: operation.into(),
            source: Box::new(source),
        }
    }

    /// Create a configuration error for a component
    pub fn configuration(component: impl Into<String>, message: impl Into<String>) -> Self {
        BerthError::ConfigurationError {
            component: component.into(),
            message: message.into(),
        }
    }

    /// Create an invalid configuration error with the offending value
    pub fn invalid_config<T: std::fmt::Display>(field: &str, value: T, reason: &str) -> Self {
        BerthError::ConfigurationError {
            component: field.to_string(),
            message: format!("Invalid value '{}': {}", value, reason),
        }
    }

    pub fn zone_unavailable(zone_id: u64, reason: impl Into<String>) -> Self {
        BerthError::ZoneUnavailable {
            zone_id,
            reason: reason.into(),
        }
    }

    pub fn dedication_conflict(vm_id: u64, message: impl Into<String>) -> Self {
        BerthError::DedicationConflict {
            vm_id,
            message: message.into(),
        }
    }

    pub fn affinity_conflict(group: impl Into<String>, message: impl Into<String>) -> Self {
        BerthError::AffinityConflict {
            group: group.into(),
            message: message.into(),
        }
    }

    pub fn invalid_profile(vm_id: u64, message: impl Into<String>) -> Self {
        BerthError::InvalidProfile {
            vm_id,
            message: message.into(),
        }
    }

    /// Create a not found error
    pub fn not_found(resource: impl Into<String>) -> Self {
        BerthError::NotFound {
            resource: resource.into(),
        }
    }

    /// Create an already exists error
    pub fn already_exists(resource: impl Into<String>) -> Self {
        BerthError::AlreadyExists {
            resource: resource.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        BerthError::Internal {
            message: message.into(),
        }
    }
}
