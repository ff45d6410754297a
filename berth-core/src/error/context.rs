//! Context helpers for wrapping collaborator errors
//!
//! Storage and serialization errors carry the operation that failed so a
//! ledger failure reads "open table for save VM reservation" rather than a
//! bare redb message.

use super::types::{BerthError, BerthResult};

/// Attach a storage operation to an error
pub trait StorageContext<T> {
    fn storage_context(self, operation: &str) -> BerthResult<T>;
}

impl<T, E> StorageContext<T> for std::result::Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn storage_context(self, operation: &str) -> BerthResult<T> {
        self.map_err(|e| BerthError::storage(operation, e))
    }
}

/// Attach a serialization operation to an error
pub trait SerializationContext<T> {
    fn serialization_context(self, operation: &str) -> BerthResult<T>;
}

impl<T> SerializationContext<T> for std::result::Result<T, bincode::Error> {
    fn serialization_context(self, operation: &str) -> BerthResult<T> {
        self.map_err(|e| BerthError::serialization(operation, e))
    }
}
