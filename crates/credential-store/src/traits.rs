//! Storage trait definitions.

use crate::StorageResult;

/// Trait for secure storage backends.
///
/// Every call is individually atomic; callers get per-key linearizability and
/// nothing more.
pub trait SecureStorage: Send + Sync {
    /// Store a value securely
    fn set(&self, key: &str, value: &str) -> StorageResult<()>;

    /// Retrieve a value
    fn get(&self, key: &str) -> StorageResult<Option<String>>;

    /// Delete a value
    fn delete(&self, key: &str) -> StorageResult<bool>;

    /// Check if a key exists
    fn has(&self, key: &str) -> StorageResult<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// List all keys that start with a given prefix.
    fn list_keys_with_prefix(&self, prefix: &str) -> StorageResult<Vec<String>>;
}
