//! Credential storage for the Wayfarer client core.
//!
//! Holds per-account secrets, cached access tokens and profile attributes,
//! plus the process-wide active-account pointer and the UI-preference keys
//! tied to it. Two backends are provided:
//! - **MemoryStorage**: process-lifetime map, used by tests and by hosts that
//!   own credential persistence themselves
//! - **FileStorage**: JSON file written atomically with owner-only permissions

mod backends;
mod credentials;
mod keys;
mod traits;
mod types;

pub use backends::{FileStorage, MemoryStorage};
pub use credentials::CredentialStore;
pub use keys::StorageKeys;
pub use traits::SecureStorage;
pub use types::{AccountId, Category, Credential, Profile, TokenState};

use std::path::Path;
use thiserror::Error;

/// Error type for storage operations.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Backend-specific storage error
    #[error("Platform storage error: {0}")]
    Platform(String),

    /// Key or account not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Encoding/decoding error
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Create the default file-backed storage at `path`.
pub fn create_file_storage(path: impl AsRef<Path>) -> StorageResult<Box<dyn SecureStorage>> {
    Ok(Box::new(FileStorage::open(path)?))
}
