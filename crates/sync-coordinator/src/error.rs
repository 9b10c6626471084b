//! Sync error types.

use gated_executor::{ErrorKind, GatedError, TransportError};
use local_store::{LocalId, StoreError};
use thiserror::Error;

/// Errors from coordinator operations.
///
/// Local writes that happened before a remote failure are kept; the error
/// only reports that the server side did not follow.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Local store error
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// The gated remote call failed
    #[error(transparent)]
    Remote(#[from] GatedError<TransportError>),

    /// The coordinator shut down while the call was in flight
    #[error("Sync cancelled")]
    Cancelled,

    /// No row with this local id
    #[error("Entity not found: {0}")]
    NotFound(LocalId),
}

impl SyncError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::Remote(e) => e.kind(),
            SyncError::Cancelled => ErrorKind::OperationCancelled,
            SyncError::Store(_) | SyncError::NotFound(_) => ErrorKind::Other,
        }
    }

    /// Message for the user, or `None` when a credential prompt is due.
    pub fn user_message(&self) -> Option<String> {
        match self {
            SyncError::Remote(e) => e.user_message(),
            other => Some(other.to_string()),
        }
    }

    pub fn requires_credentials(&self) -> bool {
        matches!(self, SyncError::Remote(e) if e.requires_credentials())
    }
}

/// Result type alias using SyncError.
pub type SyncResult<T> = Result<T, SyncError>;
