//! Runtime error types.

use auth_engine::AuthError;
use client_config_and_utils::CoreError;
use credential_store::StorageError;
use gated_executor::{ErrorKind, GatedError, TransportError};
use local_store::StoreError;
use sync_coordinator::SyncError;
use thiserror::Error;

/// Errors surfaced by [`ClientRuntime`](crate::ClientRuntime).
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Configuration or path error
    #[error(transparent)]
    Config(#[from] CoreError),

    /// Credential storage error
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Sign-in, sign-up or token acquisition error
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// Local store error
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Reconciliation error
    #[error(transparent)]
    Sync(#[from] SyncError),

    /// Gated request error
    #[error(transparent)]
    Request(#[from] GatedError<TransportError>),

    /// Transport setup error
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// No signed-in account
    #[error("No active account")]
    NoActiveAccount,

    /// The requester stopped before the result arrived
    #[error("Operation cancelled")]
    Cancelled,
}

impl RuntimeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RuntimeError::NoActiveAccount => ErrorKind::CredentialsRequired,
            RuntimeError::Auth(e) => auth_kind(e),
            RuntimeError::Sync(e) => e.kind(),
            RuntimeError::Request(e) => e.kind(),
            RuntimeError::Cancelled => ErrorKind::OperationCancelled,
            _ => ErrorKind::Other,
        }
    }

    /// Message for the user, or `None` when a credential prompt is due.
    pub fn user_message(&self) -> Option<String> {
        match self {
            RuntimeError::Sync(e) => e.user_message(),
            RuntimeError::Request(e) => e.user_message(),
            other if other.kind() == ErrorKind::CredentialsRequired => None,
            RuntimeError::Auth(AuthError::AccountInactive(message))
            | RuntimeError::Auth(AuthError::Rejected(message)) => Some(message.clone()),
            other => Some(other.to_string()),
        }
    }
}

fn auth_kind(error: &AuthError) -> ErrorKind {
    match error {
        AuthError::CredentialsRequired | AuthError::NoCachedToken | AuthError::UnknownAccount(_) => {
            ErrorKind::CredentialsRequired
        }
        AuthError::Cancelled => ErrorKind::OperationCancelled,
        AuthError::AuthenticatorUnavailable(_) => ErrorKind::AuthenticatorError,
        AuthError::AccountInactive(_) | AuthError::Rejected(_) => ErrorKind::ServerRejected,
        e if e.is_io() => ErrorKind::IoError,
        _ => ErrorKind::Other,
    }
}

/// Result type alias using RuntimeError.
pub type RuntimeResult<T> = Result<T, RuntimeError>;
