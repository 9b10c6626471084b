//! Authentication error types.

use thiserror::Error;

/// Authentication errors.
#[derive(Error, Debug)]
pub enum AuthError {
    /// No usable secret, or the endpoint rejected it. The caller should
    /// prompt for credentials.
    #[error("Credentials required")]
    CredentialsRequired,

    /// `CachedOnly` acquisition found nothing in the cache
    #[error("No cached token")]
    NoCachedToken,

    /// No credential record exists for this account
    #[error("Unknown account: {0}")]
    UnknownAccount(String),

    /// Server refused the account itself (disabled, not yet activated)
    #[error("Account inactive: {0}")]
    AccountInactive(String),

    /// Business-level rejection with a displayable message
    #[error("Rejected: {0}")]
    Rejected(String),

    /// Authentication endpoint unreachable or failing server-side
    #[error("Authenticator unavailable: {0}")]
    AuthenticatorUnavailable(String),

    /// Acquisition aborted by the caller or host
    #[error("Operation cancelled")]
    Cancelled,

    /// Storage error
    #[error("Storage error: {0}")]
    Storage(#[from] credential_store::StorageError),

    /// HTTP request error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// URL parse error
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Timeout error
    #[error("Operation timed out")]
    Timeout,

    /// Network unavailable (transient error, can retry)
    #[error("Network unavailable")]
    NetworkUnavailable,

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl AuthError {
    /// Returns true if this error is transient and the operation can be retried.
    ///
    /// Transient errors include:
    /// - Network unavailable
    /// - Authenticator unavailable (5xx)
    /// - Connection timeouts
    pub fn is_transient(&self) -> bool {
        match self {
            AuthError::NetworkUnavailable => true,
            AuthError::Timeout => true,
            AuthError::AuthenticatorUnavailable(_) => true,
            AuthError::Http(e) => {
                if e.is_connect() || e.is_timeout() {
                    return true;
                }
                if let Some(status) = e.status() {
                    return status.is_server_error();
                }
                false
            }
            _ => false,
        }
    }

    /// Returns true for transport-level failures (the request may never have
    /// reached the endpoint).
    pub fn is_io(&self) -> bool {
        matches!(
            self,
            AuthError::Http(_)
                | AuthError::Io(_)
                | AuthError::Timeout
                | AuthError::NetworkUnavailable
                | AuthError::Json(_)
        )
    }
}

/// Result type alias using AuthError.
pub type AuthResult<T> = Result<T, AuthError>;
