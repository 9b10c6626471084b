//! Terminal error taxonomy for gated requests.

use auth_engine::AuthError;
use std::fmt;
use thiserror::Error;

/// Caller-facing error categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// No usable secret or token. Resolves to a credential prompt.
    CredentialsRequired,
    /// The server rejected the token, again, after one retry.
    AuthFailure,
    /// The authentication endpoint could not issue a token.
    AuthenticatorError,
    /// Aborted by the user or the host.
    OperationCancelled,
    /// Transport-level failure, timeouts included.
    IoError,
    /// Business-logic rejection with a displayable message.
    ServerRejected,
    /// Anything else.
    Other,
}

/// Errors returned by a dispatched request.
pub trait RequestFailure: fmt::Display {
    /// Bucket for a failure that was not an authorization failure.
    fn kind(&self) -> ErrorKind {
        ErrorKind::Other
    }
}

/// Terminal outcome of a gated request that did not succeed.
#[derive(Error, Debug)]
pub enum GatedError<E> {
    /// The account has no usable secret; prompt for credentials
    #[error("Credentials required")]
    CredentialsRequired,

    /// The token was rejected on both attempts, or the replay could not get
    /// a new token without prompting. Carries the request error unmodified.
    #[error("Authorization failed: {0}")]
    AuthFailure(E),

    /// The authentication endpoint failed
    #[error("Authenticator error: {0}")]
    Authenticator(AuthError),

    #[error("Operation cancelled")]
    Cancelled,

    /// Token acquisition failed at the transport level
    #[error("IO error: {0}")]
    Io(AuthError),

    /// The authentication endpoint refused the account
    #[error("{0}")]
    ServerRejected(String),

    /// The request itself failed with a non-auth error
    #[error("Request failed: {0}")]
    Request(E),

    /// Internal sequencing error
    #[error("Invalid request state transition: {0}")]
    InvalidTransition(String),
}

impl<E> GatedError<E> {
    /// Map a token acquisition failure on the first leg.
    pub fn from_acquisition(error: AuthError) -> Self {
        match error {
            AuthError::CredentialsRequired
            | AuthError::NoCachedToken
            | AuthError::UnknownAccount(_) => GatedError::CredentialsRequired,
            AuthError::Cancelled => GatedError::Cancelled,
            AuthError::AccountInactive(message) | AuthError::Rejected(message) => {
                GatedError::ServerRejected(message)
            }
            other if other.is_io() => GatedError::Io(other),
            other => GatedError::Authenticator(other),
        }
    }

    /// Whether the error is the kind that asks for a credential prompt.
    pub fn requires_credentials(&self) -> bool {
        matches!(self, GatedError::CredentialsRequired)
    }
}

impl<E: RequestFailure> GatedError<E> {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GatedError::CredentialsRequired => ErrorKind::CredentialsRequired,
            GatedError::AuthFailure(_) => ErrorKind::AuthFailure,
            GatedError::Cancelled => ErrorKind::OperationCancelled,
            GatedError::Io(_) => ErrorKind::IoError,
            GatedError::ServerRejected(_) => ErrorKind::ServerRejected,
            GatedError::Request(e) => e.kind(),
            GatedError::Authenticator(_) => ErrorKind::AuthenticatorError,
            GatedError::InvalidTransition(_) => ErrorKind::Other,
        }
    }

    /// Human-readable message for the caller to show.
    ///
    /// `None` for `CredentialsRequired`, which resolves to a credential
    /// prompt instead of a message.
    pub fn user_message(&self) -> Option<String> {
        let message = match self {
            GatedError::CredentialsRequired => return None,
            GatedError::AuthFailure(_) => {
                "Your session could not be verified. Please sign in again.".to_string()
            }
            GatedError::Authenticator(_) => {
                "The sign-in service is unavailable. Please try again later.".to_string()
            }
            GatedError::Cancelled => "The operation was cancelled.".to_string(),
            GatedError::Io(_) => {
                "Could not reach the server. Check your connection and try again.".to_string()
            }
            GatedError::ServerRejected(message) => message.clone(),
            GatedError::Request(e) => match e.kind() {
                ErrorKind::IoError => {
                    "Could not reach the server. Check your connection and try again.".to_string()
                }
                _ => e.to_string(),
            },
            GatedError::InvalidTransition(_) => "Something went wrong.".to_string(),
        };
        Some(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Plain(&'static str);

    impl fmt::Display for Plain {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str(self.0)
        }
    }

    impl RequestFailure for Plain {}

    #[test]
    fn test_acquisition_mapping() {
        assert!(matches!(
            GatedError::<Plain>::from_acquisition(AuthError::CredentialsRequired),
            GatedError::CredentialsRequired
        ));
        assert!(matches!(
            GatedError::<Plain>::from_acquisition(AuthError::Cancelled),
            GatedError::Cancelled
        ));
        assert!(matches!(
            GatedError::<Plain>::from_acquisition(AuthError::Timeout),
            GatedError::Io(_)
        ));
        assert!(matches!(
            GatedError::<Plain>::from_acquisition(AuthError::AuthenticatorUnavailable(
                "503".to_string()
            )),
            GatedError::Authenticator(_)
        ));
        assert!(matches!(
            GatedError::<Plain>::from_acquisition(AuthError::AccountInactive(
                "inactive".to_string()
            )),
            GatedError::ServerRejected(ref m) if m == "inactive"
        ));
    }

    #[test]
    fn test_credentials_required_has_no_message() {
        let err = GatedError::<Plain>::CredentialsRequired;
        assert_eq!(err.kind(), ErrorKind::CredentialsRequired);
        assert!(err.user_message().is_none());
    }

    #[test]
    fn test_every_other_kind_has_a_message() {
        let errors = vec![
            GatedError::AuthFailure(Plain("401")),
            GatedError::Authenticator(AuthError::AuthenticatorUnavailable("503".to_string())),
            GatedError::Cancelled,
            GatedError::Io(AuthError::NetworkUnavailable),
            GatedError::ServerRejected("Account inactive".to_string()),
            GatedError::Request(Plain("Title is required")),
        ];
        for err in errors {
            assert!(err.user_message().is_some(), "{err:?}");
        }
    }

    #[test]
    fn test_authenticator_failure_kind() {
        let err = GatedError::<Plain>::Authenticator(AuthError::AuthenticatorUnavailable(
            "503".to_string(),
        ));
        assert_eq!(err.kind(), ErrorKind::AuthenticatorError);
    }

    #[test]
    fn test_request_message_is_extracted() {
        let err = GatedError::Request(Plain("Title is required"));
        assert_eq!(err.kind(), ErrorKind::Other);
        assert_eq!(err.user_message().as_deref(), Some("Title is required"));
    }
}
