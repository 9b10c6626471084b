//! Authentication endpoint contract and its HTTP adapter.

use crate::{AuthError, AuthResult};
use async_trait::async_trait;
use client_config_and_utils::LoginType;
use credential_store::{AccountId, Category, Profile};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// Error code the endpoint uses for disabled or unactivated accounts.
pub const ACCOUNT_INACTIVE_CODE: &str = "account_inactive";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Credential exchange request.
#[derive(Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenRequest {
    pub login_type: LoginType,
    pub account_id: AccountId,
    pub secret: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub push_registration_id: Option<String>,
}

impl fmt::Debug for TokenRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenRequest")
            .field("login_type", &self.login_type)
            .field("account_id", &self.account_id)
            .field("secret", &"<redacted>")
            .field("push_registration_id", &self.push_registration_id)
            .finish()
    }
}

/// New-account registration request.
#[derive(Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Registration {
    pub login_type: LoginType,
    pub account_id: AccountId,
    pub secret: String,
    pub alias: String,
    pub gender: Category,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub push_registration_id: Option<String>,
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration")
            .field("account_id", &self.account_id)
            .field("alias", &self.alias)
            .field("gender", &self.gender)
            .finish_non_exhaustive()
    }
}

/// Successful exchange or registration response.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenGrant {
    pub token: String,
    pub user_id: i64,
    #[serde(default)]
    pub alias: String,
    #[serde(default)]
    pub gender: Option<String>,
    #[serde(default)]
    pub avatar_ref: Option<String>,
}

impl TokenGrant {
    /// Profile attributes carried by this grant.
    pub fn profile(&self) -> Profile {
        Profile {
            user_id: self.user_id,
            alias: self.alias.clone(),
            avatar_ref: self.avatar_ref.clone().unwrap_or_default(),
            category: self
                .gender
                .as_deref()
                .map(Category::from_server)
                .unwrap_or_default(),
        }
    }
}

/// Error body returned by the endpoint on failure.
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// External authentication endpoint.
#[async_trait]
pub trait AuthEndpoint: Send + Sync {
    /// Exchange an account secret for an access token.
    async fn exchange(&self, request: &TokenRequest) -> AuthResult<TokenGrant>;

    /// Create a new account and issue its first token.
    async fn register(&self, registration: &Registration) -> AuthResult<TokenGrant>;
}

/// reqwest-backed [`AuthEndpoint`].
#[derive(Clone)]
pub struct HttpAuthEndpoint {
    http_client: reqwest::Client,
    base_url: Url,
}

impl HttpAuthEndpoint {
    /// Create an endpoint client rooted at `base_url`.
    pub fn new(base_url: Url) -> AuthResult<Self> {
        Self::with_timeout(base_url, DEFAULT_TIMEOUT)
    }

    /// Create an endpoint client with a custom request timeout.
    pub fn with_timeout(base_url: Url, timeout: Duration) -> AuthResult<Self> {
        let http_client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http_client,
            base_url,
        })
    }

    fn url(&self, path: &str) -> AuthResult<Url> {
        Ok(self.base_url.join(path)?)
    }

    async fn post<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> AuthResult<TokenGrant> {
        let url = self.url(path)?;
        debug!(url = %url, "Calling authentication endpoint");

        let response = self
            .http_client
            .post(url)
            .header("Accept", "application/json")
            .json(body)
            .send()
            .await
            .map_err(map_send_error)?;

        let status = response.status();
        if status.is_success() {
            return Ok(response.json().await?);
        }

        let body = response.text().await.unwrap_or_default();
        Err(map_failure(status, &body))
    }
}

#[async_trait]
impl AuthEndpoint for HttpAuthEndpoint {
    async fn exchange(&self, request: &TokenRequest) -> AuthResult<TokenGrant> {
        self.post("v1/token", request).await
    }

    async fn register(&self, registration: &Registration) -> AuthResult<TokenGrant> {
        self.post("v1/accounts", registration).await
    }
}

fn map_send_error(error: reqwest::Error) -> AuthError {
    if error.is_timeout() {
        AuthError::Timeout
    } else if error.is_connect() {
        AuthError::NetworkUnavailable
    } else {
        AuthError::Http(error)
    }
}

/// Map a non-success response to the error taxonomy.
fn map_failure(status: StatusCode, body: &str) -> AuthError {
    let parsed: ErrorBody = serde_json::from_str(body).unwrap_or_default();
    let message = parsed
        .message
        .clone()
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("").to_string());

    if status.is_server_error() {
        warn!(status = %status, "Authentication endpoint failed");
        return AuthError::AuthenticatorUnavailable(status.to_string());
    }

    match status {
        StatusCode::UNAUTHORIZED => AuthError::CredentialsRequired,
        StatusCode::FORBIDDEN if parsed.code.as_deref() == Some(ACCOUNT_INACTIVE_CODE) => {
            AuthError::AccountInactive(message)
        }
        _ => AuthError::Rejected(message),
    }
}
