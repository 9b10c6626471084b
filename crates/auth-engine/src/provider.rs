//! Token acquisition, invalidation and the account authenticator flows.

use crate::endpoint::{AuthEndpoint, Registration, TokenGrant, TokenRequest};
use crate::{AuthError, AuthResult};
use client_config_and_utils::LoginType;
use credential_store::{AccountId, CredentialStore, Profile};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// How far [`TokenProvider::acquire`] may go to produce a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireMode {
    /// Cached token only. Never touches the network.
    CachedOnly,
    /// Exchange the stored secret when nothing is cached.
    Interactive,
}

/// Hands out access tokens for accounts held in a [`CredentialStore`].
///
/// Acquisitions and invalidations for one account are serialized behind a
/// per-account async lock. A caller that waited on the lock re-checks the
/// cache first, so concurrent acquisitions cost a single exchange.
pub struct TokenProvider {
    credentials: Arc<CredentialStore>,
    endpoint: Arc<dyn AuthEndpoint>,
    login_type: LoginType,
    push_registration_id: Option<String>,
    account_locks: Mutex<HashMap<AccountId, Arc<tokio::sync::Mutex<()>>>>,
}

impl TokenProvider {
    pub fn new(credentials: Arc<CredentialStore>, endpoint: Arc<dyn AuthEndpoint>) -> Self {
        Self {
            credentials,
            endpoint,
            login_type: LoginType::default(),
            push_registration_id: None,
            account_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Login discriminator sent with every exchange.
    pub fn with_login_type(mut self, login_type: LoginType) -> Self {
        self.login_type = login_type;
        self
    }

    /// Registration identifier supplied by the host's push facility.
    pub fn with_push_registration_id(mut self, id: Option<String>) -> Self {
        self.push_registration_id = id;
        self
    }

    pub fn credentials(&self) -> &Arc<CredentialStore> {
        &self.credentials
    }

    fn account_lock(&self, account: &AccountId) -> Arc<tokio::sync::Mutex<()>> {
        self.account_locks
            .lock()
            .entry(account.clone())
            .or_default()
            .clone()
    }

    fn ensure_known(&self, account: &AccountId) -> AuthResult<()> {
        if self.credentials.is_known_account(account)? {
            Ok(())
        } else {
            Err(AuthError::UnknownAccount(account.to_string()))
        }
    }

    /// Return a token for `account`.
    pub async fn acquire(&self, account: &AccountId, mode: AcquireMode) -> AuthResult<String> {
        self.ensure_known(account)?;

        if let Some(token) = self.credentials.peek_token(account)? {
            debug!(account = %account, ?mode, "Using cached token");
            return Ok(token);
        }

        if mode == AcquireMode::CachedOnly {
            return Err(AuthError::NoCachedToken);
        }

        let lock = self.account_lock(account);
        let _guard = lock.lock().await;

        // Another caller may have refreshed while we waited.
        if let Some(token) = self.credentials.peek_token(account)? {
            debug!(account = %account, "Reusing token issued by concurrent acquisition");
            return Ok(token);
        }

        let secret = self
            .credentials
            .secret(account)?
            .ok_or(AuthError::CredentialsRequired)?;

        let grant = self.exchange(account, secret).await?;
        self.credentials.set_token(account, &grant.token)?;
        self.credentials.update_profile(account, &grant.profile())?;

        info!(account = %account, user_id = grant.user_id, "Token issued");
        Ok(grant.token)
    }

    /// Invalidate `token` for `account` after the server rejected it.
    ///
    /// Only clears the cache when `token` is still the cached token, so a
    /// token issued concurrently by another operation survives. Returns
    /// whether anything was cleared.
    pub async fn invalidate(&self, account: &AccountId, token: &str) -> AuthResult<bool> {
        self.ensure_known(account)?;

        let lock = self.account_lock(account);
        let _guard = lock.lock().await;

        if !self.credentials.mark_token_stale(account, token)? {
            debug!(account = %account, "Rejected token already replaced");
            return Ok(false);
        }
        self.credentials.invalidate_token(account)?;
        debug!(account = %account, "Cached token invalidated");
        Ok(true)
    }

    async fn exchange(&self, account: &AccountId, secret: String) -> AuthResult<TokenGrant> {
        let request = TokenRequest {
            login_type: self.login_type,
            account_id: account.clone(),
            secret,
            push_registration_id: self.push_registration_id.clone(),
        };

        self.endpoint.exchange(&request).await.inspect_err(|e| {
            warn!(account = %account, error = %e, "Credential exchange failed");
        })
    }

    // ==========================================
    // Account authenticator flows
    // ==========================================

    /// Sign in with `secret`, creating or overwriting the account record.
    pub async fn sign_in(&self, account: &AccountId, secret: &str) -> AuthResult<Profile> {
        let lock = self.account_lock(account);
        let _guard = lock.lock().await;

        let grant = self.exchange(account, secret.to_string()).await?;
        let profile = grant.profile();
        self.credentials
            .add_account(account, secret, Some(&grant.token), &profile)?;

        info!(account = %account, user_id = profile.user_id, "Signed in");
        Ok(profile)
    }

    /// Register a new account and store its first token.
    pub async fn sign_up(&self, mut registration: Registration) -> AuthResult<Profile> {
        let account = registration.account_id.clone();
        let lock = self.account_lock(&account);
        let _guard = lock.lock().await;

        registration.login_type = self.login_type;
        if registration.push_registration_id.is_none() {
            registration.push_registration_id = self.push_registration_id.clone();
        }

        let grant = self.endpoint.register(&registration).await?;
        let profile = grant.profile();
        self.credentials.add_account(
            &account,
            &registration.secret,
            Some(&grant.token),
            &profile,
        )?;

        info!(account = %account, user_id = profile.user_id, "Signed up");
        Ok(profile)
    }

    /// Verify a new secret for an existing account.
    ///
    /// The secret and the issued token are stored only if the endpoint
    /// accepts the secret.
    pub async fn confirm_credentials(&self, account: &AccountId, secret: &str) -> AuthResult<()> {
        self.ensure_known(account)?;

        let lock = self.account_lock(account);
        let _guard = lock.lock().await;

        let grant = self.exchange(account, secret.to_string()).await?;
        self.credentials.set_secret(account, secret)?;
        self.credentials.set_token(account, &grant.token)?;
        self.credentials.update_profile(account, &grant.profile())?;

        info!(account = %account, "Credentials confirmed");
        Ok(())
    }

    /// Forget the secret and cached token. The account record stays.
    pub async fn sign_out(&self, account: &AccountId) -> AuthResult<()> {
        self.ensure_known(account)?;

        let lock = self.account_lock(account);
        let _guard = lock.lock().await;

        self.credentials.clear_secret(account)?;
        self.credentials.invalidate_token(account)?;

        info!(account = %account, "Signed out");
        Ok(())
    }

    /// Drop the per-account lock for a removed account.
    pub fn forget(&self, account: &AccountId) {
        self.account_locks.lock().remove(account);
    }
}
