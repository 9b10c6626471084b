//! High-level API for account credentials and the active-account pointer.

use crate::{
    AccountId, Credential, Profile, SecureStorage, StorageError, StorageKeys, StorageResult,
    TokenState,
};
use tracing::{debug, info, warn};

/// Persists per-account secrets, cached tokens and profile attributes, plus
/// the single process-wide "active account" pointer.
///
/// Every field is stored under its own key so concurrent operations touching
/// different fields of one account never need a shared lock.
pub struct CredentialStore {
    storage: Box<dyn SecureStorage>,
}

impl CredentialStore {
    /// Create a new credential store over the given backend.
    pub fn new(storage: Box<dyn SecureStorage>) -> Self {
        Self { storage }
    }

    // ==========================================
    // Account records
    // ==========================================

    /// Create (or overwrite) an account record after a sign-in or sign-up
    /// response was received.
    pub fn add_account(
        &self,
        account: &AccountId,
        secret: &str,
        token: Option<&str>,
        profile: &Profile,
    ) -> StorageResult<()> {
        self.write_profile(account, profile)?;
        self.storage
            .set(&StorageKeys::secret(account.as_str()), secret)?;
        match token {
            Some(token) => self.set_token(account, token)?,
            None => self.invalidate_token(account)?,
        }
        info!(account = %account, user_id = profile.user_id, "Account record stored");
        Ok(())
    }

    /// Remove every key belonging to `account`.
    ///
    /// Clears the active pointer if it pointed at this account.
    pub fn remove_account(&self, account: &AccountId) -> StorageResult<bool> {
        let known = self.is_known_account(account)?;

        // Exact keys only: a prefix scan would also match ids that extend
        // this one, such as `a@example.com.au` for `a@example.com`.
        for key in StorageKeys::account_keys(account.as_str()) {
            self.storage.delete(&key)?;
        }

        if self.get_active()?.as_ref() == Some(account) {
            self.set_active(None)?;
        }

        if known {
            info!(account = %account, "Account record removed");
        }
        Ok(known)
    }

    /// Whether a record exists for `account`.
    ///
    /// Callers use this to re-validate a previously saved active pointer; the
    /// host may have deleted the account behind our back.
    pub fn is_known_account(&self, account: &AccountId) -> StorageResult<bool> {
        self.storage.has(&StorageKeys::profile(account.as_str()))
    }

    /// All accounts with a record, sorted.
    pub fn list_accounts(&self) -> StorageResult<Vec<AccountId>> {
        let mut accounts: Vec<AccountId> = self
            .storage
            .list_keys_with_prefix(StorageKeys::ACCOUNT_PREFIX)?
            .iter()
            .filter_map(|key| StorageKeys::account_from_profile_key(key))
            .map(AccountId::new)
            .collect();
        accounts.sort();
        Ok(accounts)
    }

    /// Full credential for `account`, or `NotFound`.
    pub fn get(&self, account: &AccountId) -> StorageResult<Credential> {
        let profile = self.profile(account)?;
        Ok(Credential {
            account_id: account.clone(),
            secret: self.storage.get(&StorageKeys::secret(account.as_str()))?,
            cached_token: self.storage.get(&StorageKeys::token(account.as_str()))?,
            profile,
        })
    }

    /// Profile attributes for `account`, or `NotFound`.
    pub fn profile(&self, account: &AccountId) -> StorageResult<Profile> {
        let raw = self
            .storage
            .get(&StorageKeys::profile(account.as_str()))?
            .ok_or_else(|| StorageError::NotFound(account.to_string()))?;
        serde_json::from_str(&raw).map_err(|e| StorageError::Encoding(e.to_string()))
    }

    /// Replace profile attributes with fresher ones from a server response.
    pub fn update_profile(&self, account: &AccountId, profile: &Profile) -> StorageResult<()> {
        self.ensure_known(account)?;
        self.write_profile(account, profile)?;
        debug!(account = %account, "Profile refreshed");
        Ok(())
    }

    fn write_profile(&self, account: &AccountId, profile: &Profile) -> StorageResult<()> {
        let encoded =
            serde_json::to_string(profile).map_err(|e| StorageError::Encoding(e.to_string()))?;
        self.storage
            .set(&StorageKeys::profile(account.as_str()), &encoded)
    }

    fn ensure_known(&self, account: &AccountId) -> StorageResult<()> {
        if self.is_known_account(account)? {
            Ok(())
        } else {
            Err(StorageError::NotFound(account.to_string()))
        }
    }

    // ==========================================
    // Secret
    // ==========================================

    /// The stored secret, if any. `NotFound` for unknown accounts.
    pub fn secret(&self, account: &AccountId) -> StorageResult<Option<String>> {
        self.ensure_known(account)?;
        self.storage.get(&StorageKeys::secret(account.as_str()))
    }

    /// Replace the secret after the user confirmed new credentials.
    pub fn set_secret(&self, account: &AccountId, secret: &str) -> StorageResult<()> {
        self.ensure_known(account)?;
        self.storage
            .set(&StorageKeys::secret(account.as_str()), secret)
    }

    /// Forget the secret (sign-out). The account record itself is kept.
    pub fn clear_secret(&self, account: &AccountId) -> StorageResult<()> {
        self.ensure_known(account)?;
        self.storage.delete(&StorageKeys::secret(account.as_str()))?;
        debug!(account = %account, "Secret cleared");
        Ok(())
    }

    // ==========================================
    // Token
    // ==========================================

    /// Cache a freshly issued token. Clears any stale marker.
    pub fn set_token(&self, account: &AccountId, token: &str) -> StorageResult<()> {
        self.ensure_known(account)?;
        self.storage
            .set(&StorageKeys::token(account.as_str()), token)?;
        self.storage
            .delete(&StorageKeys::stale_token(account.as_str()))?;
        Ok(())
    }

    /// Cached token without any network side effect.
    pub fn peek_token(&self, account: &AccountId) -> StorageResult<Option<String>> {
        self.ensure_known(account)?;
        self.storage.get(&StorageKeys::token(account.as_str()))
    }

    /// Drop the cached token (and its stale marker).
    pub fn invalidate_token(&self, account: &AccountId) -> StorageResult<()> {
        self.ensure_known(account)?;
        self.storage.delete(&StorageKeys::token(account.as_str()))?;
        self.storage
            .delete(&StorageKeys::stale_token(account.as_str()))?;
        Ok(())
    }

    /// Record that the server rejected `token`.
    ///
    /// Has no effect when `token` is no longer the cached one.
    pub fn mark_token_stale(&self, account: &AccountId, token: &str) -> StorageResult<bool> {
        if self.peek_token(account)?.as_deref() != Some(token) {
            return Ok(false);
        }
        self.storage
            .set(&StorageKeys::stale_token(account.as_str()), token)?;
        Ok(true)
    }

    /// Derived token status.
    pub fn token_state(&self, account: &AccountId) -> StorageResult<TokenState> {
        let Some(token) = self.peek_token(account)? else {
            return Ok(TokenState::Absent);
        };
        let stale = self
            .storage
            .get(&StorageKeys::stale_token(account.as_str()))?;
        if stale.as_deref() == Some(token.as_str()) {
            Ok(TokenState::CachedStale)
        } else {
            Ok(TokenState::CachedValid)
        }
    }

    // ==========================================
    // Active account
    // ==========================================

    /// Switch the active account.
    ///
    /// Changing the active account resets all UI-preference state that
    /// belonged to the previous one and clears the "deleted" flag.
    pub fn set_active(&self, account: Option<&AccountId>) -> StorageResult<()> {
        if let Some(account) = account {
            self.ensure_known(account)?;
        }
        let previous = self.get_active()?;

        if previous.as_ref() != account {
            self.clear_preferences()?;
        }

        match account {
            Some(account) => {
                self.storage
                    .set(StorageKeys::ACTIVE_ACCOUNT, account.as_str())?;
            }
            None => {
                self.storage.delete(StorageKeys::ACTIVE_ACCOUNT)?;
            }
        }
        self.storage.delete(StorageKeys::ACTIVE_ACCOUNT_DELETED)?;

        debug!(
            previous = ?previous.as_ref().map(AccountId::as_str),
            active = ?account.map(AccountId::as_str),
            "Active account changed"
        );
        Ok(())
    }

    /// The active account pointer as stored (not re-validated).
    pub fn get_active(&self) -> StorageResult<Option<AccountId>> {
        Ok(self
            .storage
            .get(StorageKeys::ACTIVE_ACCOUNT)?
            .map(AccountId::from))
    }

    /// The active account, re-validated against the account records.
    ///
    /// A pointer to an account that no longer exists is cleared and the
    /// deleted flag raised.
    pub fn validated_active(&self) -> StorageResult<Option<AccountId>> {
        let Some(active) = self.get_active()? else {
            return Ok(None);
        };
        if self.is_known_account(&active)? {
            return Ok(Some(active));
        }

        warn!(account = %active, "Active account no longer exists, clearing pointer");
        self.set_active(None)?;
        self.storage.set(StorageKeys::ACTIVE_ACCOUNT_DELETED, "true")?;
        Ok(None)
    }

    /// Whether the last active account was removed externally.
    pub fn active_deleted(&self) -> StorageResult<bool> {
        self.storage.has(StorageKeys::ACTIVE_ACCOUNT_DELETED)
    }

    /// Host notification: `account` no longer exists in the platform account
    /// facility.
    ///
    /// Drops the record; if it was active, clears the pointer and raises the
    /// deleted flag. Returns whether the account was active.
    pub fn handle_account_removed(&self, account: &AccountId) -> StorageResult<bool> {
        let was_active = self.get_active()?.as_ref() == Some(account);
        self.remove_account(account)?;
        if was_active {
            self.storage.set(StorageKeys::ACTIVE_ACCOUNT_DELETED, "true")?;
            info!(account = %account, "Active account removed by host");
        }
        Ok(was_active)
    }

    // ==========================================
    // UI-preference state
    // ==========================================

    /// Store a UI-preference value for the active account.
    pub fn set_preference(&self, name: &str, value: &str) -> StorageResult<()> {
        self.storage
            .set(&format!("{}{}", StorageKeys::PREFERENCE_PREFIX, name), value)
    }

    /// Read a UI-preference value.
    pub fn get_preference(&self, name: &str) -> StorageResult<Option<String>> {
        self.storage
            .get(&format!("{}{}", StorageKeys::PREFERENCE_PREFIX, name))
    }

    pub fn set_navigation_mode(&self, mode: &str) -> StorageResult<()> {
        self.storage.set(StorageKeys::NAVIGATION_MODE, mode)
    }

    pub fn navigation_mode(&self) -> StorageResult<Option<String>> {
        self.storage.get(StorageKeys::NAVIGATION_MODE)
    }

    fn clear_preferences(&self) -> StorageResult<()> {
        for key in self
            .storage
            .list_keys_with_prefix(StorageKeys::PREFERENCE_PREFIX)?
        {
            self.storage.delete(&key)?;
        }
        Ok(())
    }
}
