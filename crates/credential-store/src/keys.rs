//! Storage key constants.

/// Storage keys used by the credential store
pub struct StorageKeys;

impl StorageKeys {
    /// Active account pointer
    pub const ACTIVE_ACCOUNT: &'static str = "active_account";

    /// Set when the active account was removed by the host
    pub const ACTIVE_ACCOUNT_DELETED: &'static str = "active_account_deleted";

    /// Prefix for all per-account records
    pub const ACCOUNT_PREFIX: &'static str = "account.";

    /// Prefix for UI-preference state tied to the active account
    pub const PREFERENCE_PREFIX: &'static str = "pref.";

    /// Navigation mode preference (a UI-preference key)
    pub const NAVIGATION_MODE: &'static str = "pref.navigation_mode";

    /// Account secret (password)
    pub fn secret(account: &str) -> String {
        format!("{}{}.secret", Self::ACCOUNT_PREFIX, account)
    }

    /// Cached access token
    pub fn token(account: &str) -> String {
        format!("{}{}.token", Self::ACCOUNT_PREFIX, account)
    }

    /// Token observed as rejected by the server, pending invalidation
    pub fn stale_token(account: &str) -> String {
        format!("{}{}.token_stale", Self::ACCOUNT_PREFIX, account)
    }

    /// Profile attributes (JSON). Its presence marks a known account.
    pub fn profile(account: &str) -> String {
        format!("{}{}.profile", Self::ACCOUNT_PREFIX, account)
    }

    /// Every per-account key of `account`.
    pub fn account_keys(account: &str) -> [String; 4] {
        [
            Self::secret(account),
            Self::token(account),
            Self::stale_token(account),
            Self::profile(account),
        ]
    }

    /// Extract the account id from a profile key.
    pub fn account_from_profile_key(key: &str) -> Option<&str> {
        key.strip_prefix(Self::ACCOUNT_PREFIX)?
            .strip_suffix(".profile")
    }
}
