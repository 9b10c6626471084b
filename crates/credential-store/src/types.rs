//! Account and credential types.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque identifier of a user account (typically an email address).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(String);

impl AccountId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AccountId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for AccountId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Gender/category attribute reported by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Male,
    Female,
    Other,
    #[default]
    Unknown,
}

impl Category {
    /// Lenient parse of the server's representation. Anything unrecognised
    /// is `Unknown`.
    pub fn from_server(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "male" | "m" => Category::Male,
            "female" | "f" => Category::Female,
            "other" | "o" => Category::Other,
            _ => Category::Unknown,
        }
    }
}

/// Profile attributes cached alongside a credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Profile {
    /// Numeric server-side user id.
    pub user_id: i64,
    /// Display alias.
    pub alias: String,
    /// Avatar reference (URL or media key).
    #[serde(default)]
    pub avatar_ref: String,
    #[serde(default)]
    pub category: Category,
}

/// Everything the store knows about one account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub account_id: AccountId,
    pub secret: Option<String>,
    pub cached_token: Option<String>,
    pub profile: Profile,
}

/// Derived token status for an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenState {
    /// No token cached.
    Absent,
    /// A token is cached and nothing has rejected it yet.
    CachedValid,
    /// The cached token was rejected by the server and must be invalidated.
    CachedStale,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_from_server() {
        assert_eq!(Category::from_server("male"), Category::Male);
        assert_eq!(Category::from_server(" Female "), Category::Female);
        assert_eq!(Category::from_server("o"), Category::Other);
        assert_eq!(Category::from_server(""), Category::Unknown);
        assert_eq!(Category::from_server("robot"), Category::Unknown);
    }

    #[test]
    fn test_account_id_is_transparent_in_json() {
        let id = AccountId::new("a@example.com");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"a@example.com\"");
        assert_eq!(id.to_string(), "a@example.com");
    }

    #[test]
    fn test_profile_defaults_missing_fields() {
        let profile: Profile = serde_json::from_str(r#"{"user_id": 7, "alias": "sam"}"#).unwrap();
        assert_eq!(profile.user_id, 7);
        assert_eq!(profile.category, Category::Unknown);
        assert!(profile.avatar_ref.is_empty());
    }
}
