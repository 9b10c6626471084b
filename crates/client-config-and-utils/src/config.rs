//! Configuration management for the client core.

use crate::{CoreError, CoreResult, Paths};
use serde::{Deserialize, Serialize};
use std::path::Path;
use url::Url;

/// Default authentication endpoint (can be overridden at compile time via WAYFARER_AUTH_URL).
pub const DEFAULT_AUTH_URL: &str = match option_env!("WAYFARER_AUTH_URL") {
    Some(url) => url,
    None => "https://auth.wayfarer.app",
};

/// Default domain API endpoint (can be overridden at compile time via WAYFARER_API_URL).
pub const DEFAULT_API_URL: &str = match option_env!("WAYFARER_API_URL") {
    Some(url) => url,
    None => "https://api.wayfarer.app",
};

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

const DEFAULT_SYNC_FLUSH_INTERVAL_MS: u64 = 30_000;
const DEFAULT_SYNC_MAX_RETRIES: u32 = 20;

/// How the account proves its identity to the authentication endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LoginType {
    /// Email + password.
    #[default]
    Email,
    /// Federated login; the secret is the provider's access token.
    Social,
}

impl LoginType {
    /// Wire representation sent to the authentication endpoint.
    pub fn as_str(&self) -> &'static str {
        match self {
            LoginType::Email => "email",
            LoginType::Social => "social",
        }
    }
}

/// Main client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
    /// Base URL of the authentication endpoint.
    #[serde(default = "default_auth_url")]
    pub auth_url: String,
    /// Base URL of the domain CRUD endpoints.
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// Login discriminator sent with every credential exchange.
    #[serde(default)]
    pub login_type: LoginType,
    /// Push registration identifier supplied by the host, if any.
    #[serde(default)]
    pub push_registration_id: Option<String>,
    /// Interval between background reconciliation sweeps.
    #[serde(default = "default_sync_flush_interval_ms")]
    pub sync_flush_interval_ms: u64,
    /// Failed sweeps per account before the worker gives up on it.
    #[serde(default = "default_sync_max_retries")]
    pub sync_max_retries: u32,
}

fn default_auth_url() -> String {
    DEFAULT_AUTH_URL.to_string()
}

fn default_api_url() -> String {
    DEFAULT_API_URL.to_string()
}

fn default_sync_flush_interval_ms() -> u64 {
    DEFAULT_SYNC_FLUSH_INTERVAL_MS
}

fn default_sync_max_retries() -> u32 {
    DEFAULT_SYNC_MAX_RETRIES
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            auth_url: DEFAULT_AUTH_URL.to_string(),
            api_url: DEFAULT_API_URL.to_string(),
            login_type: LoginType::default(),
            push_registration_id: None,
            sync_flush_interval_ms: DEFAULT_SYNC_FLUSH_INTERVAL_MS,
            sync_max_retries: DEFAULT_SYNC_MAX_RETRIES,
        }
    }
}

impl Config {
    /// Create a new Config with default values, then override from environment.
    pub fn new() -> Self {
        let mut config = Self::default();
        config.load_from_env();
        config
    }

    /// Load configuration from the config file, falling back to defaults.
    ///
    /// Environment variables win over the file.
    pub fn load(paths: &Paths) -> CoreResult<Self> {
        let config_path = paths.config_file();

        let mut config = if config_path.exists() {
            Self::load_from_file(&config_path)?
        } else {
            Self::default()
        };

        config.load_from_env();
        config.validate()?;

        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a file.
    pub fn save(&self, paths: &Paths) -> CoreResult<()> {
        paths.ensure_dirs()?;
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(paths.config_file(), content)?;
        Ok(())
    }

    fn load_from_env(&mut self) {
        if let Ok(log_level) = std::env::var("WAYFARER_LOG_LEVEL") {
            self.log_level = log_level;
        }
        if let Some(url) = non_empty_env("WAYFARER_AUTH_URL") {
            self.auth_url = url;
        }
        if let Some(url) = non_empty_env("WAYFARER_API_URL") {
            self.api_url = url;
        }
    }

    /// Reject configurations the runtime cannot start with.
    pub fn validate(&self) -> CoreResult<()> {
        self.auth_url()?;
        self.api_url()?;
        if self.sync_flush_interval_ms == 0 {
            return Err(CoreError::Config(
                "sync_flush_interval_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Get the authentication endpoint as a parsed URL.
    pub fn auth_url(&self) -> CoreResult<Url> {
        Url::parse(&self.auth_url).map_err(CoreError::from)
    }

    /// Get the domain API endpoint as a parsed URL.
    pub fn api_url(&self) -> CoreResult<Url> {
        Url::parse(&self.api_url).map_err(CoreError::from)
    }

    /// Sweep interval as a `Duration`.
    pub fn sync_flush_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.sync_flush_interval_ms)
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
