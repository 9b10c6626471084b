//! Core types, configuration, and utilities for the Wayfarer client core.

mod config;
mod error;
mod logging;
mod paths;

pub use config::{Config, LoginType, DEFAULT_API_URL, DEFAULT_AUTH_URL, DEFAULT_LOG_LEVEL};
pub use error::{CoreError, CoreResult};
pub use logging::{init_logging, init_logging_for_service};
pub use paths::Paths;
