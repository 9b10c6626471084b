//! Logging initialization.
//!
//! Library code only emits `tracing` events. The embedding host calls
//! [`init_logging`] once at startup to install a structured JSON subscriber.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize the logging system for the client core.
///
/// - Structured JSON lines on stderr
/// - Level from `RUST_LOG` when set, otherwise `level`
/// - Safe to call more than once; later calls are ignored
///
/// # Example
///
/// ```ignore
/// init_logging("info");
/// tracing::info!("Client core started");
/// ```
pub fn init_logging(level: &str) {
    init_logging_for_service("wayfarer-core", level);
}

/// Initialize logging with a custom service name.
///
/// The service name is attached to every line as a span field so that logs
/// from several hosts sharing a sink can be told apart.
pub fn init_logging_for_service(service_name: &str, level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let result = tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .json()
                .with_current_span(true)
                .with_target(true)
                .with_writer(std::io::stderr),
        )
        .try_init();

    match result {
        Ok(()) => tracing::info!(service = %service_name, level = %level, "Logging initialized"),
        Err(_) => tracing::debug!(service = %service_name, "Logging already initialized"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repeated_init_is_harmless() {
        init_logging("debug");
        init_logging_for_service("test-service", "trace");
    }
}
