//! Structured logging configuration.
//!
//! The library logs through the `log` facade; the subscriber installed here
//! also picks those records up, so one `RUST_LOG` filter controls both.

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Filter used when `RUST_LOG` is unset
const DEFAULT_FILTER: &str = "info,sqlx=warn";

/// Initialize structured logging
///
/// Logs go to stderr so command output on stdout stays machine-readable.
/// Log levels are configurable via the `RUST_LOG` env var.
pub fn init() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

/// Log a rejected or failed command with its classification
pub fn log_command_failure(command: &str, class: &str, retryable: bool, detail: &str) {
    if retryable {
        tracing::warn!(
            command = command,
            class = class,
            retryable = retryable,
            "Command failed transiently: {}",
            detail
        );
    } else {
        tracing::error!(
            command = command,
            class = class,
            retryable = retryable,
            "Command failed: {}",
            detail
        );
    }
}
