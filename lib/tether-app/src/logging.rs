//! Logging.

use tether_error::{ErrorContext as _, GenericError};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{layer::SubscriberExt as _, util::SubscriberInitExt as _, EnvFilter, Layer as _};

/// Environment variable holding the log filtering directives.
pub const LOG_LEVEL_ENV_VAR: &str = "TETHER_LOG_LEVEL";

/// Environment variable selecting JSON-formatted output.
pub const LOG_FORMAT_JSON_ENV_VAR: &str = "TETHER_LOG_FORMAT_JSON";

/// Initializes the logging subsystem for `tracing`.
///
/// This function reads the `TETHER_LOG_LEVEL` environment variable to determine the log level to use. If the environment
/// variable is not set, `default_level` is used, or `INFO` if that is not given either. Additionally, it reads the
/// `TETHER_LOG_FORMAT_JSON` environment variable to determine which output format to use. If it is set to `true` or `1`,
/// the logs will be formatted as JSON. Otherwise, logs use a compact, human-readable format.
///
/// # Errors
///
/// If the logging subsystem was already initialized, an error will be returned.
pub fn initialize_logging(default_level: Option<LevelFilter>) -> Result<(), GenericError> {
    let is_json = std::env::var(LOG_FORMAT_JSON_ENV_VAR)
        .map(|s| is_truthy(&s))
        .unwrap_or(false);

    let level_filter = EnvFilter::builder()
        .with_default_directive(default_level.unwrap_or(LevelFilter::INFO).into())
        .with_env_var(LOG_LEVEL_ENV_VAR)
        .from_env_lossy();

    let fmt_layer = if is_json {
        tracing_subscriber::fmt::layer()
            .json()
            .flatten_event(true)
            .with_target(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .compact()
            .with_ansi(true)
            .with_target(true)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(fmt_layer.with_filter(level_filter))
        .try_init()
        .error_context("Failed to initialize logging subsystem.")
}

fn is_truthy(value: &str) -> bool {
    let value = value.trim().to_lowercase();
    value == "true" || value == "1"
}
