//! Logging initialization.
//!
//! Configures `tracing-subscriber` from the `general` section of
//! `SiemConfig`. Logs always go to stderr: stdout is reserved for
//! diagnostics and the JSON lines event stream.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use siemlite_core::config::GeneralConfig;

use crate::error::CliError;

/// Initialize the global tracing subscriber.
///
/// Must be called once, before any tracing macros are used. `RUST_LOG`
/// takes precedence over `log_level`.
///
/// # Formats
///
/// * `"json"` - Machine-parseable JSON lines
/// * `"pretty"` - Human-readable output
pub fn init_tracing(config: &GeneralConfig) -> Result<(), CliError> {
    let env_filter = build_filter(&config.log_level);

    match config.log_format.as_str() {
        "json" => tracing_subscriber::registry()
            .with(env_filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .try_init()
            .map_err(|e| {
                CliError::Command(format!("failed to initialize JSON tracing subscriber: {e}"))
            }),
        "pretty" => tracing_subscriber::registry()
            .with(env_filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .pretty()
                    .with_writer(std::io::stderr),
            )
            .try_init()
            .map_err(|e| {
                CliError::Command(format!(
                    "failed to initialize pretty tracing subscriber: {e}"
                ))
            }),
        other => Err(CliError::Config(format!(
            "unknown log format '{other}', expected 'json' or 'pretty'"
        ))),
    }
}

fn build_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_format_is_config_error() {
        let config = GeneralConfig {
            log_level: "info".to_owned(),
            log_format: "xml".to_owned(),
        };
        let err = init_tracing(&config).expect_err("xml is not a log format");
        assert!(matches!(err, CliError::Config(_)));
        assert!(err.to_string().contains("xml"));
    }

    #[test]
    fn test_invalid_level_falls_back() {
        // a malformed directive must not panic
        let _filter = build_filter("not a [valid filter");
    }
}
