//! Logging setup for applications embedding the SDK
//!
//! Every crate in the workspace logs through `tracing`. Nothing is printed
//! until an application installs a subscriber, which this module does for
//! the common cases.

use tracing_subscriber::{fmt, EnvFilter, Registry};

/// Logging mode for different use cases
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoggingMode {
    /// No subscriber installed; all output is dropped
    Silent,
    /// Compact stderr output, `info` by default
    Development,
    /// Verbose output with thread ids and source locations, `debug` by default
    Debug,
}

/// Logging configuration error
#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("Failed to initialize tracing subscriber: {0}")]
    TracingInit(String),

    #[error("Invalid environment variable: {0}")]
    InvalidEnv(String),
}

/// Initialize logging with the specified mode
///
/// Call this before creating an [`UpnpSdk`](crate::UpnpSdk) so the SSDP
/// sockets, callback server and timers log from the start.
///
/// ```rust,no_run
/// use upnp_sdk::logging::{init_logging, LoggingMode};
///
/// init_logging(LoggingMode::Development).expect("logging");
/// ```
///
/// # Environment Variables
///
/// - `UPNP_LOG_LEVEL`: filter directive overriding the mode default
///   (e.g. `debug`, `upnp_discovery=trace`)
/// - `RUST_LOG`: used when `UPNP_LOG_LEVEL` is unset
pub fn init_logging(mode: LoggingMode) -> Result<(), LoggingError> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    match mode {
        LoggingMode::Silent => Ok(()),
        LoggingMode::Development => {
            let filter = create_env_filter("info")?;

            let subscriber = Registry::default()
                .with(
                    fmt::layer()
                        .with_writer(std::io::stderr)
                        .with_target(true)
                        .with_thread_ids(false)
                        .with_file(false)
                        .with_line_number(false)
                        .compact(),
                )
                .with(filter);

            subscriber
                .try_init()
                .map_err(|e| LoggingError::TracingInit(e.to_string()))
        }
        LoggingMode::Debug => {
            let filter = create_env_filter("debug")?;

            let subscriber = Registry::default()
                .with(
                    fmt::layer()
                        .with_writer(std::io::stderr)
                        .pretty()
                        .with_thread_ids(true)
                        .with_file(true)
                        .with_line_number(true),
                )
                .with(filter);

            subscriber
                .try_init()
                .map_err(|e| LoggingError::TracingInit(e.to_string()))
        }
    }
}

/// Parse a mode name as accepted by `UPNP_LOG_MODE`.
pub fn parse_mode(value: &str) -> Option<LoggingMode> {
    match value.trim().to_ascii_lowercase().as_str() {
        "silent" => Some(LoggingMode::Silent),
        "development" | "dev" => Some(LoggingMode::Development),
        "debug" => Some(LoggingMode::Debug),
        _ => None,
    }
}

/// Initialize logging from `UPNP_LOG_MODE` (`silent`, `development`, `debug`).
///
/// Defaults to silent when unset; an unknown value is an error.
pub fn init_logging_from_env() -> Result<(), LoggingError> {
    let mode = match std::env::var("UPNP_LOG_MODE") {
        Ok(value) => parse_mode(&value)
            .ok_or_else(|| LoggingError::InvalidEnv(format!("UPNP_LOG_MODE={}", value)))?,
        Err(_) => LoggingMode::Silent,
    };

    init_logging(mode)
}

fn create_env_filter(default_level: &str) -> Result<EnvFilter, LoggingError> {
    if let Ok(level) = std::env::var("UPNP_LOG_LEVEL") {
        return EnvFilter::try_new(&level)
            .map_err(|e| LoggingError::InvalidEnv(format!("UPNP_LOG_LEVEL={}: {}", level, e)));
    }
    if let Ok(rust_log) = std::env::var("RUST_LOG") {
        return EnvFilter::try_new(&rust_log)
            .map_err(|e| LoggingError::InvalidEnv(format!("RUST_LOG={}: {}", rust_log, e)));
    }
    Ok(EnvFilter::new(default_level))
}

/// Check if a global subscriber has been installed
pub fn is_initialized() -> bool {
    tracing::dispatcher::has_been_set()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_silent_mode() {
        assert!(init_logging(LoggingMode::Silent).is_ok());
    }

    #[rstest]
    #[case("silent", Some(LoggingMode::Silent))]
    #[case("Development", Some(LoggingMode::Development))]
    #[case("dev", Some(LoggingMode::Development))]
    #[case(" debug ", Some(LoggingMode::Debug))]
    #[case("verbose", None)]
    fn test_parse_mode(#[case] value: &str, #[case] expected: Option<LoggingMode>) {
        assert_eq!(parse_mode(value), expected);
    }
}
