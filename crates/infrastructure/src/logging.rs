use tracing::Subscriber;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{ConfigError, LogFormat, LogLevel};

/// Boxed subscriber, so both output formats share one type.
pub type BoxedSubscriber = Box<dyn Subscriber + Send + Sync + 'static>;

/// Filter for the classifier's logs.
///
/// A valid `directives` string (normally `RUST_LOG`) wins; a missing or
/// malformed one falls back to `level`.
pub fn env_filter(level: LogLevel, directives: Option<&str>) -> EnvFilter {
    directives
        .and_then(|d| EnvFilter::try_new(d).ok())
        .unwrap_or_else(|| EnvFilter::new(level.as_str()))
}

/// Build the stdout subscriber without installing it.
///
/// - `LogFormat::Json`: flattened JSON, one event per line.
/// - `LogFormat::Text`: human-readable colored output.
pub fn build_subscriber(format: LogFormat, filter: EnvFilter) -> BoxedSubscriber {
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => Box::new(
            registry.with(
                fmt::layer()
                    .json()
                    .flatten_event(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_ansi(false),
            ),
        ),
        LogFormat::Text => {
            Box::new(registry.with(fmt::layer().pretty().with_target(true).with_ansi(true)))
        }
    }
}

/// Install the global subscriber.
///
/// Uses `RUST_LOG` if set and valid, otherwise `level`.
/// Fails if a global subscriber is already installed.
pub fn init_logging(level: LogLevel, format: LogFormat) -> Result<(), ConfigError> {
    let directives = std::env::var("RUST_LOG").ok();
    let filter = env_filter(level, directives.as_deref());
    build_subscriber(format, filter)
        .try_init()
        .map_err(|e| ConfigError::Validation {
            field: "agent.log_format".to_string(),
            message: format!("logging already initialized: {e}"),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing::level_filters::LevelFilter;
    use tracing_subscriber::{Layer, Registry};

    fn hint(filter: &EnvFilter) -> Option<LevelFilter> {
        <EnvFilter as Layer<Registry>>::max_level_hint(filter)
    }

    #[test]
    fn log_level_as_str_is_valid_env_filter() {
        for level in [
            LogLevel::Error,
            LogLevel::Warn,
            LogLevel::Info,
            LogLevel::Debug,
            LogLevel::Trace,
        ] {
            assert!(
                EnvFilter::try_new(level.as_str()).is_ok(),
                "{} should be a valid filter",
                level.as_str()
            );
        }
    }

    #[test]
    fn configured_level_applies_without_directives() {
        let filter = env_filter(LogLevel::Warn, None);
        assert_eq!(hint(&filter), Some(LevelFilter::WARN));
    }

    #[test]
    fn directives_override_configured_level() {
        let filter = env_filter(LogLevel::Error, Some("trace"));
        assert_eq!(hint(&filter), Some(LevelFilter::TRACE));
    }

    #[test]
    fn malformed_directives_fall_back_to_level() {
        let filter = env_filter(LogLevel::Debug, Some("dscp=loud"));
        assert_eq!(hint(&filter), Some(LevelFilter::DEBUG));
    }

    #[test]
    fn both_formats_build_a_usable_subscriber() {
        for format in [LogFormat::Json, LogFormat::Text] {
            let sub = build_subscriber(format, env_filter(LogLevel::Info, None));
            // Scoped to this thread; the global default stays untouched.
            tracing::subscriber::with_default(sub, || {
                tracing::info!(format = format.as_str(), "subscriber built");
                assert!(tracing::enabled!(tracing::Level::INFO));
                assert!(!tracing::enabled!(tracing::Level::DEBUG));
            });
        }
    }
}
