//! Logging setup
//!
//! Installs the `tracing-subscriber` registry used by the `cove` binary.
//! The level comes from `RUST_LOG`, the `--log` flag or `core.log_level`,
//! and the format is pretty in debug builds and JSON in release builds.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize the tracing subscriber with the given log level from config.
///
/// Priority: `RUST_LOG` env var > `log_level` parameter > default "info"
///
/// In debug builds: pretty-printed terminal output.
/// In release builds: JSON structured output with spans.
pub fn init_telemetry_with_level(log_level: &str) {
    let default_filter = default_filter(log_level);

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&default_filter));

    #[cfg(debug_assertions)]
    {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().pretty().with_target(false))
            .try_init()
            .ok();
    }

    #[cfg(not(debug_assertions))]
    {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json().with_current_span(true))
            .try_init()
            .ok();
    }
}

/// Filter used when `RUST_LOG` is unset. The engine, the HTTP server and its
/// request traces all follow the chosen level.
pub fn default_filter(log_level: &str) -> String {
    format!(
        "{lvl},cove_engine={lvl},api_server={lvl},tower_http={lvl},sqlx=warn",
        lvl = log_level
    )
}

/// Initialize the tracing subscriber with default settings.
///
/// Falls back to "info" level if no `RUST_LOG` env var is set.
/// Use `init_telemetry_with_level` when config is available.
pub fn init_telemetry() {
    init_telemetry_with_level("info");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter_parses() {
        for level in ["error", "warn", "info", "debug", "trace"] {
            let filter = default_filter(level);
            assert!(filter.starts_with(level));
            assert!(filter.contains(&format!("cove_engine={}", level)));
            assert!(EnvFilter::try_new(&filter).is_ok());
        }
    }
}
