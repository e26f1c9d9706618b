//! Log subscriber setup.
//!
//! `RUST_LOG` takes precedence over the configured level. Thread names are
//! always printed since every pipeline worker runs on its own named thread.

use tracing::info;
use tracing_subscriber::{filter::EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt, Registry};

use crate::config::LoggingConfig;
use crate::error::{ErrorContext, ProcessorError, Result};

/// Install the global subscriber.
///
/// Fails if a global subscriber is already set or the level directive does
/// not parse.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.level).map_err(|e| {
            ProcessorError::Configuration(format!("invalid log level '{}': {}", config.level, e))
        })?,
    };

    let subscriber = Registry::default().with(env_filter);

    let result = if config.json {
        subscriber
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(false)
                    .with_thread_ids(true)
                    .with_thread_names(true),
            )
            .try_init()
    } else {
        subscriber
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_thread_names(true)
                    .compact(),
            )
            .try_init()
    };
    result.with_static_context("failed to install log subscriber")?;

    info!("Logging initialized (level: {}, json: {})", config.level, config.json);
    Ok(())
}
