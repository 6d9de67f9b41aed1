//! Logging setup.

use agent_sandbox_core::config::LoggingConfig;
use agent_sandbox_core::{Error, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Build the filter: `RUST_LOG` wins over the configured directive.
pub fn env_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    let directive = std::env::var("RUST_LOG").unwrap_or_else(|_| config.filter.clone());
    EnvFilter::try_new(&directive)
        .map_err(|e| Error::config(format!("Invalid log filter '{}': {}", directive, e)))
}

/// Install the global subscriber with plain or JSON stdout formatting.
pub fn configure_tracing(config: &LoggingConfig) -> Result<()> {
    let env_filter = env_filter(config)?;
    let registry = tracing_subscriber::registry().with(env_filter);

    let installed = if config.json {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
    } else {
        registry.with(tracing_subscriber::fmt::layer()).try_init()
    };

    installed.map_err(|e| Error::internal(format!("Failed to install tracing subscriber: {}", e)))
}
