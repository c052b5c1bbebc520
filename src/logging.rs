//! Tracing initialisation.
//!
//! `RUST_LOG` wins when set; otherwise the configured `application.log_level`
//! applies to every target.

use tracing_subscriber::EnvFilter;

use crate::config::ApplicationConfig;
use crate::error::{ScanError, ScanResult};

/// Filter from `RUST_LOG`, falling back to the configured level.
pub fn env_filter(app: &ApplicationConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&app.log_level))
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init(app: &ApplicationConfig) -> ScanResult<()> {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter(app))
        .with_target(false);

    let result = match app.log_format.as_str() {
        "json" => builder.json().try_init(),
        _ => builder.try_init(),
    };

    result.map_err(|err| ScanError::Configuration(format!("failed to initialise logging: {}", err)))
}
