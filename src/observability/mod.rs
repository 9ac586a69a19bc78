//! Observability: structured logging and operation metrics.
//!
//! The library only emits `tracing` events and `metrics` samples. Hosts that
//! want output either install their own subscriber/recorder or call
//! [`init_logging`] once at startup.

mod logging;
mod metrics;

pub use logging::{LogFormat, LoggingConfig};
pub use metrics::{record_operation_metrics, status_label};

use crate::{Error, Result};
use std::sync::OnceLock;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Environment variable holding an `EnvFilter` directive.
pub const LOG_ENV_VAR: &str = "MIRAGE_LOG";

static LOGGING_INIT: OnceLock<()> = OnceLock::new();

/// Installs a global `tracing` subscriber for the process.
///
/// The filter comes from `MIRAGE_LOG` when set, otherwise from
/// [`LoggingConfig::filter`].
///
/// # Errors
///
/// Returns [`Error::OperationFailed`] if logging was already initialized, the
/// filter directive is invalid, or another global subscriber is installed.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    if LOGGING_INIT.get().is_some() {
        return Err(Error::OperationFailed {
            operation: "logging_init".to_string(),
            cause: "logging already initialized".to_string(),
        });
    }

    let filter = build_filter(config)?;

    match config.format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_target(true),
            )
            .with(filter)
            .try_init()
            .map_err(init_error)?,
        LogFormat::Compact => tracing_subscriber::registry()
            .with(tracing_subscriber::fmt::layer().compact().with_target(true))
            .with(filter)
            .try_init()
            .map_err(init_error)?,
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(tracing_subscriber::fmt::layer().pretty().with_target(true))
            .with(filter)
            .try_init()
            .map_err(init_error)?,
    }

    LOGGING_INIT.set(()).map_err(|()| Error::OperationFailed {
        operation: "logging_init".to_string(),
        cause: "failed to mark logging initialized".to_string(),
    })
}

/// Builds the subscriber filter, preferring `MIRAGE_LOG`.
fn build_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_env(LOG_ENV_VAR) {
        return Ok(filter);
    }
    EnvFilter::try_new(&config.filter).map_err(|e| Error::OperationFailed {
        operation: "logging_filter".to_string(),
        cause: format!("{}: {e}", config.filter),
    })
}

fn init_error(err: impl std::fmt::Display) -> Error {
    Error::OperationFailed {
        operation: "logging_init".to_string(),
        cause: err.to_string(),
    }
}
