//! Tracing subscriber set-up for the daemon.
//!
//! The listener, every connection and the serial service worker run on named
//! threads (`warmd-listener`, `warmd-connection`, `warmd-service`), so each
//! record carries its thread name next to the module target. Records go to
//! stderr; clients only ever see the port file and the socket.

use std::io::{self, IsTerminal};

use once_cell::sync::OnceCell;
use thiserror::Error;
use tracing::Subscriber;
use tracing::subscriber::SetGlobalDefaultError;
use tracing_subscriber::filter::{EnvFilter, ParseError};
use tracing_subscriber::fmt::{self, time::UtcTime};

use warm_config::{Config, LogFormat};

static INSTALLED: OnceCell<()> = OnceCell::new();

type DaemonSubscriber = Box<dyn Subscriber + Send + Sync>;

/// Proof that the global subscriber is in place.
#[derive(Debug, Default, Clone, Copy)]
pub struct TelemetryHandle;

/// Errors encountered while configuring telemetry.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// The configured `log_filter` is not a valid filter expression.
    #[error("invalid log filter '{filter}': {source}")]
    Filter {
        /// Expression taken from configuration.
        filter: String,
        /// Parser error.
        #[source]
        source: ParseError,
    },
    /// Another global subscriber was installed first.
    #[error("failed to install telemetry subscriber: {source}")]
    Subscriber {
        /// Error from `tracing`.
        #[source]
        source: SetGlobalDefaultError,
    },
}

/// Installs the daemon's subscriber once per process. Later calls succeed
/// without touching the global state.
///
/// # Errors
///
/// Returns [`TelemetryError::Filter`] for an unparsable `log_filter` and
/// [`TelemetryError::Subscriber`] when something else already owns the
/// global default.
pub fn initialise(config: &Config) -> Result<TelemetryHandle, TelemetryError> {
    INSTALLED
        .get_or_try_init(|| {
            let subscriber = daemon_subscriber(config)?;
            tracing::subscriber::set_global_default(subscriber)
                .map_err(|source| TelemetryError::Subscriber { source })
        })
        .map(|()| TelemetryHandle)
}

fn daemon_subscriber(config: &Config) -> Result<DaemonSubscriber, TelemetryError> {
    let filter =
        EnvFilter::try_new(config.log_filter()).map_err(|source| TelemetryError::Filter {
            filter: config.log_filter().to_owned(),
            source,
        })?;
    // JSON output is for collectors, never for a terminal.
    let ansi = config.log_format() == LogFormat::Compact && io::stderr().is_terminal();
    let builder = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_timer(UtcTime::rfc_3339())
        .with_target(true)
        .with_thread_names(true)
        .with_ansi(ansi);

    let subscriber: DaemonSubscriber = match config.log_format() {
        LogFormat::Json => Box::new(builder.json().flatten_event(true).finish()),
        LogFormat::Compact => Box::new(builder.compact().finish()),
    };
    Ok(subscriber)
}
