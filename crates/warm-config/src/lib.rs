//! Shared configuration for the warm daemon and its clients.
//!
//! Configuration is layered by [`ortho_config`]: built-in defaults are
//! overridden by a configuration file, then by `WARM_*` environment variables,
//! then by command-line flags. The daemon and client tools also share the
//! [`portfile`] module so both sides agree on how the listening port and the
//! session token are published.

mod defaults;
mod logging;
pub mod portfile;

use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};

pub use defaults::{
    DEFAULT_CONNECTION_TIMEOUT_MS, DEFAULT_LISTEN_HOST, DEFAULT_LISTEN_PORT, DEFAULT_LOG_FILTER,
    DEFAULT_MAX_REQUEST_BYTES, PORTFILE_NAME, default_connection_timeout_ms, default_listen_host,
    default_listen_port, default_log_filter, default_log_filter_string, default_log_format,
    default_max_request_bytes, default_portfile_path,
};
pub use logging::{LogFormat, LogFormatParseError};
pub use portfile::{Discovery, PortFile, PortFileError, PortPublisher};

/// Resolved configuration for the daemon.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq, OrthoConfig)]
#[ortho_config(prefix = "WARM")]
pub struct Config {
    /// Interface the listener binds. Only loopback addresses make sense for a
    /// co-resident daemon.
    #[serde(default = "default_listen_host")]
    pub listen_host: String,
    /// Port to bind; `0` requests an ephemeral port.
    #[serde(default = "default_listen_port")]
    pub listen_port: u16,
    /// Location of the port discovery file.
    #[serde(default)]
    pub portfile: Option<Utf8PathBuf>,
    /// Per-connection deadline in milliseconds, measured from acceptance.
    #[serde(default = "default_connection_timeout_ms")]
    pub connection_timeout_ms: u64,
    /// Maximum encoded request size in bytes.
    #[serde(default = "default_max_request_bytes")]
    pub max_request_bytes: usize,
    /// External program used as the transformation service. The identity
    /// service is used when unset.
    #[serde(default)]
    pub service_program: Option<Utf8PathBuf>,
    /// Tracing filter expression.
    #[serde(default = "default_log_filter_string")]
    pub log_filter: String,
    /// Log output format.
    #[serde(default = "default_log_format")]
    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_host: default_listen_host(),
            listen_port: default_listen_port(),
            portfile: None,
            connection_timeout_ms: default_connection_timeout_ms(),
            max_request_bytes: default_max_request_bytes(),
            service_program: None,
            log_filter: default_log_filter_string(),
            log_format: default_log_format(),
        }
    }
}

impl Config {
    /// Host the listener binds.
    #[must_use]
    pub fn listen_host(&self) -> &str {
        &self.listen_host
    }

    /// Port the listener binds.
    #[must_use]
    pub const fn listen_port(&self) -> u16 {
        self.listen_port
    }

    /// Port discovery file, falling back to the default location.
    #[must_use]
    pub fn portfile_path(&self) -> Utf8PathBuf {
        self.portfile.clone().unwrap_or_else(default_portfile_path)
    }

    /// Connection deadline as a [`Duration`].
    #[must_use]
    pub const fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }

    /// Maximum encoded request size in bytes.
    #[must_use]
    pub const fn max_request_bytes(&self) -> usize {
        self.max_request_bytes
    }

    /// External service program, when one is configured.
    #[must_use]
    pub fn service_program(&self) -> Option<&Utf8Path> {
        self.service_program.as_deref()
    }

    /// Tracing filter expression.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        &self.log_filter
    }

    /// Log output format.
    #[must_use]
    pub const fn log_format(&self) -> LogFormat {
        self.log_format
    }
}
