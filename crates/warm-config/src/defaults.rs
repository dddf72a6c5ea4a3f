use camino::Utf8PathBuf;
use std::env;

use dirs::home_dir;

/// Loopback interface the daemon binds when no host is configured.
pub const DEFAULT_LISTEN_HOST: &str = "127.0.0.1";

/// Port zero asks the operating system for an ephemeral port.
pub const DEFAULT_LISTEN_PORT: u16 = 0;

/// Budget for a whole connection, measured from acceptance.
pub const DEFAULT_CONNECTION_TIMEOUT_MS: u64 = 30_000;

/// Upper bound on the encoded size of a single request.
pub const DEFAULT_MAX_REQUEST_BYTES: usize = 64 * 1024 * 1024;

/// File name of the port discovery file.
pub const PORTFILE_NAME: &str = ".warmd";

/// Default log filter expression used by the binaries.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Default listen host as an owned value for serde.
pub fn default_listen_host() -> String {
    DEFAULT_LISTEN_HOST.to_owned()
}

/// Default listen port.
pub const fn default_listen_port() -> u16 {
    DEFAULT_LISTEN_PORT
}

/// Default connection timeout in milliseconds.
pub const fn default_connection_timeout_ms() -> u64 {
    DEFAULT_CONNECTION_TIMEOUT_MS
}

/// Default request size limit in bytes.
pub const fn default_max_request_bytes() -> usize {
    DEFAULT_MAX_REQUEST_BYTES
}

/// Default log filter expression used by the binaries.
pub fn default_log_filter() -> &'static str {
    DEFAULT_LOG_FILTER
}

/// Owned log filter value used where allocation is required (e.g. serde).
pub fn default_log_filter_string() -> String {
    DEFAULT_LOG_FILTER.to_owned()
}

/// Default logging format for the binaries.
pub fn default_log_format() -> crate::logging::LogFormat {
    crate::logging::LogFormat::Json
}

/// Computes the default location of the port discovery file.
///
/// Clients look for `~/.warmd`; when no home directory is known the file
/// lives in the system temporary directory instead.
pub fn default_portfile_path() -> Utf8PathBuf {
    let base = home_dir()
        .and_then(|path| Utf8PathBuf::from_path_buf(path).ok())
        .unwrap_or_else(fallback_base_directory);
    base.join(PORTFILE_NAME)
}

fn fallback_base_directory() -> Utf8PathBuf {
    let candidate = env::temp_dir();
    Utf8PathBuf::from_path_buf(candidate).unwrap_or_else(|_| Utf8PathBuf::from("/tmp"))
}
