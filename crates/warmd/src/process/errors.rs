//! Defines the unified error surface for daemon launch and supervision.

use thiserror::Error;

use warm_config::PortFileError;

use crate::bootstrap::BootstrapError;
use crate::dispatch::DispatchError;
use crate::transport::ListenerError;

use super::shutdown::ShutdownError;

/// Errors surfaced while launching or supervising the daemon process.
#[derive(Debug, Error)]
pub enum LaunchError {
    /// A daemon recorded in the port file still accepts connections.
    #[error("daemon already running on port {port}")]
    AlreadyRunning {
        /// Port recorded in the existing port file.
        port: u16,
    },
    /// Publishing or withdrawing the discovery record failed.
    #[error("port file error: {source}")]
    PortFile {
        /// Underlying port file error.
        #[source]
        source: PortFileError,
    },
    /// Waiting for shutdown failed.
    #[error("failed to await shutdown signal: {source}")]
    Shutdown {
        /// Underlying shutdown error.
        #[source]
        source: ShutdownError,
    },
    /// Bootstrapping the daemon failed.
    #[error("daemon bootstrap failed: {source}")]
    Bootstrap {
        /// Underlying bootstrap error.
        #[source]
        source: BootstrapError,
    },
    /// The service dispatcher could not start.
    #[error("service dispatcher failed: {source}")]
    Dispatch {
        /// Underlying dispatcher error.
        #[source]
        source: DispatchError,
    },
    /// Socket listener startup failed.
    #[error("daemon socket listener failed: {source}")]
    Listener {
        /// Underlying listener error.
        #[source]
        source: ListenerError,
    },
}

impl From<PortFileError> for LaunchError {
    fn from(source: PortFileError) -> Self {
        Self::PortFile { source }
    }
}

impl From<ShutdownError> for LaunchError {
    fn from(source: ShutdownError) -> Self {
        Self::Shutdown { source }
    }
}

impl From<BootstrapError> for LaunchError {
    fn from(source: BootstrapError) -> Self {
        Self::Bootstrap { source }
    }
}

impl From<DispatchError> for LaunchError {
    fn from(source: DispatchError) -> Self {
        Self::Dispatch { source }
    }
}

impl From<ListenerError> for LaunchError {
    fn from(source: ListenerError) -> Self {
        Self::Listener { source }
    }
}
