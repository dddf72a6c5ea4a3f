//! Daemon process lifecycle: launch, port publication and shutdown.

mod errors;
mod guard;
pub(crate) mod launch;
pub(crate) mod shutdown;

pub use errors::LaunchError;
pub use launch::run_daemon;
pub use shutdown::{
    ShutdownError, ShutdownReason, ShutdownSignal, ShutdownTrigger, SystemShutdownSignal,
    TriggerOnlyShutdown,
};

pub(crate) const PROCESS_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::process");
