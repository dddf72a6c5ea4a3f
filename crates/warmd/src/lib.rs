//! A warm daemon that keeps a text transformation resident between calls.
//!
//! Client tools (editor plugins, command-line wrappers) find the daemon via
//! the port file published by [`warm_config::PortFile`], present the
//! per-process [`Token`], and send one request per TCP connection:
//! `<token> <json>` followed by a half-close. The daemon hands the request to
//! a [`TransformService`], writes the transformed text back and closes.
//!
//! Bytes are decoded incrementally by [`codec::Utf8Decoder`], so multi-byte
//! characters split across TCP segments arrive intact and invalid input is
//! reported instead of being replaced.
//!
//! The runtime is small: one accept thread, one thread per
//! connection, and a single worker thread for services that are not
//! reentrant. Every connection has a deadline measured from acceptance.

pub mod auth;
mod bootstrap;
mod client;
pub mod codec;
mod connection;
mod dispatch;
mod health;
mod process;
pub mod protocol;
pub mod service;
mod telemetry;
mod transport;

pub use auth::{Token, TokenError};
pub use bootstrap::{
    BootstrapError, ConfigLoader, Daemon, StaticConfigLoader, SystemConfigLoader, bootstrap_with,
};
pub use client::{Client, ClientError};
pub use connection::{ConnectionLimits, ConnectionState, ConnectionSupervisor};
pub use dispatch::{DispatchError, ServiceDispatcher};
pub use health::{HealthReporter, StructuredHealthReporter};
pub use process::{
    LaunchError, ShutdownError, ShutdownReason, ShutdownSignal, ShutdownTrigger,
    SystemShutdownSignal, TriggerOnlyShutdown, run_daemon,
};
pub use service::{
    CommandService, Completion, FnService, IdentityService, ServiceFailure, ServiceRequest,
    ServiceResult, TransformService,
};
pub use telemetry::{TelemetryError, TelemetryHandle};
pub use transport::ListenerError;

#[cfg(test)]
mod tests;
