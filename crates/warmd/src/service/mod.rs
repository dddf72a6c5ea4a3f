//! Pluggable transformation services.
//!
//! A service receives a [`ServiceRequest`] together with a [`Completion`] and
//! reports its result through the completion exactly once. Because
//! [`Completion::complete`] consumes the completion, a second report cannot
//! be expressed; dropping the completion without reporting is treated as a
//! failure by the dispatcher.

mod command;
mod identity;

use std::path::PathBuf;
use std::sync::mpsc::SyncSender;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::debug;

use crate::protocol::Request;

pub use self::command::CommandService;
pub use self::identity::{FnService, IdentityService};

const SERVICE_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::service");

/// A request handed to a service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRequest {
    /// Working directory of the calling tool.
    pub cwd: PathBuf,
    /// Arguments forwarded by the client.
    pub args: Vec<String>,
    /// Text to transform.
    pub text: String,
    /// Instant after which nobody is waiting for the result.
    pub deadline: Instant,
}

impl ServiceRequest {
    /// Attaches a deadline to a parsed request.
    #[must_use]
    pub fn new(request: Request, deadline: Instant) -> Self {
        let Request { cwd, args, text } = request;
        Self {
            cwd,
            args,
            text,
            deadline,
        }
    }

    /// Time left before the deadline, saturating at zero.
    #[must_use]
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }
}

/// A failure reported by a service.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ServiceFailure {
    message: String,
}

impl ServiceFailure {
    /// Creates a failure carrying `message` for the client.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Message shown to the client.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Outcome of one invocation.
pub type ServiceResult = Result<String, ServiceFailure>;

/// One-shot channel back to the waiting connection.
#[derive(Debug)]
pub struct Completion {
    sender: SyncSender<ServiceResult>,
}

impl Completion {
    pub(crate) const fn new(sender: SyncSender<ServiceResult>) -> Self {
        Self { sender }
    }

    /// Delivers the result. Results arriving after the connection gave up
    /// are discarded.
    pub fn complete(self, result: ServiceResult) {
        if self.sender.send(result).is_err() {
            debug!(
                target: SERVICE_TARGET,
                "discarding service result; connection is no longer waiting"
            );
        }
    }
}

/// A text transformation the daemon keeps warm between requests.
pub trait TransformService: Send + Sync {
    /// Runs the transformation and reports through `completion`.
    ///
    /// Implementations may complete synchronously or hand the completion to
    /// another thread.
    fn invoke(&self, request: ServiceRequest, completion: Completion);

    /// Whether concurrent invocations are safe. Non-reentrant services are
    /// invoked from a single worker thread, one request at a time.
    fn is_reentrant(&self) -> bool {
        false
    }

    /// Name used in logs.
    fn name(&self) -> &str;
}
