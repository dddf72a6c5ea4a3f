//! Parsed request bodies.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::ConnectionError;

/// Body that asks the daemon to shut down instead of transforming text.
pub const STOP_COMMAND: &str = "stop";

/// A transformation request, built once per connection after the token has
/// been verified.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Request {
    /// Working directory of the calling tool.
    pub cwd: PathBuf,
    /// Arguments forwarded to the service.
    pub args: Vec<String>,
    /// Text to transform. May be empty.
    pub text: String,
}

impl Request {
    /// Builds a request.
    #[must_use]
    pub fn new(cwd: impl Into<PathBuf>, args: Vec<String>, text: impl Into<String>) -> Self {
        Self {
            cwd: cwd.into(),
            args,
            text: text.into(),
        }
    }
}

/// What an authenticated connection asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Run the transformation service.
    Transform(Request),
    /// Stop the daemon.
    Stop,
}

impl Command {
    /// Parses the body that followed the token separator.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::Parse`] when the body is neither the stop
    /// command nor a JSON object with `cwd`, `args` and `text`.
    pub fn parse(body: &str) -> Result<Self, ConnectionError> {
        if body.trim_end() == STOP_COMMAND {
            return Ok(Self::Stop);
        }
        serde_json::from_str(body)
            .map(Self::Transform)
            .map_err(|source| ConnectionError::Parse { source })
    }
}
