//! Per-connection failures and how each one surfaces to the client.

use std::io;

use thiserror::Error;

use crate::codec::EncodingError;

/// Coarse classification used for logging and client reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Missing or mismatched token.
    Auth,
    /// Framing did not match `<token> <payload>`.
    Protocol,
    /// Payload was not the expected JSON object.
    Parse,
    /// Request bytes were not valid UTF-8.
    Encoding,
    /// The transformation service failed.
    Service,
    /// The connection deadline passed.
    Timeout,
    /// The transport failed.
    Io,
}

/// Errors that end a connection.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// The client did not present the daemon token.
    #[error("authentication failed")]
    Auth,

    /// The request framing was wrong.
    #[error("protocol error: {message}")]
    Protocol {
        /// What was wrong with the framing.
        message: String,
    },

    /// The JSON payload could not be parsed.
    #[error("malformed request payload: {source}")]
    Parse {
        /// Underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// The request was not valid UTF-8.
    #[error("{0}")]
    Encoding(#[from] EncodingError),

    /// The service reported a failure.
    #[error("{message}")]
    Service {
        /// Message reported by the service or the dispatcher.
        message: String,
    },

    /// The connection deadline expired.
    #[error("connection timed out while {stage}")]
    Timeout {
        /// Activity that was interrupted.
        stage: &'static str,
    },

    /// Reading from or writing to the socket failed.
    #[error("transport error: {0}")]
    Io(#[from] io::Error),
}

impl ConnectionError {
    /// Creates a protocol error.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Creates a service error.
    pub fn service(message: impl Into<String>) -> Self {
        Self::Service {
            message: message.into(),
        }
    }

    /// Creates a timeout error for `stage`.
    #[must_use]
    pub const fn timeout(stage: &'static str) -> Self {
        Self::Timeout { stage }
    }

    /// Classifies an IO error raised while `stage` was in progress.
    ///
    /// Socket timeouts surface as `WouldBlock` on Unix and `TimedOut` on
    /// Windows; both mean the deadline expired.
    #[must_use]
    pub fn from_io(error: io::Error, stage: &'static str) -> Self {
        match error.kind() {
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => Self::timeout(stage),
            _ => Self::Io(error),
        }
    }

    /// Returns the coarse classification.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Auth => ErrorKind::Auth,
            Self::Protocol { .. } => ErrorKind::Protocol,
            Self::Parse { .. } => ErrorKind::Parse,
            Self::Encoding(_) => ErrorKind::Encoding,
            Self::Service { .. } => ErrorKind::Service,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Io(_) => ErrorKind::Io,
        }
    }

    /// Exit status reported to the client, or `None` when the connection is
    /// closed without writing anything.
    #[must_use]
    pub const fn exit_status(&self) -> Option<i32> {
        match self.kind() {
            ErrorKind::Service => Some(1),
            ErrorKind::Encoding => Some(2),
            ErrorKind::Auth
            | ErrorKind::Protocol
            | ErrorKind::Parse
            | ErrorKind::Timeout
            | ErrorKind::Io => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(io::ErrorKind::WouldBlock, ErrorKind::Timeout)]
    #[case(io::ErrorKind::TimedOut, ErrorKind::Timeout)]
    #[case(io::ErrorKind::ConnectionReset, ErrorKind::Io)]
    fn classifies_io_errors(#[case] kind: io::ErrorKind, #[case] expected: ErrorKind) {
        let error = ConnectionError::from_io(io::Error::from(kind), "reading");
        assert_eq!(error.kind(), expected);
    }

    #[test]
    fn only_service_and_encoding_failures_are_reported() {
        assert_eq!(ConnectionError::service("boom").exit_status(), Some(1));
        let encoding = ConnectionError::from(EncodingError::Truncated {
            offset: 3,
            pending: 1,
        });
        assert_eq!(encoding.exit_status(), Some(2));
        assert_eq!(ConnectionError::Auth.exit_status(), None);
        assert_eq!(ConnectionError::protocol("x").exit_status(), None);
        assert_eq!(ConnectionError::timeout("reading").exit_status(), None);
    }

    #[test]
    fn auth_message_does_not_echo_input() {
        assert_eq!(ConnectionError::Auth.to_string(), "authentication failed");
    }
}
