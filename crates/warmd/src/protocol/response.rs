//! Writing responses, and reading them back on the client side.

use std::io::{self, Write};

use crate::codec::Utf8Encoder;

/// Marker that introduces the exit status of a failed request.
pub const EXIT_TRAILER: &str = "# exit ";

/// Writes exactly one response to a connection.
#[derive(Debug)]
pub struct ResponseStreamer<W> {
    encoder: Utf8Encoder<W>,
}

impl<W: Write> ResponseStreamer<W> {
    /// Wraps the outbound half of a connection.
    pub const fn new(writer: W) -> Self {
        Self {
            encoder: Utf8Encoder::new(writer),
        }
    }

    /// Writes the transformed text verbatim and flushes.
    ///
    /// # Errors
    ///
    /// Propagates transport write failures.
    pub fn send_success(mut self, text: &str) -> io::Result<W> {
        self.encoder.write_str(text)?;
        self.encoder.finish()
    }

    /// Writes `message` followed by the exit status trailer and flushes.
    ///
    /// # Errors
    ///
    /// Propagates transport write failures.
    pub fn send_failure(mut self, message: &str, status: i32) -> io::Result<W> {
        self.encoder.write_str(message)?;
        self.encoder.write_str("\n")?;
        self.encoder.write_str(EXIT_TRAILER)?;
        self.encoder.write_str(&status.to_string())?;
        self.encoder.finish()
    }
}

/// A response as seen by a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// The transformed text.
    Success(String),
    /// The daemon reported a failure.
    Failure {
        /// Message written by the daemon.
        message: String,
        /// Reported exit status.
        status: i32,
    },
}

impl Reply {
    /// Interprets a complete response body.
    ///
    /// A body whose last line is `# exit <n>` is a failure. The daemon adds
    /// nothing to successful output, so a transformed text that itself ends
    /// in such a line is indistinguishable from a failure and parses as one.
    #[must_use]
    pub fn parse(body: String) -> Self {
        let failure = body
            .rsplit_once('\n')
            .and_then(|(message, last)| {
                let status = last.strip_prefix(EXIT_TRAILER)?.parse::<i32>().ok()?;
                Some((message.to_owned(), status))
            });
        match failure {
            Some((message, status)) => Self::Failure { message, status },
            None => Self::Success(body),
        }
    }
}
