//! Incremental reassembly of `<token> <payload>` from socket reads.

use std::mem;
use std::sync::Arc;

use super::{Command, ConnectionError};
use crate::auth::{TOKEN_LEN, Token};
use crate::codec::{EncodingError, Utf8Decoder};

/// Progress of a request through the assembler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssemblyState {
    /// No separator seen yet; input so far is the claimed token.
    AwaitingToken,
    /// The token has been verified; input so far is the payload.
    AwaitingPayload,
}

/// Accumulates decoded text until the client half-closes.
///
/// The token is isolated and checked as soon as the first space arrives, so
/// an unauthenticated client is turned away before its payload is buffered.
#[derive(Debug)]
pub struct RequestAssembler {
    token: Arc<Token>,
    decoder: Utf8Decoder,
    text: String,
    state: AssemblyState,
    limit: usize,
    received: usize,
}

impl RequestAssembler {
    /// Creates an assembler that accepts at most `limit` encoded bytes.
    #[must_use]
    pub fn new(token: Arc<Token>, limit: usize) -> Self {
        Self {
            token,
            decoder: Utf8Decoder::new(),
            text: String::new(),
            state: AssemblyState::AwaitingToken,
            limit,
            received: 0,
        }
    }

    /// Current assembly state.
    #[must_use]
    pub const fn state(&self) -> AssemblyState {
        self.state
    }

    /// Encoded bytes received so far.
    #[must_use]
    pub const fn received(&self) -> usize {
        self.received
    }

    /// Consumes one chunk read from the socket.
    ///
    /// # Errors
    ///
    /// Fails with [`ConnectionError::Auth`] once the claimed token is known to
    /// be wrong, [`ConnectionError::Protocol`] when the request grows past the
    /// size limit and [`ConnectionError::Encoding`] on invalid UTF-8 after the
    /// token was accepted. Invalid UTF-8 before that point is an
    /// authentication failure.
    pub fn push(&mut self, chunk: &[u8]) -> Result<AssemblyState, ConnectionError> {
        self.received = self.received.saturating_add(chunk.len());
        if self.received > self.limit {
            return Err(ConnectionError::protocol(format!(
                "request exceeds {} bytes",
                self.limit
            )));
        }
        let decoded = self.decoder.feed_into(chunk, &mut self.text);
        if self.state == AssemblyState::AwaitingToken {
            self.isolate_token()?;
        }
        self.authenticated(decoded)?;
        Ok(self.state)
    }

    /// Completes the request after the client signalled end of input.
    ///
    /// # Errors
    ///
    /// Fails with [`ConnectionError::Encoding`] when input stopped inside a
    /// character after the token was accepted, [`ConnectionError::Auth`] when
    /// it stopped there before, [`ConnectionError::Protocol`] when the separator is missing
    /// or repeated and [`ConnectionError::Parse`] when the payload is not a
    /// valid request.
    pub fn finish(mut self) -> Result<Command, ConnectionError> {
        let tail = mem::take(&mut self.decoder).finish();
        if let Ok(text) = &tail {
            self.text.push_str(text);
        }
        if self.state == AssemblyState::AwaitingToken {
            self.isolate_token()?;
        }
        self.authenticated(tail)?;
        match self.state {
            AssemblyState::AwaitingToken if self.text.is_empty() => {
                Err(ConnectionError::protocol("empty request"))
            }
            AssemblyState::AwaitingToken => Err(ConnectionError::protocol(
                "missing separator between token and payload",
            )),
            AssemblyState::AwaitingPayload if self.text.starts_with(' ') => Err(
                ConnectionError::protocol("more than one space after the token"),
            ),
            AssemblyState::AwaitingPayload => Command::parse(&self.text),
        }
    }

    /// Surfaces a decoding failure only to a client whose token has already
    /// been accepted; anyone else is turned away as unauthenticated.
    fn authenticated<T>(&self, decoded: Result<T, EncodingError>) -> Result<T, ConnectionError> {
        match decoded {
            Err(_) if self.state == AssemblyState::AwaitingToken => Err(ConnectionError::Auth),
            other => other.map_err(ConnectionError::from),
        }
    }

    fn isolate_token(&mut self) -> Result<(), ConnectionError> {
        let Some((claimed, rest)) = self.text.split_once(' ') else {
            if self.text.len() > TOKEN_LEN {
                return Err(ConnectionError::Auth);
            }
            return Ok(());
        };
        if !self.token.verify(claimed) {
            return Err(ConnectionError::Auth);
        }
        let payload = rest.to_owned();
        self.text = payload;
        self.state = AssemblyState::AwaitingPayload;
        Ok(())
    }
}
