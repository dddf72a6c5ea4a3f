//! Per-connection supervision.
//!
//! Every accepted socket runs through one state machine:
//!
//! ```text
//! AwaitingToken -> AwaitingPayload -> Dispatching -> Responding -> Closed
//!        \________________\_______________\
//!                                          -> Errored
//! ```
//!
//! The deadline is fixed at acceptance. Socket reads and writes are bounded
//! by whatever time is left, and so is the wait for the service, so a client
//! that never half-closes cannot hold a thread past its deadline.

use std::io::{self, Read};
use std::net::Shutdown;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use warm_config::Config;

use crate::auth::Token;
use crate::dispatch::ServiceDispatcher;
use crate::process::{ShutdownReason, ShutdownTrigger};
use crate::protocol::{
    AssemblyState, Command, ConnectionError, ErrorKind, RequestAssembler, ResponseStreamer,
};
use crate::transport::{ConnectionHandler, ConnectionStream};

const CONNECTION_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::connection");
const READ_CHUNK_BYTES: usize = 8 * 1024;

/// Where a connection is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Reading the claimed token.
    AwaitingToken,
    /// Token accepted; reading the payload until the client half-closes.
    AwaitingPayload,
    /// Waiting for the transformation service.
    Dispatching,
    /// Writing the response.
    Responding,
    /// Response delivered and connection closed.
    Closed,
    /// The connection ended with an error.
    Errored,
}

impl ConnectionState {
    /// Whether the connection has finished.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Errored)
    }
}

impl From<AssemblyState> for ConnectionState {
    fn from(state: AssemblyState) -> Self {
        match state {
            AssemblyState::AwaitingToken => Self::AwaitingToken,
            AssemblyState::AwaitingPayload => Self::AwaitingPayload,
        }
    }
}

/// Bounds applied to every connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionLimits {
    /// Time from acceptance to close.
    pub timeout: Duration,
    /// Largest accepted request, in encoded bytes.
    pub max_request_bytes: usize,
}

impl ConnectionLimits {
    /// Reads the limits from configuration.
    #[must_use]
    pub const fn from_config(config: &Config) -> Self {
        Self {
            timeout: config.connection_timeout(),
            max_request_bytes: config.max_request_bytes(),
        }
    }
}

/// State owned by one connection for its whole life.
struct PendingConnection {
    id: u64,
    stream: ConnectionStream,
    deadline: Instant,
    state: ConnectionState,
}

impl PendingConnection {
    fn transition(&mut self, next: ConnectionState) {
        if self.state == next {
            return;
        }
        debug!(
            target: CONNECTION_TARGET,
            connection = self.id,
            from = ?self.state,
            to = ?next,
            "connection state changed"
        );
        self.state = next;
    }

    fn remaining(&self, stage: &'static str) -> Result<Duration, ConnectionError> {
        let remaining = self.deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            Err(ConnectionError::timeout(stage))
        } else {
            Ok(remaining)
        }
    }

    fn read_chunk(&mut self, buffer: &mut [u8]) -> Result<usize, ConnectionError> {
        const STAGE: &str = "reading the request";
        loop {
            let remaining = self.remaining(STAGE)?;
            self.stream.set_read_timeout(Some(remaining))?;
            match self.stream.read(buffer) {
                Ok(read) => return Ok(read),
                Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
                Err(error) => return Err(ConnectionError::from_io(error, STAGE)),
            }
        }
    }

    fn write_success(&mut self, text: &str) -> Result<(), ConnectionError> {
        const STAGE: &str = "writing the response";
        let remaining = self.remaining(STAGE)?;
        self.stream.set_write_timeout(Some(remaining))?;
        ResponseStreamer::new(&mut self.stream)
            .send_success(text)
            .map_err(|error| ConnectionError::from_io(error, STAGE))?;
        self.stream.shutdown(Shutdown::Write)?;
        Ok(())
    }

    fn write_failure(&mut self, message: &str, status: i32) -> Result<(), ConnectionError> {
        const STAGE: &str = "writing the error report";
        let remaining = self.remaining(STAGE)?;
        self.stream.set_write_timeout(Some(remaining))?;
        ResponseStreamer::new(&mut self.stream)
            .send_failure(message, status)
            .map_err(|error| ConnectionError::from_io(error, STAGE))?;
        self.stream.shutdown(Shutdown::Write)?;
        self.drain();
        Ok(())
    }

    /// Discards unread input so closing does not reset the connection
    /// before the client has read the error report.
    fn drain(&mut self) {
        let mut sink = [0_u8; 1024];
        while let Ok(remaining) = self.remaining("draining the request") {
            if self.stream.set_read_timeout(Some(remaining)).is_err() {
                return;
            }
            match self.stream.read(&mut sink) {
                Ok(0) | Err(_) => return,
                Ok(_) => {}
            }
        }
    }
}

/// Successful outcome of one connection.
struct Served {
    text: String,
    stop: bool,
}

/// Drives each accepted connection through authentication, assembly,
/// dispatch and response.
#[derive(Debug)]
pub struct ConnectionSupervisor {
    token: Arc<Token>,
    dispatcher: Arc<ServiceDispatcher>,
    limits: ConnectionLimits,
    shutdown: ShutdownTrigger,
    next_id: AtomicU64,
}

impl ConnectionSupervisor {
    /// Builds a supervisor sharing `token` and `dispatcher` across
    /// connections. A stop request fires `shutdown`.
    #[must_use]
    pub const fn new(
        token: Arc<Token>,
        dispatcher: Arc<ServiceDispatcher>,
        limits: ConnectionLimits,
        shutdown: ShutdownTrigger,
    ) -> Self {
        Self {
            token,
            dispatcher,
            limits,
            shutdown,
            next_id: AtomicU64::new(1),
        }
    }

    fn serve(&self, connection: &mut PendingConnection) -> Result<Served, ConnectionError> {
        match self.assemble(connection)? {
            Command::Stop => {
                connection.transition(ConnectionState::Responding);
                Ok(Served {
                    text: String::new(),
                    stop: true,
                })
            }
            Command::Transform(request) => {
                connection.transition(ConnectionState::Dispatching);
                let text = self.dispatcher.dispatch(request, connection.deadline)?;
                connection.transition(ConnectionState::Responding);
                Ok(Served { text, stop: false })
            }
        }
    }

    fn assemble(&self, connection: &mut PendingConnection) -> Result<Command, ConnectionError> {
        let mut assembler =
            RequestAssembler::new(Arc::clone(&self.token), self.limits.max_request_bytes);
        let mut buffer = [0_u8; READ_CHUNK_BYTES];
        loop {
            let read = connection.read_chunk(&mut buffer)?;
            if read == 0 {
                return assembler.finish();
            }
            let chunk = buffer
                .get(..read)
                .ok_or_else(|| ConnectionError::protocol("read past the buffer"))?;
            let state = assembler.push(chunk)?;
            connection.transition(state.into());
        }
    }

    fn fail(connection: &mut PendingConnection, error: &ConnectionError) {
        connection.transition(ConnectionState::Errored);
        match error.kind() {
            ErrorKind::Io => debug!(
                target: CONNECTION_TARGET,
                connection = connection.id,
                error = %error,
                "connection failed"
            ),
            ErrorKind::Service => info!(
                target: CONNECTION_TARGET,
                connection = connection.id,
                error = %error,
                "request failed"
            ),
            _ => warn!(
                target: CONNECTION_TARGET,
                connection = connection.id,
                kind = ?error.kind(),
                error = %error,
                "connection rejected"
            ),
        }

        if let Some(status) = error.exit_status() {
            if let Err(report_error) = connection.write_failure(&error.to_string(), status) {
                debug!(
                    target: CONNECTION_TARGET,
                    connection = connection.id,
                    error = %report_error,
                    "failed to report error to client"
                );
            }
        } else if let Err(close_error) = connection.stream.shutdown(Shutdown::Both) {
            debug!(
                target: CONNECTION_TARGET,
                connection = connection.id,
                error = %close_error,
                "failed to close connection"
            );
        }
    }
}

impl ConnectionHandler for ConnectionSupervisor {
    fn handle(&self, stream: ConnectionStream) {
        let accepted = Instant::now();
        let mut connection = PendingConnection {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            deadline: accepted + self.limits.timeout,
            state: ConnectionState::AwaitingToken,
            stream,
        };
        debug!(
            target: CONNECTION_TARGET,
            connection = connection.id,
            peer = ?connection.stream.peer_addr(),
            "connection accepted"
        );

        let outcome = self.serve(&mut connection).and_then(|served| {
            connection.write_success(&served.text)?;
            Ok(served)
        });
        match outcome {
            Ok(served) => {
                connection.transition(ConnectionState::Closed);
                debug!(
                    target: CONNECTION_TARGET,
                    connection = connection.id,
                    response_bytes = served.text.len(),
                    elapsed_ms = u64::try_from(accepted.elapsed().as_millis()).unwrap_or(u64::MAX),
                    "connection closed"
                );
                if served.stop {
                    info!(
                        target: CONNECTION_TARGET,
                        connection = connection.id,
                        "stop requested by client"
                    );
                    self.shutdown.fire(ShutdownReason::StopRequested);
                }
            }
            Err(error) => Self::fail(&mut connection, &error),
        }
    }
}
