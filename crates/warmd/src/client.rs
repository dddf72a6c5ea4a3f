//! Blocking client for talking to a running daemon.
//!
//! Tools locate the daemon through the port file, send one request per
//! connection and read the reply until the daemon closes.

use std::io::{self, Read};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::path::Path;
use std::time::Duration;

use camino::Utf8PathBuf;
use thiserror::Error;

use warm_config::{Config, Discovery, PortFile, PortFileError};

use crate::codec::{EncodingError, Utf8Decoder, Utf8Encoder};
use crate::protocol::{Reply, Request, STOP_COMMAND};

const READ_CHUNK_BYTES: usize = 8 * 1024;

/// Errors raised by [`Client`].
#[derive(Debug, Error)]
pub enum ClientError {
    /// No daemon has published a port file.
    #[error("no daemon is running (port file '{path}' not found)")]
    NotRunning {
        /// Port file that was consulted.
        path: Utf8PathBuf,
    },
    /// The port file could not be read.
    #[error(transparent)]
    PortFile(#[from] PortFileError),
    /// The daemon host did not resolve.
    #[error("failed to resolve {host}:{port}: {source}")]
    Resolve {
        /// Host that failed to resolve.
        host: String,
        /// Port from the discovery record.
        port: u16,
        /// Resolver error.
        #[source]
        source: io::Error,
    },
    /// Connecting to the daemon failed.
    #[error("failed to connect to daemon at {addr}: {source}")]
    Connect {
        /// Address from the discovery record.
        addr: SocketAddr,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Sending the request or reading the reply failed.
    #[error("daemon transport error: {0}")]
    Io(#[source] io::Error),
    /// The reply was not valid UTF-8.
    #[error("daemon reply was not valid text: {0}")]
    Encoding(#[from] EncodingError),
    /// The request could not be serialised.
    #[error("failed to serialise request: {0}")]
    Serialize(#[source] serde_json::Error),
    /// The daemon reported a failure.
    #[error("{message} (exit {status})")]
    Daemon {
        /// Message written by the daemon.
        message: String,
        /// Reported exit status.
        status: i32,
    },
}

/// Connection details for one daemon.
#[derive(Debug, Clone)]
pub struct Client {
    addr: SocketAddr,
    token: String,
    timeout: Duration,
}

impl Client {
    /// Talks to the daemon at `addr` using `token`.
    #[must_use]
    pub fn new(addr: SocketAddr, token: impl Into<String>, timeout: Duration) -> Self {
        Self {
            addr,
            token: token.into(),
            timeout,
        }
    }

    /// Locates the daemon through the configured port file.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::NotRunning`] when no record has been published
    /// and [`ClientError::PortFile`] or [`ClientError::Resolve`] when the
    /// record cannot be used.
    pub fn from_config(config: &Config) -> Result<Self, ClientError> {
        let portfile = PortFile::new(config.portfile_path());
        let discovery = portfile.read()?.ok_or_else(|| ClientError::NotRunning {
            path: portfile.path().to_owned(),
        })?;
        Self::from_discovery(config.listen_host(), &discovery, config.connection_timeout())
    }

    /// Builds a client from a discovery record.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Resolve`] when `host` does not resolve.
    pub fn from_discovery(
        host: &str,
        discovery: &Discovery,
        timeout: Duration,
    ) -> Result<Self, ClientError> {
        let resolve_error = |source| ClientError::Resolve {
            host: host.to_owned(),
            port: discovery.port,
            source,
        };
        let addr = (host, discovery.port)
            .to_socket_addrs()
            .map_err(resolve_error)?
            .next()
            .ok_or_else(|| {
                resolve_error(io::Error::new(
                    io::ErrorKind::NotFound,
                    "no addresses resolved",
                ))
            })?;
        Ok(Self::new(addr, discovery.token.clone(), timeout))
    }

    /// Address the client connects to.
    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Asks the daemon to transform `text`.
    ///
    /// A rejected request (bad token, malformed framing, timeout) is closed
    /// without data and therefore reads back as empty text.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Daemon`] when the daemon reports a failure and
    /// transport errors otherwise.
    pub fn transform(&self, cwd: &Path, args: &[String], text: &str) -> Result<String, ClientError> {
        let request = Request::new(cwd, args.to_vec(), text);
        let payload = serde_json::to_string(&request).map_err(ClientError::Serialize)?;
        match Reply::parse(self.exchange(&payload)?) {
            Reply::Success(output) => Ok(output),
            Reply::Failure { message, status } => Err(ClientError::Daemon { message, status }),
        }
    }

    /// Asks the daemon to shut down.
    ///
    /// # Errors
    ///
    /// Returns transport errors raised while sending the request.
    pub fn stop(&self) -> Result<(), ClientError> {
        self.exchange(STOP_COMMAND).map(drop)
    }

    /// Sends `<token> <body>`, half-closes and reads the reply to the end.
    fn exchange(&self, body: &str) -> Result<String, ClientError> {
        let mut stream = TcpStream::connect_timeout(&self.addr, self.timeout).map_err(|source| {
            ClientError::Connect {
                addr: self.addr,
                source,
            }
        })?;
        stream
            .set_read_timeout(Some(self.timeout))
            .map_err(ClientError::Io)?;
        stream
            .set_write_timeout(Some(self.timeout))
            .map_err(ClientError::Io)?;

        let mut encoder = Utf8Encoder::new(&mut stream);
        encoder.write_str(&self.token).map_err(ClientError::Io)?;
        encoder.write_str(" ").map_err(ClientError::Io)?;
        encoder.write_str(body).map_err(ClientError::Io)?;
        encoder.finish().map_err(ClientError::Io)?;
        stream.shutdown(Shutdown::Write).map_err(ClientError::Io)?;

        let mut decoder = Utf8Decoder::new();
        let mut reply = String::new();
        let mut buffer = [0_u8; READ_CHUNK_BYTES];
        loop {
            match stream.read(&mut buffer) {
                Ok(0) => break,
                Ok(read) => {
                    let chunk = buffer.get(..read).unwrap_or_default();
                    decoder.feed_into(chunk, &mut reply)?;
                }
                Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
                // A rejected request is reset rather than answered.
                Err(error) if error.kind() == io::ErrorKind::ConnectionReset => break,
                Err(error) => return Err(ClientError::Io(error)),
            }
        }
        reply.push_str(&decoder.finish()?);
        Ok(reply)
    }
}
