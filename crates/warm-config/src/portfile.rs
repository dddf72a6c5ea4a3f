//! Port discovery file shared by the daemon and its clients.
//!
//! The daemon publishes a single line `<port> <token>` once its listener is
//! bound. Clients read the same file to learn where to connect and which
//! token to present. The file is replaced atomically so readers never observe
//! a partial record, and it is created with owner-only permissions because
//! the token is the only credential the protocol has.

use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::str::FromStr;

use camino::{Utf8Path, Utf8PathBuf};
use tempfile::Builder;
use thiserror::Error;

/// Contents of the discovery file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Discovery {
    /// Port the daemon listens on.
    pub port: u16,
    /// Hex token clients must present.
    pub token: String,
}

impl Discovery {
    /// Builds a discovery record.
    #[must_use]
    pub fn new(port: u16, token: impl Into<String>) -> Self {
        Self {
            port,
            token: token.into(),
        }
    }
}

impl fmt::Display for Discovery {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{} {}", self.port, self.token)
    }
}

impl FromStr for Discovery {
    type Err = PortFileError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let malformed = || PortFileError::Malformed {
            content: input.trim().to_owned(),
        };
        let (port, token) = input.trim().split_once(' ').ok_or_else(malformed)?;
        let port = port.parse::<u16>().map_err(|_| malformed())?;
        if token.is_empty() || token.contains(char::is_whitespace) {
            return Err(malformed());
        }
        Ok(Self::new(port, token))
    }
}

/// Destination for the daemon's discovery record.
pub trait PortPublisher: Send + Sync {
    /// Makes the record visible to clients.
    fn publish(&self, discovery: &Discovery) -> Result<(), PortFileError>;

    /// Removes a previously published record. Missing records are not an
    /// error.
    fn withdraw(&self) -> Result<(), PortFileError>;
}

/// Discovery record stored in a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortFile {
    path: Utf8PathBuf,
}

impl PortFile {
    /// Targets the file at `path`.
    #[must_use]
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location of the discovery file.
    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Reads the current record. Returns `Ok(None)` when no daemon has
    /// published one.
    pub fn read(&self) -> Result<Option<Discovery>, PortFileError> {
        match fs::read_to_string(&self.path) {
            Ok(content) => content.parse().map(Some),
            Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(PortFileError::Read {
                path: self.path.clone(),
                source,
            }),
        }
    }
}

impl PortPublisher for PortFile {
    fn publish(&self, discovery: &Discovery) -> Result<(), PortFileError> {
        let line = format!("{discovery}\n");
        atomic_write(&self.path, line.as_bytes()).map_err(|source| PortFileError::Write {
            path: self.path.clone(),
            source,
        })
    }

    fn withdraw(&self) -> Result<(), PortFileError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(PortFileError::Remove {
                path: self.path.clone(),
                source,
            }),
        }
    }
}

/// Writes the provided bytes to the path using an atomic persist step.
fn atomic_write(path: &Utf8Path, contents: &[u8]) -> io::Result<()> {
    let directory = path
        .parent()
        .filter(|parent| !parent.as_str().is_empty())
        .unwrap_or_else(|| Utf8Path::new("."));

    let mut builder = Builder::new();
    builder.prefix(path.file_name().unwrap_or("warmd"));
    #[cfg(unix)]
    {
        use std::fs::Permissions;
        use std::os::unix::fs::PermissionsExt;
        builder.permissions(Permissions::from_mode(0o600));
    }

    let mut file = builder.tempfile_in(directory)?;
    file.write_all(contents)?;
    file.as_file().sync_all()?;
    file.persist(path).map_err(|error| error.error)?;
    Ok(())
}

/// Errors raised while publishing or reading the discovery file.
#[derive(Debug, Error)]
pub enum PortFileError {
    /// The record could not be written.
    #[error("failed to write port file '{path}': {source}")]
    Write {
        /// Port file path.
        path: Utf8PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The record could not be read.
    #[error("failed to read port file '{path}': {source}")]
    Read {
        /// Port file path.
        path: Utf8PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The record could not be removed.
    #[error("failed to remove port file '{path}': {source}")]
    Remove {
        /// Port file path.
        path: Utf8PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The file did not contain `<port> <token>`.
    #[error("malformed port file content '{content}'")]
    Malformed {
        /// Offending content.
        content: String,
    },
}
