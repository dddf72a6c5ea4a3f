use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use tracing::{info, warn};

use warm_config::{Discovery, PortFile, PortPublisher};

use super::PROCESS_TARGET;
use super::errors::LaunchError;

const PROBE_TIMEOUT: Duration = Duration::from_millis(250);

/// Keeps the discovery record published for as long as it lives.
pub(super) struct PortGuard<P: PortPublisher> {
    publisher: P,
}

impl<P: PortPublisher> PortGuard<P> {
    pub(super) fn publish(publisher: P, discovery: &Discovery) -> Result<Self, LaunchError> {
        publisher.publish(discovery)?;
        Ok(Self { publisher })
    }
}

impl<P: PortPublisher> Drop for PortGuard<P> {
    fn drop(&mut self) {
        if let Err(error) = self.publisher.withdraw() {
            warn!(
                target: PROCESS_TARGET,
                error = %error,
                "failed to remove port file"
            );
        }
    }
}

/// Refuses to start when the port file names a daemon that still answers.
/// A record nobody answers on is stale and will be overwritten.
pub(super) fn ensure_not_running(portfile: &PortFile, host: &str) -> Result<(), LaunchError> {
    let record = match portfile.read() {
        Ok(Some(record)) => record,
        Ok(None) => return Ok(()),
        Err(error) => {
            warn!(
                target: PROCESS_TARGET,
                file = %portfile.path(),
                error = %error,
                "ignoring unreadable port file"
            );
            return Ok(());
        }
    };
    if answers(host, record.port) {
        info!(
            target: PROCESS_TARGET,
            port = record.port,
            "refusing to start: existing daemon alive"
        );
        return Err(LaunchError::AlreadyRunning { port: record.port });
    }
    warn!(
        target: PROCESS_TARGET,
        port = record.port,
        file = %portfile.path(),
        "existing daemon not detected; replacing stale port file"
    );
    Ok(())
}

fn answers(host: &str, port: u16) -> bool {
    let Ok(mut addrs) = (host, port).to_socket_addrs() else {
        return false;
    };
    addrs.any(|addr| TcpStream::connect_timeout(&addr, PROBE_TIMEOUT).is_ok())
}
