//! Shutdown signalling shared by the signal watcher and stop requests.

use std::fmt;
use std::io;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread;

use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGQUIT, SIGTERM};
use signal_hook::iterator::Signals;
use thiserror::Error;
use tracing::info;

use super::PROCESS_TARGET;

/// Why the daemon is shutting down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// A termination signal arrived.
    Signal(i32),
    /// An authenticated client sent the stop command.
    StopRequested,
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Signal(signal) => write!(formatter, "signal {signal}"),
            Self::StopRequested => formatter.write_str("stop requested"),
        }
    }
}

/// Latch shared between the shutdown waiter and anything that may end the
/// daemon. The first reason recorded wins.
#[derive(Debug, Clone, Default)]
pub struct ShutdownTrigger {
    state: Arc<(Mutex<Option<ShutdownReason>>, Condvar)>,
}

impl ShutdownTrigger {
    /// Creates an unfired trigger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `reason` and wakes every waiter.
    pub fn fire(&self, reason: ShutdownReason) {
        let (lock, condvar) = &*self.state;
        let mut slot = lock.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_none() {
            *slot = Some(reason);
        }
        condvar.notify_all();
    }

    /// Reason recorded so far, if any.
    #[must_use]
    pub fn reason(&self) -> Option<ShutdownReason> {
        let (lock, _) = &*self.state;
        *lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Blocks until the trigger fires.
    #[must_use]
    pub fn wait(&self) -> ShutdownReason {
        let (lock, condvar) = &*self.state;
        let mut slot = lock.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if let Some(reason) = *slot {
                return reason;
            }
            slot = condvar.wait(slot).unwrap_or_else(PoisonError::into_inner);
        }
    }
}

/// Abstraction over shutdown notification mechanisms.
pub trait ShutdownSignal: Send + Sync {
    /// Blocks until shutdown should proceed, either because this source
    /// fired or because `trigger` was fired elsewhere.
    ///
    /// # Errors
    ///
    /// Returns [`ShutdownError`] when the source cannot be installed.
    fn wait(&self, trigger: &ShutdownTrigger) -> Result<ShutdownReason, ShutdownError>;
}

/// Errors reported by shutdown signal listeners.
#[derive(Debug, Error)]
pub enum ShutdownError {
    /// Installing signal handlers failed.
    #[error("failed to install signal handlers: {source}")]
    Install {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The signal watcher thread could not be started.
    #[error("failed to spawn signal watcher: {source}")]
    Spawn {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}

/// Shutdown listener that waits for termination signals.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemShutdownSignal;

impl SystemShutdownSignal {
    /// Builds a signal listener.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl ShutdownSignal for SystemShutdownSignal {
    fn wait(&self, trigger: &ShutdownTrigger) -> Result<ShutdownReason, ShutdownError> {
        let mut signals = Signals::new([SIGTERM, SIGINT, SIGQUIT, SIGHUP])
            .map_err(|source| ShutdownError::Install { source })?;
        let handle = signals.handle();
        let forwarder = trigger.clone();
        let watcher = thread::Builder::new()
            .name(String::from("warmd-signals"))
            .spawn(move || {
                if let Some(signal) = signals.forever().next() {
                    info!(
                        target: PROCESS_TARGET,
                        signal,
                        "shutdown signal received"
                    );
                    forwarder.fire(ShutdownReason::Signal(signal));
                }
            })
            .map_err(|source| ShutdownError::Spawn { source })?;

        let reason = trigger.wait();
        handle.close();
        if watcher.join().is_err() {
            tracing::warn!(target: PROCESS_TARGET, "signal watcher panicked");
        }
        Ok(reason)
    }
}

/// Shutdown source that only reacts to the trigger itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct TriggerOnlyShutdown;

impl ShutdownSignal for TriggerOnlyShutdown {
    fn wait(&self, trigger: &ShutdownTrigger) -> Result<ShutdownReason, ShutdownError> {
        Ok(trigger.wait())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn first_reason_wins() {
        let trigger = ShutdownTrigger::new();
        assert_eq!(trigger.reason(), None);
        trigger.fire(ShutdownReason::StopRequested);
        trigger.fire(ShutdownReason::Signal(15));
        assert_eq!(trigger.wait(), ShutdownReason::StopRequested);
    }

    #[test]
    fn wait_wakes_when_fired_from_another_thread() {
        let trigger = ShutdownTrigger::new();
        let remote = trigger.clone();
        let firing = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            remote.fire(ShutdownReason::StopRequested);
        });
        assert_eq!(
            TriggerOnlyShutdown.wait(&trigger).expect("wait"),
            ShutdownReason::StopRequested
        );
        firing.join().expect("firing thread");
    }

    #[test]
    fn system_signal_returns_when_triggered() {
        let trigger = ShutdownTrigger::new();
        trigger.fire(ShutdownReason::StopRequested);
        let reason = SystemShutdownSignal::new()
            .wait(&trigger)
            .expect("signal handlers install");
        assert_eq!(reason, ShutdownReason::StopRequested);
    }

    #[test]
    fn reasons_render_for_logs() {
        assert_eq!(ShutdownReason::Signal(2).to_string(), "signal 2");
        assert_eq!(ShutdownReason::StopRequested.to_string(), "stop requested");
    }
}
