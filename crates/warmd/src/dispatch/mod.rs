//! Hands parsed requests to the transformation service and waits for the
//! result.
//!
//! Non-reentrant services are driven by a single worker thread fed through a
//! queue, so invocations never overlap. Reentrant services get a fresh thread
//! per request. Either way the connection thread blocks on a one-shot channel
//! bounded by its deadline, and a service that panics or drops its
//! completion is reported as a service failure.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread;
use std::time::Instant;

use thiserror::Error;
use tracing::{debug, warn};

use crate::protocol::{ConnectionError, Request};
use crate::service::{Completion, ServiceRequest, TransformService};

const DISPATCH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::dispatch");

struct Job {
    request: ServiceRequest,
    completion: Completion,
}

enum Mode {
    Serial(Sender<Job>),
    Concurrent,
}

/// Routes requests to a [`TransformService`].
pub struct ServiceDispatcher {
    service: Arc<dyn TransformService>,
    mode: Mode,
}

impl std::fmt::Debug for ServiceDispatcher {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("ServiceDispatcher")
            .field("service", &self.service.name())
            .field("serial", &matches!(self.mode, Mode::Serial(_)))
            .finish()
    }
}

impl ServiceDispatcher {
    /// Prepares to dispatch to `service`, starting its worker thread when
    /// the service is not reentrant. The worker exits once the dispatcher is
    /// dropped and its queue drains.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Spawn`] when the worker thread cannot start.
    pub fn new(service: Arc<dyn TransformService>) -> Result<Self, DispatchError> {
        let mode = if service.is_reentrant() {
            Mode::Concurrent
        } else {
            let (sender, receiver) = mpsc::channel::<Job>();
            let worker = Arc::clone(&service);
            thread::Builder::new()
                .name(String::from("warmd-service"))
                .spawn(move || {
                    for job in receiver {
                        run_job(worker.as_ref(), job);
                    }
                })
                .map_err(|source| DispatchError::Spawn { source })?;
            Mode::Serial(sender)
        };
        debug!(
            target: DISPATCH_TARGET,
            service = service.name(),
            reentrant = service.is_reentrant(),
            "service dispatcher ready"
        );
        Ok(Self { service, mode })
    }

    /// Name of the wrapped service.
    #[must_use]
    pub fn service_name(&self) -> &str {
        self.service.name()
    }

    /// Invokes the service and waits for its result until `deadline`.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::Service`] when the service fails, panics or
    /// drops its completion, and [`ConnectionError::Timeout`] when no result
    /// arrives before `deadline`.
    pub fn dispatch(&self, request: Request, deadline: Instant) -> Result<String, ConnectionError> {
        if Instant::now() >= deadline {
            return Err(ConnectionError::timeout("awaiting the service"));
        }
        let (sender, receiver) = mpsc::sync_channel(1);
        let job = Job {
            request: ServiceRequest::new(request, deadline),
            completion: Completion::new(sender),
        };

        match &self.mode {
            Mode::Serial(queue) => queue
                .send(job)
                .map_err(|_| ConnectionError::service("service worker has stopped"))?,
            Mode::Concurrent => {
                let service = Arc::clone(&self.service);
                thread::Builder::new()
                    .name(String::from("warmd-service"))
                    .spawn(move || run_job(service.as_ref(), job))
                    .map_err(|error| {
                        ConnectionError::service(format!("failed to start service thread: {error}"))
                    })?;
            }
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        match receiver.recv_timeout(remaining) {
            Ok(Ok(text)) => Ok(text),
            Ok(Err(failure)) => Err(ConnectionError::service(failure.message())),
            Err(RecvTimeoutError::Timeout) => Err(ConnectionError::timeout("awaiting the service")),
            Err(RecvTimeoutError::Disconnected) => Err(ConnectionError::service(
                "transformation service ended without a result",
            )),
        }
    }
}

fn run_job(service: &dyn TransformService, job: Job) {
    let Job {
        request,
        completion,
    } = job;
    if Instant::now() >= request.deadline {
        debug!(
            target: DISPATCH_TARGET,
            service = service.name(),
            "skipping request whose deadline has passed"
        );
        return;
    }
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| service.invoke(request, completion)));
    if outcome.is_err() {
        warn!(
            target: DISPATCH_TARGET,
            service = service.name(),
            "transformation service panicked"
        );
    }
}

/// Errors raised while setting up the dispatcher.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The serial worker thread could not be started.
    #[error("failed to spawn service worker: {source}")]
    Spawn {
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests;
