//! Runs a complete daemon on a background thread for behavioural tests.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use camino::Utf8PathBuf;
use tempfile::TempDir;

use warm_config::{Config, Discovery, LogFormat, PortFile};

use crate::auth::Token;
use crate::bootstrap::StaticConfigLoader;
use crate::client::Client;
use crate::health::HealthReporter;
use crate::process::launch::{LaunchPlan, ProcessControl, ServiceDeps, run_daemon_with};
use crate::process::{LaunchError, ShutdownReason, ShutdownTrigger, TriggerOnlyShutdown};
use crate::service::TransformService;

use super::RecordingHealthReporter;

const STARTUP_TIMEOUT: Duration = Duration::from_secs(5);

/// Knobs for a test daemon.
pub struct DaemonOptions {
    pub token: Token,
    pub connection_timeout: Duration,
    pub service: Option<Arc<dyn TransformService>>,
}

impl Default for DaemonOptions {
    fn default() -> Self {
        Self {
            token: Token::generate(),
            connection_timeout: Duration::from_secs(5),
            service: None,
        }
    }
}

/// A daemon running on its own thread with an isolated port file.
pub struct RunningDaemon {
    dir: Arc<TempDir>,
    portfile: PortFile,
    reporter: Arc<RecordingHealthReporter>,
    trigger: ShutdownTrigger,
    thread: Option<JoinHandle<Result<(), LaunchError>>>,
    outcome: Option<Result<(), String>>,
}

impl RunningDaemon {
    /// Starts a daemon with its own temporary port file.
    pub fn start(options: DaemonOptions) -> Self {
        let dir = Arc::new(TempDir::new().expect("temp dir"));
        Self::start_in(dir, options)
    }

    /// Starts a daemon whose port file lives in `dir`, possibly shared with
    /// another daemon.
    pub fn start_in(dir: Arc<TempDir>, options: DaemonOptions) -> Self {
        let path = Utf8PathBuf::from_path_buf(dir.path().join(".warmd")).expect("utf8 temp path");
        let config = Config {
            portfile: Some(path.clone()),
            connection_timeout_ms: u64::try_from(options.connection_timeout.as_millis())
                .expect("timeout fits"),
            log_filter: String::from("warn"),
            log_format: LogFormat::Compact,
            ..Config::default()
        };
        let reporter = Arc::new(RecordingHealthReporter::default());
        let shared_reporter: Arc<dyn HealthReporter> = Arc::clone(&reporter) as _;
        let trigger = ShutdownTrigger::new();
        let plan = LaunchPlan {
            process: ProcessControl {
                shutdown: TriggerOnlyShutdown,
                trigger: trigger.clone(),
            },
            services: ServiceDeps {
                loader: StaticConfigLoader::new(config),
                reporter: shared_reporter,
                token: options.token,
                service: options.service,
            },
        };
        let thread = thread::spawn(move || run_daemon_with(plan));
        Self {
            dir,
            portfile: PortFile::new(path),
            reporter,
            trigger,
            thread: Some(thread),
            outcome: None,
        }
    }

    /// Waits until the daemon has published its port, or has exited.
    pub fn discovery(&mut self) -> Option<Discovery> {
        let deadline = Instant::now() + STARTUP_TIMEOUT;
        while Instant::now() < deadline {
            if let Ok(Some(record)) = self.portfile.read() {
                return Some(record);
            }
            if self.thread.as_ref().is_none_or(JoinHandle::is_finished) {
                return None;
            }
            thread::sleep(Duration::from_millis(10));
        }
        None
    }

    /// A client for the published daemon.
    pub fn client(&mut self) -> Client {
        let record = self.discovery().expect("daemon should publish its port");
        Client::from_discovery("127.0.0.1", &record, Duration::from_secs(10))
            .expect("loopback resolves")
    }

    /// Directory holding the port file.
    pub fn dir(&self) -> Arc<TempDir> {
        Arc::clone(&self.dir)
    }

    pub fn portfile(&self) -> &PortFile {
        &self.portfile
    }

    pub fn reporter(&self) -> &RecordingHealthReporter {
        &self.reporter
    }

    /// Waits for the daemon thread to finish and records how it ended.
    pub fn wait_for_exit(&mut self, timeout: Duration) -> Option<&Result<(), String>> {
        let deadline = Instant::now() + timeout;
        while self.outcome.is_none() && Instant::now() < deadline {
            if self.thread.as_ref().is_some_and(JoinHandle::is_finished) {
                self.join();
            } else {
                thread::sleep(Duration::from_millis(10));
            }
        }
        self.outcome.as_ref()
    }

    fn join(&mut self) {
        if let Some(handle) = self.thread.take() {
            let outcome = match handle.join() {
                Ok(result) => result.map_err(|error| error.to_string()),
                Err(_) => Err(String::from("daemon thread panicked")),
            };
            self.outcome = Some(outcome);
        }
    }
}

impl Drop for RunningDaemon {
    fn drop(&mut self) {
        self.trigger.fire(ShutdownReason::Signal(15));
        self.join();
    }
}
