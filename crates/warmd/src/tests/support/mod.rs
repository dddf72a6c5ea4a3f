//! Shared fixtures for the behavioural suites.

mod daemon;
mod reporter;

pub use daemon::{DaemonOptions, RunningDaemon};
pub use reporter::{HealthEvent, RecordingHealthReporter};
