//! Supervises daemon launch sequencing and runtime orchestration.

use std::sync::Arc;

use tracing::info;

use warm_config::{Config, Discovery, PortFile};

use crate::auth::Token;
use crate::bootstrap::{ConfigLoader, SystemConfigLoader, bootstrap_with};
use crate::connection::{ConnectionLimits, ConnectionSupervisor};
use crate::dispatch::ServiceDispatcher;
use crate::health::{HealthReporter, StructuredHealthReporter};
use crate::service::{CommandService, IdentityService, TransformService};
use crate::transport::SocketListener;

use super::PROCESS_TARGET;
use super::errors::LaunchError;
use super::guard::{PortGuard, ensure_not_running};
use super::shutdown::{ShutdownSignal, ShutdownTrigger, SystemShutdownSignal};

/// Process-level collaborators needed to control daemon lifecycle.
pub(crate) struct ProcessControl<S> {
    pub(crate) shutdown: S,
    pub(crate) trigger: ShutdownTrigger,
}

/// Service dependencies required to construct the daemon runtime.
pub(crate) struct ServiceDeps<L> {
    pub(crate) loader: L,
    pub(crate) reporter: Arc<dyn HealthReporter>,
    pub(crate) token: Token,
    /// Overrides the service chosen from configuration.
    pub(crate) service: Option<Arc<dyn TransformService>>,
}

/// Collaborators required to launch the daemon runtime.
pub(crate) struct LaunchPlan<L, S> {
    pub(crate) process: ProcessControl<S>,
    pub(crate) services: ServiceDeps<L>,
}

/// Runs the daemon using the production collaborators until a termination
/// signal or a stop request arrives.
///
/// # Errors
///
/// Returns [`LaunchError`] when bootstrap fails, another daemon is already
/// running, the socket cannot be bound or the port file cannot be written.
pub fn run_daemon() -> Result<(), LaunchError> {
    let plan = LaunchPlan {
        process: ProcessControl {
            shutdown: SystemShutdownSignal::new(),
            trigger: ShutdownTrigger::new(),
        },
        services: ServiceDeps {
            loader: SystemConfigLoader,
            reporter: Arc::new(StructuredHealthReporter::new()),
            token: Token::generate(),
            service: None,
        },
    };
    run_daemon_with(plan)
}

/// Runs the daemon with injected collaborators.
pub(crate) fn run_daemon_with<L, S>(plan: LaunchPlan<L, S>) -> Result<(), LaunchError>
where
    L: ConfigLoader,
    S: ShutdownSignal,
{
    let LaunchPlan { process, services } = plan;
    let ProcessControl { shutdown, trigger } = process;
    let ServiceDeps {
        loader,
        reporter,
        token,
        service,
    } = services;

    info!(target: PROCESS_TARGET, "starting daemon runtime");
    let daemon = bootstrap_with(&loader, reporter.as_ref(), token)?;
    let config = daemon.config();
    let portfile = PortFile::new(config.portfile_path());
    ensure_not_running(&portfile, config.listen_host())?;

    let listener = SocketListener::bind(config.listen_host(), config.listen_port())?;
    let addr = listener.local_addr();
    let transform = service.unwrap_or_else(|| configured_service(config));
    let dispatcher = Arc::new(ServiceDispatcher::new(transform)?);
    info!(
        target: PROCESS_TARGET,
        service = dispatcher.service_name(),
        "transformation service selected"
    );
    let supervisor = Arc::new(ConnectionSupervisor::new(
        daemon.token(),
        dispatcher,
        ConnectionLimits::from_config(config),
        trigger.clone(),
    ));

    let listener_handle = listener.start(supervisor)?;
    reporter.listener_ready(addr);
    let guard = PortGuard::publish(
        portfile.clone(),
        &Discovery::new(addr.port(), daemon.token().as_str()),
    )?;
    reporter.port_published(portfile.path(), addr.port());

    let reason = shutdown.wait(&trigger)?;
    reporter.shutdown_requested(reason);
    drop(guard);
    listener_handle.shutdown();
    listener_handle.join()?;
    info!(target: PROCESS_TARGET, "shutdown sequence completed");
    Ok(())
}

fn configured_service(config: &Config) -> Arc<dyn TransformService> {
    match config.service_program() {
        Some(program) => Arc::new(CommandService::new(program.as_std_path())),
        None => Arc::new(IdentityService),
    }
}
