//! Server setup and lifecycle management

use crate::api::create_router;
use crate::api::rest::state::AppState;
use crate::config::{DaemonConfig, LedgerBackend};
use crate::credentials::FsCredentialStore;
use crate::error::{DaemonError, DaemonResult};
use crate::gateway::GatewayClient;
use ledgerboot_orchestrator::memory::{
    InMemoryCertificateAuthority, InMemoryCredentialStore, InMemoryNetwork,
};
use ledgerboot_orchestrator::{
    BootstrapOrchestrator, BootstrapOutcome, BootstrapResult, BroadcastReporter, Collaborators,
    ConfigureEvent,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

/// Build the collaborators for the configured ledger backend
pub fn collaborators(config: &DaemonConfig) -> DaemonResult<Collaborators> {
    match &config.ledger {
        LedgerBackend::Memory => Ok(Collaborators::new(
            Arc::new(InMemoryCertificateAuthority::new()),
            Arc::new(InMemoryCredentialStore::new()),
            Arc::new(InMemoryNetwork::new()),
        )),
        LedgerBackend::Gateway {
            url,
            request_timeout_secs,
        } => {
            let gateway = Arc::new(
                GatewayClient::new(url.clone(), Duration::from_secs(*request_timeout_secs))
                    .map_err(|e| DaemonError::Config(format!("Invalid gateway client: {}", e)))?,
            );
            Ok(Collaborators::new(
                gateway.clone(),
                Arc::new(FsCredentialStore::new(&config.bootstrap.enrollment.kvs_path)),
                gateway,
            ))
        }
    }
}

/// Build application state for `config`
pub fn build_state(config: &DaemonConfig) -> DaemonResult<AppState> {
    let reporter = Arc::new(BroadcastReporter::default());
    let orchestrator = BootstrapOrchestrator::new(
        config.bootstrap.clone(),
        collaborators(config)?,
        reporter.clone(),
    )?;
    Ok(AppState::new(Arc::new(orchestrator), reporter))
}

/// Ledgerboot Daemon Server
pub struct Server {
    config: DaemonConfig,
    state: AppState,
}

impl Server {
    /// Create a new server with the given configuration
    pub fn new(config: DaemonConfig) -> DaemonResult<Self> {
        let state = build_state(&config)?;
        Ok(Self { config, state })
    }

    /// Run the server
    pub async fn run(self) -> DaemonResult<()> {
        let addr = self.config.server.listen_addr;
        let app = create_router(self.state.clone(), self.config.server.enable_cors);
        let listener = TcpListener::bind(addr).await?;

        tracing::info!("Ledgerboot daemon listening on {}", addr);

        // Startup run with the file configuration
        let orchestrator = self.state.orchestrator.clone();
        let control_url = self.config.bootstrap.control.url();
        let startup = tokio::spawn(async move {
            let result = orchestrator
                .handle_configure(ConfigureEvent::FindChaincode { settings: None })
                .await;
            report_startup(&result, &control_url);
        });

        let keep_alive = self.state.orchestrator.spawn_keep_alive();

        // Run server with graceful shutdown
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| DaemonError::Server(e.to_string()))?;

        tracing::info!("Ledgerboot daemon shutting down");

        keep_alive.abort();
        startup.abort();

        Ok(())
    }
}

/// Log the startup run and point operators at the control surface when only
/// new settings can help. Returns whether the notice was shown.
fn report_startup(result: &BootstrapResult<BootstrapOutcome>, control_url: &str) -> bool {
    match result {
        Ok(BootstrapOutcome::UpToDate) => tracing::info!("Everything is in place"),
        Ok(BootstrapOutcome::Provisioned(report)) => tracing::info!(
            owners = report.owners.len(),
            "Startup provisioning complete"
        ),
        Err(e) if e.blocks_startup() => {
            tracing::warn!(error = %e, "Startup run did not complete");
            print_startup_unsuccessful(control_url);
            return true;
        }
        Err(e) => tracing::warn!(error = %e, "Startup run stopped"),
    }
    false
}

/// Operator notice when no automatic path can proceed
fn print_startup_unsuccessful(control_url: &str) {
    println!(
        r#"
- - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - -
  Startup was NOT successful yet.
  Open {control_url}/api/v1/status, fix the settings and
  POST them to {control_url}/api/v1/setup to try again.
- - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - - -
"#
    );
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledgerboot_orchestrator::{BootstrapError, ProvisionError};

    const CONTROL: &str = "http://localhost:3001";

    #[test]
    fn test_notice_for_chaincode_failures() {
        let result = Err(BootstrapError::ChaincodeNotDetected {
            attempts: 41,
            reason: "premature execution".into(),
        });
        assert!(report_startup(&result, CONTROL));
    }

    #[test]
    fn test_no_notice_for_provisioning_or_busy() {
        let provision = Err(BootstrapError::Provision(ProvisionError::OwnerCreation {
            username: "amy".into(),
            source: ledgerboot_orchestrator::LedgerError::not_found("init_owner"),
        }));
        assert!(!report_startup(&provision, CONTROL));
        assert!(!report_startup(&Err(BootstrapError::AlreadyRunning), CONTROL));
        assert!(!report_startup(&Ok(BootstrapOutcome::UpToDate), CONTROL));
    }
}
