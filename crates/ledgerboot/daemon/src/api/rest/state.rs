//! Application state for API handlers

use ledgerboot_orchestrator::{BootstrapOrchestrator, BroadcastReporter};
use std::sync::Arc;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// The bootstrap orchestrator
    pub orchestrator: Arc<BootstrapOrchestrator>,

    /// Reporter the orchestrator publishes progress through
    pub reporter: Arc<BroadcastReporter>,

    /// Daemon version
    pub version: String,

    /// Daemon start time
    pub started_at: chrono::DateTime<chrono::Utc>,
}

impl AppState {
    /// Create new application state
    pub fn new(orchestrator: Arc<BootstrapOrchestrator>, reporter: Arc<BroadcastReporter>) -> Self {
        Self {
            orchestrator,
            reporter,
            version: env!("CARGO_PKG_VERSION").to_string(),
            started_at: chrono::Utc::now(),
        }
    }

    /// Get uptime as a human-readable string
    pub fn uptime(&self) -> String {
        let secs = (chrono::Utc::now() - self.started_at).num_seconds();

        if secs < 60 {
            format!("{}s", secs)
        } else if secs < 3600 {
            format!("{}m {}s", secs / 60, secs % 60)
        } else {
            format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
        }
    }
}
