//! Progress reporting.
//!
//! The reporter is a sink. The orchestrator's phase board stays the source of
//! truth; reporters only mirror it and push notifications to observers.

use std::collections::BTreeMap;

use dashmap::DashMap;
use ledgerboot_types::{BootstrapEvent, BootstrapEventEnvelope, BootstrapPhase, PhaseStatus};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Receives phase updates. All methods are fire-and-forget.
pub trait ProgressReporter: Send + Sync {
    fn record_phase_status(&self, phase: BootstrapPhase, status: PhaseStatus);

    /// Push the full status of every phase to observers
    fn broadcast(&self);

    /// No automatic path can proceed; point an operator at the control surface
    fn startup_unsuccessful(&self, control_url: &str) {
        warn!(control_url, "startup was unsuccessful; open the control surface and adjust settings");
    }

    /// Bootstrap finished; observers should refresh ledger state
    fn check_for_updates(&self) {}
}

/// Reporter that mirrors statuses and fans events out over a broadcast channel.
pub struct BroadcastReporter {
    statuses: DashMap<BootstrapPhase, PhaseStatus>,
    event_tx: broadcast::Sender<BootstrapEventEnvelope>,
}

impl Default for BroadcastReporter {
    fn default() -> Self {
        Self::new(256)
    }
}

impl BroadcastReporter {
    pub fn new(capacity: usize) -> Self {
        let (event_tx, _) = broadcast::channel(capacity.max(1));
        Self {
            statuses: DashMap::new(),
            event_tx,
        }
    }

    /// Subscribe to bootstrap events.
    pub fn subscribe(&self) -> broadcast::Receiver<BootstrapEventEnvelope> {
        self.event_tx.subscribe()
    }

    /// Last status recorded for every phase
    pub fn snapshot(&self) -> BTreeMap<BootstrapPhase, PhaseStatus> {
        BootstrapPhase::ALL
            .into_iter()
            .map(|phase| {
                let status = self
                    .statuses
                    .get(&phase)
                    .map(|s| *s)
                    .unwrap_or(PhaseStatus::Waiting);
                (phase, status)
            })
            .collect()
    }

    fn emit(&self, event: BootstrapEvent) {
        // No subscribers is fine
        if self.event_tx.send(BootstrapEventEnvelope::new(event)).is_err() {
            debug!("no bootstrap event subscribers");
        }
    }
}

impl ProgressReporter for BroadcastReporter {
    fn record_phase_status(&self, phase: BootstrapPhase, status: PhaseStatus) {
        info!(phase = %phase, status = %status, "phase status");
        self.statuses.insert(phase, status);
        self.emit(BootstrapEvent::PhaseRecorded { phase, status });
    }

    fn broadcast(&self) {
        self.emit(BootstrapEvent::StatusBroadcast {
            statuses: self.snapshot(),
        });
    }

    fn startup_unsuccessful(&self, control_url: &str) {
        warn!(control_url, "startup was unsuccessful; open the control surface and adjust settings");
        self.emit(BootstrapEvent::StartupUnsuccessful {
            control_url: control_url.to_string(),
        });
    }

    fn check_for_updates(&self) {
        self.emit(BootstrapEvent::UpdateCheckRequested);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_events_reach_subscribers() {
        let reporter = BroadcastReporter::default();
        let mut rx = reporter.subscribe();

        reporter.record_phase_status(BootstrapPhase::FindChaincode, PhaseStatus::Polling);
        reporter.broadcast();

        let first = rx.recv().await.unwrap();
        assert_eq!(
            first.event,
            BootstrapEvent::PhaseRecorded {
                phase: BootstrapPhase::FindChaincode,
                status: PhaseStatus::Polling,
            }
        );
        match rx.recv().await.unwrap().event {
            BootstrapEvent::StatusBroadcast { statuses } => {
                assert_eq!(statuses[&BootstrapPhase::FindChaincode], PhaseStatus::Polling);
                assert_eq!(statuses[&BootstrapPhase::Register], PhaseStatus::Waiting);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_record_without_subscribers() {
        let reporter = BroadcastReporter::new(4);
        reporter.record_phase_status(BootstrapPhase::Enrollment, PhaseStatus::Success);
        assert_eq!(
            reporter.snapshot()[&BootstrapPhase::Enrollment],
            PhaseStatus::Success
        );
    }
}
