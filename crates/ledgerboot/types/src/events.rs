//! Progress events pushed to observers

use crate::phase::{BootstrapPhase, PhaseStatus};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Envelope wrapping every bootstrap event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootstrapEventEnvelope {
    /// Unique event ID
    pub id: Uuid,

    /// Event timestamp
    pub timestamp: chrono::DateTime<chrono::Utc>,

    /// The actual event
    pub event: BootstrapEvent,
}

impl BootstrapEventEnvelope {
    pub fn new(event: BootstrapEvent) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: chrono::Utc::now(),
            event,
        }
    }
}

/// Bootstrap events
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BootstrapEvent {
    /// A phase status was recorded
    PhaseRecorded {
        phase: BootstrapPhase,
        status: PhaseStatus,
    },

    /// Full status of every phase, pushed to all observers
    StatusBroadcast {
        statuses: BTreeMap<BootstrapPhase, PhaseStatus>,
    },

    /// No automatic path can proceed; an operator has to adjust settings
    StartupUnsuccessful { control_url: String },

    /// Bootstrap finished; observers should refresh ledger state
    UpdateCheckRequested,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_tagging() {
        let envelope = BootstrapEventEnvelope::new(BootstrapEvent::PhaseRecorded {
            phase: BootstrapPhase::Register,
            status: PhaseStatus::Waiting,
        });
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["event"]["type"], "phase_recorded");
        assert_eq!(json["event"]["phase"], "register");
    }
}
