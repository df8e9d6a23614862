//! Bootstrap phases and their statuses
//!
//! Phases form a chain: `enrollment -> find_chaincode -> register`. A phase
//! may only reach `success` once its prerequisite has, and a phase leaving
//! `success` demotes every later successful phase back to `waiting`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Observable startup phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BootstrapPhase {
    /// Identity enrollment with the certificate authority
    Enrollment,
    /// Chaincode readiness detection and version gate
    FindChaincode,
    /// Owner and asset registration
    Register,
}

impl BootstrapPhase {
    /// All phases in dependency order
    pub const ALL: [BootstrapPhase; 3] = [
        BootstrapPhase::Enrollment,
        BootstrapPhase::FindChaincode,
        BootstrapPhase::Register,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BootstrapPhase::Enrollment => "enrollment",
            BootstrapPhase::FindChaincode => "find_chaincode",
            BootstrapPhase::Register => "register",
        }
    }

    /// Phase that must succeed before this one can
    pub fn prerequisite(&self) -> Option<BootstrapPhase> {
        match self {
            BootstrapPhase::Enrollment => None,
            BootstrapPhase::FindChaincode => Some(BootstrapPhase::Enrollment),
            BootstrapPhase::Register => Some(BootstrapPhase::FindChaincode),
        }
    }

    /// Phases that depend on this one, directly or not
    pub fn downstream(&self) -> impl Iterator<Item = BootstrapPhase> + '_ {
        BootstrapPhase::ALL.into_iter().filter(move |p| p > self)
    }
}

impl fmt::Display for BootstrapPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of a single phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    Waiting,
    Polling,
    Success,
    Failed,
}

impl PhaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PhaseStatus::Waiting => "waiting",
            PhaseStatus::Polling => "polling",
            PhaseStatus::Success => "success",
            PhaseStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for PhaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A phase tried to succeed ahead of its prerequisite
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("phase {phase} cannot succeed while {prerequisite} is {prerequisite_status}")]
pub struct PhaseOrderError {
    pub phase: BootstrapPhase,
    pub prerequisite: BootstrapPhase,
    pub prerequisite_status: PhaseStatus,
}

/// Authoritative status of every phase
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseBoard {
    statuses: BTreeMap<BootstrapPhase, PhaseStatus>,
    updated_at: DateTime<Utc>,
}

impl Default for PhaseBoard {
    fn default() -> Self {
        Self::new()
    }
}

impl PhaseBoard {
    /// Every phase starts out waiting
    pub fn new() -> Self {
        Self {
            statuses: BootstrapPhase::ALL
                .into_iter()
                .map(|p| (p, PhaseStatus::Waiting))
                .collect(),
            updated_at: Utc::now(),
        }
    }

    pub fn get(&self, phase: BootstrapPhase) -> PhaseStatus {
        self.statuses
            .get(&phase)
            .copied()
            .unwrap_or(PhaseStatus::Waiting)
    }

    pub fn is_success(&self, phase: BootstrapPhase) -> bool {
        self.get(phase) == PhaseStatus::Success
    }

    /// Check whether `phase` may move to `status` without applying it
    pub fn check(&self, phase: BootstrapPhase, status: PhaseStatus) -> Result<(), PhaseOrderError> {
        if status != PhaseStatus::Success {
            return Ok(());
        }
        match phase.prerequisite() {
            Some(prerequisite) if !self.is_success(prerequisite) => Err(PhaseOrderError {
                phase,
                prerequisite,
                prerequisite_status: self.get(prerequisite),
            }),
            _ => Ok(()),
        }
    }

    /// Move `phase` to `status`, returning the statuses that changed.
    ///
    /// Demoted downstream phases are part of the returned list.
    pub fn transition(
        &mut self,
        phase: BootstrapPhase,
        status: PhaseStatus,
    ) -> Result<Vec<(BootstrapPhase, PhaseStatus)>, PhaseOrderError> {
        self.check(phase, status)?;

        let mut changed = Vec::new();
        if self.statuses.insert(phase, status) != Some(status) {
            changed.push((phase, status));
        }

        if status != PhaseStatus::Success {
            for later in phase.downstream() {
                if self.is_success(later) {
                    self.statuses.insert(later, PhaseStatus::Waiting);
                    changed.push((later, PhaseStatus::Waiting));
                }
            }
        }

        self.updated_at = Utc::now();
        Ok(changed)
    }

    /// Whether every phase has succeeded
    pub fn is_complete(&self) -> bool {
        BootstrapPhase::ALL.iter().all(|p| self.is_success(*p))
    }

    pub fn iter(&self) -> impl Iterator<Item = (BootstrapPhase, PhaseStatus)> + '_ {
        self.statuses.iter().map(|(p, s)| (*p, *s))
    }

    pub fn statuses(&self) -> &BTreeMap<BootstrapPhase, PhaseStatus> {
        &self.statuses
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }
}
