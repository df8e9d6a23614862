//! Error types for ledgerboot-orchestrator.
//!
//! Ledger failures carry a structured [`LedgerErrorKind`] so retry decisions
//! never depend on the wording of an error message.

use ledgerboot_types::{BootstrapPhase, OwnerId, PhaseOrderError};
use std::fmt;
use thiserror::Error;

/// Classification of a ledger client failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerErrorKind {
    /// The chaincode container is still starting
    ChaincodeStarting,
    /// The chaincode is not deployed or returned nothing usable
    NotFound,
    /// Endorsement or validation rejected the call
    Rejected,
    /// The peer could not be reached
    Transport,
    /// Anything else
    Other,
}

impl LedgerErrorKind {
    /// Text peers put in errors while the chaincode container is starting
    pub const STARTING_MARKER: &'static str = "premature execution";

    /// Classify an opaque error message.
    ///
    /// Only for adapters that receive nothing but text from the network.
    pub fn classify(message: &str) -> Self {
        let lower = message.to_ascii_lowercase();
        if lower.contains(Self::STARTING_MARKER) {
            LedgerErrorKind::ChaincodeStarting
        } else if lower.contains("not found") {
            LedgerErrorKind::NotFound
        } else {
            LedgerErrorKind::Other
        }
    }

    /// Whether waiting and retrying can help
    pub fn is_transient(&self) -> bool {
        matches!(self, LedgerErrorKind::ChaincodeStarting)
    }
}

impl fmt::Display for LedgerErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LedgerErrorKind::ChaincodeStarting => "chaincode starting",
            LedgerErrorKind::NotFound => "not found",
            LedgerErrorKind::Rejected => "rejected",
            LedgerErrorKind::Transport => "transport",
            LedgerErrorKind::Other => "ledger error",
        };
        f.write_str(name)
    }
}

/// Failure reported by a ledger client
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct LedgerError {
    pub kind: LedgerErrorKind,
    pub message: String,
}

impl LedgerError {
    pub fn new(kind: LedgerErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Build from message text alone, classifying it
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            kind: LedgerErrorKind::classify(&message),
            message,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(LedgerErrorKind::NotFound, message)
    }

    pub fn is_transient(&self) -> bool {
        self.kind.is_transient()
    }
}

/// Identity enrollment failures
#[derive(Debug, Clone, Error)]
pub enum EnrollError {
    /// The certificate authority refused the request
    #[error("certificate authority rejected enrollment: {0}")]
    Rejected(String),

    /// The certificate authority could not be reached
    #[error("certificate authority unreachable: {0}")]
    Unreachable(String),

    /// Stale key material could not be removed
    #[error("could not clear credential store at {path}: {reason}")]
    CredentialStore { path: String, reason: String },
}

/// Provisioning pipeline failures
#[derive(Debug, Clone, Error)]
pub enum ProvisionError {
    /// Creating an owner failed; the phase-1 fan-out was abandoned
    #[error("could not create owner {username}: {source}")]
    OwnerCreation {
        username: String,
        #[source]
        source: LedgerError,
    },

    /// Creating an asset failed; the phase-2 fan-out was abandoned
    #[error("could not create asset for owner {owner_id}: {source}")]
    AssetCreation {
        owner_id: OwnerId,
        #[source]
        source: LedgerError,
    },
}

/// Errors surfaced by a bootstrap run
#[derive(Debug, Clone, Error)]
pub enum BootstrapError {
    /// Another run is in flight
    #[error("a bootstrap run is already in progress")]
    AlreadyRunning,

    /// No identity is held yet
    #[error("no enrolled identity; run enrollment first")]
    NotEnrolled,

    /// Enrollment failed after all attempts
    #[error("enrollment failed: {0}")]
    Enrollment(#[from] EnrollError),

    /// The chaincode was not found within the attempt budget
    #[error("chaincode not detected after {attempts} attempt(s): {reason}")]
    ChaincodeNotDetected { attempts: u32, reason: String },

    /// The deployed chaincode does not match what this application expects
    #[error("chaincode version {deployed} is incompatible with expected {expected}")]
    IncompatibleChaincode { expected: String, deployed: String },

    /// A phase was asked to run ahead of its prerequisite
    #[error(transparent)]
    PhaseOrder(#[from] PhaseOrderError),

    /// Provisioning failed
    #[error("provisioning failed: {0}")]
    Provision(#[from] ProvisionError),

    /// Invalid settings
    #[error("configuration error: {0}")]
    Config(String),
}

impl BootstrapError {
    /// Phase a failure is reported against, if any
    pub fn phase(&self) -> Option<BootstrapPhase> {
        match self {
            BootstrapError::Enrollment(_) | BootstrapError::NotEnrolled => {
                Some(BootstrapPhase::Enrollment)
            }
            BootstrapError::ChaincodeNotDetected { .. }
            | BootstrapError::IncompatibleChaincode { .. } => Some(BootstrapPhase::FindChaincode),
            BootstrapError::Provision(_) => Some(BootstrapPhase::Register),
            BootstrapError::PhaseOrder(e) => Some(e.phase),
            BootstrapError::AlreadyRunning | BootstrapError::Config(_) => None,
        }
    }

    /// Whether no automatic path can continue without an operator fixing
    /// the enrollment or chaincode settings.
    pub fn blocks_startup(&self) -> bool {
        matches!(
            self.phase(),
            Some(BootstrapPhase::Enrollment | BootstrapPhase::FindChaincode)
        )
    }
}

/// Result type for bootstrap operations.
pub type BootstrapResult<T> = Result<T, BootstrapError>;

/// Result type for ledger client operations.
pub type LedgerResult<T> = Result<T, LedgerError>;
