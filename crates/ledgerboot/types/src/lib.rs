//! Ledgerboot Types - Core types for ledger client bootstrap
//!
//! Ledgerboot brings a client application up against a permissioned ledger
//! network: it enrolls an identity, waits for the chaincode to be deployed,
//! checks compatibility and provisions the owners and assets the application
//! expects to find.
//!
//! ## Key Concepts
//!
//! - **BootstrapPhase / PhaseStatus**: the three observable startup phases
//! - **PhaseBoard**: the authoritative status of each phase, with ordering checks
//! - **OwnerId / AssetId**: fixed-width ledger keys
//! - **LedgerSnapshot**: the owners currently on the ledger
//! - **ChaincodeCall**: the option bundle handed to a ledger client
//! - **Events**: progress notifications pushed to observers

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod chaincode;
pub mod events;
pub mod ids;
pub mod phase;
pub mod records;

// Re-export main types
pub use chaincode::{ChaincodeCall, ChaincodeFunction, ChaincodeTarget, TlsOptions};
pub use events::{BootstrapEvent, BootstrapEventEnvelope};
pub use ids::{AssetId, OwnerId, KEY_DIGITS};
pub use phase::{BootstrapPhase, PhaseBoard, PhaseOrderError, PhaseStatus};
pub use records::{
    owner_key_name, AssetAttributes, CustomerAssignment, ExpectedPrincipals, LedgerOwner,
    LedgerSnapshot, OwnerRecord, ASSET_COLORS, ASSET_SIZES,
};
