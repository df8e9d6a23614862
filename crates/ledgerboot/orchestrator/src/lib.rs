//! Ledgerboot Orchestrator - Bootstrap a client against a ledger network
//!
//! The orchestrator takes a client application from nothing to a ledger that
//! holds every owner it expects:
//!
//! 1. **Enroll** an identity with the certificate authority, clearing stale
//!    key material and retrying once on failure
//! 2. **Detect** the chaincode, polling while its container is starting
//! 3. **Gate** on the chaincode's self-reported compatibility version
//! 4. **Reconcile** the configured owners against a fresh ledger snapshot
//! 5. **Provision** missing owners, wait for them to settle, then create
//!    their assets
//!
//! Every stage reports its phase status through a [`ProgressReporter`]. The
//! network is reached only through the traits in [`client`]; [`memory`]
//! provides an in-process network.
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use ledgerboot_orchestrator::memory::*;
//! use ledgerboot_orchestrator::*;
//!
//! let orchestrator = BootstrapOrchestrator::new(
//!     BootstrapConfig::default(),
//!     Collaborators::new(
//!         Arc::new(InMemoryCertificateAuthority::new()),
//!         Arc::new(InMemoryCredentialStore::new()),
//!         Arc::new(InMemoryNetwork::new()),
//!     ),
//!     Arc::new(BroadcastReporter::default()),
//! )?;
//! orchestrator
//!     .handle_configure(ConfigureEvent::FindChaincode { settings: None })
//!     .await?;
//! ```

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod client;
pub mod config;
pub mod enroll;
pub mod error;
pub mod memory;
pub mod orchestrator;
pub mod provision;
pub mod readiness;
pub mod reconcile;
pub mod reporter;
pub mod version;

pub use client::{
    CertificateAuthority, CredentialStore, EnrollmentRequest, Identity, InvokeReceipt,
    LedgerClient, QueryResponse,
};
pub use config::{
    BootstrapConfig, CertificateAuthorityConfig, ChaincodeConfig, ControlEndpoint,
    EnrollmentConfig, PeerConfig, ProvisioningConfig, ReadinessConfig,
};
pub use enroll::Enroller;
pub use error::{
    BootstrapError, BootstrapResult, EnrollError, LedgerError, LedgerErrorKind, LedgerResult,
    ProvisionError,
};
pub use orchestrator::{BootstrapOrchestrator, BootstrapOutcome, Collaborators, ConfigureEvent};
pub use provision::{AssetAttributePicker, Provisioner, ProvisioningReport, ProvisioningSettings};
pub use readiness::{ReadinessDetector, ReadinessPolicy, ReadinessState};
pub use reconcile::{compare, Reconciler, Reconciliation};
pub use reporter::{BroadcastReporter, ProgressReporter};
pub use version::{CompatibilityPolicy, SemverCompatible, VersionGate, VersionVerdict};
