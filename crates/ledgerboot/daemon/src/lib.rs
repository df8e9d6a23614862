//! Ledgerboot daemon library
//!
//! This module provides the runtime around the bootstrap orchestrator:
//! - REST control surface and event stream
//! - Gateway-backed ledger and certificate authority clients
//! - Filesystem credential store
//! - Server lifecycle management

pub mod api;
pub mod config;
pub mod credentials;
pub mod error;
pub mod gateway;
pub mod server;

pub use config::{DaemonConfig, LedgerBackend};
pub use credentials::FsCredentialStore;
pub use error::{ApiError, DaemonError};
pub use gateway::GatewayClient;
pub use server::{build_state, Server};
