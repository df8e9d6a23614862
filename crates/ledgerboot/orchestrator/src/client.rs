//! Collaborator seams: certificate authority, credential store and ledger client.
//!
//! The orchestrator only talks to the network through these traits. The
//! daemon provides HTTP gateway implementations; [`crate::memory`] provides
//! an in-process network for development and tests.

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ledgerboot_types::ChaincodeCall;
use serde::{Deserialize, Serialize};

use crate::error::{EnrollError, LedgerResult};

/// Network identity obtained from a certificate authority.
///
/// Replaced wholesale on re-enrollment, never mutated.
#[derive(Clone, Serialize, Deserialize)]
pub struct Identity {
    /// Enrollment ID the certificate was issued to
    pub subject: String,

    /// Membership service provider
    pub msp_id: String,

    /// Signed enrollment certificate
    pub certificate_pem: String,

    /// Private key; never serialized
    #[serde(skip_serializing, default)]
    pub private_key_pem: String,

    pub enrolled_at: DateTime<Utc>,
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("subject", &self.subject)
            .field("msp_id", &self.msp_id)
            .field("private_key_pem", &"<redacted>")
            .field("enrolled_at", &self.enrolled_at)
            .finish()
    }
}

/// What the certificate authority needs to issue an identity
#[derive(Clone, Serialize, Deserialize)]
pub struct EnrollmentRequest {
    pub ca_url: String,
    pub ca_name: Option<String>,
    pub msp_id: String,
    pub enroll_id: String,
    #[serde(skip_serializing)]
    pub enroll_secret: String,
}

impl fmt::Debug for EnrollmentRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnrollmentRequest")
            .field("ca_url", &self.ca_url)
            .field("ca_name", &self.ca_name)
            .field("msp_id", &self.msp_id)
            .field("enroll_id", &self.enroll_id)
            .finish_non_exhaustive()
    }
}

/// Response to a read-only chaincode query
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResponse {
    /// Payload parsed as JSON, when it parses
    pub parsed: Option<serde_json::Value>,

    /// Raw payload as returned by the peer
    pub raw: String,
}

impl QueryResponse {
    /// Build from a raw payload, parsing it when possible
    pub fn from_raw(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        Self {
            parsed: serde_json::from_str(&raw).ok(),
            raw,
        }
    }
}

/// Acknowledgement of a committed invoke
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvokeReceipt {
    pub tx_id: String,
}

/// Issues network identities
#[async_trait]
pub trait CertificateAuthority: Send + Sync {
    async fn enroll(&self, request: &EnrollmentRequest) -> Result<Identity, EnrollError>;
}

/// Local cache of key material
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Remove every cached credential. Clearing an empty store succeeds.
    async fn clear(&self) -> Result<(), EnrollError>;
}

/// Sends chaincode queries and invokes to a peer
#[async_trait]
pub trait LedgerClient: Send + Sync {
    async fn query(&self, identity: &Identity, call: &ChaincodeCall) -> LedgerResult<QueryResponse>;

    async fn invoke(&self, identity: &Identity, call: &ChaincodeCall) -> LedgerResult<InvokeReceipt>;
}
