//! Bootstrap configuration.
//!
//! Everything the orchestrator needs to know about the network, the
//! chaincode and the principals it should provision.

use std::time::Duration;

use ledgerboot_types::{ChaincodeTarget, ExpectedPrincipals, TlsOptions};
use serde::{Deserialize, Serialize};

use crate::client::EnrollmentRequest;
use crate::error::{BootstrapError, BootstrapResult};
use crate::readiness::ReadinessPolicy;

/// Configuration for one bootstrap run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootstrapConfig {
    /// Company the owners are registered under.
    pub company: String,

    /// Owner usernames expected on the ledger.
    #[serde(default)]
    pub usernames: ExpectedPrincipals,

    /// Channel the chaincode is instantiated on.
    pub channel_id: String,

    /// Peers on the channel; the first one receives every call.
    pub peers: Vec<PeerConfig>,

    /// Certificate authority used for enrollment.
    pub certificate_authority: CertificateAuthorityConfig,

    /// Target chaincode.
    pub chaincode: ChaincodeConfig,

    /// Readiness polling.
    #[serde(default)]
    pub readiness: ReadinessConfig,

    /// Enrollment retries and credential cache.
    #[serde(default)]
    pub enrollment: EnrollmentConfig,

    /// Owner and asset provisioning.
    #[serde(default)]
    pub provisioning: ProvisioningConfig,

    /// Re-enrollment period in seconds.
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,

    /// Where operators reach the control surface.
    #[serde(default)]
    pub control: ControlEndpoint,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            company: "United Customers".to_string(),
            usernames: ExpectedPrincipals::new(["amy", "alice", "ava"]),
            channel_id: "mychannel".to_string(),
            peers: vec![PeerConfig {
                name: "peer0".to_string(),
                url: "grpc://localhost:7051".to_string(),
                tls: TlsOptions::default(),
            }],
            certificate_authority: CertificateAuthorityConfig::default(),
            chaincode: ChaincodeConfig::default(),
            readiness: ReadinessConfig::default(),
            enrollment: EnrollmentConfig::default(),
            provisioning: ProvisioningConfig::default(),
            keep_alive_secs: default_keep_alive_secs(),
            control: ControlEndpoint::default(),
        }
    }
}

/// A peer on the channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerConfig {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub tls: TlsOptions,
}

/// Certificate authority endpoint and admin credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertificateAuthorityConfig {
    pub url: String,

    /// CA name inside a multi-CA server.
    #[serde(default)]
    pub name: Option<String>,

    /// Membership service provider the identity belongs to.
    #[serde(default = "default_msp_id")]
    pub msp_id: String,

    pub enroll_id: String,
    pub enroll_secret: String,
}

impl Default for CertificateAuthorityConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:7054".to_string(),
            name: None,
            msp_id: default_msp_id(),
            enroll_id: "admin".to_string(),
            enroll_secret: "adminpw".to_string(),
        }
    }
}

/// Chaincode identity and the version this application works with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChaincodeConfig {
    pub id: String,
    pub version: String,

    /// Version the chaincode must report under its compatibility key.
    pub expected_compat: String,
}

impl Default for ChaincodeConfig {
    fn default() -> Self {
        Self {
            id: "customers".to_string(),
            version: "v4".to_string(),
            expected_compat: "4.0.0".to_string(),
        }
    }
}

/// Readiness polling. Defaults give roughly ten minutes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessConfig {
    /// Highest attempt number that may still be followed by a retry.
    #[serde(default = "default_readiness_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_readiness_attempts(),
            poll_interval_secs: default_poll_interval_secs(),
        }
    }
}

/// Enrollment retries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrollmentConfig {
    /// Total attempts; the credential cache is cleared between them.
    #[serde(default = "default_enroll_attempts")]
    pub max_attempts: u32,

    /// Local key-value store holding cached key material.
    #[serde(default = "default_kvs_path")]
    pub kvs_path: String,
}

impl Default for EnrollmentConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_enroll_attempts(),
            kvs_path: default_kvs_path(),
        }
    }
}

/// Provisioning pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisioningConfig {
    /// Wait between owner creation and asset creation.
    #[serde(default = "default_block_delay_ms")]
    pub block_delay_ms: u64,

    /// Assets created for every new owner.
    #[serde(default = "default_assets_per_owner")]
    pub assets_per_owner: usize,

    /// Seed for asset attribute selection; random when absent.
    #[serde(default)]
    pub seed: Option<u64>,
}

impl Default for ProvisioningConfig {
    fn default() -> Self {
        Self {
            block_delay_ms: default_block_delay_ms(),
            assets_per_owner: default_assets_per_owner(),
            seed: None,
        }
    }
}

/// Control surface an operator opens after a terminal failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlEndpoint {
    pub host: String,
    pub port: u16,
}

impl Default for ControlEndpoint {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 3001,
        }
    }
}

impl ControlEndpoint {
    pub fn url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

// Default value helpers
fn default_keep_alive_secs() -> u64 {
    30
}

fn default_msp_id() -> String {
    "Org1MSP".to_string()
}

fn default_readiness_attempts() -> u32 {
    40
}

fn default_poll_interval_secs() -> u64 {
    15
}

fn default_enroll_attempts() -> u32 {
    2
}

fn default_kvs_path() -> String {
    ".ledgerboot/kvs".to_string()
}

fn default_block_delay_ms() -> u64 {
    10_000
}

fn default_assets_per_owner() -> usize {
    3
}

impl BootstrapConfig {
    /// Reject settings no run could succeed with
    pub fn validate(&self) -> BootstrapResult<()> {
        if self.company.trim().is_empty() {
            return Err(BootstrapError::Config("company must not be empty".into()));
        }
        if self.channel_id.trim().is_empty() {
            return Err(BootstrapError::Config("channel_id must not be empty".into()));
        }
        if self.peers.is_empty() {
            return Err(BootstrapError::Config("at least one peer is required".into()));
        }
        if self.chaincode.id.trim().is_empty() {
            return Err(BootstrapError::Config("chaincode.id must not be empty".into()));
        }
        if self.readiness.max_attempts == 0 || self.readiness.poll_interval_secs == 0 {
            return Err(BootstrapError::Config(
                "readiness budget and poll interval must be positive".into(),
            ));
        }
        if self.enrollment.max_attempts == 0 {
            return Err(BootstrapError::Config(
                "enrollment.max_attempts must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Call target for the first peer on the channel
    pub fn chaincode_target(&self) -> ChaincodeTarget {
        let first = self.peers.first();
        ChaincodeTarget {
            peer_urls: first.map(|p| vec![p.url.clone()]).unwrap_or_default(),
            peer_tls_opts: first.map(|p| p.tls.clone()).unwrap_or_default(),
            channel_id: self.channel_id.clone(),
            chaincode_id: self.chaincode.id.clone(),
            chaincode_version: self.chaincode.version.clone(),
        }
    }

    pub fn enrollment_request(&self) -> EnrollmentRequest {
        EnrollmentRequest {
            ca_url: self.certificate_authority.url.clone(),
            ca_name: self.certificate_authority.name.clone(),
            msp_id: self.certificate_authority.msp_id.clone(),
            enroll_id: self.certificate_authority.enroll_id.clone(),
            enroll_secret: self.certificate_authority.enroll_secret.clone(),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.readiness.poll_interval_secs)
    }

    pub fn readiness_policy(&self) -> ReadinessPolicy {
        ReadinessPolicy {
            max_attempts: self.readiness.max_attempts,
            poll_interval: self.poll_interval(),
        }
    }

    pub fn block_delay(&self) -> Duration {
        Duration::from_millis(self.provisioning.block_delay_ms)
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs.max(1))
    }
}
