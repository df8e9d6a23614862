//! Version gate: the deployed chaincode must be compatible with this application.

use std::sync::Arc;

use ledgerboot_types::{ChaincodeCall, ChaincodeTarget};
use semver::Version;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::client::{Identity, LedgerClient, QueryResponse};

/// Decides whether a deployed version works with the expected one
pub trait CompatibilityPolicy: Send + Sync {
    fn is_compatible(&self, expected: &str, deployed: &str) -> bool;
}

/// Same major version, deployed at least as new as expected.
///
/// A leading `v` is ignored. Anything that does not parse is incompatible.
#[derive(Debug, Clone, Copy, Default)]
pub struct SemverCompatible;

impl SemverCompatible {
    fn parse(version: &str) -> Option<Version> {
        let trimmed = version.trim();
        let trimmed = trimmed.strip_prefix('v').unwrap_or(trimmed);
        Version::parse(trimmed).ok()
    }
}

impl CompatibilityPolicy for SemverCompatible {
    fn is_compatible(&self, expected: &str, deployed: &str) -> bool {
        match (Self::parse(expected), Self::parse(deployed)) {
            (Some(expected), Some(deployed)) => {
                deployed.major == expected.major && deployed >= expected
            }
            _ => false,
        }
    }
}

/// Outcome of a version check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum VersionVerdict {
    Compatible { deployed: String },
    Incompatible { expected: String, deployed: String },
}

impl VersionVerdict {
    pub fn is_compatible(&self) -> bool {
        matches!(self, VersionVerdict::Compatible { .. })
    }
}

/// Reads the chaincode's compatibility record and applies a policy.
#[derive(Clone)]
pub struct VersionGate {
    ledger: Arc<dyn LedgerClient>,
    policy: Arc<dyn CompatibilityPolicy>,
}

impl VersionGate {
    pub fn new(ledger: Arc<dyn LedgerClient>, policy: Arc<dyn CompatibilityPolicy>) -> Self {
        Self { ledger, policy }
    }

    /// Check the deployed chaincode against `expected`.
    ///
    /// An unreadable compatibility record is treated as incompatible.
    #[instrument(skip(self, identity, target))]
    pub async fn check_version(
        &self,
        identity: &Identity,
        target: &ChaincodeTarget,
        expected: &str,
    ) -> VersionVerdict {
        let deployed = match self
            .ledger
            .query(identity, &ChaincodeCall::compatibility(target))
            .await
        {
            Ok(response) => reported_version(&response),
            Err(e) => {
                warn!(error = %e, "could not read chaincode compatibility record");
                None
            }
        };

        match deployed {
            Some(deployed) if self.policy.is_compatible(expected, &deployed) => {
                info!(deployed = %deployed, "chaincode version is compatible");
                VersionVerdict::Compatible { deployed }
            }
            deployed => {
                let deployed = deployed.unwrap_or_else(|| "unknown".to_string());
                warn!(deployed = %deployed, expected, "chaincode version is incompatible");
                VersionVerdict::Incompatible {
                    expected: expected.to_string(),
                    deployed,
                }
            }
        }
    }
}

/// Version string carried by a compatibility record
fn reported_version(response: &QueryResponse) -> Option<String> {
    let version = match &response.parsed {
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(serde_json::Value::Object(map)) => map
            .get("version")
            .and_then(|v| v.as_str())
            .map(str::to_string)?,
        Some(serde_json::Value::Null) => return None,
        _ => response.raw.clone(),
    };
    let version = version.trim().to_string();
    (!version.is_empty()).then_some(version)
}
