//! Ledger reconciliation: which expected owners are missing.

use std::sync::Arc;

use ledgerboot_types::{ChaincodeCall, ChaincodeTarget, ExpectedPrincipals, LedgerSnapshot};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::client::{Identity, LedgerClient};
use crate::error::{LedgerError, LedgerErrorKind, LedgerResult};

/// Result of comparing the ledger with the expected owners
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reconciliation {
    pub needs_provisioning: bool,

    /// Whether any owner on the ledger belongs to the configured company
    pub company_registered: bool,

    /// Expected usernames with no owner for the company, in configured order
    pub missing: Vec<String>,

    /// Set when the snapshot could not be read
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_error: Option<String>,
}

/// Compare a snapshot against the expected owners of `company`
pub fn compare(
    snapshot: &LedgerSnapshot,
    expected: &ExpectedPrincipals,
    company: &str,
) -> Reconciliation {
    let company_registered = snapshot.has_company(company);
    let missing = expected.missing_from(snapshot, company);
    Reconciliation {
        needs_provisioning: !company_registered || !missing.is_empty(),
        company_registered,
        missing,
        snapshot_error: None,
    }
}

/// Reads the ledger and decides whether provisioning is needed.
#[derive(Clone)]
pub struct Reconciler {
    ledger: Arc<dyn LedgerClient>,
}

impl Reconciler {
    pub fn new(ledger: Arc<dyn LedgerClient>) -> Self {
        Self { ledger }
    }

    /// Read every owner on the ledger. Never cached.
    pub async fn fetch_snapshot(
        &self,
        identity: &Identity,
        target: &ChaincodeTarget,
    ) -> LedgerResult<LedgerSnapshot> {
        let response = self
            .ledger
            .query(identity, &ChaincodeCall::read_everything(target))
            .await?;
        let parsed = response
            .parsed
            .ok_or_else(|| LedgerError::not_found("ledger returned no parsable snapshot"))?;
        serde_json::from_value(parsed)
            .map_err(|e| LedgerError::new(LedgerErrorKind::Other, format!("bad snapshot: {e}")))
    }

    /// Reconcile the ledger with `expected`.
    ///
    /// A snapshot that cannot be read counts as needing provisioning for
    /// every expected name.
    #[instrument(skip(self, identity, target, expected), fields(expected = expected.len()))]
    pub async fn reconcile(
        &self,
        identity: &Identity,
        target: &ChaincodeTarget,
        expected: &ExpectedPrincipals,
        company: &str,
    ) -> Reconciliation {
        match self.fetch_snapshot(identity, target).await {
            Ok(snapshot) => {
                let result = compare(&snapshot, expected, company);
                if result.needs_provisioning {
                    info!(
                        missing = ?result.missing,
                        company_registered = result.company_registered,
                        "ledger is missing expected owners"
                    );
                } else {
                    debug!(owners = snapshot.owners.len(), "ledger already has every expected owner");
                }
                result
            }
            Err(e) => {
                warn!(error = %e, "could not read ledger snapshot; assuming provisioning is needed");
                Reconciliation {
                    needs_provisioning: true,
                    company_registered: false,
                    missing: expected.as_slice().to_vec(),
                    snapshot_error: Some(e.to_string()),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{test_identity, InMemoryNetwork};
    use ledgerboot_types::LedgerOwner;
    use proptest::prelude::*;

    const COMPANY: &str = "United Customers";

    fn snapshot(owners: &[(&str, &str)]) -> LedgerSnapshot {
        LedgerSnapshot {
            owners: owners
                .iter()
                .enumerate()
                .map(|(i, (username, company))| LedgerOwner {
                    id: format!("o{i}"),
                    username: username.to_string(),
                    company: company.to_string(),
                })
                .collect(),
        }
    }

    #[test]
    fn test_only_alice_present() {
        let result = compare(
            &snapshot(&[("alice", COMPANY)]),
            &ExpectedPrincipals::new(["alice", "bob"]),
            COMPANY,
        );
        assert!(result.needs_provisioning);
        assert_eq!(result.missing, vec!["bob".to_string()]);
    }

    #[test]
    fn test_everyone_present() {
        let result = compare(
            &snapshot(&[("alice", COMPANY), ("bob", COMPANY), ("carol", "Other")]),
            &ExpectedPrincipals::new(["alice", "bob"]),
            COMPANY,
        );
        assert!(!result.needs_provisioning);
        assert!(result.missing.is_empty());
    }

    #[test]
    fn test_unknown_company_needs_provisioning() {
        let result = compare(
            &snapshot(&[("alice", "Other")]),
            &ExpectedPrincipals::default(),
            COMPANY,
        );
        assert!(result.needs_provisioning);
        assert!(!result.company_registered);
    }

    #[tokio::test]
    async fn test_snapshot_read_failure_fails_open() {
        let network = Arc::new(InMemoryNetwork::new());
        network.fail_snapshot(true);
        let reconciler = Reconciler::new(network);
        let target = crate::BootstrapConfig::default().chaincode_target();

        let result = reconciler
            .reconcile(
                &test_identity(),
                &target,
                &ExpectedPrincipals::new(["alice"]),
                COMPANY,
            )
            .await;
        assert!(result.needs_provisioning);
        assert_eq!(result.missing, vec!["alice".to_string()]);
        assert!(result.snapshot_error.is_some());
    }

    proptest! {
        #[test]
        fn prop_needs_provisioning_iff_someone_missing(
            expected in proptest::collection::vec("[a-e]", 1..5),
            present in proptest::collection::vec("[a-e]", 0..5),
        ) {
            let mut owners: Vec<(&str, &str)> =
                present.iter().map(|name| (name.as_str(), COMPANY)).collect();
            // Keep the company registered so only missing names matter
            owners.push(("zz-anchor", COMPANY));
            let principals = ExpectedPrincipals::new(&expected);
            let result = compare(&snapshot(&owners), &principals, COMPANY);

            let any_missing = principals.iter().any(|name| !present.iter().any(|p| p == name));
            prop_assert_eq!(result.needs_provisioning, any_missing);
        }
    }
}
