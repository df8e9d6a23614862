//! Two-phase provisioning: owners first, then their assets.
//!
//! Each phase fans its create calls out concurrently and joins them behind a
//! barrier; the first failure abandons the phase. Between the phases the
//! pipeline waits a settle delay so the new owners have propagated to the
//! peers that validate the asset creates.

use std::sync::Arc;
use std::time::Duration;

use futures::future::try_join_all;
use ledgerboot_types::{
    AssetAttributes, AssetId, ChaincodeCall, ChaincodeTarget, CustomerAssignment,
    ExpectedPrincipals, OwnerId, OwnerRecord, ASSET_COLORS, ASSET_SIZES,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument, warn};

use crate::client::{Identity, LedgerClient};
use crate::config::BootstrapConfig;
use crate::error::ProvisionError;
use crate::reconcile::Reconciler;

/// Length of the per-run entropy string mixed into color selection
const ENTROPY_LEN: usize = 32;

/// Knobs for one provisioning run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisioningSettings {
    pub company: String,
    pub block_delay: Duration,
    pub assets_per_owner: usize,
    pub seed: Option<u64>,
}

impl From<&BootstrapConfig> for ProvisioningSettings {
    fn from(config: &BootstrapConfig) -> Self {
        Self {
            company: config.company.clone(),
            block_delay: config.block_delay(),
            assets_per_owner: config.provisioning.assets_per_owner,
            seed: config.provisioning.seed,
        }
    }
}

/// What a provisioning run created
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisioningReport {
    pub owners: Vec<OwnerRecord>,
    pub assignments: Vec<CustomerAssignment>,
    pub assets: Vec<AssetId>,
}

impl ProvisioningReport {
    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }
}

/// Chooses demo attributes for new assets. Not cryptographically meaningful.
pub struct AssetAttributePicker {
    entropy: String,
    rng: StdRng,
}

impl AssetAttributePicker {
    pub fn new(seed: Option<u64>) -> Self {
        let mut rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let entropy = (&mut rng)
            .sample_iter(rand::distributions::Alphanumeric)
            .take(ENTROPY_LEN)
            .map(char::from)
            .collect();
        Self { entropy, rng }
    }

    /// Attributes for the `ordinal`-th asset of a run
    pub fn pick(&mut self, company: &str, ordinal: usize) -> AssetAttributes {
        let hash = simple_hash(&format!("{}{}{}", self.entropy, company, ordinal));
        let color = ASSET_COLORS[hash as usize % ASSET_COLORS.len()];
        let size = ASSET_SIZES[self.rng.gen_range(0..ASSET_SIZES.len())];
        AssetAttributes {
            color: color.to_string(),
            size: size.to_string(),
        }
    }

    /// Owner key for a new owner
    pub fn owner_id(&mut self) -> OwnerId {
        OwnerId::generate_at(chrono::Utc::now().timestamp_millis(), &mut self.rng)
    }

    /// Asset key for a new asset
    pub fn asset_id(&mut self) -> AssetId {
        AssetId::generate_at(chrono::Utc::now().timestamp_millis(), &mut self.rng)
    }
}

/// 31-multiplier string hash, always non-negative
fn simple_hash(input: &str) -> u32 {
    let hash = input
        .chars()
        .fold(0i32, |acc, c| acc.wrapping_mul(31).wrapping_add(c as i32));
    hash.unsigned_abs()
}

/// Creates missing owners and their assets.
#[derive(Clone)]
pub struct Provisioner {
    ledger: Arc<dyn LedgerClient>,
    reconciler: Reconciler,
}

impl Provisioner {
    pub fn new(ledger: Arc<dyn LedgerClient>) -> Self {
        Self {
            reconciler: Reconciler::new(ledger.clone()),
            ledger,
        }
    }

    /// Provision every name in `usernames` that has no owner for the company.
    ///
    /// The ledger is re-read first, so names already present cost no calls.
    /// If it cannot be read, every name is created.
    #[instrument(skip_all, fields(company = %settings.company, requested = usernames.len()))]
    pub async fn provision(
        &self,
        identity: &Identity,
        target: &ChaincodeTarget,
        usernames: &ExpectedPrincipals,
        settings: &ProvisioningSettings,
    ) -> Result<ProvisioningReport, ProvisionError> {
        let to_create = match self.reconciler.fetch_snapshot(identity, target).await {
            Ok(snapshot) => usernames.missing_from(&snapshot, &settings.company),
            Err(e) => {
                warn!(error = %e, "could not read ledger before provisioning; creating every owner");
                usernames.as_slice().to_vec()
            }
        };

        if to_create.is_empty() {
            info!("every owner already exists; nothing to provision");
            return Ok(ProvisioningReport::default());
        }

        let mut picker = AssetAttributePicker::new(settings.seed);

        // Phase 1: owners
        let owners: Vec<OwnerRecord> = to_create
            .into_iter()
            .map(|username| OwnerRecord {
                id: picker.owner_id(),
                username,
            })
            .collect();
        self.create_owners(identity, target, &owners, &settings.company)
            .await?;
        info!(owners = owners.len(), "owners created");

        // Settle
        debug!(delay_ms = settings.block_delay.as_millis() as u64, "waiting for owners to propagate");
        tokio::time::sleep(settings.block_delay).await;

        // Phase 2: assets
        let assignments = CustomerAssignment::replicate(&owners, settings.assets_per_owner);
        let assets: Vec<(AssetId, AssetAttributes, &CustomerAssignment)> = assignments
            .iter()
            .enumerate()
            .map(|(ordinal, assignment)| {
                (
                    picker.asset_id(),
                    picker.pick(&settings.company, ordinal),
                    assignment,
                )
            })
            .collect();
        try_join_all(assets.iter().map(|(id, attributes, assignment)| async move {
            let call = ChaincodeCall::init_customer(
                target,
                id,
                attributes,
                &assignment.owner_id,
                &settings.company,
            );
            self.ledger.invoke(identity, &call).await.map_err(|source| {
                error!(owner_id = %assignment.owner_id, error = %source, "asset creation failed");
                ProvisionError::AssetCreation {
                    owner_id: assignment.owner_id.clone(),
                    source,
                }
            })
        }))
        .await?;
        info!(assets = assets.len(), "assets created");

        let assets = assets.into_iter().map(|(id, _, _)| id).collect();
        Ok(ProvisioningReport {
            owners,
            assignments,
            assets,
        })
    }

    async fn create_owners(
        &self,
        identity: &Identity,
        target: &ChaincodeTarget,
        owners: &[OwnerRecord],
        company: &str,
    ) -> Result<(), ProvisionError> {
        try_join_all(owners.iter().map(|owner| async move {
            let call = ChaincodeCall::init_owner(target, &owner.id, &owner.username, company);
            let receipt = self.ledger.invoke(identity, &call).await.map_err(|source| {
                error!(username = %owner.username, error = %source, "owner creation failed");
                ProvisionError::OwnerCreation {
                    username: owner.username.clone(),
                    source,
                }
            })?;
            debug!(username = %owner.username, tx_id = %receipt.tx_id, "owner created");
            Ok::<_, ProvisionError>(())
        }))
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{test_identity, InMemoryNetwork};
    use ledgerboot_types::{ChaincodeFunction, LedgerOwner};

    const COMPANY: &str = "United Customers";

    fn settings() -> ProvisioningSettings {
        ProvisioningSettings {
            company: COMPANY.into(),
            block_delay: Duration::from_millis(10_000),
            assets_per_owner: 3,
            seed: Some(7),
        }
    }

    fn target() -> ChaincodeTarget {
        BootstrapConfig::default().chaincode_target()
    }

    #[tokio::test(start_paused = true)]
    async fn test_only_missing_owner_is_created() {
        let network = Arc::new(InMemoryNetwork::new());
        network.seed_owner(LedgerOwner {
            id: "o0000000000000000001".into(),
            username: "alice".into(),
            company: COMPANY.into(),
        });
        let provisioner = Provisioner::new(network.clone());

        let report = provisioner
            .provision(
                &test_identity(),
                &target(),
                &ExpectedPrincipals::new(["alice", "bob"]),
                &settings(),
            )
            .await
            .unwrap();

        assert_eq!(report.owners.len(), 1);
        assert_eq!(report.owners[0].username, "bob");
        assert_eq!(report.assignments.len(), 3);
        assert!(report
            .assignments
            .iter()
            .all(|a| a.owner_id == report.owners[0].id));
        assert_eq!(network.invocations_of(ChaincodeFunction::InitOwner).len(), 1);

        let customers = network.invocations_of(ChaincodeFunction::InitCustomer);
        assert_eq!(customers.len(), 3);
        assert!(customers
            .iter()
            .all(|call| call.args[3] == report.owners[0].id.as_str() && call.args[4] == COMPANY));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fully_present_makes_no_calls() {
        let network = Arc::new(InMemoryNetwork::new());
        for name in ["alice", "bob"] {
            network.seed_owner(LedgerOwner {
                id: format!("o-{name}"),
                username: name.into(),
                company: COMPANY.into(),
            });
        }
        let provisioner = Provisioner::new(network.clone());

        let report = provisioner
            .provision(
                &test_identity(),
                &target(),
                &ExpectedPrincipals::new(["alice", "bob"]),
                &settings(),
            )
            .await
            .unwrap();

        assert!(report.is_empty());
        assert_eq!(network.invocation_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_settle_delay_separates_phases() {
        let network = Arc::new(InMemoryNetwork::new());
        let provisioner = Provisioner::new(network.clone());
        let started = tokio::time::Instant::now();

        provisioner
            .provision(
                &test_identity(),
                &target(),
                &ExpectedPrincipals::new(["amy"]),
                &settings(),
            )
            .await
            .unwrap();

        assert!(started.elapsed() >= Duration::from_millis(10_000));
        let functions: Vec<_> = network.invocations().iter().map(|c| c.function).collect();
        let last_owner = functions
            .iter()
            .rposition(|f| *f == ChaincodeFunction::InitOwner)
            .unwrap();
        let first_asset = functions
            .iter()
            .position(|f| *f == ChaincodeFunction::InitCustomer)
            .unwrap();
        assert!(last_owner < first_asset);
    }

    #[tokio::test(start_paused = true)]
    async fn test_owner_failure_skips_assets() {
        let network = Arc::new(InMemoryNetwork::new());
        network.fail_function(Some(ChaincodeFunction::InitOwner));
        let provisioner = Provisioner::new(network.clone());

        let err = provisioner
            .provision(
                &test_identity(),
                &target(),
                &ExpectedPrincipals::new(["amy", "ava"]),
                &settings(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, ProvisionError::OwnerCreation { .. }));
        assert!(network
            .invocations_of(ChaincodeFunction::InitCustomer)
            .is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreadable_ledger_creates_everyone() {
        let network = Arc::new(InMemoryNetwork::new());
        network.fail_snapshot(true);
        let provisioner = Provisioner::new(network.clone());

        let report = provisioner
            .provision(
                &test_identity(),
                &target(),
                &ExpectedPrincipals::new(["amy", "ava"]),
                &settings(),
            )
            .await
            .unwrap();
        assert_eq!(report.owners.len(), 2);
        assert_eq!(report.assets.len(), 6);
    }

    #[test]
    fn test_picker_uses_fixed_value_sets() {
        let mut picker = AssetAttributePicker::new(Some(42));
        for ordinal in 0..20 {
            let attributes = picker.pick(COMPANY, ordinal);
            assert!(ASSET_COLORS.contains(&attributes.color.as_str()));
            assert!(ASSET_SIZES.contains(&attributes.size.as_str()));
        }
    }

    #[test]
    fn test_seeded_picker_is_repeatable() {
        let mut a = AssetAttributePicker::new(Some(9));
        let mut b = AssetAttributePicker::new(Some(9));
        let left: Vec<_> = (0..6).map(|i| a.pick(COMPANY, i)).collect();
        let right: Vec<_> = (0..6).map(|i| b.pick(COMPANY, i)).collect();
        assert_eq!(left, right);
    }

    #[test]
    fn test_simple_hash_is_stable() {
        assert_eq!(simple_hash(""), 0);
        assert_eq!(simple_hash("a"), 97);
        assert_eq!(simple_hash("ab"), 97 * 31 + 98);
    }
}
