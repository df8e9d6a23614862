//! In-process ledger network.
//!
//! Backs the `memory` ledger backend of the daemon and every test in this
//! crate. The network keeps owners and assets in memory, simulates a
//! chaincode that takes a few probes to start, and records every call.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use ledgerboot_types::{BootstrapPhase, ChaincodeCall, ChaincodeFunction, LedgerOwner, PhaseStatus};
use serde_json::json;
use tracing::debug;

use crate::client::{
    CertificateAuthority, CredentialStore, EnrollmentRequest, Identity, InvokeReceipt,
    LedgerClient, QueryResponse,
};
use crate::error::{EnrollError, LedgerError, LedgerErrorKind, LedgerResult};
use crate::reporter::ProgressReporter;

/// Deployment state of the simulated chaincode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deployment {
    /// Never instantiated
    Absent,
    /// Container launching; this many more probes fail before it runs
    Starting { remaining: u32 },
    Running,
}

#[derive(Debug, Clone)]
struct StoredAsset {
    id: String,
    color: String,
    size: String,
    owner_id: String,
    company: String,
}

struct NetworkState {
    deployment: Deployment,
    selftest: String,
    compatibility: String,
    owners: Vec<LedgerOwner>,
    assets: Vec<StoredAsset>,
    invocations: Vec<ChaincodeCall>,
    fail_snapshot: bool,
    fail_function: Option<ChaincodeFunction>,
}

/// Simulated peer plus chaincode.
pub struct InMemoryNetwork {
    state: Mutex<NetworkState>,
    queries: AtomicUsize,
    tx_counter: AtomicU32,
}

impl Default for InMemoryNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryNetwork {
    /// A network with the chaincode already running
    pub fn new() -> Self {
        Self::with_deployment(Deployment::Running)
    }

    pub fn with_deployment(deployment: Deployment) -> Self {
        Self {
            state: Mutex::new(NetworkState {
                deployment,
                selftest: "1".to_string(),
                compatibility: "\"4.0.0\"".to_string(),
                owners: Vec::new(),
                assets: Vec::new(),
                invocations: Vec::new(),
                fail_snapshot: false,
                fail_function: None,
            }),
            queries: AtomicUsize::new(0),
            tx_counter: AtomicU32::new(0),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, NetworkState> {
        // A panicking test thread must not hide the state from the others
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_deployment(&self, deployment: Deployment) {
        self.state().deployment = deployment;
    }

    pub fn deployment(&self) -> Deployment {
        self.state().deployment
    }

    /// Raw payload returned by the selftest read
    pub fn set_selftest(&self, raw: impl Into<String>) {
        self.state().selftest = raw.into();
    }

    /// Version the chaincode reports as its compatibility record
    pub fn set_compatibility(&self, version: &str) {
        self.state().compatibility = json!(version).to_string();
    }

    /// Put an owner on the ledger without going through an invoke
    pub fn seed_owner(&self, owner: LedgerOwner) {
        self.state().owners.push(owner);
    }

    /// Make full ledger reads fail
    pub fn fail_snapshot(&self, fail: bool) {
        self.state().fail_snapshot = fail;
    }

    /// Make every invoke of `function` fail
    pub fn fail_function(&self, function: Option<ChaincodeFunction>) {
        self.state().fail_function = function;
    }

    pub fn owners(&self) -> Vec<LedgerOwner> {
        self.state().owners.clone()
    }

    /// Number of assets held by the owner with this key
    pub fn assets_of(&self, owner_id: &str) -> usize {
        self.state()
            .assets
            .iter()
            .filter(|a| a.owner_id == owner_id)
            .count()
    }

    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::Acquire)
    }

    pub fn invocations(&self) -> Vec<ChaincodeCall> {
        self.state().invocations.clone()
    }

    pub fn invocations_of(&self, function: ChaincodeFunction) -> Vec<ChaincodeCall> {
        self.state()
            .invocations
            .iter()
            .filter(|c| c.function == function)
            .cloned()
            .collect()
    }

    pub fn invocation_count(&self) -> usize {
        self.state().invocations.len()
    }

    fn next_tx_id(&self) -> String {
        format!("tx-{:08}", self.tx_counter.fetch_add(1, Ordering::AcqRel) + 1)
    }

    /// Advance the deployment for one probe, failing while it is not running
    fn ensure_running(state: &mut NetworkState, call: &ChaincodeCall) -> LedgerResult<()> {
        match state.deployment {
            Deployment::Running => Ok(()),
            Deployment::Absent => Err(LedgerError::not_found(format!(
                "chaincode {} not found on channel {}",
                call.target.chaincode_id, call.target.channel_id
            ))),
            Deployment::Starting { remaining } => {
                state.deployment = if remaining <= 1 {
                    Deployment::Running
                } else {
                    Deployment::Starting {
                        remaining: remaining - 1,
                    }
                };
                Err(LedgerError::from_message(format!(
                    "Error: premature execution - chaincode ({}:{}) is being launched",
                    call.target.chaincode_id, call.target.chaincode_version
                )))
            }
        }
    }

    fn snapshot_json(state: &NetworkState) -> serde_json::Value {
        let owners: Vec<_> = state
            .owners
            .iter()
            .map(|o| {
                json!({
                    "docType": "owner",
                    "id": o.id,
                    "username": o.username,
                    "company": o.company,
                    "enabled": true,
                })
            })
            .collect();
        let customers: Vec<_> = state
            .assets
            .iter()
            .map(|a| {
                json!({
                    "docType": "customer",
                    "id": a.id,
                    "color": a.color,
                    "size": a.size,
                    "owner": {"id": a.owner_id, "company": a.company},
                })
            })
            .collect();
        json!({ "owners": owners, "customers": customers })
    }
}

fn arg(call: &ChaincodeCall, index: usize) -> LedgerResult<String> {
    call.args.get(index).cloned().ok_or_else(|| {
        LedgerError::new(
            LedgerErrorKind::Rejected,
            format!("{} expects at least {} argument(s)", call.function, index + 1),
        )
    })
}

#[async_trait]
impl LedgerClient for InMemoryNetwork {
    async fn query(&self, _identity: &Identity, call: &ChaincodeCall) -> LedgerResult<QueryResponse> {
        self.queries.fetch_add(1, Ordering::AcqRel);
        let mut state = self.state();
        Self::ensure_running(&mut state, call)?;

        match call.function {
            ChaincodeFunction::Read => match call.args.first().map(String::as_str) {
                Some(ChaincodeCall::SELFTEST_KEY) => Ok(QueryResponse::from_raw(state.selftest.clone())),
                Some(ChaincodeCall::COMPATIBILITY_KEY) => {
                    Ok(QueryResponse::from_raw(state.compatibility.clone()))
                }
                Some(key) => Err(LedgerError::not_found(format!("no state for key {key}"))),
                None => Err(LedgerError::new(LedgerErrorKind::Rejected, "read expects a key")),
            },
            ChaincodeFunction::ReadEverything => {
                if state.fail_snapshot {
                    return Err(LedgerError::new(LedgerErrorKind::Transport, "peer closed the stream"));
                }
                Ok(QueryResponse::from_raw(Self::snapshot_json(&state).to_string()))
            }
            other => Err(LedgerError::new(
                LedgerErrorKind::Rejected,
                format!("{other} cannot be queried"),
            )),
        }
    }

    async fn invoke(&self, _identity: &Identity, call: &ChaincodeCall) -> LedgerResult<InvokeReceipt> {
        let mut state = self.state();
        state.invocations.push(call.clone());
        Self::ensure_running(&mut state, call)?;

        if state.fail_function == Some(call.function) {
            return Err(LedgerError::new(
                LedgerErrorKind::Rejected,
                format!("endorsement failed for {}", call.function),
            ));
        }

        match call.function {
            ChaincodeFunction::InitOwner => {
                let owner = LedgerOwner {
                    id: arg(call, 0)?,
                    username: arg(call, 1)?,
                    company: arg(call, 2)?,
                };
                if state.owners.iter().any(|o| o.id == owner.id) {
                    return Err(LedgerError::new(
                        LedgerErrorKind::Rejected,
                        format!("owner {} already exists", owner.id),
                    ));
                }
                debug!(id = %owner.id, username = %owner.username, "owner stored");
                state.owners.push(owner);
            }
            ChaincodeFunction::InitCustomer => {
                let asset = StoredAsset {
                    id: arg(call, 0)?,
                    color: arg(call, 1)?,
                    size: arg(call, 2)?,
                    owner_id: arg(call, 3)?,
                    company: arg(call, 4)?,
                };
                if !state.owners.iter().any(|o| o.id == asset.owner_id) {
                    return Err(LedgerError::new(
                        LedgerErrorKind::Rejected,
                        format!("owner {} does not exist", asset.owner_id),
                    ));
                }
                state.assets.push(asset);
            }
            other => {
                return Err(LedgerError::new(
                    LedgerErrorKind::Rejected,
                    format!("{other} cannot be invoked"),
                ))
            }
        }
        drop(state);
        Ok(InvokeReceipt {
            tx_id: self.next_tx_id(),
        })
    }
}

/// Certificate authority that issues identities locally.
#[derive(Default)]
pub struct InMemoryCertificateAuthority {
    failures_remaining: AtomicU32,
    calls: AtomicU32,
}

impl InMemoryCertificateAuthority {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject the next `count` enrollments
    pub fn fail_next(&self, count: u32) {
        self.failures_remaining.store(count, Ordering::Release);
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::Acquire)
    }
}

#[async_trait]
impl CertificateAuthority for InMemoryCertificateAuthority {
    async fn enroll(&self, request: &EnrollmentRequest) -> Result<Identity, EnrollError> {
        self.calls.fetch_add(1, Ordering::AcqRel);
        let failing = self
            .failures_remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(EnrollError::Rejected(format!(
                "authentication failure for {}",
                request.enroll_id
            )));
        }
        Ok(Identity {
            subject: request.enroll_id.clone(),
            msp_id: request.msp_id.clone(),
            certificate_pem: format!("-----BEGIN CERTIFICATE-----\n{}\n-----END CERTIFICATE-----", request.enroll_id),
            private_key_pem: String::new(),
            enrolled_at: Utc::now(),
        })
    }
}

/// Credential store that only counts how often it was cleared.
#[derive(Default)]
pub struct InMemoryCredentialStore {
    clears: AtomicU32,
    fail_clear: AtomicBool,
}

impl InMemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every clear fail, as with a read-only key store
    pub fn fail_clear(&self, fail: bool) {
        self.fail_clear.store(fail, Ordering::Release);
    }

    pub fn clear_count(&self) -> u32 {
        self.clears.load(Ordering::Acquire)
    }
}

#[async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn clear(&self) -> Result<(), EnrollError> {
        self.clears.fetch_add(1, Ordering::AcqRel);
        if self.fail_clear.load(Ordering::Acquire) {
            return Err(EnrollError::CredentialStore {
                path: "memory".to_string(),
                reason: "permission denied".to_string(),
            });
        }
        Ok(())
    }
}

/// Something a [`RecordingReporter`] saw
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recorded {
    Phase(BootstrapPhase, PhaseStatus),
    Broadcast,
    StartupUnsuccessful(String),
    UpdateCheck,
}

/// Reporter that keeps its full history.
#[derive(Default)]
pub struct RecordingReporter {
    history: Mutex<Vec<Recorded>>,
}

impl RecordingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, entry: Recorded) {
        self.history
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(entry);
    }

    pub fn history(&self) -> Vec<Recorded> {
        self.history
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Every status recorded for `phase`, in order
    pub fn statuses(&self, phase: BootstrapPhase) -> Vec<PhaseStatus> {
        self.history()
            .into_iter()
            .filter_map(|entry| match entry {
                Recorded::Phase(p, status) if p == phase => Some(status),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, wanted: &Recorded) -> usize {
        self.history().iter().filter(|e| *e == wanted).count()
    }
}

impl ProgressReporter for RecordingReporter {
    fn record_phase_status(&self, phase: BootstrapPhase, status: PhaseStatus) {
        self.push(Recorded::Phase(phase, status));
    }

    fn broadcast(&self) {
        self.push(Recorded::Broadcast);
    }

    fn startup_unsuccessful(&self, control_url: &str) {
        self.push(Recorded::StartupUnsuccessful(control_url.to_string()));
    }

    fn check_for_updates(&self) {
        self.push(Recorded::UpdateCheck);
    }
}

/// Identity for tests that never enroll
pub fn test_identity() -> Identity {
    Identity {
        subject: "admin".to_string(),
        msp_id: "Org1MSP".to_string(),
        certificate_pem: String::new(),
        private_key_pem: String::new(),
        enrolled_at: Utc::now(),
    }
}
