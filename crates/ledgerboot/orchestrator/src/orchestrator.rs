//! Bootstrap orchestrator.
//!
//! Drives enrollment, readiness detection, the version gate, reconciliation
//! and provisioning in order, recording every phase status on its own
//! [`PhaseBoard`] before mirroring it to the reporter. A stage that fails
//! halts the run; the next [`ConfigureEvent`] starts over from that stage.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use ledgerboot_types::{BootstrapPhase, ExpectedPrincipals, PhaseBoard, PhaseStatus};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::client::{CertificateAuthority, CredentialStore, Identity, LedgerClient};
use crate::config::BootstrapConfig;
use crate::enroll::Enroller;
use crate::error::{BootstrapError, BootstrapResult};
use crate::provision::{Provisioner, ProvisioningReport, ProvisioningSettings};
use crate::readiness::{ReadinessDetector, ReadinessState};
use crate::reconcile::{Reconciler, Reconciliation};
use crate::reporter::ProgressReporter;
use crate::version::{CompatibilityPolicy, SemverCompatible, VersionGate, VersionVerdict};

/// External re-trigger of a bootstrap run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "configure", rename_all = "snake_case")]
pub enum ConfigureEvent {
    /// Clear cached credentials, apply settings, then run everything
    Enrollment {
        #[serde(default)]
        settings: Option<Box<BootstrapConfig>>,
    },

    /// Apply settings, re-enroll, then run everything
    FindChaincode {
        #[serde(default)]
        settings: Option<Box<BootstrapConfig>>,
    },

    /// Provision these owners now
    Register {
        #[serde(alias = "build_customer_owners")]
        usernames: ExpectedPrincipals,
    },
}

impl ConfigureEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ConfigureEvent::Enrollment { .. } => "enrollment",
            ConfigureEvent::FindChaincode { .. } => "find_chaincode",
            ConfigureEvent::Register { .. } => "register",
        }
    }
}

/// How a successful run ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum BootstrapOutcome {
    /// Every expected owner was already on the ledger
    UpToDate,
    /// Missing owners and their assets were created
    Provisioned(ProvisioningReport),
}

/// Network-facing collaborators
#[derive(Clone)]
pub struct Collaborators {
    pub certificate_authority: Arc<dyn CertificateAuthority>,
    pub credentials: Arc<dyn CredentialStore>,
    pub ledger: Arc<dyn LedgerClient>,
    pub compatibility: Arc<dyn CompatibilityPolicy>,
}

impl Collaborators {
    /// Collaborators using the default semver compatibility policy
    pub fn new(
        certificate_authority: Arc<dyn CertificateAuthority>,
        credentials: Arc<dyn CredentialStore>,
        ledger: Arc<dyn LedgerClient>,
    ) -> Self {
        Self {
            certificate_authority,
            credentials,
            ledger,
            compatibility: Arc::new(SemverCompatible),
        }
    }
}

/// Clears the running flag when a run ends
struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// [`RunGuard`] for runs moved onto their own task
struct OwnedRunGuard(Arc<BootstrapOrchestrator>);

impl Drop for OwnedRunGuard {
    fn drop(&mut self) {
        self.0.running.store(false, Ordering::Release);
    }
}

/// Owns the bootstrap state of the process: settings, the held identity,
/// the readiness attempt counter and the status of every phase.
pub struct BootstrapOrchestrator {
    config: RwLock<BootstrapConfig>,
    collaborators: Collaborators,
    detector: ReadinessDetector,
    reconciler: Reconciler,
    provisioner: Provisioner,
    version_gate: VersionGate,
    reporter: Arc<dyn ProgressReporter>,
    identity: RwLock<Option<Arc<Identity>>>,
    board: Mutex<PhaseBoard>,
    running: AtomicBool,
}

impl BootstrapOrchestrator {
    /// Create an orchestrator. Fails on invalid settings.
    pub fn new(
        config: BootstrapConfig,
        collaborators: Collaborators,
        reporter: Arc<dyn ProgressReporter>,
    ) -> BootstrapResult<Self> {
        config.validate()?;
        let ledger = collaborators.ledger.clone();

        Ok(Self {
            config: RwLock::new(config),
            detector: ReadinessDetector::new(ledger.clone()),
            reconciler: Reconciler::new(ledger.clone()),
            provisioner: Provisioner::new(ledger.clone()),
            version_gate: VersionGate::new(ledger, collaborators.compatibility.clone()),
            collaborators,
            reporter,
            identity: RwLock::new(None),
            board: Mutex::new(PhaseBoard::new()),
            running: AtomicBool::new(false),
        })
    }

    /// Current settings
    pub async fn config(&self) -> BootstrapConfig {
        self.config.read().await.clone()
    }

    /// Copy of the phase board
    pub fn phase_board(&self) -> PhaseBoard {
        self.board().clone()
    }

    /// Identity currently held, if enrolled
    pub async fn identity(&self) -> Option<Arc<Identity>> {
        self.identity.read().await.clone()
    }

    /// Attempts made by the readiness loop in flight
    pub fn readiness_attempts(&self) -> u32 {
        self.detector.attempts()
    }

    /// Whether a configure event is being handled
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn board(&self) -> MutexGuard<'_, PhaseBoard> {
        self.board.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn enroller(&self, config: &BootstrapConfig) -> Enroller {
        Enroller::new(
            self.collaborators.certificate_authority.clone(),
            self.collaborators.credentials.clone(),
            config.enrollment.max_attempts,
        )
    }

    async fn require_identity(&self) -> BootstrapResult<Arc<Identity>> {
        self.identity().await.ok_or(BootstrapError::NotEnrolled)
    }

    /// Record a phase status on the board, then mirror it and any demoted
    /// downstream phases to the reporter.
    pub fn set_status(&self, phase: BootstrapPhase, status: PhaseStatus) -> BootstrapResult<()> {
        let changed = self.board().transition(phase, status)?;
        self.reporter.record_phase_status(phase, status);
        for (later, demoted) in changed.into_iter().filter(|(p, _)| *p != phase) {
            debug!(phase = %later, status = %demoted, "downstream phase demoted");
            self.reporter.record_phase_status(later, demoted);
        }
        Ok(())
    }

    /// Record a failure and push the board to observers
    fn fail(&self, phase: BootstrapPhase) {
        if let Err(e) = self.set_status(phase, PhaseStatus::Failed) {
            error!(error = %e, "could not record failure");
        }
        self.reporter.broadcast();
    }

    /// Handle a configure event.
    ///
    /// Only one event is handled at a time; a concurrent one is refused with
    /// [`BootstrapError::AlreadyRunning`]. When enrollment or chaincode
    /// detection fails the reporter is told that startup was unsuccessful.
    pub async fn handle_configure(&self, event: ConfigureEvent) -> BootstrapResult<BootstrapOutcome> {
        self.claim_run()?;
        let _guard = RunGuard(&self.running);
        self.dispatch(event).await
    }

    /// Claim the run and handle `event` on a background task.
    ///
    /// The claim happens before this returns, so a concurrent caller gets
    /// [`BootstrapError::AlreadyRunning`] immediately instead of from inside
    /// the task.
    pub fn spawn_configure(
        self: &Arc<Self>,
        event: ConfigureEvent,
    ) -> BootstrapResult<JoinHandle<BootstrapResult<BootstrapOutcome>>> {
        self.claim_run()?;
        let guard = OwnedRunGuard(Arc::clone(self));
        Ok(tokio::spawn(async move {
            let result = guard.0.dispatch(event).await;
            drop(guard);
            result
        }))
    }

    fn claim_run(&self) -> BootstrapResult<()> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|_| {
                warn!("bootstrap run already in progress; ignoring configure event");
                BootstrapError::AlreadyRunning
            })
    }

    #[instrument(skip(self, event), fields(configure = event.name()))]
    async fn dispatch(&self, event: ConfigureEvent) -> BootstrapResult<BootstrapOutcome> {
        let result = match event {
            ConfigureEvent::Enrollment { settings } => {
                let enroller = self.enroller(&self.config().await);
                if let Err(e) = enroller.clear_credentials().await {
                    warn!(error = %e, "could not clear stale credentials; enrolling anyway");
                }
                self.run(settings.map(|s| *s)).await
            }
            ConfigureEvent::FindChaincode { settings } => self.run(settings.map(|s| *s)).await,
            ConfigureEvent::Register { usernames } => self
                .provision(&usernames)
                .await
                .map(BootstrapOutcome::Provisioned),
        };

        if let Err(e) = &result {
            if e.blocks_startup() {
                let control_url = self.config.read().await.control.url();
                self.reporter.startup_unsuccessful(&control_url);
            }
        }
        result
    }

    async fn run(&self, settings: Option<BootstrapConfig>) -> BootstrapResult<BootstrapOutcome> {
        if let Some(settings) = settings {
            self.apply_settings(settings).await?;
        }

        self.enroll().await?;
        self.detect_chaincode().await?;
        let reconciliation = self.reconcile().await?;
        if !reconciliation.needs_provisioning {
            return Ok(BootstrapOutcome::UpToDate);
        }

        let usernames = self.config.read().await.usernames.clone();
        self.provision(&usernames)
            .await
            .map(BootstrapOutcome::Provisioned)
    }

    async fn apply_settings(&self, settings: BootstrapConfig) -> BootstrapResult<()> {
        settings.validate()?;
        info!(company = %settings.company, channel = %settings.channel_id, "applying new settings");
        *self.config.write().await = settings;
        Ok(())
    }

    /// Enroll with the certificate authority and replace the held identity.
    #[instrument(skip(self))]
    pub async fn enroll(&self) -> BootstrapResult<Arc<Identity>> {
        let config = self.config().await;
        self.set_status(BootstrapPhase::Enrollment, PhaseStatus::Polling)?;

        match self
            .enroller(&config)
            .enroll(&config.enrollment_request(), 1)
            .await
        {
            Ok(identity) => {
                let identity = Arc::new(identity);
                *self.identity.write().await = Some(identity.clone());
                self.set_status(BootstrapPhase::Enrollment, PhaseStatus::Success)?;
                Ok(identity)
            }
            Err(e) => {
                error!(error = %e, "could not enroll; fix the certificate authority settings and resubmit");
                self.fail(BootstrapPhase::Enrollment);
                Err(e.into())
            }
        }
    }

    /// Wait for the chaincode, then check its version.
    #[instrument(skip(self))]
    pub async fn detect_chaincode(&self) -> BootstrapResult<()> {
        let identity = self.require_identity().await?;
        let config = self.config().await;
        let target = config.chaincode_target();

        self.set_status(BootstrapPhase::FindChaincode, PhaseStatus::Waiting)?;
        let detected = self
            .detector
            .detect(&identity, &target, config.readiness_policy(), |state| {
                if let ReadinessState::Polling { .. } = state {
                    if let Err(e) = self.set_status(BootstrapPhase::FindChaincode, PhaseStatus::Polling) {
                        warn!(error = %e, "could not record polling status");
                    }
                    self.reporter.broadcast();
                }
            })
            .await;
        if let Err(e) = detected {
            self.fail(BootstrapPhase::FindChaincode);
            return Err(e);
        }

        match self
            .version_gate
            .check_version(&identity, &target, &config.chaincode.expected_compat)
            .await
        {
            VersionVerdict::Compatible { .. } => {
                self.set_status(BootstrapPhase::FindChaincode, PhaseStatus::Success)?;
                self.reporter.broadcast();
                Ok(())
            }
            VersionVerdict::Incompatible { expected, deployed } => {
                self.fail(BootstrapPhase::FindChaincode);
                Err(BootstrapError::IncompatibleChaincode { expected, deployed })
            }
        }
    }

    /// Compare the ledger with the configured owners.
    ///
    /// Marks `register` as waiting when owners are missing and as succeeded
    /// when everything is present.
    #[instrument(skip(self))]
    pub async fn reconcile(&self) -> BootstrapResult<Reconciliation> {
        let identity = self.require_identity().await?;
        let config = self.config().await;

        let reconciliation = self
            .reconciler
            .reconcile(
                &identity,
                &config.chaincode_target(),
                &config.usernames,
                &config.company,
            )
            .await;

        let status = if reconciliation.needs_provisioning {
            PhaseStatus::Waiting
        } else {
            info!("everything is in place");
            PhaseStatus::Success
        };
        self.set_status(BootstrapPhase::Register, status)?;
        self.reporter.broadcast();
        Ok(reconciliation)
    }

    /// Provision `usernames` for the configured company.
    ///
    /// Refused while `find_chaincode` has not succeeded. On completion
    /// `register` succeeds and observers are asked to check for updates.
    #[instrument(skip(self, usernames), fields(usernames = usernames.len()))]
    pub async fn provision(
        &self,
        usernames: &ExpectedPrincipals,
    ) -> BootstrapResult<ProvisioningReport> {
        self.board()
            .check(BootstrapPhase::Register, PhaseStatus::Success)?;
        let identity = self.require_identity().await?;
        let config = self.config().await;

        self.set_status(BootstrapPhase::Register, PhaseStatus::Waiting)?;
        let result = self
            .provisioner
            .provision(
                &identity,
                &config.chaincode_target(),
                usernames,
                &ProvisioningSettings::from(&config),
            )
            .await;

        match result {
            Ok(report) => {
                self.set_status(BootstrapPhase::Register, PhaseStatus::Success)?;
                self.reporter.broadcast();
                self.reporter.check_for_updates();
                info!(
                    owners = report.owners.len(),
                    assets = report.assets.len(),
                    "provisioning complete"
                );
                Ok(report)
            }
            Err(e) => {
                error!(error = %e, "provisioning failed; resubmit to retry");
                self.fail(BootstrapPhase::Register);
                Err(e.into())
            }
        }
    }

    /// Re-enroll without touching phase statuses
    async fn refresh_identity(&self) {
        if self.identity().await.is_none() {
            debug!("not enrolled yet; skipping keep-alive enrollment");
            return;
        }
        let config = self.config().await;
        match self
            .enroller(&config)
            .enroll(&config.enrollment_request(), 1)
            .await
        {
            Ok(identity) => {
                *self.identity.write().await = Some(Arc::new(identity));
                debug!("keep-alive enrollment refreshed identity");
            }
            Err(e) => warn!(error = %e, "keep-alive enrollment failed"),
        }
    }

    /// Spawn the periodic re-enrollment task.
    pub fn spawn_keep_alive(self: &Arc<Self>) -> JoinHandle<()> {
        let orchestrator = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let period = orchestrator.config.read().await.keep_alive();
                tokio::time::sleep(period).await;
                orchestrator.refresh_identity().await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProvisionError;
    use crate::memory::{
        Deployment, InMemoryCertificateAuthority, InMemoryCredentialStore, InMemoryNetwork,
        Recorded, RecordingReporter,
    };
    use ledgerboot_types::{ChaincodeFunction, LedgerOwner};
    use std::time::Duration;

    const COMPANY: &str = "United Customers";

    struct Harness {
        network: Arc<InMemoryNetwork>,
        ca: Arc<InMemoryCertificateAuthority>,
        credentials: Arc<InMemoryCredentialStore>,
        reporter: Arc<RecordingReporter>,
        orchestrator: Arc<BootstrapOrchestrator>,
    }

    fn config(usernames: &[&str]) -> BootstrapConfig {
        BootstrapConfig {
            company: COMPANY.into(),
            usernames: ExpectedPrincipals::new(usernames),
            ..Default::default()
        }
    }

    fn harness(deployment: Deployment, usernames: &[&str]) -> Harness {
        let network = Arc::new(InMemoryNetwork::with_deployment(deployment));
        let ca = Arc::new(InMemoryCertificateAuthority::new());
        let credentials = Arc::new(InMemoryCredentialStore::new());
        let reporter = Arc::new(RecordingReporter::new());
        let orchestrator = BootstrapOrchestrator::new(
            config(usernames),
            Collaborators::new(ca.clone(), credentials.clone(), network.clone()),
            reporter.clone(),
        )
        .unwrap();
        Harness {
            network,
            ca,
            credentials,
            reporter,
            orchestrator: Arc::new(orchestrator),
        }
    }

    fn find_chaincode() -> ConfigureEvent {
        ConfigureEvent::FindChaincode { settings: None }
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_run_after_chaincode_starts() {
        let h = harness(Deployment::Starting { remaining: 3 }, &["amy", "ava"]);

        let outcome = h.orchestrator.handle_configure(find_chaincode()).await.unwrap();

        let BootstrapOutcome::Provisioned(report) = outcome else {
            panic!("expected provisioning");
        };
        assert_eq!(report.owners.len(), 2);
        assert_eq!(report.assets.len(), 6);
        assert!(h.orchestrator.phase_board().is_complete());
        assert_eq!(h.orchestrator.readiness_attempts(), 0);

        let polls = h
            .reporter
            .statuses(BootstrapPhase::FindChaincode)
            .into_iter()
            .filter(|s| *s == PhaseStatus::Polling)
            .count();
        assert_eq!(polls, 3);
        assert_eq!(h.reporter.count(&Recorded::UpdateCheck), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_alice_present_bob_provisioned() {
        let h = harness(Deployment::Running, &["alice", "bob"]);
        h.network.seed_owner(LedgerOwner {
            id: "o0000000000000000001".into(),
            username: "alice".into(),
            company: COMPANY.into(),
        });

        let outcome = h.orchestrator.handle_configure(find_chaincode()).await.unwrap();

        let BootstrapOutcome::Provisioned(report) = outcome else {
            panic!("expected provisioning");
        };
        assert_eq!(report.owners.len(), 1);
        assert_eq!(report.owners[0].username, "bob");
        assert_eq!(report.assignments.len(), 3);
        assert_eq!(h.network.assets_of(report.owners[0].id.as_str()), 3);
        assert_eq!(
            h.reporter.statuses(BootstrapPhase::Register),
            vec![PhaseStatus::Waiting, PhaseStatus::Waiting, PhaseStatus::Success]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_run_is_up_to_date() {
        let h = harness(Deployment::Running, &["amy"]);

        h.orchestrator.handle_configure(find_chaincode()).await.unwrap();
        let calls = h.network.invocation_count();

        let outcome = h.orchestrator.handle_configure(find_chaincode()).await.unwrap();
        assert_eq!(outcome, BootstrapOutcome::UpToDate);
        assert_eq!(h.network.invocation_count(), calls);

        let report = h
            .orchestrator
            .handle_configure(ConfigureEvent::Register {
                usernames: ExpectedPrincipals::new(["amy"]),
            })
            .await
            .unwrap();
        assert_eq!(report, BootstrapOutcome::Provisioned(ProvisioningReport::default()));
        assert_eq!(h.network.invocation_count(), calls);
    }

    #[tokio::test]
    async fn test_register_refused_before_chaincode_found() {
        let h = harness(Deployment::Running, &["amy"]);

        let err = h
            .orchestrator
            .handle_configure(ConfigureEvent::Register {
                usernames: ExpectedPrincipals::new(["amy"]),
            })
            .await
            .unwrap_err();

        assert!(matches!(err, BootstrapError::PhaseOrder(_)));
        assert_eq!(h.network.invocation_count(), 0);
        assert!(!h.orchestrator.phase_board().is_success(BootstrapPhase::Register));
    }

    #[tokio::test]
    async fn test_incompatible_chaincode_blocks_startup() {
        let h = harness(Deployment::Running, &["amy"]);
        h.network.set_compatibility("3.0.0");

        let err = h.orchestrator.handle_configure(find_chaincode()).await.unwrap_err();

        assert!(matches!(err, BootstrapError::IncompatibleChaincode { .. }));
        let board = h.orchestrator.phase_board();
        assert_eq!(board.get(BootstrapPhase::FindChaincode), PhaseStatus::Failed);
        assert_eq!(board.get(BootstrapPhase::Register), PhaseStatus::Waiting);
        assert_eq!(
            h.reporter.count(&Recorded::StartupUnsuccessful("http://localhost:3001".into())),
            1
        );
        assert_eq!(h.network.invocation_count(), 0);
    }

    #[tokio::test]
    async fn test_absent_chaincode_fails_without_polling() {
        let h = harness(Deployment::Absent, &["amy"]);

        let err = h.orchestrator.handle_configure(find_chaincode()).await.unwrap_err();

        assert!(matches!(err, BootstrapError::ChaincodeNotDetected { attempts: 1, .. }));
        assert!(!h
            .reporter
            .statuses(BootstrapPhase::FindChaincode)
            .contains(&PhaseStatus::Polling));
    }

    #[tokio::test]
    async fn test_enrollment_failure_is_terminal() {
        let h = harness(Deployment::Running, &["amy"]);
        h.ca.fail_next(2);

        let err = h.orchestrator.handle_configure(find_chaincode()).await.unwrap_err();

        assert!(matches!(err, BootstrapError::Enrollment(_)));
        assert_eq!(
            h.orchestrator.phase_board().get(BootstrapPhase::Enrollment),
            PhaseStatus::Failed
        );
        assert!(h.orchestrator.identity().await.is_none());
        assert_eq!(h.network.query_count(), 0);
        assert_eq!(h.credentials.clear_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_enrollment_event_applies_settings() {
        let h = harness(Deployment::Running, &["amy"]);
        let settings = BootstrapConfig {
            company: "Acme".into(),
            usernames: ExpectedPrincipals::new(["zoe"]),
            ..Default::default()
        };

        h.orchestrator
            .handle_configure(ConfigureEvent::Enrollment {
                settings: Some(Box::new(settings)),
            })
            .await
            .unwrap();

        assert_eq!(h.credentials.clear_count(), 1);
        let owners = h.network.owners();
        assert_eq!(owners.len(), 1);
        assert_eq!(owners[0].username, "zoe");
        assert_eq!(owners[0].company, "Acme");
        assert_eq!(h.orchestrator.config().await.company, "Acme");
    }

    #[tokio::test(start_paused = true)]
    async fn test_enrollment_event_runs_when_clear_fails() {
        let h = harness(Deployment::Running, &["amy"]);
        h.credentials.fail_clear(true);
        h.ca.fail_next(1);

        let outcome = h
            .orchestrator
            .handle_configure(ConfigureEvent::Enrollment { settings: None })
            .await
            .unwrap();

        assert!(matches!(outcome, BootstrapOutcome::Provisioned(_)));
        // Once up front, once between the two enrollment attempts
        assert_eq!(h.credentials.clear_count(), 2);
        assert_eq!(h.ca.calls(), 2);
        assert_eq!(
            h.orchestrator.phase_board().get(BootstrapPhase::Enrollment),
            PhaseStatus::Success
        );
        assert!(h.orchestrator.phase_board().is_complete());
    }

    #[tokio::test(start_paused = true)]
    async fn test_asset_failure_marks_register_failed() {
        let h = harness(Deployment::Running, &["amy"]);
        h.network.fail_function(Some(ChaincodeFunction::InitCustomer));

        let err = h.orchestrator.handle_configure(find_chaincode()).await.unwrap_err();

        assert!(matches!(
            err,
            BootstrapError::Provision(ProvisionError::AssetCreation { .. })
        ));
        assert_eq!(
            h.orchestrator.phase_board().get(BootstrapPhase::Register),
            PhaseStatus::Failed
        );
        assert_eq!(h.reporter.count(&Recorded::UpdateCheck), 0);
        // Provisioning failures do not send operators to the control surface
        assert!(!h
            .reporter
            .history()
            .iter()
            .any(|e| matches!(e, Recorded::StartupUnsuccessful(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_configure_refused() {
        let h = harness(Deployment::Starting { remaining: 2 }, &["amy"]);

        let first = {
            let orchestrator = h.orchestrator.clone();
            tokio::spawn(async move { orchestrator.handle_configure(find_chaincode()).await })
        };
        while !h.orchestrator.is_running() {
            tokio::task::yield_now().await;
        }

        let second = h.orchestrator.handle_configure(find_chaincode()).await;
        assert!(matches!(second, Err(BootstrapError::AlreadyRunning)));
        assert!(first.await.unwrap().is_ok());
        assert!(!h.orchestrator.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawn_configure_claims_before_returning() {
        let h = harness(Deployment::Starting { remaining: 2 }, &["amy"]);

        let first = h.orchestrator.spawn_configure(find_chaincode()).unwrap();
        // No yield in between: the claim is already visible
        assert!(h.orchestrator.is_running());
        let second = h.orchestrator.spawn_configure(find_chaincode());
        assert!(matches!(second, Err(BootstrapError::AlreadyRunning)));

        assert!(first.await.unwrap().is_ok());
        assert!(!h.orchestrator.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_aborted_spawned_run_releases_claim() {
        let h = harness(Deployment::Starting { remaining: 5 }, &["amy"]);

        let handle = h.orchestrator.spawn_configure(find_chaincode()).unwrap();
        handle.abort();
        let _ = handle.await;

        assert!(!h.orchestrator.is_running());
        assert!(h.orchestrator.spawn_configure(find_chaincode()).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_keep_alive_replaces_identity() {
        let h = harness(Deployment::Running, &["amy"]);
        let first = h.orchestrator.enroll().await.unwrap();
        let handle = h.orchestrator.spawn_keep_alive();

        tokio::time::sleep(Duration::from_secs(61)).await;

        let current = h.orchestrator.identity().await.unwrap();
        assert!(!Arc::ptr_eq(&first, &current));
        assert_eq!(h.ca.calls(), 3);
        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_keep_alive_failure_keeps_statuses() {
        let h = harness(Deployment::Running, &["amy"]);
        h.orchestrator.handle_configure(find_chaincode()).await.unwrap();
        let board = h.orchestrator.phase_board();
        let handle = h.orchestrator.spawn_keep_alive();
        h.ca.fail_next(2);

        tokio::time::sleep(Duration::from_secs(31)).await;

        assert_eq!(h.orchestrator.phase_board().statuses(), board.statuses());
        assert!(h.orchestrator.identity().await.is_some());
        handle.abort();
    }

    #[test]
    fn test_configure_event_wire_format() {
        let event: ConfigureEvent = serde_json::from_value(serde_json::json!({
            "configure": "register",
            "build_customer_owners": ["amy", " bob "]
        }))
        .unwrap();
        match event {
            ConfigureEvent::Register { usernames } => {
                assert_eq!(usernames.as_slice(), ["amy", "bob"]);
            }
            other => panic!("unexpected event: {other:?}"),
        }

        let event: ConfigureEvent =
            serde_json::from_value(serde_json::json!({"configure": "find_chaincode"})).unwrap();
        assert_eq!(event.name(), "find_chaincode");
    }
}
