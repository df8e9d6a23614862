//! Chaincode readiness detection.
//!
//! The detector probes the chaincode with a cheap read. While the peer
//! reports that the chaincode container is still starting it polls on a
//! fixed interval; anything else, or running out of attempts, is terminal.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ledgerboot_types::{ChaincodeCall, ChaincodeTarget};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::client::{Identity, LedgerClient};
use crate::error::{BootstrapError, BootstrapResult, LedgerError, LedgerResult};

/// Where a detection run is
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ReadinessState {
    /// Probe in flight
    Checking { attempt: u32 },

    /// Chaincode still starting; a retry is scheduled
    Polling { attempt: u32, retry_in: Duration },

    /// Chaincode answered the probe
    Ready,

    /// No further automatic retry
    FailedTerminal { attempt: u32, reason: String },
}

impl fmt::Display for ReadinessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadinessState::Checking { attempt } => write!(f, "checking (attempt {attempt})"),
            ReadinessState::Polling { attempt, retry_in } => {
                write!(f, "polling (attempt {attempt}, retry in {retry_in:?})")
            }
            ReadinessState::Ready => f.write_str("ready"),
            ReadinessState::FailedTerminal { attempt, reason } => {
                write!(f, "failed after attempt {attempt}: {reason}")
            }
        }
    }
}

/// Retry budget for the readiness loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessPolicy {
    /// Highest attempt number that may still be followed by a retry
    pub max_attempts: u32,
    pub poll_interval: Duration,
}

impl Default for ReadinessPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 40,
            poll_interval: Duration::from_secs(15),
        }
    }
}

impl ReadinessPolicy {
    /// Next state after a failed probe.
    ///
    /// Only a transient error within the budget is retried.
    pub fn on_probe_error(&self, attempt: u32, error: &LedgerError) -> ReadinessState {
        if error.is_transient() && attempt <= self.max_attempts {
            ReadinessState::Polling {
                attempt,
                retry_in: self.poll_interval,
            }
        } else {
            let reason = if error.is_transient() {
                format!("attempt budget of {} exhausted: {}", self.max_attempts, error)
            } else {
                error.to_string()
            };
            ReadinessState::FailedTerminal { attempt, reason }
        }
    }
}

/// Clears the in-flight flag when a detection run ends
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Polls the chaincode until it is ready or a terminal failure occurs.
pub struct ReadinessDetector {
    ledger: Arc<dyn LedgerClient>,
    attempts: AtomicU32,
    in_flight: AtomicBool,
}

impl ReadinessDetector {
    pub fn new(ledger: Arc<dyn LedgerClient>) -> Self {
        Self {
            ledger,
            attempts: AtomicU32::new(0),
            in_flight: AtomicBool::new(false),
        }
    }

    /// Attempts made by the current run; 0 once the chaincode was found
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::Acquire)
    }

    /// Whether a detection run is in flight
    pub fn is_running(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Send the selftest read once.
    ///
    /// A response without a numeric payload means the chaincode is not there.
    pub async fn probe(&self, identity: &Identity, target: &ChaincodeTarget) -> LedgerResult<()> {
        let response = self
            .ledger
            .query(identity, &ChaincodeCall::selftest(target))
            .await?;

        let numeric = match &response.parsed {
            Some(serde_json::Value::Number(_)) => true,
            Some(serde_json::Value::String(s)) => s.trim().parse::<f64>().is_ok(),
            _ => false,
        };
        if numeric {
            Ok(())
        } else {
            Err(LedgerError::not_found(format!(
                "selftest returned no numeric value: {:?}",
                response.raw
            )))
        }
    }

    /// Run the readiness loop.
    ///
    /// `observe` sees every state the run enters, in order. Only one run may
    /// be in flight per detector; a second concurrent call is refused.
    #[instrument(skip(self, identity, target, observe), fields(chaincode = %target.chaincode_id))]
    pub async fn detect<F>(
        &self,
        identity: &Identity,
        target: &ChaincodeTarget,
        policy: ReadinessPolicy,
        mut observe: F,
    ) -> BootstrapResult<()>
    where
        F: FnMut(&ReadinessState) + Send,
    {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(BootstrapError::AlreadyRunning);
        }
        let _guard = InFlight(&self.in_flight);

        // Fresh budget for every run
        self.attempts.store(0, Ordering::Release);

        loop {
            let attempt = self.attempts.fetch_add(1, Ordering::AcqRel) + 1;
            observe(&ReadinessState::Checking { attempt });
            debug!(attempt, "probing chaincode");

            let error = match self.probe(identity, target).await {
                Ok(()) => {
                    self.attempts.store(0, Ordering::Release);
                    info!(attempt, "chaincode is ready");
                    observe(&ReadinessState::Ready);
                    return Ok(());
                }
                Err(e) => e,
            };

            let next = policy.on_probe_error(attempt, &error);
            observe(&next);
            match next {
                ReadinessState::Polling { retry_in, .. } => {
                    info!(attempt, retry_in_secs = retry_in.as_secs(), "chaincode still starting; will retry");
                    tokio::time::sleep(retry_in).await;
                }
                ReadinessState::FailedTerminal { attempt, reason } => {
                    warn!(attempt, reason = %reason, "chaincode not detected");
                    return Err(BootstrapError::ChaincodeNotDetected {
                        attempts: attempt,
                        reason,
                    });
                }
                ReadinessState::Checking { .. } | ReadinessState::Ready => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LedgerErrorKind;
    use crate::memory::{test_identity, Deployment, InMemoryNetwork};

    fn detector(network: Arc<InMemoryNetwork>) -> ReadinessDetector {
        ReadinessDetector::new(network)
    }

    fn target() -> ChaincodeTarget {
        crate::BootstrapConfig::default().chaincode_target()
    }

    fn starting() -> LedgerError {
        LedgerError::new(LedgerErrorKind::ChaincodeStarting, "premature execution")
    }

    #[test]
    fn test_transient_within_budget_polls() {
        let policy = ReadinessPolicy::default();
        assert_eq!(
            policy.on_probe_error(40, &starting()),
            ReadinessState::Polling {
                attempt: 40,
                retry_in: Duration::from_secs(15),
            }
        );
    }

    #[test]
    fn test_transient_past_budget_fails() {
        let policy = ReadinessPolicy::default();
        assert!(matches!(
            policy.on_probe_error(41, &starting()),
            ReadinessState::FailedTerminal { attempt: 41, .. }
        ));
    }

    #[test]
    fn test_unrelated_error_fails_fast() {
        let policy = ReadinessPolicy::default();
        let error = LedgerError::new(LedgerErrorKind::Transport, "connection refused");
        assert!(matches!(
            policy.on_probe_error(1, &error),
            ReadinessState::FailedTerminal { attempt: 1, .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_after_three_polls() {
        let network = Arc::new(InMemoryNetwork::with_deployment(Deployment::Starting {
            remaining: 3,
        }));
        let detector = detector(network.clone());
        let mut states = Vec::new();

        let started = tokio::time::Instant::now();
        detector
            .detect(&test_identity(), &target(), ReadinessPolicy::default(), |s| states.push(s.clone()))
            .await
            .unwrap();

        let polls = states
            .iter()
            .filter(|s| matches!(s, ReadinessState::Polling { .. }))
            .count();
        assert_eq!(polls, 3);
        assert_eq!(states.last(), Some(&ReadinessState::Ready));
        assert_eq!(detector.attempts(), 0);
        assert_eq!(network.query_count(), 4);
        assert!(started.elapsed() >= Duration::from_secs(45));
    }

    #[tokio::test(start_paused = true)]
    async fn test_budget_exhausted_is_terminal() {
        let network = Arc::new(InMemoryNetwork::with_deployment(Deployment::Starting {
            remaining: 1_000,
        }));
        let detector = detector(network.clone());
        let mut polls = 0;

        let err = detector
            .detect(&test_identity(), &target(), ReadinessPolicy::default(), |s| {
                if matches!(s, ReadinessState::Polling { .. }) {
                    polls += 1;
                }
            })
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            BootstrapError::ChaincodeNotDetected { attempts: 41, .. }
        ));
        assert_eq!(polls, 40);
        assert_eq!(network.query_count(), 41);
        assert!(!detector.is_running());
    }

    #[tokio::test]
    async fn test_absent_chaincode_fails_immediately() {
        let network = Arc::new(InMemoryNetwork::with_deployment(Deployment::Absent));
        let detector = detector(network.clone());

        let err = detector
            .detect(&test_identity(), &target(), ReadinessPolicy::default(), |_| {})
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            BootstrapError::ChaincodeNotDetected { attempts: 1, .. }
        ));
        assert_eq!(network.query_count(), 1);
    }

    #[tokio::test]
    async fn test_non_numeric_selftest_is_not_found() {
        let network = Arc::new(InMemoryNetwork::new());
        network.set_selftest("null");
        let detector = detector(network);

        let err = detector.probe(&test_identity(), &target()).await.unwrap_err();
        assert_eq!(err.kind, LedgerErrorKind::NotFound);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_detection_refused() {
        let network = Arc::new(InMemoryNetwork::with_deployment(Deployment::Starting {
            remaining: 2,
        }));
        let detector = Arc::new(detector(network));
        let identity = test_identity();
        let target = target();

        let first = {
            let detector = detector.clone();
            let identity = identity.clone();
            let target = target.clone();
            tokio::spawn(async move { detector.detect(&identity, &target, ReadinessPolicy::default(), |_| {}).await })
        };
        // Let the first run reach its poll sleep
        tokio::task::yield_now().await;
        while !detector.is_running() {
            tokio::task::yield_now().await;
        }

        let second = detector.detect(&identity, &target, ReadinessPolicy::default(), |_| {}).await;
        assert!(matches!(second, Err(BootstrapError::AlreadyRunning)));
        assert!(first.await.unwrap().is_ok());
    }
}
