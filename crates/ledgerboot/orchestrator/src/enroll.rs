//! Identity enrollment with a single stale-credential retry.

use std::sync::Arc;

use tracing::{info, instrument, warn};

use crate::client::{CertificateAuthority, CredentialStore, EnrollmentRequest, Identity};
use crate::error::EnrollError;

/// Obtains identities from the certificate authority.
#[derive(Clone)]
pub struct Enroller {
    ca: Arc<dyn CertificateAuthority>,
    credentials: Arc<dyn CredentialStore>,
    max_attempts: u32,
}

impl Enroller {
    pub fn new(
        ca: Arc<dyn CertificateAuthority>,
        credentials: Arc<dyn CredentialStore>,
        max_attempts: u32,
    ) -> Self {
        Self {
            ca,
            credentials,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Enroll starting at `attempt`.
    ///
    /// A failed attempt below the budget clears the local credential cache
    /// before retrying with `attempt + 1`; a cache that cannot be cleared
    /// does not stop the retry. The last enrollment failure is returned.
    #[instrument(skip(self, request), fields(enroll_id = %request.enroll_id))]
    pub async fn enroll(
        &self,
        request: &EnrollmentRequest,
        attempt: u32,
    ) -> Result<Identity, EnrollError> {
        let mut attempt = attempt.max(1);
        loop {
            match self.ca.enroll(request).await {
                Ok(identity) => {
                    info!(attempt, subject = %identity.subject, "enrolled");
                    return Ok(identity);
                }
                Err(e) if attempt < self.max_attempts => {
                    warn!(attempt, error = %e, "enrollment failed; clearing stale credentials");
                    if let Err(clear_err) = self.credentials.clear().await {
                        warn!(attempt, error = %clear_err, "could not clear stale credentials; retrying anyway");
                    }
                    attempt += 1;
                }
                Err(e) => {
                    warn!(attempt, error = %e, "enrollment failed; giving up");
                    return Err(e);
                }
            }
        }
    }

    /// Drop every cached credential
    pub async fn clear_credentials(&self) -> Result<(), EnrollError> {
        self.credentials.clear().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{InMemoryCertificateAuthority, InMemoryCredentialStore};

    fn request() -> EnrollmentRequest {
        crate::BootstrapConfig::default().enrollment_request()
    }

    #[tokio::test]
    async fn test_first_attempt_succeeds() {
        let ca = Arc::new(InMemoryCertificateAuthority::new());
        let store = Arc::new(InMemoryCredentialStore::new());
        let enroller = Enroller::new(ca.clone(), store.clone(), 2);

        let identity = enroller.enroll(&request(), 1).await.unwrap();
        assert_eq!(identity.subject, "admin");
        assert_eq!(ca.calls(), 1);
        assert_eq!(store.clear_count(), 0);
    }

    #[tokio::test]
    async fn test_retry_clears_credentials_once() {
        let ca = Arc::new(InMemoryCertificateAuthority::new());
        ca.fail_next(1);
        let store = Arc::new(InMemoryCredentialStore::new());
        let enroller = Enroller::new(ca.clone(), store.clone(), 2);

        assert!(enroller.enroll(&request(), 1).await.is_ok());
        assert_eq!(ca.calls(), 2);
        assert_eq!(store.clear_count(), 1);
    }

    #[tokio::test]
    async fn test_second_failure_surfaces() {
        let ca = Arc::new(InMemoryCertificateAuthority::new());
        ca.fail_next(2);
        let store = Arc::new(InMemoryCredentialStore::new());
        let enroller = Enroller::new(ca.clone(), store.clone(), 2);

        let err = enroller.enroll(&request(), 1).await.unwrap_err();
        assert!(matches!(err, EnrollError::Rejected(_)));
        assert_eq!(ca.calls(), 2);
        assert_eq!(store.clear_count(), 1);
    }

    #[tokio::test]
    async fn test_retry_survives_failed_credential_clear() {
        let ca = Arc::new(InMemoryCertificateAuthority::new());
        ca.fail_next(1);
        let store = Arc::new(InMemoryCredentialStore::new());
        store.fail_clear(true);
        let enroller = Enroller::new(ca.clone(), store.clone(), 2);

        let identity = enroller.enroll(&request(), 1).await.unwrap();
        assert_eq!(identity.subject, "admin");
        assert_eq!(ca.calls(), 2);
        assert_eq!(store.clear_count(), 1);
    }

    #[tokio::test]
    async fn test_starting_at_last_attempt_does_not_retry() {
        let ca = Arc::new(InMemoryCertificateAuthority::new());
        ca.fail_next(1);
        let store = Arc::new(InMemoryCredentialStore::new());
        let enroller = Enroller::new(ca.clone(), store.clone(), 2);

        assert!(enroller.enroll(&request(), 2).await.is_err());
        assert_eq!(ca.calls(), 1);
        assert_eq!(store.clear_count(), 0);
    }
}
