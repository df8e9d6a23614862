//! Filesystem credential store

use std::io::ErrorKind;
use std::path::PathBuf;

use async_trait::async_trait;
use ledgerboot_orchestrator::{CredentialStore, EnrollError};
use tracing::info;

/// Key-value store directory holding cached key material
#[derive(Debug, Clone)]
pub struct FsCredentialStore {
    path: PathBuf,
}

impl FsCredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl CredentialStore for FsCredentialStore {
    async fn clear(&self) -> Result<(), EnrollError> {
        let store_error = |e: std::io::Error| EnrollError::CredentialStore {
            path: self.path.display().to_string(),
            reason: e.to_string(),
        };

        match tokio::fs::remove_dir_all(&self.path).await {
            Ok(()) => info!(path = %self.path.display(), "removed cached credentials"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(store_error(e)),
        }
        tokio::fs::create_dir_all(&self.path)
            .await
            .map_err(store_error)
    }
}
