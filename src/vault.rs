use std::sync::Arc;

use tracing::{debug, warn};

use crate::backend_client::NativeBackend;
use crate::error::{AppError, Result};

/// VPN secret custody, delegated to the native backend.
pub struct CredentialVault<B: NativeBackend + ?Sized> {
    backend: Arc<B>,
}

impl<B: NativeBackend + ?Sized> Clone for CredentialVault<B> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
        }
    }
}

impl<B: NativeBackend + ?Sized> CredentialVault<B> {
    pub fn new(backend: Arc<B>) -> Self {
        Self { backend }
    }

    /// Hand the trimmed secret to the backend's anonymous slot.
    pub async fn save(&self, secret: &str) -> Result<()> {
        let secret = secret.trim();
        if secret.is_empty() {
            return Err(AppError::Credential("secret cannot be empty".into()));
        }
        self.backend
            .save_vpn_password(secret)
            .await
            .map_err(|e| AppError::Credential(e.to_string()))?;
        debug!("vault_secret_saved");
        Ok(())
    }

    /// Link the pending secret to `username`. Failures are logged only.
    pub async fn associate(&self, username: &str) {
        match self.backend.associate_username(username).await {
            Ok(()) => debug!( username = ?username, "vault_secret_associated"),
            // Nothing pending: the secret was associated earlier.
            Err(AppError::CredentialNotFound) => {
                debug!( username = ?username, "vault_nothing_to_associate")
            }
            Err(e) => warn!(
                username = ?username,
                error = ?e.to_string(), "vault_associate_failed"),
        }
    }

    pub async fn get(&self, username: &str) -> Result<Option<String>> {
        self.backend
            .get_vpn_password(username)
            .await
            .map_err(|e| AppError::Credential(e.to_string()))
    }

    /// Best-effort removal; never blocks logout.
    pub async fn clear(&self, username: &str) {
        if let Err(e) = self.backend.clear_credentials(username).await {
            warn!(
                username = ?username,
                error = ?e.to_string(), "vault_clear_failed");
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::FakeBackend;
    use super::*;

    #[tokio::test]
    async fn test_save_trims_secret() {
        let backend = Arc::new(FakeBackend::default());
        let vault = CredentialVault::new(Arc::clone(&backend));

        vault.save("  hunter2\n").await.unwrap();
        assert_eq!(backend.calls(), vec!["save:hunter2"]);
    }

    #[tokio::test]
    async fn test_save_rejects_blank_secret_without_backend_call() {
        let backend = Arc::new(FakeBackend::default());
        let vault = CredentialVault::new(Arc::clone(&backend));

        assert!(matches!(
            vault.save("   ").await,
            Err(AppError::Credential(_))
        ));
        assert!(backend.calls().is_empty());
    }

    #[tokio::test]
    async fn test_save_failure_is_credential_error() {
        let backend = Arc::new(FakeBackend {
            fail_save: true,
            ..FakeBackend::default()
        });
        let vault = CredentialVault::new(backend);
        assert!(matches!(
            vault.save("hunter2").await,
            Err(AppError::Credential(_))
        ));
    }

    #[tokio::test]
    async fn test_associate_absorbs_failure_and_get_returns_absent() {
        let backend = Arc::new(FakeBackend::default());
        let vault = CredentialVault::new(Arc::clone(&backend));

        // Nothing pending: the backend errors, the vault does not.
        vault.associate("ana").await;
        assert_eq!(vault.get("ana").await.unwrap(), None);

        vault.save("hunter2").await.unwrap();
        vault.associate("ana").await;
        assert_eq!(vault.get("ana").await.unwrap().as_deref(), Some("hunter2"));

        vault.clear("ana").await;
        assert_eq!(vault.get("ana").await.unwrap(), None);
    }
}
