mod file;
mod keyring;

use crate::config::{BackendConfig, CredentialStore};
use crate::error::{AppError, Result};

/// Keyring service name and slot holding a secret not yet tied to a username.
pub const SERVICE_NAME: &str = "vpndesk";
pub const ANONYMOUS_SLOT: &str = "temp_credentials";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResolvedCredentialBackend {
    File,
    Keyring,
}

pub fn save_secret(slot: &str, secret: &str, config: &BackendConfig) -> Result<()> {
    match resolve_backend(config) {
        ResolvedCredentialBackend::File => file::save(&config.credential_dir, slot, secret),
        ResolvedCredentialBackend::Keyring => keyring::save(slot, secret),
    }
}

/// `Ok(None)` when the slot holds nothing.
pub fn load_secret(slot: &str, config: &BackendConfig) -> Result<Option<String>> {
    match resolve_backend(config) {
        ResolvedCredentialBackend::File => file::load(&config.credential_dir, slot),
        ResolvedCredentialBackend::Keyring => keyring::load(slot),
    }
}

/// Idempotent: deleting an empty slot succeeds.
pub fn delete_secret(slot: &str, config: &BackendConfig) -> Result<()> {
    match resolve_backend(config) {
        ResolvedCredentialBackend::File => file::delete(&config.credential_dir, slot),
        ResolvedCredentialBackend::Keyring => keyring::delete(slot),
    }
}

fn resolve_backend(config: &BackendConfig) -> ResolvedCredentialBackend {
    match config.credential_store {
        CredentialStore::File => ResolvedCredentialBackend::File,
        CredentialStore::Keyring => ResolvedCredentialBackend::Keyring,
        CredentialStore::Auto => {
            #[cfg(feature = "keyring")]
            {
                ResolvedCredentialBackend::Keyring
            }
            #[cfg(not(feature = "keyring"))]
            {
                ResolvedCredentialBackend::File
            }
        }
    }
}

fn unavailable(slot: &str, backend: &str, operation: &str, reason: &str) -> AppError {
    AppError::CredentialStoreUnavailable(format_message(slot, backend, operation, reason))
}

fn misconfigured(slot: &str, backend: &str, operation: &str, reason: &str) -> AppError {
    AppError::CredentialStoreMisconfigured(format_message(slot, backend, operation, reason))
}

fn failure(slot: &str, backend: &str, operation: &str, reason: &str) -> AppError {
    AppError::CredentialStoreFailure(format_message(slot, backend, operation, reason))
}

fn format_message(slot: &str, backend: &str, operation: &str, reason: &str) -> String {
    format!(
        "slot={} backend={} operation={} reason={}",
        slot, backend, operation, reason
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolver_explicit_values() {
        let mut cfg = BackendConfig::default();

        cfg.credential_store = CredentialStore::File;
        assert_eq!(resolve_backend(&cfg), ResolvedCredentialBackend::File);

        cfg.credential_store = CredentialStore::Keyring;
        assert_eq!(resolve_backend(&cfg), ResolvedCredentialBackend::Keyring);
    }

    #[test]
    fn test_resolver_auto() {
        let mut cfg = BackendConfig::default();
        cfg.credential_store = CredentialStore::Auto;

        #[cfg(feature = "keyring")]
        assert_eq!(resolve_backend(&cfg), ResolvedCredentialBackend::Keyring);

        #[cfg(not(feature = "keyring"))]
        assert_eq!(resolve_backend(&cfg), ResolvedCredentialBackend::File);
    }

    #[test]
    fn test_file_backend_through_dispatch() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cfg = BackendConfig {
            credential_store: CredentialStore::File,
            credential_dir: dir.path().join("creds"),
            ..BackendConfig::default()
        };

        save_secret(ANONYMOUS_SLOT, "hunter2", &cfg).unwrap();
        assert_eq!(
            load_secret(ANONYMOUS_SLOT, &cfg).unwrap().as_deref(),
            Some("hunter2")
        );
        delete_secret(ANONYMOUS_SLOT, &cfg).unwrap();
        assert_eq!(load_secret(ANONYMOUS_SLOT, &cfg).unwrap(), None);
    }
}
