use crate::error::Result;

const BACKEND: &str = "keyring";

#[cfg(feature = "keyring")]
fn entry(slot: &str, operation: &str) -> Result<keyring::Entry> {
    keyring::Entry::new(super::SERVICE_NAME, slot)
        .map_err(|e| super::unavailable(slot, BACKEND, operation, &e.to_string()))
}

#[cfg(feature = "keyring")]
pub(super) fn save(slot: &str, secret: &str) -> Result<()> {
    entry(slot, "save")?
        .set_password(secret)
        .map_err(|e| classify(slot, "save", e))?;
    tracing::info!( slot = ?slot, "secret_saved_keyring");
    Ok(())
}

#[cfg(not(feature = "keyring"))]
pub(super) fn save(slot: &str, _secret: &str) -> Result<()> {
    Err(not_compiled(slot, "save"))
}

#[cfg(feature = "keyring")]
pub(super) fn load(slot: &str) -> Result<Option<String>> {
    match entry(slot, "load")?.get_password() {
        Ok(secret) => Ok(Some(secret)),
        Err(keyring::Error::NoEntry) => Ok(None),
        Err(e) => Err(classify(slot, "load", e)),
    }
}

#[cfg(not(feature = "keyring"))]
pub(super) fn load(slot: &str) -> Result<Option<String>> {
    Err(not_compiled(slot, "load"))
}

#[cfg(feature = "keyring")]
pub(super) fn delete(slot: &str) -> Result<()> {
    match entry(slot, "delete")?.delete_credential() {
        Ok(()) | Err(keyring::Error::NoEntry) => {
            tracing::info!( slot = ?slot, "secret_deleted_keyring");
            Ok(())
        }
        Err(e) => Err(classify(slot, "delete", e)),
    }
}

#[cfg(not(feature = "keyring"))]
pub(super) fn delete(slot: &str) -> Result<()> {
    Err(not_compiled(slot, "delete"))
}

#[cfg(not(feature = "keyring"))]
fn not_compiled(slot: &str, operation: &str) -> crate::error::AppError {
    super::unavailable(
        slot,
        BACKEND,
        operation,
        "keyring backend not compiled (enable feature=keyring)",
    )
}

#[cfg(feature = "keyring")]
fn classify(slot: &str, operation: &str, error: keyring::Error) -> crate::error::AppError {
    match error {
        keyring::Error::NoStorageAccess(e) => {
            super::unavailable(slot, BACKEND, operation, &e.to_string())
        }
        other => super::failure(slot, BACKEND, operation, &other.to_string()),
    }
}
