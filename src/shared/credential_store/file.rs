use std::fs;
use std::io::Write;
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::config;
use crate::error::Result;

const BACKEND: &str = "file";

pub(super) fn save(dir: &Path, slot: &str, secret: &str) -> Result<()> {
    config::ensure_dir(dir, 0o700)
        .map_err(|e| super::failure(slot, BACKEND, "save", &e.to_string()))?;
    let path = slot_path(dir, slot);
    let tmp_path = temp_path(slot, &path)?;

    let mut file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o600)
        .open(&tmp_path)
        .map_err(|e| super::failure(slot, BACKEND, "save", &e.to_string()))?;

    file.write_all(secret.as_bytes())
        .map_err(|e| super::failure(slot, BACKEND, "save", &e.to_string()))?;
    file.sync_all()
        .map_err(|e| super::failure(slot, BACKEND, "save", &e.to_string()))?;
    drop(file);

    fs::rename(&tmp_path, &path).map_err(|e| {
        let _ = fs::remove_file(&tmp_path);
        super::failure(slot, BACKEND, "save", &e.to_string())
    })?;

    fs::set_permissions(&path, fs::Permissions::from_mode(0o600))
        .map_err(|e| super::failure(slot, BACKEND, "save", &e.to_string()))?;
    tracing::info!( slot = ?slot, "secret_saved_file");
    Ok(())
}

pub(super) fn load(dir: &Path, slot: &str) -> Result<Option<String>> {
    match fs::read_to_string(slot_path(dir, slot)) {
        Ok(secret) => Ok(Some(secret)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(super::failure(slot, BACKEND, "load", &e.to_string())),
    }
}

pub(super) fn delete(dir: &Path, slot: &str) -> Result<()> {
    match fs::remove_file(slot_path(dir, slot)) {
        Ok(()) => {
            tracing::info!( slot = ?slot, "secret_deleted_file");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(super::failure(slot, BACKEND, "delete", &e.to_string())),
    }
}

fn slot_path(dir: &Path, slot: &str) -> PathBuf {
    dir.join(format!("{}.secret", slot))
}

fn temp_path(slot: &str, path: &Path) -> Result<PathBuf> {
    let parent = path.parent().ok_or_else(|| {
        super::misconfigured(slot, BACKEND, "save", "slot path has no parent directory")
    })?;
    let now_nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    Ok(parent.join(format!(
        ".{}.tmp-{}-{}",
        slot,
        std::process::id(),
        now_nanos
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slots_are_independent_and_owner_only() {
        let dir = tempfile::tempdir().expect("tempdir");
        save(dir.path(), "ana", "secret-a").unwrap();
        save(dir.path(), "bo", "secret-b").unwrap();

        assert_eq!(load(dir.path(), "ana").unwrap().as_deref(), Some("secret-a"));
        assert_eq!(load(dir.path(), "bo").unwrap().as_deref(), Some("secret-b"));

        let mode = fs::metadata(slot_path(dir.path(), "ana"))
            .unwrap()
            .permissions()
            .mode()
            & 0o777;
        assert_eq!(mode, 0o600);
    }

    #[test]
    fn test_overwrite_and_idempotent_delete() {
        let dir = tempfile::tempdir().expect("tempdir");
        save(dir.path(), "ana", "first").unwrap();
        save(dir.path(), "ana", "second").unwrap();
        assert_eq!(load(dir.path(), "ana").unwrap().as_deref(), Some("second"));

        delete(dir.path(), "ana").unwrap();
        delete(dir.path(), "ana").unwrap();
        assert_eq!(load(dir.path(), "ana").unwrap(), None);
    }
}
