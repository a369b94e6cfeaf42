use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::config;
use crate::error::Result;

/// Session token of the logged-in account.
pub const TOKEN_KEY: &str = "vpn-token";
/// Username the backend credential was last associated with. Advisory only.
pub const USERNAME_KEY: &str = "vpn-username";

/// Small durable string map backed by one owner-only JSON file.
///
/// Every mutation rewrites the whole file through a temp file and rename, so
/// a crash leaves either the old or the new contents.
#[derive(Debug, Clone)]
pub struct KvStore {
    path: PathBuf,
}

impl KvStore {
    #[must_use]
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn open_default() -> Self {
        Self::open(config::state_path())
    }

    pub fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.read_all()?.remove(key))
    }

    pub fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self.read_all()?;
        entries.insert(key.to_string(), value.to_string());
        self.write_all(&entries)?;
        tracing::debug!( key = ?key, "kv_entry_written");
        Ok(())
    }

    /// Remove `key`; removing a missing key is not an error.
    pub fn remove(&self, key: &str) -> Result<()> {
        let mut entries = self.read_all()?;
        if entries.remove(key).is_some() {
            self.write_all(&entries)?;
            tracing::debug!( key = ?key, "kv_entry_removed");
        }
        Ok(())
    }

    fn read_all(&self) -> Result<BTreeMap<String, String>> {
        match fs::read_to_string(&self.path) {
            Ok(json) if json.trim().is_empty() => Ok(BTreeMap::new()),
            Ok(json) => Ok(serde_json::from_str(&json)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn write_all(&self, entries: &BTreeMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            config::ensure_dir(parent, 0o700)?;
        }
        let tmp_path = temp_path(&self.path);
        let json = serde_json::to_string_pretty(entries)?;

        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(0o600)
            .open(&tmp_path)?;
        file.write_all(json.as_bytes())?;
        file.sync_all()?;
        drop(file);

        fs::rename(&tmp_path, &self.path).inspect_err(|_| {
            let _ = fs::remove_file(&tmp_path);
        })?;
        fs::set_permissions(&self.path, fs::Permissions::from_mode(0o600))?;
        Ok(())
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let now_nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "state.json".to_string());
    path.with_file_name(format!(".{}.tmp-{}-{}", name, std::process::id(), now_nanos))
}
