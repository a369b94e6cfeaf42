use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{AppError, Result};

const APP_DIR: &str = "vpndesk";
const CONFIG_FILE: &str = "config.toml";
const STATE_FILE: &str = "state.json";

const DEFAULT_SOCKET_PATH: &str = "/run/vpndesk/backend.sock";
const DEFAULT_CREDENTIAL_DIR: &str = "/var/lib/vpndesk/credentials";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialStore {
    #[default]
    Auto,
    File,
    Keyring,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub api: ApiConfig,
    pub probe: ProbeConfig,
    pub backend: BackendConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub timeout_ms: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            api_key: None,
            timeout_ms: 15_000,
        }
    }
}

impl ApiConfig {
    /// Base URL and client key, both required before any remote call.
    pub fn require(&self) -> Result<(&str, &str)> {
        let base_url = self.base_url.as_deref().map(str::trim).unwrap_or("");
        let api_key = self.api_key.as_deref().map(str::trim).unwrap_or("");
        if base_url.is_empty() || api_key.is_empty() {
            return Err(AppError::Configuration(
                "API configuration is missing.".to_string(),
            ));
        }
        Ok((base_url.trim_end_matches('/'), api_key))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    pub port: u16,
    /// Capped at 2000 ms when the probe is built.
    pub timeout_ms: u64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            port: 1194,
            timeout_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub socket_path: PathBuf,
    pub request_timeout_ms: u64,
    pub credential_store: CredentialStore,
    pub credential_dir: PathBuf,
    pub openvpn_path: PathBuf,
    pub openvpn_config_dir: PathBuf,
    pub openvpn_config_file: String,
    pub username_suffix: String,
    pub connect_timeout_ms: u64,
    pub authorized_group: Option<String>,
    pub log_file: Option<PathBuf>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
            request_timeout_ms: 45_000,
            credential_store: CredentialStore::Auto,
            credential_dir: PathBuf::from(DEFAULT_CREDENTIAL_DIR),
            openvpn_path: PathBuf::from("/usr/sbin/openvpn"),
            openvpn_config_dir: PathBuf::from("/etc/vpndesk/openvpn"),
            openvpn_config_file: "server_openvpn_remote_access_l3.ovpn".to_string(),
            username_suffix: String::new(),
            connect_timeout_ms: 30_000,
            authorized_group: None,
            log_file: None,
        }
    }
}

/// Root config directory: ~/.config/vpndesk/
#[must_use]
pub fn app_config_dir() -> PathBuf {
    xdg_config_home().join(APP_DIR)
}

/// Durable client state: ~/.config/vpndesk/state.json
#[must_use]
pub fn state_path() -> PathBuf {
    app_config_dir().join(STATE_FILE)
}

#[must_use]
pub fn config_path() -> PathBuf {
    app_config_dir().join(CONFIG_FILE)
}

fn xdg_config_home() -> PathBuf {
    if let Some(config) = std::env::var_os("XDG_CONFIG_HOME") {
        PathBuf::from(config)
    } else if let Some(home) = std::env::var_os("HOME") {
        PathBuf::from(home).join(".config")
    } else {
        PathBuf::from("/tmp")
    }
}

pub fn ensure_dir(dir: &Path, mode: u32) -> Result<()> {
    if !dir.exists() {
        fs::create_dir_all(dir)?;
        fs::set_permissions(dir, fs::Permissions::from_mode(mode))?;
    }
    Ok(())
}

/// Load `config.toml` and apply environment overrides.
///
/// A missing file yields the defaults; a malformed file is a configuration
/// error rather than a silent fallback.
pub fn load_config() -> Result<AppConfig> {
    let mut config = load_config_from(&config_path())?;
    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    Ok(config)
}

pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    match fs::read_to_string(path) {
        Ok(raw) => parse_config(&raw).map_err(|e| {
            AppError::Configuration(format!("invalid config {}: {}", path.display(), e))
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(AppConfig::default()),
        Err(e) => Err(AppError::Configuration(format!(
            "cannot read config {}: {}",
            path.display(),
            e
        ))),
    }
}

fn parse_config(raw: &str) -> std::result::Result<AppConfig, toml::de::Error> {
    toml::from_str(raw)
}

fn apply_env_overrides<F>(config: &mut AppConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
    if let Some(url) = non_empty("VPNDESK_API_BASE_URL") {
        config.api.base_url = Some(url);
    }
    if let Some(key) = non_empty("VPNDESK_API_KEY") {
        config.api.api_key = Some(key);
    }
    if let Some(socket) = non_empty("VPNDESK_BACKEND_SOCKET") {
        config.backend.socket_path = PathBuf::from(socket);
    }
}
