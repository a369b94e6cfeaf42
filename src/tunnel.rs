use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::BackendConfig;
use crate::error::{AppError, ConnectionVerb, Result};

const SUCCESS_MARKER: &str = "Initialization Sequence Completed";
const AUTH_FAILED_MARKER: &str = "AUTH_FAILED";
const USERNAME_PROMPT: &str = "Enter Auth Username:";
const PASSWORD_PROMPT: &str = "Enter Auth Password:";
const MAX_PROMPT_ANSWERS: u32 = 2;
const PASSWORD_DELAY: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub struct TunnelSettings {
    pub openvpn_path: PathBuf,
    pub config_dir: PathBuf,
    pub config_file: String,
    pub username_suffix: String,
    pub connect_timeout: Duration,
}

impl TunnelSettings {
    #[must_use]
    pub fn from_config(config: &BackendConfig) -> Self {
        Self {
            openvpn_path: config.openvpn_path.clone(),
            config_dir: config.openvpn_config_dir.clone(),
            config_file: config.openvpn_config_file.clone(),
            username_suffix: config.username_suffix.clone(),
            connect_timeout: Duration::from_millis(config.connect_timeout_ms),
        }
    }

    fn profile_path(&self, server_name: &str) -> PathBuf {
        self.config_dir.join(server_name).join(&self.config_file)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TunnelEvent {
    NeedUsername,
    NeedPassword,
    Connected,
    AuthFailed,
}

fn classify_line(line: &str) -> Option<TunnelEvent> {
    if line.contains(USERNAME_PROMPT) {
        Some(TunnelEvent::NeedUsername)
    } else if line.contains(PASSWORD_PROMPT) {
        Some(TunnelEvent::NeedPassword)
    } else if line.contains(SUCCESS_MARKER) {
        Some(TunnelEvent::Connected)
    } else if line.contains(AUTH_FAILED_MARKER) {
        Some(TunnelEvent::AuthFailed)
    } else {
        None
    }
}

struct ActiveTunnel {
    child: Child,
    server_name: String,
    // Held open so openvpn never sees EOF on its console.
    _stdin: ChildStdin,
}

/// Owns at most one openvpn child process.
pub struct Tunnel {
    settings: TunnelSettings,
    active: Option<ActiveTunnel>,
}

impl Tunnel {
    #[must_use]
    pub fn new(settings: TunnelSettings) -> Self {
        Self {
            settings,
            active: None,
        }
    }

    /// Start openvpn for `server_name` and wait for the tunnel to come up.
    pub async fn connect(&mut self, server_name: &str, username: &str, password: &str) -> Result<String> {
        if self.is_running() {
            return Err(connect_error("VPN is already running. Please disconnect first."));
        }

        let profile = self.settings.profile_path(server_name);
        if !self.settings.openvpn_path.exists() {
            return Err(connect_error(format!(
                "OpenVPN binary not found at {}",
                self.settings.openvpn_path.display()
            )));
        }
        if !profile.exists() {
            return Err(connect_error(format!(
                "Config file not found at {}",
                profile.display()
            )));
        }

        let login = format!("{}{}", username, self.settings.username_suffix);
        info!(
            server = ?server_name,
            profile = ?profile.display().to_string(), "tunnel_starting");

        let mut child = Command::new(&self.settings.openvpn_path)
            .arg("--config")
            .arg(&profile)
            .args([
                "--auth-nocache",
                "--auth-retry",
                "none",
                "--connect-retry",
                "1",
                "--data-ciphers",
                "AES-256-GCM:AES-128-GCM:AES-128-CBC",
                "--cipher",
                "AES-128-CBC",
            ])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| connect_error(format!("Failed to start OpenVPN: {}", e)))?;

        let (Some(mut stdin), Some(stdout), Some(stderr)) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            let _ = child.kill().await;
            return Err(connect_error("Failed to attach to OpenVPN stdio"));
        };

        let (tx, mut events) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!( line = ?line, "openvpn_stdout");
                if let Some(event) = classify_line(&line) {
                    let _ = tx.send(event);
                }
            }
        });
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!( line = ?line, "openvpn_stderr");
            }
        });

        let answered = async {
            write_answer(&mut stdin, &login).await?;
            tokio::time::sleep(PASSWORD_DELAY).await;
            write_answer(&mut stdin, password).await
        }
        .await;
        if let Err(e) = answered {
            let _ = child.kill().await;
            return Err(e);
        }

        let deadline = Instant::now() + self.settings.connect_timeout;
        let mut prompt_answers = 0;
        loop {
            let event = match tokio::time::timeout_at(deadline, events.recv()).await {
                Ok(Some(event)) => event,
                Ok(None) => {
                    let status = child.wait().await.ok();
                    warn!( server = ?server_name, status = ?status, "tunnel_exited_early");
                    return Err(connect_error("OpenVPN exited before the tunnel came up"));
                }
                Err(_) => {
                    let _ = child.kill().await;
                    warn!( server = ?server_name, "tunnel_connect_timeout");
                    return Err(connect_error("Connection timed out waiting for authentication"));
                }
            };

            match event {
                TunnelEvent::NeedUsername | TunnelEvent::NeedPassword
                    if prompt_answers < MAX_PROMPT_ANSWERS =>
                {
                    let answer = if event == TunnelEvent::NeedUsername {
                        login.as_str()
                    } else {
                        tokio::time::sleep(PASSWORD_DELAY).await;
                        password
                    };
                    if let Err(e) = write_answer(&mut stdin, answer).await {
                        let _ = child.kill().await;
                        return Err(e);
                    }
                    prompt_answers += 1;
                }
                TunnelEvent::NeedUsername | TunnelEvent::NeedPassword => {}
                TunnelEvent::Connected => {
                    info!( server = ?server_name, user = ?login, "tunnel_connected");
                    self.active = Some(ActiveTunnel {
                        child,
                        server_name: server_name.to_string(),
                        _stdin: stdin,
                    });
                    return Ok(format!("Connected to {} with user {}", server_name, login));
                }
                TunnelEvent::AuthFailed => {
                    let _ = child.kill().await;
                    warn!( server = ?server_name, "tunnel_auth_failed");
                    return Err(connect_error(
                        "Authentication failed. Please check your credentials.",
                    ));
                }
            }
        }
    }

    pub async fn disconnect(&mut self) -> Result<String> {
        let Some(mut active) = self.active.take() else {
            return Ok("Not connected to VPN".to_string());
        };
        active.child.kill().await.map_err(|e| {
            AppError::connection(
                ConnectionVerb::Disconnect,
                format!("Failed to kill OpenVPN process: {}", e),
            )
        })?;
        info!( server = ?active.server_name, "tunnel_stopped");
        Ok("Disconnected from VPN".to_string())
    }

    /// Reaps a child that exited on its own.
    pub fn is_running(&mut self) -> bool {
        let Some(active) = self.active.as_mut() else {
            return false;
        };
        match active.child.try_wait() {
            Ok(None) => true,
            Ok(Some(status)) => {
                warn!(
                    server = ?active.server_name,
                    status = ?status, "tunnel_exited");
                self.active = None;
                false
            }
            Err(e) => {
                warn!( error = ?e.to_string(), "tunnel_status_unknown");
                true
            }
        }
    }

    pub fn connected_server(&mut self) -> Option<String> {
        if self.is_running() {
            self.active.as_ref().map(|a| a.server_name.clone())
        } else {
            None
        }
    }
}

async fn write_answer(stdin: &mut ChildStdin, answer: &str) -> Result<()> {
    let mut line = Vec::with_capacity(answer.len() + 1);
    line.extend_from_slice(answer.as_bytes());
    line.push(b'\n');
    stdin
        .write_all(&line)
        .await
        .map_err(|e| connect_error(format!("Failed to write credentials: {}", e)))?;
    stdin
        .flush()
        .await
        .map_err(|e| connect_error(format!("Failed to write credentials: {}", e)))
}

fn connect_error(message: impl Into<String>) -> AppError {
    AppError::connection(ConnectionVerb::Connect, message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;

    const ACCEPTING: &str = r#"#!/bin/sh
read user
read pass
echo "user $user"
if [ "$pass" = "good" ]; then
  echo "Initialization Sequence Completed"
else
  echo "AUTH_FAILED"
fi
exec sleep 30
"#;

    const SILENT: &str = "#!/bin/sh\nexec sleep 30\n";

    fn fixture(dir: &Path, script: &str, timeout: Duration) -> TunnelSettings {
        let binary = dir.join("openvpn");
        fs::write(&binary, script).unwrap();
        fs::set_permissions(&binary, fs::Permissions::from_mode(0o755)).unwrap();

        let profiles = dir.join("profiles");
        fs::create_dir_all(profiles.join("Paris-01")).unwrap();
        fs::write(profiles.join("Paris-01").join("remote.ovpn"), "client\n").unwrap();

        TunnelSettings {
            openvpn_path: binary,
            config_dir: profiles,
            config_file: "remote.ovpn".to_string(),
            username_suffix: "@desk".to_string(),
            connect_timeout: timeout,
        }
    }

    fn message(err: AppError) -> String {
        match err {
            AppError::Connection { message, .. } => message,
            other => panic!("expected connection error, got {:?}", other),
        }
    }

    #[test]
    fn test_classify_line() {
        assert_eq!(
            classify_line("2024 Initialization Sequence Completed"),
            Some(TunnelEvent::Connected)
        );
        assert_eq!(
            classify_line("AUTH: Received control message: AUTH_FAILED"),
            Some(TunnelEvent::AuthFailed)
        );
        assert_eq!(
            classify_line("Enter Auth Username:"),
            Some(TunnelEvent::NeedUsername)
        );
        assert_eq!(classify_line("TLS handshake"), None);
    }

    #[tokio::test]
    async fn test_connect_then_disconnect() {
        let dir = tempfile::tempdir().unwrap();
        let mut tunnel = Tunnel::new(fixture(dir.path(), ACCEPTING, Duration::from_secs(10)));

        let status = tunnel.connect("Paris-01", "ana", "good").await.unwrap();
        assert_eq!(status, "Connected to Paris-01 with user ana@desk");
        assert!(tunnel.is_running());
        assert_eq!(tunnel.connected_server().as_deref(), Some("Paris-01"));

        let again = tunnel.connect("Paris-01", "ana", "good").await.unwrap_err();
        assert_eq!(message(again), "VPN is already running. Please disconnect first.");

        assert_eq!(tunnel.disconnect().await.unwrap(), "Disconnected from VPN");
        assert!(!tunnel.is_running());
        assert_eq!(tunnel.disconnect().await.unwrap(), "Not connected to VPN");
    }

    #[tokio::test]
    async fn test_connect_to_punctuated_profile() {
        let dir = tempfile::tempdir().unwrap();
        let settings = fixture(dir.path(), ACCEPTING, Duration::from_secs(10));
        let profile = settings.config_dir.join("São-Paulo,-BR");
        fs::create_dir_all(&profile).unwrap();
        fs::write(profile.join("remote.ovpn"), "client\n").unwrap();
        let mut tunnel = Tunnel::new(settings);

        let status = tunnel.connect("São-Paulo,-BR", "ana", "good").await.unwrap();
        assert_eq!(status, "Connected to São-Paulo,-BR with user ana@desk");
        assert_eq!(tunnel.disconnect().await.unwrap(), "Disconnected from VPN");
    }

    #[tokio::test]
    async fn test_auth_failure_kills_process() {
        let dir = tempfile::tempdir().unwrap();
        let mut tunnel = Tunnel::new(fixture(dir.path(), ACCEPTING, Duration::from_secs(10)));

        let err = tunnel.connect("Paris-01", "ana", "bad").await.unwrap_err();
        assert_eq!(
            message(err),
            "Authentication failed. Please check your credentials."
        );
        assert!(!tunnel.is_running());
    }

    #[tokio::test]
    async fn test_timeout_kills_process() {
        let dir = tempfile::tempdir().unwrap();
        let mut tunnel = Tunnel::new(fixture(dir.path(), SILENT, Duration::from_millis(800)));

        let err = tunnel.connect("Paris-01", "ana", "good").await.unwrap_err();
        assert_eq!(
            message(err),
            "Connection timed out waiting for authentication"
        );
        assert!(!tunnel.is_running());
    }

    #[tokio::test]
    async fn test_missing_profile_is_rejected_before_spawn() {
        let dir = tempfile::tempdir().unwrap();
        let mut tunnel = Tunnel::new(fixture(dir.path(), ACCEPTING, Duration::from_secs(1)));

        let err = tunnel.connect("Tokyo-02", "ana", "good").await.unwrap_err();
        assert!(message(err).starts_with("Config file not found at"));
    }
}
