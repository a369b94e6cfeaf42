use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tracing::trace;

use crate::backend_api::{BackendRequest, BackendResponse};
use crate::config::BackendConfig;
use crate::error::{AppError, Result};

/// Command surface of the privileged local backend.
///
/// Every call is a single request/response exchange; nothing is retried.
#[async_trait]
pub trait NativeBackend: Send + Sync {
    /// Store a secret in the anonymous slot.
    async fn save_vpn_password(&self, password: &str) -> Result<()>;

    /// `Ok(None)` when no secret is held for `username`.
    async fn get_vpn_password(&self, username: &str) -> Result<Option<String>>;

    /// Move the anonymous secret into `username`'s slot.
    async fn associate_username(&self, username: &str) -> Result<()>;

    async fn clear_credentials(&self, username: &str) -> Result<()>;

    /// Bring the tunnel up; answers a human-readable status line.
    async fn connect_vpn(&self, server_name: &str, username: &str) -> Result<String>;

    async fn disconnect_vpn(&self) -> Result<String>;

    async fn get_vpn_status(&self) -> Result<bool>;

    /// Normalized name of the server the running tunnel was started for.
    async fn get_connected_server(&self) -> Result<Option<String>>;
}

/// Talks to `vpndesk backend --serve` over its Unix socket.
#[derive(Debug, Clone)]
pub struct SocketBackend {
    socket_path: PathBuf,
    request_timeout: Duration,
}

impl SocketBackend {
    #[must_use]
    pub fn new(socket_path: impl Into<PathBuf>, request_timeout: Duration) -> Self {
        Self {
            socket_path: socket_path.into(),
            request_timeout,
        }
    }

    #[must_use]
    pub fn from_config(config: &BackendConfig) -> Self {
        Self::new(
            config.socket_path.clone(),
            Duration::from_millis(config.request_timeout_ms.max(1000)),
        )
    }

    async fn send(&self, request: BackendRequest) -> Result<BackendResponse> {
        request.validate().map_err(|message| AppError::Backend {
            code: "Validation".into(),
            message,
        })?;
        let kind = request.kind();
        trace!( request = ?kind, "backend_request");

        let exchange = self.exchange(&request);
        let response = match tokio::time::timeout(self.request_timeout, exchange).await {
            Ok(response) => response?,
            Err(_) => {
                return Err(AppError::Backend {
                    code: "Timeout".into(),
                    message: format!(
                        "{} got no answer within {} ms",
                        kind,
                        self.request_timeout.as_millis()
                    ),
                })
            }
        };
        trace!( request = ?kind, "backend_response");
        map_backend_error(response)
    }

    async fn exchange(&self, request: &BackendRequest) -> Result<BackendResponse> {
        let stream = UnixStream::connect(&self.socket_path)
            .await
            .map_err(|e| transport_error(format!(
                "connect {}: {} (is `vpndesk backend --serve` running?)",
                self.socket_path.display(),
                e
            )))?;
        let (read_half, mut write_half) = stream.into_split();

        let mut payload = serde_json::to_vec(request)?;
        payload.push(b'\n');
        write_half
            .write_all(&payload)
            .await
            .map_err(|e| transport_error(format!("write request: {}", e)))?;
        write_half
            .flush()
            .await
            .map_err(|e| transport_error(format!("flush request: {}", e)))?;

        let mut reader = BufReader::new(read_half);
        let mut line = String::new();
        reader
            .read_line(&mut line)
            .await
            .map_err(|e| transport_error(format!("read response: {}", e)))?;
        if line.trim().is_empty() {
            return Err(transport_error("empty response from backend".to_string()));
        }
        serde_json::from_str(&line).map_err(|e| AppError::Backend {
            code: "Protocol".into(),
            message: format!("decode response: {}", e),
        })
    }
}

fn transport_error(message: String) -> AppError {
    AppError::Backend {
        code: "Transport".into(),
        message,
    }
}

fn map_backend_error(response: BackendResponse) -> Result<BackendResponse> {
    match response {
        BackendResponse::Error { code, .. } if code == "CredentialNotFound" => {
            Err(AppError::CredentialNotFound)
        }
        BackendResponse::Error { code, message } => Err(AppError::Backend { code, message }),
        other => Ok(other),
    }
}

fn unexpected(kind: &str, response: BackendResponse) -> AppError {
    AppError::Backend {
        code: "Protocol".into(),
        message: format!("unexpected response to {}: {:?}", kind, response),
    }
}

#[async_trait]
impl NativeBackend for SocketBackend {
    async fn save_vpn_password(&self, password: &str) -> Result<()> {
        self.send(BackendRequest::SaveVpnPassword {
            password: password.to_string(),
        })
        .await
        .map(|_| ())
    }

    async fn get_vpn_password(&self, username: &str) -> Result<Option<String>> {
        match self
            .send(BackendRequest::GetVpnPassword {
                username: username.to_string(),
            })
            .await?
        {
            BackendResponse::OptionalText(secret) => Ok(secret),
            other => Err(unexpected("get_vpn_password", other)),
        }
    }

    async fn associate_username(&self, username: &str) -> Result<()> {
        self.send(BackendRequest::AssociateUsername {
            username: username.to_string(),
        })
        .await
        .map(|_| ())
    }

    async fn clear_credentials(&self, username: &str) -> Result<()> {
        self.send(BackendRequest::ClearCredentials {
            username: username.to_string(),
        })
        .await
        .map(|_| ())
    }

    async fn connect_vpn(&self, server_name: &str, username: &str) -> Result<String> {
        match self
            .send(BackendRequest::ConnectVpn {
                server_name: server_name.to_string(),
                username: username.to_string(),
            })
            .await?
        {
            BackendResponse::Text(status) => Ok(status),
            other => Err(unexpected("connect_vpn", other)),
        }
    }

    async fn disconnect_vpn(&self) -> Result<String> {
        match self.send(BackendRequest::DisconnectVpn).await? {
            BackendResponse::Text(status) => Ok(status),
            other => Err(unexpected("disconnect_vpn", other)),
        }
    }

    async fn get_vpn_status(&self) -> Result<bool> {
        match self.send(BackendRequest::GetVpnStatus).await? {
            BackendResponse::Bool(up) => Ok(up),
            other => Err(unexpected("get_vpn_status", other)),
        }
    }

    async fn get_connected_server(&self) -> Result<Option<String>> {
        match self.send(BackendRequest::GetConnectedServer).await? {
            BackendResponse::OptionalText(name) => Ok(name),
            other => Err(unexpected("get_connected_server", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::UnixListener;

    /// Serve one connection, answering every request line with `reply`.
    fn spawn_stub(dir: &std::path::Path, reply: BackendResponse) -> PathBuf {
        let path = dir.join("stub.sock");
        let listener = UnixListener::bind(&path).expect("bind stub socket");
        tokio::spawn(async move {
            if let Ok((stream, _)) = listener.accept().await {
                let (read_half, mut write_half) = stream.into_split();
                let mut reader = BufReader::new(read_half);
                let mut line = String::new();
                if reader.read_line(&mut line).await.is_ok() {
                    let _: BackendRequest = serde_json::from_str(&line).expect("valid request");
                    let mut out = serde_json::to_vec(&reply).unwrap();
                    out.push(b'\n');
                    let _ = write_half.write_all(&out).await;
                }
            }
        });
        path
    }

    #[tokio::test]
    async fn test_status_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = spawn_stub(dir.path(), BackendResponse::Bool(true));
        let backend = SocketBackend::new(path, Duration::from_secs(2));
        assert!(backend.get_vpn_status().await.unwrap());
    }

    #[tokio::test]
    async fn test_error_response_maps_to_backend_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = spawn_stub(
            dir.path(),
            BackendResponse::Error {
                code: "Tunnel".into(),
                message: "VPN is already running. Please disconnect first.".into(),
            },
        );
        let backend = SocketBackend::new(path, Duration::from_secs(2));
        match backend.connect_vpn("Paris-01", "ana").await {
            Err(AppError::Backend { code, message }) => {
                assert_eq!(code, "Tunnel");
                assert!(message.contains("already running"));
            }
            other => panic!("expected backend error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_mismatched_response_is_protocol_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = spawn_stub(dir.path(), BackendResponse::Unit);
        let backend = SocketBackend::new(path, Duration::from_secs(2));
        assert!(matches!(
            backend.get_vpn_password("ana").await,
            Err(AppError::Backend { code, .. }) if code == "Protocol"
        ));
    }

    #[tokio::test]
    async fn test_missing_socket_is_transport_error() {
        let dir = tempfile::tempdir().unwrap();
        let backend = SocketBackend::new(dir.path().join("absent.sock"), Duration::from_secs(1));
        assert!(matches!(
            backend.disconnect_vpn().await,
            Err(AppError::Backend { code, .. }) if code == "Transport"
        ));
    }

    #[tokio::test]
    async fn test_invalid_request_never_leaves_the_process() {
        let dir = tempfile::tempdir().unwrap();
        let backend = SocketBackend::new(dir.path().join("absent.sock"), Duration::from_secs(1));
        assert!(matches!(
            backend.connect_vpn("../escape", "ana").await,
            Err(AppError::Backend { code, .. }) if code == "Validation"
        ));
    }
}
