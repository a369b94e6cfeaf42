use std::os::unix::fs::PermissionsExt;
use std::sync::Arc;

use nix::unistd::{chown, Gid, Group, Uid};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::backend_api::{BackendRequest, BackendResponse};
use crate::config::{self, BackendConfig};
use crate::error::AppError;
use crate::shared::credential_store::{self, ANONYMOUS_SLOT};
use crate::tunnel::{Tunnel, TunnelSettings};

const AUTH_GROUP_NAME: &str = "vpndesk";

/// Everything the daemon owns between requests.
pub struct BackendState {
    config: BackendConfig,
    tunnel: Mutex<Tunnel>,
}

impl BackendState {
    #[must_use]
    pub fn new(config: BackendConfig) -> Self {
        let tunnel = Tunnel::new(TunnelSettings::from_config(&config));
        Self {
            config,
            tunnel: Mutex::new(tunnel),
        }
    }
}

pub async fn serve(config: BackendConfig) -> anyhow::Result<()> {
    let socket_path = config.socket_path.clone();
    let group_gid = config
        .authorized_group
        .as_deref()
        .and_then(read_group_gid)
        .or_else(|| read_group_gid(AUTH_GROUP_NAME));

    if let Some(socket_dir) = socket_path.parent() {
        config::ensure_dir(socket_dir, 0o750)?;
        if let Some(gid) = group_gid {
            chown(socket_dir, None, Some(Gid::from_raw(gid)))?;
            info!(
                path = ?socket_dir.display().to_string(),
                gid = ?gid, "socket_dir_chowned");
        }
    }
    if socket_path.exists() {
        let _ = std::fs::remove_file(&socket_path);
    }

    let listener = UnixListener::bind(&socket_path)?;
    std::fs::set_permissions(&socket_path, std::fs::Permissions::from_mode(0o660))?;
    if let Some(gid) = group_gid {
        chown(&socket_path, None, Some(Gid::from_raw(gid)))?;
        info!(
            path = ?socket_path.display().to_string(),
            gid = ?gid, "socket_file_chowned");
    }
    info!(
        socket = ?socket_path.display().to_string(),
        credential_store = ?config.credential_store, "backend_listening");

    let own_uid = Uid::current().as_raw();
    let state = Arc::new(BackendState::new(config));
    loop {
        let (stream, _) = listener.accept().await?;
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            if let Err(e) = handle_client(stream, state, own_uid, group_gid).await {
                warn!( error = ?e.to_string(), "backend_client_failed");
            }
        });
    }
}

async fn handle_client(
    stream: UnixStream,
    state: Arc<BackendState>,
    own_uid: u32,
    group_gid: Option<u32>,
) -> std::io::Result<()> {
    let peer = stream.peer_cred()?;
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    while let Some(payload) = lines.next_line().await? {
        let response = if is_authorized(peer.uid(), peer.gid(), own_uid, group_gid) {
            process_request_payload(&payload, &state, (peer.uid(), peer.gid())).await
        } else {
            warn!(
                uid = ?peer.uid(),
                gid = ?peer.gid(), "peer_not_authorized");
            BackendResponse::Error {
                code: "Auth".into(),
                message: format!("peer uid={} gid={} not authorized", peer.uid(), peer.gid()),
            }
        };
        let mut buffer = serde_json::to_vec(&response)?;
        buffer.push(b'\n');
        write_half.write_all(&buffer).await?;
        write_half.flush().await?;
    }
    Ok(())
}

async fn process_request_payload(
    payload: &str,
    state: &BackendState,
    peer: (u32, u32),
) -> BackendResponse {
    if payload.trim().is_empty() {
        return BackendResponse::Error {
            code: "Protocol".into(),
            message: "empty backend request".into(),
        };
    }

    let request: BackendRequest = match serde_json::from_str(payload) {
        Ok(req) => req,
        Err(e) => {
            return BackendResponse::Error {
                code: "Protocol".into(),
                message: format!("invalid request format: {}", e),
            };
        }
    };
    info!(
        uid = ?peer.0,
        gid = ?peer.1,
        request = ?request.kind(), "backend_request_received");

    if let Err(e) = request.validate() {
        return BackendResponse::Error {
            code: "Validation".into(),
            message: e,
        };
    }

    dispatch(request, state).await
}

pub(crate) async fn dispatch(request: BackendRequest, state: &BackendState) -> BackendResponse {
    let config = &state.config;
    match request {
        BackendRequest::SaveVpnPassword { password } => {
            unit(credential_store::save_secret(ANONYMOUS_SLOT, &password, config))
        }

        BackendRequest::AssociateUsername { username } => {
            let pending = match credential_store::load_secret(ANONYMOUS_SLOT, config) {
                Ok(Some(secret)) => secret,
                Ok(None) => return error_response(AppError::CredentialNotFound),
                Err(e) => return error_response(e),
            };
            if let Err(e) = credential_store::save_secret(&username, &pending, config) {
                return error_response(e);
            }
            debug!( username = ?username, "credentials_associated");
            unit(credential_store::delete_secret(ANONYMOUS_SLOT, config))
        }

        BackendRequest::GetVpnPassword { username } => {
            match credential_store::load_secret(&username, config) {
                Ok(secret) => BackendResponse::OptionalText(secret),
                Err(e) => error_response(e),
            }
        }

        BackendRequest::ClearCredentials { username } => {
            for slot in [username.as_str(), ANONYMOUS_SLOT] {
                if let Err(e) = credential_store::delete_secret(slot, config) {
                    warn!( slot = ?slot, error = ?e.to_string(), "credential_clear_failed");
                }
            }
            BackendResponse::Unit
        }

        BackendRequest::ConnectVpn {
            server_name,
            username,
        } => {
            let password = match credential_store::load_secret(&username, config) {
                Ok(Some(secret)) => secret,
                Ok(None) => return error_response(AppError::CredentialNotFound),
                Err(e) => return error_response(e),
            };
            let mut tunnel = state.tunnel.lock().await;
            match tunnel.connect(&server_name, &username, &password).await {
                Ok(status) => BackendResponse::Text(status),
                Err(e) => error_response(e),
            }
        }

        BackendRequest::DisconnectVpn => match state.tunnel.lock().await.disconnect().await {
            Ok(status) => BackendResponse::Text(status),
            Err(e) => error_response(e),
        },

        BackendRequest::GetVpnStatus => BackendResponse::Bool(state.tunnel.lock().await.is_running()),

        BackendRequest::GetConnectedServer => {
            BackendResponse::OptionalText(state.tunnel.lock().await.connected_server())
        }
    }
}

fn unit(result: crate::error::Result<()>) -> BackendResponse {
    match result {
        Ok(()) => BackendResponse::Unit,
        Err(e) => error_response(e),
    }
}

fn error_response(error: AppError) -> BackendResponse {
    let code = match &error {
        AppError::Connection { .. } => "Tunnel",
        AppError::CredentialNotFound => "CredentialNotFound",
        AppError::CredentialStoreUnavailable(_)
        | AppError::CredentialStoreMisconfigured(_)
        | AppError::CredentialStoreFailure(_) => "CredentialStore",
        AppError::Io(_) => "IO",
        _ => "Internal",
    };
    let message = match error {
        AppError::Connection { message, .. } => message,
        other => other.to_string(),
    };
    warn!( code = ?code, message = ?message, "backend_request_failed");
    BackendResponse::Error {
        code: code.into(),
        message,
    }
}

/// Root, the daemon's own user, and members of the authorized group may talk to it.
fn is_authorized(peer_uid: u32, peer_gid: u32, own_uid: u32, group_gid: Option<u32>) -> bool {
    peer_uid == 0 || peer_uid == own_uid || group_gid == Some(peer_gid)
}

fn read_group_gid(group_name: &str) -> Option<u32> {
    Group::from_name(group_name)
        .ok()
        .flatten()
        .map(|g| g.gid.as_raw())
}
