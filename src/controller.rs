use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info, warn};

use crate::backend_client::NativeBackend;
use crate::error::{AppError, ConnectionVerb, Result};
use crate::models::server::Server;
use crate::models::session::User;
use crate::vault::CredentialVault;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting { server: Server },
    Connected { server: Server },
    Disconnecting { server: Server },
}

impl ConnectionState {
    #[must_use]
    pub fn server(&self) -> Option<&Server> {
        match self {
            Self::Disconnected => None,
            Self::Connecting { server }
            | Self::Connected { server }
            | Self::Disconnecting { server } => Some(server),
        }
    }

    #[must_use]
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::Connecting { .. } | Self::Disconnecting { .. })
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting { server } => write!(f, "Connecting to {}", server.name),
            Self::Connected { server } => write!(f, "Connected to {}", server.name),
            Self::Disconnecting { server } => write!(f, "Disconnecting from {}", server.name),
        }
    }
}

/// State after a request plus the backend's status line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionReport {
    pub state: ConnectionState,
    pub message: String,
}

/// Name shown for a running tunnel the backend cannot name.
pub const UNKNOWN_SERVER: &str = "unknown";

struct Guarded {
    state: ConnectionState,
    // Bumped by logout so results of requests issued before it are dropped.
    generation: u64,
}

enum ConnectPlan {
    Fresh,
    Toggle(Server),
    Switch(Server),
}

pub struct ConnectionController<B: NativeBackend + ?Sized> {
    backend: Arc<B>,
    vault: CredentialVault<B>,
    guarded: Mutex<Guarded>,
}

impl<B: NativeBackend + ?Sized> ConnectionController<B> {
    pub fn new(backend: Arc<B>, vault: CredentialVault<B>) -> Self {
        Self {
            backend,
            vault,
            guarded: Mutex::new(Guarded {
                state: ConnectionState::Disconnected,
                generation: 0,
            }),
        }
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.lock().state.clone()
    }

    /// Connect to `server`, or disconnect when it is the one already connected.
    pub async fn connect(&self, user: Option<&User>, server: &Server) -> Result<ConnectionReport> {
        let user = user.ok_or(AppError::NotLoggedIn)?;

        let (previous, generation, plan) = {
            let mut guard = self.lock();
            let previous = guard.state.clone();
            let plan = match &guard.state {
                ConnectionState::Connecting { .. } | ConnectionState::Disconnecting { .. } => {
                    return Err(AppError::Busy);
                }
                ConnectionState::Connected { server: current } if current.id == server.id => {
                    ConnectPlan::Toggle(current.clone())
                }
                ConnectionState::Connected { server: current } => {
                    ConnectPlan::Switch(current.clone())
                }
                ConnectionState::Disconnected => ConnectPlan::Fresh,
            };
            guard.state = match &plan {
                ConnectPlan::Toggle(current) => ConnectionState::Disconnecting {
                    server: current.clone(),
                },
                ConnectPlan::Fresh | ConnectPlan::Switch(_) => ConnectionState::Connecting {
                    server: server.clone(),
                },
            };
            (previous, guard.generation, plan)
        };

        let switching_from = match plan {
            ConnectPlan::Toggle(_) => return self.run_disconnect(previous, generation).await,
            ConnectPlan::Switch(current) => Some(current),
            ConnectPlan::Fresh => None,
        };

        match self.vault.get(&user.username).await {
            Ok(Some(_)) => {}
            Ok(None) => {
                self.finish(generation, previous);
                warn!( username = ?user.username, "vpn_credentials_missing");
                return Err(AppError::CredentialNotFound);
            }
            Err(e) => {
                self.finish(generation, previous);
                return Err(e);
            }
        }

        if let Some(current) = &switching_from {
            match self.backend.disconnect_vpn().await {
                Ok(message) => info!(
                    from = ?current.name,
                    to = ?server.name,
                    status = ?message, "vpn_switch_teardown"),
                Err(e) => {
                    self.finish(generation, previous);
                    return Err(AppError::connection(
                        ConnectionVerb::Disconnect,
                        backend_message(e),
                    ));
                }
            }
        }

        let backend_name = server.backend_name();
        debug!( server = ?backend_name, username = ?user.username, "vpn_connect_requested");
        match self.backend.connect_vpn(&backend_name, &user.username).await {
            Ok(message) => {
                let state = ConnectionState::Connected {
                    server: server.clone(),
                };
                if !self.finish(generation, state.clone()) {
                    return Err(AppError::connection(
                        ConnectionVerb::Connect,
                        "session ended before the tunnel came up",
                    ));
                }
                info!( server = ?server.name, status = ?message, "vpn_connected");
                Ok(ConnectionReport { state, message })
            }
            Err(e) => {
                let restored = if switching_from.is_some() {
                    ConnectionState::Disconnected
                } else {
                    previous
                };
                self.finish(generation, restored);
                warn!( server = ?server.name, error = ?e.to_string(), "vpn_connect_failed");
                match e {
                    AppError::CredentialNotFound => Err(e),
                    other => Err(AppError::connection(
                        ConnectionVerb::Connect,
                        backend_message(other),
                    )),
                }
            }
        }
    }

    pub async fn disconnect(&self) -> Result<ConnectionReport> {
        let (previous, generation) = {
            let mut guard = self.lock();
            let previous = guard.state.clone();
            match &guard.state {
                ConnectionState::Connecting { .. } | ConnectionState::Disconnecting { .. } => {
                    return Err(AppError::Busy);
                }
                ConnectionState::Connected { server } => {
                    guard.state = ConnectionState::Disconnecting {
                        server: server.clone(),
                    };
                }
                ConnectionState::Disconnected => {}
            }
            (previous, guard.generation)
        };
        self.run_disconnect(previous, generation).await
    }

    /// Logout path: always asks the backend to disconnect, never fails.
    pub async fn force_disconnect(&self) -> ConnectionState {
        {
            let mut guard = self.lock();
            guard.generation += 1;
        }
        match self.backend.disconnect_vpn().await {
            Ok(message) => info!( status = ?message, "vpn_force_disconnected"),
            Err(e) => warn!( error = ?e.to_string(), "vpn_force_disconnect_failed"),
        }
        let mut guard = self.lock();
        guard.state = ConnectionState::Disconnected;
        guard.state.clone()
    }

    /// Rebuild the state from the backend instead of assuming `Disconnected`.
    /// An in-flight request keeps its state; the backend answer is dropped.
    pub async fn resync(&self, servers: &[Server]) -> Result<ConnectionState> {
        let running = self.backend.get_vpn_status().await?;
        let state = if running {
            let name = match self.backend.get_connected_server().await? {
                Some(name) => name,
                None => {
                    warn!("vpn_running_without_server_name");
                    UNKNOWN_SERVER.to_string()
                }
            };
            let server = servers
                .iter()
                .find(|s| s.backend_name() == name)
                .cloned()
                .unwrap_or_else(|| Server::unlisted(&name));
            ConnectionState::Connected { server }
        } else {
            ConnectionState::Disconnected
        };

        let mut guard = self.lock();
        if guard.state.is_busy() {
            debug!(
                current = ?guard.state.to_string(),
                reported = ?state.to_string(), "vpn_resync_skipped_busy");
            return Ok(guard.state.clone());
        }
        debug!( state = ?state.to_string(), "vpn_state_resynced");
        guard.state = state.clone();
        Ok(state)
    }

    async fn run_disconnect(
        &self,
        previous: ConnectionState,
        generation: u64,
    ) -> Result<ConnectionReport> {
        match self.backend.disconnect_vpn().await {
            Ok(message) => {
                self.finish(generation, ConnectionState::Disconnected);
                info!( status = ?message, "vpn_disconnected");
                Ok(ConnectionReport {
                    state: self.state(),
                    message,
                })
            }
            Err(e) => {
                self.finish(generation, previous);
                warn!( error = ?e.to_string(), "vpn_disconnect_failed");
                Err(AppError::connection(
                    ConnectionVerb::Disconnect,
                    backend_message(e),
                ))
            }
        }
    }

    /// Publish `state` unless a logout happened meanwhile.
    fn finish(&self, generation: u64, state: ConnectionState) -> bool {
        let mut guard = self.lock();
        if guard.generation != generation {
            warn!( state = ?state.to_string(), "vpn_result_discarded");
            return false;
        }
        guard.state = state;
        true
    }

    fn lock(&self) -> MutexGuard<'_, Guarded> {
        self.guarded.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn backend_message(error: AppError) -> String {
    match error {
        AppError::Backend { message, .. } | AppError::Connection { message, .. } => message,
        other => other.to_string(),
    }
}
