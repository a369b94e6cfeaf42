use std::sync::Arc;

use tracing::{info, warn};

use crate::api::AccountApi;
use crate::backend_client::NativeBackend;
use crate::catalog::ServerCatalog;
use crate::controller::{ConnectionController, ConnectionReport};
use crate::error::{AppError, Result};
use crate::models::server::Server;
use crate::models::session::{SessionContext, User};
use crate::session::AuthSession;
use crate::shared::kv_store::KvStore;
use crate::shared::latency::LatencyProbe;
use crate::vault::CredentialVault;

#[derive(Debug, Clone)]
pub enum Command {
    Login { email: String, password: String },
    Restore,
    Connect(Server),
    Disconnect,
    Logout,
}

#[derive(Debug, Clone)]
pub enum Reply {
    LoggedIn { user: User, warning: Option<String> },
    /// `None` when no session was stored.
    Restored(Option<User>),
    Connection(ConnectionReport),
    LoggedOut,
}

/// Owns the session context and routes user commands to the services.
pub struct App<A: AccountApi + ?Sized, B: NativeBackend + ?Sized> {
    session: AuthSession<A, B>,
    controller: ConnectionController<B>,
    catalog: ServerCatalog<A>,
    context: Option<SessionContext>,
}

impl<A: AccountApi + ?Sized, B: NativeBackend + ?Sized> App<A, B> {
    pub fn new(api: Arc<A>, backend: Arc<B>, store: KvStore, probe: LatencyProbe) -> Self {
        let vault = CredentialVault::new(Arc::clone(&backend));
        Self {
            session: AuthSession::new(Arc::clone(&api), store, vault.clone()),
            controller: ConnectionController::new(backend, vault),
            catalog: ServerCatalog::new(api, probe),
            context: None,
        }
    }

    pub fn context(&self) -> Option<&SessionContext> {
        self.context.as_ref()
    }

    pub fn controller(&self) -> &ConnectionController<B> {
        &self.controller
    }

    pub fn catalog(&self) -> &ServerCatalog<A> {
        &self.catalog
    }

    pub async fn execute(&mut self, command: Command) -> Result<Reply> {
        match command {
            Command::Login { email, password } => {
                let outcome = match self.session.login(&email, &password).await {
                    Ok(outcome) => outcome,
                    // Token and secret were already stored; nothing may outlive the failure.
                    Err(AppError::SessionExpired) => {
                        info!( email = ?email, "login_profile_failed_forcing_logout");
                        self.logout().await?;
                        return Err(AppError::SessionExpired);
                    }
                    Err(e) => return Err(e),
                };
                self.session
                    .vault()
                    .associate(&outcome.context.user.username)
                    .await;
                let user = outcome.context.user.clone();
                self.context = Some(outcome.context);
                Ok(Reply::LoggedIn {
                    user,
                    warning: outcome.warning,
                })
            }

            Command::Restore => match self.session.restore().await {
                Ok(Some(context)) => {
                    self.session.vault().associate(&context.user.username).await;
                    let user = context.user.clone();
                    self.context = Some(context);
                    Ok(Reply::Restored(Some(user)))
                }
                Ok(None) => Ok(Reply::Restored(None)),
                Err(AppError::SessionExpired) => {
                    info!("session_expired_forcing_logout");
                    self.logout().await?;
                    Err(AppError::SessionExpired)
                }
                Err(e) => Err(e),
            },

            Command::Connect(server) => {
                let user = self.context.as_ref().map(|c| &c.user);
                let report = self.controller.connect(user, &server).await?;
                Ok(Reply::Connection(report))
            }

            Command::Disconnect => Ok(Reply::Connection(self.controller.disconnect().await?)),

            Command::Logout => self.logout().await,
        }
    }

    async fn logout(&mut self) -> Result<Reply> {
        self.controller.force_disconnect().await;

        let username = match self.context.take() {
            Some(context) => Some(context.user.username),
            None => self.session.last_username().unwrap_or_else(|e| {
                warn!( error = ?e.to_string(), "last_username_unreadable");
                None
            }),
        };
        if let Some(username) = &username {
            self.session.vault().clear(username).await;
        }
        self.session.forget()?;
        info!( username = ?username, "logged_out");
        Ok(Reply::LoggedOut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::ConnectionState;
    use crate::session::testing::FakeApi;
    use crate::shared::kv_store::{TOKEN_KEY, USERNAME_KEY};
    use crate::vault::testing::FakeBackend;

    fn app(
        dir: &std::path::Path,
        api: FakeApi,
        backend: Arc<FakeBackend>,
    ) -> App<FakeApi, FakeBackend> {
        App::new(
            Arc::new(api),
            backend,
            KvStore::open(dir.join("state.json")),
            LatencyProbe::default(),
        )
    }

    fn login() -> Command {
        Command::Login {
            email: "ana@example.com".into(),
            password: "hunter2".into(),
        }
    }

    fn paris() -> Server {
        Server {
            id: 7,
            name: "Paris 01".into(),
            ip: "10.0.0.7".into(),
            location: "Paris, FR".into(),
            latency_ms: Some(12),
        }
    }

    #[tokio::test]
    async fn test_login_associates_then_connects() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(FakeBackend::default());
        let mut app = app(dir.path(), FakeApi::default(), Arc::clone(&backend));

        match app.execute(login()).await.unwrap() {
            Reply::LoggedIn { user, warning } => {
                assert_eq!(user.username, "ana");
                assert!(warning.is_none());
            }
            other => panic!("unexpected reply {:?}", other),
        }

        match app.execute(Command::Connect(paris())).await.unwrap() {
            Reply::Connection(report) => {
                assert_eq!(report.state, ConnectionState::Connected { server: paris() })
            }
            other => panic!("unexpected reply {:?}", other),
        }
        assert_eq!(
            backend.calls(),
            vec!["save:hunter2", "associate:ana", "get:ana", "connect:Paris-01"]
        );
    }

    #[tokio::test]
    async fn test_connect_without_session_is_not_logged_in() {
        let dir = tempfile::tempdir().unwrap();
        let mut app = app(dir.path(), FakeApi::default(), Arc::new(FakeBackend::default()));
        assert!(matches!(
            app.execute(Command::Connect(paris())).await,
            Err(AppError::NotLoggedIn)
        ));
    }

    #[tokio::test]
    async fn test_logout_clears_everything_idempotently() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(FakeBackend::default());
        let mut app = app(dir.path(), FakeApi::default(), Arc::clone(&backend));
        app.execute(login()).await.unwrap();
        app.execute(Command::Connect(paris())).await.unwrap();

        assert!(matches!(
            app.execute(Command::Logout).await.unwrap(),
            Reply::LoggedOut
        ));
        assert!(app.context().is_none());
        assert_eq!(app.controller().state(), ConnectionState::Disconnected);
        assert!(backend.tunnel.lock().unwrap().is_none());
        assert!(backend.slots.lock().unwrap().is_empty());

        let store = KvStore::open(dir.path().join("state.json"));
        assert_eq!(store.get(TOKEN_KEY).unwrap(), None);
        assert_eq!(store.get(USERNAME_KEY).unwrap(), None);

        assert!(matches!(
            app.execute(Command::Logout).await.unwrap(),
            Reply::LoggedOut
        ));
        let calls = backend.calls();
        assert_eq!(calls.iter().filter(|c| *c == "disconnect").count(), 2);
        assert_eq!(calls.iter().filter(|c| *c == "clear:ana").count(), 1);
    }

    #[tokio::test]
    async fn test_logout_falls_back_to_stored_username() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(FakeBackend::default());
        {
            let mut first = app(dir.path(), FakeApi::default(), Arc::clone(&backend));
            first.execute(login()).await.unwrap();
        }

        // A fresh process knows nothing but the durable keys.
        let mut second = app(dir.path(), FakeApi::default(), Arc::clone(&backend));
        second.execute(Command::Logout).await.unwrap();
        assert!(backend.calls().contains(&"clear:ana".to_string()));
    }

    #[tokio::test]
    async fn test_profile_failure_at_login_forces_logout() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(FakeBackend::default());
        let api = FakeApi::default();
        *api.account_fails.lock().unwrap() = true;
        let mut app = app(dir.path(), api, Arc::clone(&backend));

        assert!(matches!(
            app.execute(login()).await,
            Err(AppError::SessionExpired)
        ));
        assert!(app.context().is_none());
        assert_eq!(
            backend.calls(),
            vec!["save:hunter2", "disconnect", "clear:ana"]
        );
        assert!(backend.pending.lock().unwrap().is_none());

        let store = KvStore::open(dir.path().join("state.json"));
        assert_eq!(store.get(TOKEN_KEY).unwrap(), None);
        assert_eq!(store.get(USERNAME_KEY).unwrap(), None);
    }

    #[tokio::test]
    async fn test_expired_restore_forces_logout() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Arc::new(FakeBackend::default());
        let api = FakeApi::default();
        let mut app = app(dir.path(), api, Arc::clone(&backend));
        app.execute(login()).await.unwrap();

        let expired = FakeApi::default();
        *expired.account_fails.lock().unwrap() = true;
        let mut restarted = App::new(
            Arc::new(expired),
            Arc::clone(&backend),
            KvStore::open(dir.path().join("state.json")),
            LatencyProbe::default(),
        );
        assert!(matches!(
            restarted.execute(Command::Restore).await,
            Err(AppError::SessionExpired)
        ));
        let calls = backend.calls();
        assert!(calls.contains(&"disconnect".to_string()));
        assert!(calls.contains(&"clear:ana".to_string()));

        let store = KvStore::open(dir.path().join("state.json"));
        assert_eq!(store.get(USERNAME_KEY).unwrap(), None);
        assert!(matches!(
            restarted.execute(Command::Restore).await.unwrap(),
            Reply::Restored(None)
        ));
    }
}
