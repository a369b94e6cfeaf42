use std::sync::Arc;

use tracing::{info, warn};

use crate::api::AccountApi;
use crate::backend_client::NativeBackend;
use crate::error::{AppError, Result};
use crate::models::session::{SessionContext, User};
use crate::shared::kv_store::{KvStore, TOKEN_KEY, USERNAME_KEY};
use crate::vault::CredentialVault;

pub const CREDENTIALS_NOT_SAVED: &str = "Warning: VPN credentials not saved properly";

/// Successful login; `warning` is set when the VPN secret could not be stored.
#[derive(Debug, Clone)]
pub struct LoginOutcome {
    pub context: SessionContext,
    pub warning: Option<String>,
}

pub struct AuthSession<A: AccountApi + ?Sized, B: NativeBackend + ?Sized> {
    api: Arc<A>,
    store: KvStore,
    vault: CredentialVault<B>,
}

impl<A: AccountApi + ?Sized, B: NativeBackend + ?Sized> AuthSession<A, B> {
    pub fn new(api: Arc<A>, store: KvStore, vault: CredentialVault<B>) -> Self {
        Self { api, store, vault }
    }

    pub fn vault(&self) -> &CredentialVault<B> {
        &self.vault
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<LoginOutcome> {
        let response = self.api.login(email, password).await?;
        if !response.user.is_active {
            info!( email = ?email, "login_rejected_unverified");
            return Err(AppError::NotVerified);
        }

        self.store.set(TOKEN_KEY, &response.token)?;

        let warning = match self.vault.save(password).await {
            Ok(()) => None,
            Err(e) => {
                warn!( error = ?e.to_string(), "vault_save_failed");
                Some(CREDENTIALS_NOT_SAVED.to_string())
            }
        };
        self.store.set(USERNAME_KEY, &response.user.username)?;

        let user = self.fetch_profile(Some(&response.token)).await?;
        info!( username = ?user.username, plan = ?user.plan, "login_succeeded");
        Ok(LoginOutcome {
            context: SessionContext {
                user,
                token: response.token,
            },
            warning,
        })
    }

    /// Any failure invalidates the stored token.
    pub async fn fetch_profile(&self, token: Option<&str>) -> Result<User> {
        let token = token
            .filter(|t| !t.trim().is_empty())
            .ok_or(AppError::NotLoggedIn)?;

        let fetched = match self.api.fetch_account(token).await {
            Ok(account) => User::try_from(account),
            Err(e) => Err(e),
        };
        fetched.map_err(|e| {
            warn!( error = ?e.to_string(), "profile_fetch_failed");
            if let Err(e) = self.store.remove(TOKEN_KEY) {
                warn!( error = ?e.to_string(), "token_remove_failed");
            }
            AppError::SessionExpired
        })
    }

    /// Rebuild the session from the durable token, if one is stored.
    pub async fn restore(&self) -> Result<Option<SessionContext>> {
        let Some(token) = self.store.get(TOKEN_KEY)? else {
            return Ok(None);
        };
        let user = self.fetch_profile(Some(&token)).await?;
        Ok(Some(SessionContext { user, token }))
    }

    pub fn last_username(&self) -> Result<Option<String>> {
        self.store.get(USERNAME_KEY)
    }

    pub fn forget(&self) -> Result<()> {
        self.store.remove(TOKEN_KEY)?;
        self.store.remove(USERNAME_KEY)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::api::AccountApi;
    use crate::error::{AppError, Result};
    use crate::models::server::ServerRecord;
    use crate::models::session::{AccountResponse, LoginResponse, LoginUser, Profile, Subscription};

    pub struct FakeApi {
        pub active: bool,
        pub reject_login: bool,
        pub account_fails: Mutex<bool>,
        pub servers: Vec<ServerRecord>,
    }

    impl Default for FakeApi {
        fn default() -> Self {
            Self {
                active: true,
                reject_login: false,
                account_fails: Mutex::new(false),
                servers: Vec::new(),
            }
        }
    }

    #[async_trait]
    impl AccountApi for FakeApi {
        async fn login(&self, email: &str, _password: &str) -> Result<LoginResponse> {
            if self.reject_login {
                return Err(AppError::Auth("Invalid email or password".into()));
            }
            Ok(LoginResponse {
                token: "tok-123".into(),
                user: LoginUser {
                    email: email.into(),
                    username: "ana".into(),
                    is_active: self.active,
                },
            })
        }

        async fn fetch_account(&self, token: &str) -> Result<AccountResponse> {
            if *self.account_fails.lock().unwrap() || token != "tok-123" {
                return Err(AppError::Api {
                    status: 401,
                    message: "Unauthorized".into(),
                });
            }
            Ok(AccountResponse {
                profile: Some(Profile {
                    username: "ana".into(),
                    email: "ana@example.com".into(),
                    member_since: "2023-04-01T10:00:00Z".into(),
                }),
                subscription: Some(Subscription {
                    plan: Some("Premium".into()),
                }),
            })
        }

        async fn list_servers(&self) -> Result<Vec<ServerRecord>> {
            Ok(self.servers.clone())
        }
    }
}
