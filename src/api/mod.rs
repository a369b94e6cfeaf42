pub mod auth;
pub mod http;
pub mod servers;

use async_trait::async_trait;

use crate::error::{AppError, Result};
use crate::models::server::ServerRecord;
use crate::models::session::{AccountResponse, LoginResponse};

pub use http::ApiClient;

/// Remote account and server-list service.
#[async_trait]
pub trait AccountApi: Send + Sync {
    async fn login(&self, email: &str, password: &str) -> Result<LoginResponse>;

    async fn fetch_account(&self, token: &str) -> Result<AccountResponse>;

    async fn list_servers(&self) -> Result<Vec<ServerRecord>>;
}

#[async_trait]
impl AccountApi for ApiClient {
    async fn login(&self, email: &str, password: &str) -> Result<LoginResponse> {
        auth::login(self, email, password).await
    }

    async fn fetch_account(&self, token: &str) -> Result<AccountResponse> {
        auth::fetch_account(self, token).await
    }

    async fn list_servers(&self) -> Result<Vec<ServerRecord>> {
        servers::fetch_server_list(self).await
    }
}

/// Stand-in when no account service is configured; every call fails with the
/// configuration error so offline commands (logout, status) still work.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unconfigured;

fn missing_configuration() -> AppError {
    AppError::Configuration("API configuration is missing.".to_string())
}

#[async_trait]
impl AccountApi for Unconfigured {
    async fn login(&self, _email: &str, _password: &str) -> Result<LoginResponse> {
        Err(missing_configuration())
    }

    async fn fetch_account(&self, _token: &str) -> Result<AccountResponse> {
        Err(missing_configuration())
    }

    async fn list_servers(&self) -> Result<Vec<ServerRecord>> {
        Err(missing_configuration())
    }
}
