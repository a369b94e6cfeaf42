use tracing::{debug, info, warn};

use crate::api::http::{extract_api_error, parse_api_json, ApiClient};
use crate::error::{AppError, Result};
use crate::models::session::{AccountResponse, LoginRequest, LoginResponse};

/// POST /api/users/login
///
/// A non-2xx answer becomes `AppError::Auth` carrying the service's message.
pub async fn login(client: &ApiClient, email: &str, password: &str) -> Result<LoginResponse> {
    info!( email = ?email, "account_login_request");
    let resp = client
        .post("/api/users/login")
        .json(&LoginRequest { email, password })
        .send()
        .await?;

    let status = resp.status();
    let body = resp.text().await?;
    if !status.is_success() {
        warn!( status = ?status.as_u16(), "account_login_rejected");
        let message = extract_api_error(&body).unwrap_or_else(|| "Login failed".to_string());
        return Err(AppError::Auth(message));
    }

    let login: LoginResponse = serde_json::from_str(&body)?;
    debug!(
        username = ?login.user.username,
        active = ?login.user.is_active, "account_login_accepted");
    Ok(login)
}

/// GET /api/users/account
pub async fn fetch_account(client: &ApiClient, token: &str) -> Result<AccountResponse> {
    debug!("account_profile_request");
    let resp = client
        .get("/api/users/account")
        .bearer_auth(token)
        .send()
        .await?;
    parse_api_json(resp, "account profile").await
}
