use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

const DEFAULT_PLAN: &str = "Free";

/// Body for POST /api/users/login
#[derive(Debug, Serialize)]
pub struct LoginRequest<'a> {
    pub email: &'a str,
    pub password: &'a str,
}

/// API response from POST /api/users/login
#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponse {
    pub token: String,
    pub user: LoginUser,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginUser {
    pub email: String,
    pub username: String,
    #[serde(default)]
    pub is_active: bool,
}

/// API response from GET /api/users/account
#[derive(Debug, Clone, Deserialize)]
pub struct AccountResponse {
    pub profile: Option<Profile>,
    #[serde(default)]
    pub subscription: Option<Subscription>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub username: String,
    pub email: String,
    #[serde(default)]
    pub member_since: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Subscription {
    pub plan: Option<String>,
}

/// Error body the account service sends with non-2xx statuses.
#[derive(Debug, Default, Deserialize)]
pub struct ApiErrorBody {
    pub message: Option<String>,
}

/// Account holder, immutable for the lifetime of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub username: String,
    pub email: String,
    pub plan: String,
    pub member_since: String,
}

impl User {
    /// Calendar date part of `member_since` (the service sends ISO-8601).
    #[must_use]
    pub fn member_since_date(&self) -> &str {
        self.member_since
            .split('T')
            .next()
            .unwrap_or(&self.member_since)
    }
}

impl TryFrom<AccountResponse> for User {
    type Error = AppError;

    fn try_from(resp: AccountResponse) -> Result<Self> {
        let profile = resp.profile.ok_or_else(|| AppError::Api {
            status: 200,
            message: "account response has no profile".to_string(),
        })?;
        let plan = resp
            .subscription
            .and_then(|s| s.plan)
            .filter(|p| !p.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_PLAN.to_string());
        Ok(User {
            username: profile.username,
            email: profile.email,
            plan,
            member_since: profile.member_since,
        })
    }
}

/// Authenticated identity handed to the connection layer.
///
/// Built on login or restore, dropped on logout.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub user: User,
    pub token: String,
}
