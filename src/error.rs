use std::fmt;

use thiserror::Error;

/// Direction of a tunnel request, used to phrase connection failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionVerb {
    Connect,
    Disconnect,
}

impl fmt::Display for ConnectionVerb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionVerb::Connect => write!(f, "connect to"),
            ConnectionVerb::Disconnect => write!(f, "disconnect from"),
        }
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    Configuration(String),

    #[error("{0}")]
    Auth(String),

    #[error("Account is not verified. Please verify your email.")]
    NotVerified,

    #[error("Connection failed: {0}")]
    Network(#[from] reqwest::Error),

    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Credential error: {0}")]
    Credential(String),

    #[error("VPN credentials not found. Please log in again.")]
    CredentialNotFound,

    #[error("Failed to {verb} VPN: {message}")]
    Connection {
        verb: ConnectionVerb,
        message: String,
    },

    #[error("Another connection request is still in progress")]
    Busy,

    #[error("User information not available. Please try logging in again.")]
    NotLoggedIn,

    #[error("Session expired. Please log in again.")]
    SessionExpired,

    #[error("No server matches {0:?}")]
    ServerNotFound(String),

    #[error("Backend error ({code}): {message}")]
    Backend { code: String, message: String },

    #[error("Credential store unavailable: {0}")]
    CredentialStoreUnavailable(String),

    #[error("Credential store misconfigured: {0}")]
    CredentialStoreMisconfigured(String),

    #[error("Credential store failure: {0}")]
    CredentialStoreFailure(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl AppError {
    pub fn connection(verb: ConnectionVerb, message: impl Into<String>) -> Self {
        AppError::Connection {
            verb,
            message: message.into(),
        }
    }

    /// The caller has to send the user back through login.
    #[must_use]
    pub fn requires_reauth(&self) -> bool {
        matches!(
            self,
            AppError::CredentialNotFound | AppError::SessionExpired | AppError::NotLoggedIn
        )
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_error_names_direction() {
        let err = AppError::connection(ConnectionVerb::Connect, "tap adapter missing");
        assert_eq!(err.to_string(), "Failed to connect to VPN: tap adapter missing");

        let err = AppError::connection(ConnectionVerb::Disconnect, "kill failed");
        assert_eq!(err.to_string(), "Failed to disconnect from VPN: kill failed");
    }

    #[test]
    fn test_requires_reauth() {
        assert!(AppError::CredentialNotFound.requires_reauth());
        assert!(AppError::SessionExpired.requires_reauth());
        assert!(!AppError::Busy.requires_reauth());
        assert!(!AppError::Credential("backend down".into()).requires_reauth());
    }
}
