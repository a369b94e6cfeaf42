use serde::{Deserialize, Serialize};

/// One request line sent to the backend daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackendRequest {
    SaveVpnPassword { password: String },
    GetVpnPassword { username: String },
    AssociateUsername { username: String },
    ClearCredentials { username: String },
    ConnectVpn { server_name: String, username: String },
    DisconnectVpn,
    GetVpnStatus,
    GetConnectedServer,
}

/// One response line from the backend daemon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum BackendResponse {
    Unit,
    Bool(bool),
    Text(String),
    OptionalText(Option<String>),
    Error { code: String, message: String },
}

impl BackendRequest {
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Self::SaveVpnPassword { password } => {
                if password.trim().is_empty() {
                    return Err("password cannot be empty".into());
                }
                Ok(())
            }
            Self::GetVpnPassword { username }
            | Self::AssociateUsername { username }
            | Self::ClearCredentials { username } => validate_username(username),
            Self::ConnectVpn {
                server_name,
                username,
            } => {
                validate_server_name(server_name)?;
                validate_username(username)
            }
            Self::DisconnectVpn | Self::GetVpnStatus | Self::GetConnectedServer => Ok(()),
        }
    }

    /// Name for logs; never includes secrets.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SaveVpnPassword { .. } => "save_vpn_password",
            Self::GetVpnPassword { .. } => "get_vpn_password",
            Self::AssociateUsername { .. } => "associate_username",
            Self::ClearCredentials { .. } => "clear_credentials",
            Self::ConnectVpn { .. } => "connect_vpn",
            Self::DisconnectVpn => "disconnect_vpn",
            Self::GetVpnStatus => "get_vpn_status",
            Self::GetConnectedServer => "get_connected_server",
        }
    }
}

/// Usernames double as credential slot names, so they must be file-name safe.
pub fn validate_username(username: &str) -> Result<(), String> {
    if username.is_empty() {
        return Err("username cannot be empty".into());
    }
    if username.len() > 128 {
        return Err("username too long".into());
    }
    if username.starts_with('.') {
        return Err("username cannot start with '.'".into());
    }
    if username.contains('/') || username.contains('\0') {
        return Err("username contains invalid characters".into());
    }
    Ok(())
}

/// Server names select a directory under the tunnel profile root. Anything
/// that stays a single path component is accepted.
pub fn validate_server_name(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("server name cannot be empty".into());
    }
    // NAME_MAX on Linux filesystems.
    if name.len() > 255 {
        return Err("server name too long".into());
    }
    if name.starts_with('.') {
        return Err("server name cannot start with '.'".into());
    }
    if name.contains('/') || name.contains('\0') {
        return Err(format!("server name {:?} contains invalid characters", name));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_wire_format() {
        let req = BackendRequest::ConnectVpn {
            server_name: "Paris-01".into(),
            username: "ana".into(),
        };
        let json = serde_json::to_string(&req).unwrap();
        assert_eq!(
            json,
            r#"{"kind":"connect_vpn","server_name":"Paris-01","username":"ana"}"#
        );

        let status: BackendRequest = serde_json::from_str(r#"{"kind":"get_vpn_status"}"#).unwrap();
        assert!(matches!(status, BackendRequest::GetVpnStatus));
    }

    #[test]
    fn test_response_wire_format() {
        let json = serde_json::to_string(&BackendResponse::OptionalText(None)).unwrap();
        assert_eq!(json, r#"{"kind":"optional_text","value":null}"#);

        let parsed: BackendResponse =
            serde_json::from_str(r#"{"kind":"bool","value":true}"#).unwrap();
        assert_eq!(parsed, BackendResponse::Bool(true));

        let parsed: BackendResponse = serde_json::from_str(
            r#"{"kind":"error","value":{"code":"Tunnel","message":"boom"}}"#,
        )
        .unwrap();
        assert_eq!(
            parsed,
            BackendResponse::Error {
                code: "Tunnel".into(),
                message: "boom".into()
            }
        );
    }

    #[test]
    fn test_validate_rejects_blank_password() {
        let req = BackendRequest::SaveVpnPassword {
            password: "   ".into(),
        };
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_validate_username() {
        assert!(validate_username("ana.smith").is_ok());
        assert!(validate_username("").is_err());
        assert!(validate_username("../etc").is_err());
        assert!(validate_username("a/b").is_err());
        assert!(validate_username(".hidden").is_err());
    }

    #[test]
    fn test_validate_server_name() {
        assert!(validate_server_name("New-York-2").is_ok());
        assert!(validate_server_name("US#4").is_ok());
        assert!(validate_server_name("Zürich-1").is_ok());
        assert!(validate_server_name("Paris-01-(FR)").is_ok());
        assert!(validate_server_name("São-Paulo,-BR").is_ok());
        assert!(validate_server_name("Frankfurt+1").is_ok());
        assert!(validate_server_name("..").is_err());
        assert!(validate_server_name(".hidden").is_err());
        assert!(validate_server_name("a/b").is_err());
        assert!(validate_server_name("a\0b").is_err());
        assert!(validate_server_name("").is_err());
        assert!(validate_server_name(&"x".repeat(256)).is_err());
    }

    #[test]
    fn test_kind_never_leaks_payload() {
        let req = BackendRequest::SaveVpnPassword {
            password: "hunter2".into(),
        };
        assert_eq!(req.kind(), "save_vpn_password");
    }
}
