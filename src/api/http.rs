use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;

use crate::config::ApiConfig;
use crate::error::{AppError, Result};
use crate::models::session::ApiErrorBody;

const API_KEY_HEADER: &str = "X-API-KEY";
const USER_AGENT: &str = concat!("vpndesk/", env!("CARGO_PKG_VERSION"));

/// HTTP client preconfigured with the account service's client key.
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(config: &ApiConfig) -> Result<Self> {
        let (base_url, api_key) = config.require()?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let key = HeaderValue::from_str(api_key).map_err(|_| {
            AppError::Configuration("API key contains invalid header characters".to_string())
        })?;
        headers.insert(API_KEY_HEADER, key);

        let client = Client::builder()
            .default_headers(headers)
            .user_agent(USER_AGENT)
            .timeout(Duration::from_millis(config.timeout_ms.max(1000)))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.to_string(),
        })
    }

    pub fn get(&self, path: &str) -> RequestBuilder {
        self.client.get(self.url(path))
    }

    pub fn post(&self, path: &str) -> RequestBuilder {
        self.client.post(self.url(path))
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

/// Decode a successful JSON body, or turn a non-2xx status into `AppError::Api`.
pub async fn parse_api_json<T: DeserializeOwned>(resp: Response, action: &str) -> Result<T> {
    let status = resp.status();
    let body = resp.text().await?;
    if !status.is_success() {
        return Err(AppError::Api {
            status: status.as_u16(),
            message: extract_api_error(&body).unwrap_or_else(|| format!("{} failed", action)),
        });
    }
    serde_json::from_str::<T>(&body)
        .map_err(|e| AppError::Other(format!("failed to parse {} response: {}", action, e)))
}

/// The service's `message` field, if the body carries one.
pub fn extract_api_error(body: &str) -> Option<String> {
    serde_json::from_str::<ApiErrorBody>(body)
        .ok()
        .and_then(|b| b.message)
        .map(|m| m.trim().to_string())
        .filter(|m| !m.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_api_error_message() {
        assert_eq!(
            extract_api_error(r#"{"message": "Invalid credentials"}"#).as_deref(),
            Some("Invalid credentials")
        );
        assert_eq!(extract_api_error(r#"{"message": "  "}"#), None);
        assert_eq!(extract_api_error(r#"{"error": "nope"}"#), None);
        assert_eq!(extract_api_error("<html>bad gateway</html>"), None);
    }

    #[test]
    fn test_client_requires_api_settings() {
        let config = ApiConfig::default();
        assert!(matches!(
            ApiClient::new(&config),
            Err(AppError::Configuration(_))
        ));
    }

    #[test]
    fn test_client_joins_paths_without_double_slash() {
        let config = ApiConfig {
            base_url: Some("https://accounts.example.net/".to_string()),
            api_key: Some("client-key".to_string()),
            ..ApiConfig::default()
        };
        let client = ApiClient::new(&config).expect("client");
        assert_eq!(
            client.url("/api/servers"),
            "https://accounts.example.net/api/servers"
        );
    }
}
