// Authentication types

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default refresh interval in seconds, used when a token carries no `exp`
pub const DEFAULT_REFRESH_INTERVAL: u64 = 300;

/// Default safety window in seconds subtracted from the expiry
pub const DEFAULT_EXPIRATION_WINDOW: u64 = 60;

/// Token issuer configuration
///
/// Accepts the same JSON shape the widget takes in its `jwt-config`
/// attribute. Zero values for the optional fields mean "use the default".
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenConfig {
    pub issuer: String,
    pub token_endpoint: String,
    #[serde(default)]
    pub refresh_interval: Option<u64>,
    #[serde(default)]
    pub expiration_window: Option<u64>,
}

impl TokenConfig {
    pub fn new(issuer: impl Into<String>, token_endpoint: impl Into<String>) -> Self {
        Self {
            issuer: issuer.into(),
            token_endpoint: token_endpoint.into(),
            refresh_interval: None,
            expiration_window: None,
        }
    }

    pub fn with_refresh_interval(mut self, seconds: u64) -> Self {
        self.refresh_interval = Some(seconds);
        self
    }

    pub fn with_expiration_window(mut self, seconds: u64) -> Self {
        self.expiration_window = Some(seconds);
        self
    }

    /// Fallback lifetime in seconds for tokens without an `exp` claim
    pub fn refresh_interval_secs(&self) -> i64 {
        match self.refresh_interval {
            Some(secs) if secs > 0 => secs as i64,
            _ => DEFAULT_REFRESH_INTERVAL as i64,
        }
    }

    /// Safety margin in seconds before expiry
    pub fn expiration_window_secs(&self) -> i64 {
        match self.expiration_window {
            Some(secs) if secs > 0 => secs as i64,
            _ => DEFAULT_EXPIRATION_WINDOW as i64,
        }
    }
}

/// Settings for the HTTP client used against the token endpoint
#[derive(Debug, Clone, Copy)]
pub struct TokenClientOptions {
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
}

impl Default for TokenClientOptions {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Token endpoint request body
#[derive(Debug, Serialize)]
pub struct TokenRequest<'a> {
    pub issuer: &'a str,
}

/// Token endpoint response body
///
/// Only `token` matters; it stays untyped so a missing or non-string value
/// surfaces as a missing token rather than a decode failure.
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    #[serde(default)]
    pub token: Option<serde_json::Value>,
}

impl TokenResponse {
    /// The token, if present as a non-empty string
    pub fn into_token(self) -> Option<String> {
        match self.token {
            Some(serde_json::Value::String(token)) if !token.is_empty() => Some(token),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = TokenConfig::new("acme", "https://auth.example.com/token");
        assert_eq!(config.refresh_interval_secs(), 300);
        assert_eq!(config.expiration_window_secs(), 60);
    }

    #[test]
    fn test_config_zero_falls_back_to_default() {
        let config = TokenConfig::new("acme", "https://auth.example.com/token")
            .with_refresh_interval(0)
            .with_expiration_window(0);
        assert_eq!(config.refresh_interval_secs(), 300);
        assert_eq!(config.expiration_window_secs(), 60);
    }

    #[test]
    fn test_config_from_widget_json() {
        let config: TokenConfig = serde_json::from_str(
            r#"{"issuer":"acme","tokenEndpoint":"https://auth.example.com/token","refreshInterval":120}"#,
        )
        .unwrap();
        assert_eq!(config.issuer, "acme");
        assert_eq!(config.token_endpoint, "https://auth.example.com/token");
        assert_eq!(config.refresh_interval_secs(), 120);
        assert_eq!(config.expiration_window_secs(), 60);
    }

    #[test]
    fn test_request_body_shape() {
        let body = serde_json::to_value(TokenRequest { issuer: "acme" }).unwrap();
        assert_eq!(body, serde_json::json!({"issuer": "acme"}));
    }

    #[test]
    fn test_response_token_extraction() {
        let parse = |s: &str| serde_json::from_str::<TokenResponse>(s).unwrap().into_token();
        assert_eq!(parse(r#"{"token":"abc","other":1}"#).as_deref(), Some("abc"));
        assert_eq!(parse(r#"{"token":""}"#), None);
        assert_eq!(parse(r#"{"token":null}"#), None);
        assert_eq!(parse(r#"{"token":42}"#), None);
        assert_eq!(parse(r#"{"access_token":"abc"}"#), None);
    }
}
