use anyhow::{Context, Result};
use clap::Parser;
use reqwest::Url;

use crate::auth::TokenConfig;
use crate::session::SessionOptions;

/// Chat Relay - talk to a chat webhook from the terminal
#[derive(Parser, Debug, Default)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Webhook URL that receives chat messages
    #[arg(short = 'w', long, env = "WEBHOOK_URL")]
    pub webhook_url: Option<String>,

    /// Token issuer configuration as JSON
    /// ({"issuer": ..., "tokenEndpoint": ..., "refreshInterval": ..., "expirationWindow": ...})
    #[arg(long, env = "JWT_CONFIG")]
    pub jwt_config: Option<String>,

    /// Token issuer identifier
    #[arg(long, env = "JWT_ISSUER")]
    pub jwt_issuer: Option<String>,

    /// Token endpoint URL
    #[arg(long, env = "JWT_TOKEN_ENDPOINT")]
    pub jwt_token_endpoint: Option<String>,

    /// Token lifetime in seconds when the token carries no expiry
    #[arg(long, env = "JWT_REFRESH_INTERVAL")]
    pub jwt_refresh_interval: Option<u64>,

    /// Seconds before expiry at which the token is renewed
    #[arg(long, env = "JWT_EXPIRATION_WINDOW")]
    pub jwt_expiration_window: Option<u64>,

    /// Page URL reported with each message
    #[arg(long, env = "PAGE_URL", default_value = "")]
    pub page_url: String,

    /// Number of recent messages sent with each request
    #[arg(long, env = "HISTORY_LIMIT", default_value = "10")]
    pub history_limit: usize,

    /// Record system notices in the history
    #[arg(long, env = "HISTORY_ENABLED", default_value = "true", action = clap::ArgAction::Set)]
    pub history_enabled: bool,

    /// HTTP request timeout in seconds
    #[arg(long, env = "HTTP_REQUEST_TIMEOUT", default_value = "30")]
    pub http_timeout: u64,

    /// HTTP connect timeout in seconds
    #[arg(long, env = "HTTP_CONNECT_TIMEOUT", default_value = "10")]
    pub connect_timeout: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

#[derive(Clone, Debug)]
pub struct Config {
    // Webhook
    pub webhook_url: String,

    // Token issuer (absent when the webhook is unauthenticated)
    pub token: Option<TokenConfig>,

    // Session
    pub page_url: String,
    pub history_limit: usize,
    pub history_enabled: bool,

    // HTTP client
    pub http_request_timeout: u64,
    pub http_connect_timeout: u64,

    // Logging
    pub log_level: String,
}

impl Config {
    /// Load configuration from all sources with priority: CLI > ENV > defaults
    pub fn load() -> Result<Self> {
        // Load .env file if it exists
        dotenvy::dotenv().ok();

        Self::from_args(CliArgs::parse())
    }

    /// Build configuration from parsed arguments
    pub fn from_args(args: CliArgs) -> Result<Self> {
        let webhook_url = args
            .webhook_url
            .filter(|url| !url.trim().is_empty())
            .context("WEBHOOK_URL is required (use -w or set WEBHOOK_URL env var)")?;

        let token = resolve_token_config(
            args.jwt_config.as_deref(),
            args.jwt_issuer,
            args.jwt_token_endpoint,
            args.jwt_refresh_interval,
            args.jwt_expiration_window,
        )?;

        Ok(Config {
            webhook_url,
            token,
            page_url: args.page_url,
            history_limit: args.history_limit,
            history_enabled: args.history_enabled,
            http_request_timeout: args.http_timeout,
            http_connect_timeout: args.connect_timeout,
            log_level: args.log_level,
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        Url::parse(&self.webhook_url)
            .with_context(|| format!("WEBHOOK_URL is not a valid URL: {}", self.webhook_url))?;

        if let Some(token) = &self.token {
            Url::parse(&token.token_endpoint).with_context(|| {
                format!(
                    "JWT token endpoint is not a valid URL: {}",
                    token.token_endpoint
                )
            })?;
        }

        Ok(())
    }

    /// Session settings derived from this configuration
    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            page_url: self.page_url.clone(),
            history_limit: self.history_limit,
            history_enabled: self.history_enabled,
        }
    }
}

/// Combine the JSON config and individual flags into a token configuration
///
/// Individual flags override fields of the JSON object. Token support is
/// off when neither source names an issuer or endpoint.
fn resolve_token_config(
    json: Option<&str>,
    issuer: Option<String>,
    token_endpoint: Option<String>,
    refresh_interval: Option<u64>,
    expiration_window: Option<u64>,
) -> Result<Option<TokenConfig>> {
    let base = match json.map(str::trim).filter(|s| !s.is_empty()) {
        Some(raw) => Some(parse_jwt_config(raw)?),
        None => None,
    };

    let issuer = issuer.or_else(|| base.as_ref().map(|c| c.issuer.clone()));
    let token_endpoint =
        token_endpoint.or_else(|| base.as_ref().map(|c| c.token_endpoint.clone()));
    let refresh_interval = refresh_interval.or(base.as_ref().and_then(|c| c.refresh_interval));
    let expiration_window =
        expiration_window.or(base.as_ref().and_then(|c| c.expiration_window));

    let issuer = issuer.filter(|s| !s.is_empty());
    let token_endpoint = token_endpoint.filter(|s| !s.is_empty());

    match (issuer, token_endpoint) {
        (None, None) if base.is_none() => Ok(None),
        (Some(issuer), Some(token_endpoint)) => Ok(Some(TokenConfig {
            issuer,
            token_endpoint,
            refresh_interval,
            expiration_window,
        })),
        _ => anyhow::bail!(
            "Invalid JWT configuration: both issuer and token endpoint are required"
        ),
    }
}

/// Parse the widget-style JSON token configuration
fn parse_jwt_config(raw: &str) -> Result<TokenConfig> {
    let value: serde_json::Value =
        serde_json::from_str(raw).context("Failed to parse JWT config")?;

    // Missing fields read as empty so the caller reports them uniformly
    let field = |name: &str| {
        value
            .get(name)
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string()
    };
    let number = |name: &str| value.get(name).and_then(|v| v.as_u64());

    Ok(TokenConfig {
        issuer: field("issuer"),
        token_endpoint: field("tokenEndpoint"),
        refresh_interval: number("refreshInterval"),
        expiration_window: number("expirationWindow"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(webhook_url: &str) -> CliArgs {
        CliArgs {
            webhook_url: Some(webhook_url.to_string()),
            history_limit: 10,
            history_enabled: true,
            http_timeout: 30,
            connect_timeout: 10,
            log_level: "info".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_webhook_only() {
        let config = Config::from_args(args("https://hooks.example.com/chat")).unwrap();
        assert_eq!(config.webhook_url, "https://hooks.example.com/chat");
        assert!(config.token.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_webhook_url() {
        let mut cli = args("");
        assert!(Config::from_args(cli).is_err());

        cli = args("x");
        cli.webhook_url = None;
        let err = Config::from_args(cli).unwrap_err();
        assert!(err.to_string().contains("WEBHOOK_URL"));
    }

    #[test]
    fn test_invalid_webhook_url() {
        let config = Config::from_args(args("not a url")).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_jwt_config_json() {
        let mut cli = args("https://hooks.example.com/chat");
        cli.jwt_config = Some(
            r#"{"issuer":"acme","tokenEndpoint":"https://auth.example.com/token","expirationWindow":30}"#
                .to_string(),
        );

        let config = Config::from_args(cli).unwrap();
        let token = config.token.unwrap();
        assert_eq!(token.issuer, "acme");
        assert_eq!(token.token_endpoint, "https://auth.example.com/token");
        assert_eq!(token.expiration_window_secs(), 30);
        assert_eq!(token.refresh_interval_secs(), 300);
    }

    #[test]
    fn test_flags_override_json() {
        let mut cli = args("https://hooks.example.com/chat");
        cli.jwt_config =
            Some(r#"{"issuer":"acme","tokenEndpoint":"https://auth.example.com/token"}"#.to_string());
        cli.jwt_issuer = Some("other".to_string());
        cli.jwt_refresh_interval = Some(600);

        let token = Config::from_args(cli).unwrap().token.unwrap();
        assert_eq!(token.issuer, "other");
        assert_eq!(token.token_endpoint, "https://auth.example.com/token");
        assert_eq!(token.refresh_interval_secs(), 600);
    }

    #[test]
    fn test_individual_flags() {
        let mut cli = args("https://hooks.example.com/chat");
        cli.jwt_issuer = Some("acme".to_string());
        cli.jwt_token_endpoint = Some("https://auth.example.com/token".to_string());

        let config = Config::from_args(cli).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.token.unwrap().issuer, "acme");
    }

    #[test]
    fn test_incomplete_jwt_config_rejected() {
        let mut cli = args("https://hooks.example.com/chat");
        cli.jwt_config = Some(r#"{"issuer":"acme"}"#.to_string());
        let err = Config::from_args(cli).unwrap_err();
        assert!(err.to_string().contains("Invalid JWT configuration"));

        let mut cli = args("https://hooks.example.com/chat");
        cli.jwt_config = Some("{}".to_string());
        assert!(Config::from_args(cli).is_err());

        let mut cli = args("https://hooks.example.com/chat");
        cli.jwt_token_endpoint = Some("https://auth.example.com/token".to_string());
        assert!(Config::from_args(cli).is_err());
    }

    #[test]
    fn test_malformed_jwt_json_rejected() {
        let mut cli = args("https://hooks.example.com/chat");
        cli.jwt_config = Some("{issuer:".to_string());
        let err = Config::from_args(cli).unwrap_err();
        assert!(err.to_string().contains("Failed to parse JWT config"));
    }

    #[test]
    fn test_invalid_token_endpoint() {
        let mut cli = args("https://hooks.example.com/chat");
        cli.jwt_issuer = Some("acme".to_string());
        cli.jwt_token_endpoint = Some("/relative/token".to_string());

        let config = Config::from_args(cli).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_session_options() {
        let mut cli = args("https://hooks.example.com/chat");
        cli.page_url = "https://shop.example.com".to_string();
        cli.history_limit = 4;
        cli.history_enabled = false;

        let options = Config::from_args(cli).unwrap().session_options();
        assert_eq!(options.page_url, "https://shop.example.com");
        assert_eq!(options.history_limit, 4);
        assert!(!options.history_enabled);
    }

    #[test]
    fn test_cli_parsing() {
        let cli = CliArgs::try_parse_from([
            "chat-relay",
            "-w",
            "https://hooks.example.com/chat",
            "--jwt-issuer",
            "acme",
            "--jwt-token-endpoint",
            "https://auth.example.com/token",
            "--history-enabled",
            "false",
        ])
        .unwrap();

        assert_eq!(cli.history_limit, 10);
        assert!(!cli.history_enabled);
        assert_eq!(cli.http_timeout, 30);
        let config = Config::from_args(cli).unwrap();
        assert!(config.token.is_some());
    }
}
