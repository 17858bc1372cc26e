// Token endpoint round-trip

use reqwest::Client;

use super::types::{TokenConfig, TokenRequest, TokenResponse};
use crate::error::TokenError;

/// POST the issuer to the token endpoint and return the minted token
pub async fn request_token(client: &Client, config: &TokenConfig) -> Result<String, TokenError> {
    tracing::debug!(
        endpoint = %config.token_endpoint,
        issuer = %config.issuer,
        "Requesting token"
    );

    let response = client
        .post(&config.token_endpoint)
        .header("Content-Type", "application/json")
        .json(&TokenRequest {
            issuer: &config.issuer,
        })
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        let error_text = response.text().await.unwrap_or_default();
        tracing::error!(
            status = status.as_u16(),
            body = %error_text,
            "Token endpoint returned error response"
        );
        return Err(TokenError::Endpoint {
            status: status.as_u16(),
        });
    }

    let data: TokenResponse = response.json().await?;
    data.into_token().ok_or(TokenError::Missing)
}
