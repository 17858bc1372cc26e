// Error handling module
// Defines the token and delivery error taxonomy

use std::sync::Arc;
use thiserror::Error;

/// Errors produced while acquiring a bearer token
///
/// Cloneable so one refresh outcome can be handed to every caller
/// attached to the same in-flight round-trip.
#[derive(Error, Debug, Clone)]
pub enum TokenError {
    /// Token endpoint answered with a non-2xx status
    #[error("Failed to refresh token: {status}")]
    Endpoint { status: u16 },

    /// Token endpoint answered 2xx without a usable `token` field
    #[error("Token not found in response")]
    Missing,

    /// Network or decoding failure talking to the token endpoint
    #[error("Token request failed: {0}")]
    Transport(Arc<reqwest::Error>),

    /// Refresh was torn down by `destroy()` before it completed
    #[error("Token refresh aborted")]
    Aborted,
}

impl From<reqwest::Error> for TokenError {
    fn from(err: reqwest::Error) -> Self {
        TokenError::Transport(Arc::new(err))
    }
}

/// Errors produced by a single webhook delivery
#[derive(Error, Debug)]
pub enum DeliveryError {
    /// Token acquisition failed before the request was sent
    #[error(transparent)]
    Token(#[from] TokenError),

    /// Webhook answered 401
    #[error("Authentication failed")]
    Authentication,

    /// Webhook answered any other non-2xx status
    #[error("HTTP error! status: {status}")]
    Http { status: u16 },

    /// Send was superseded or explicitly cancelled
    #[error("Request cancelled")]
    Cancelled,

    /// Network or decoding failure talking to the webhook
    #[error(transparent)]
    Transport(#[from] reqwest::Error),
}

impl DeliveryError {
    /// True when the send was superseded or cancelled
    pub fn is_cancelled(&self) -> bool {
        matches!(self, DeliveryError::Cancelled)
    }

    /// True when the webhook rejected the credential
    pub fn is_authentication(&self) -> bool {
        matches!(self, DeliveryError::Authentication)
    }
}
