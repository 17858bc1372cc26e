use anyhow::{Context, Result};
use reqwest::Client;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::auth::TokenManager;
use crate::error::DeliveryError;
use crate::models::{WebhookRequest, WebhookResponse};

/// The send currently allowed to complete
struct ActiveSend {
    id: u64,
    cancel: CancellationToken,
}

/// Delivers chat messages to the webhook
///
/// At most one send is active: starting a new one cancels the previous
/// one, which then resolves with `DeliveryError::Cancelled`.
pub struct DeliveryCoordinator {
    /// Shared HTTP client with connection pooling
    client: Client,

    /// Webhook URL
    url: String,

    /// Bearer token source, if the webhook requires authentication
    tokens: Option<TokenManager>,

    /// Handle of the outstanding send
    active: Mutex<Option<ActiveSend>>,

    next_id: AtomicU64,
}

impl DeliveryCoordinator {
    /// Create a coordinator with its own HTTP client
    pub fn new(
        url: impl Into<String>,
        tokens: Option<TokenManager>,
        connect_timeout: u64,
        request_timeout: u64,
    ) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(connect_timeout))
            .timeout(Duration::from_secs(request_timeout))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self::with_client(url, tokens, client))
    }

    /// Create a coordinator that shares an existing HTTP client
    pub fn with_client(url: impl Into<String>, tokens: Option<TokenManager>, client: Client) -> Self {
        Self {
            client,
            url: url.into(),
            tokens,
            active: Mutex::new(None),
            next_id: AtomicU64::new(0),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn token_manager(&self) -> Option<&TokenManager> {
        self.tokens.as_ref()
    }

    /// Send a message, superseding any send still in progress
    ///
    /// Cancellation covers both token acquisition and the POST itself;
    /// the transport is dropped as soon as the handle is signalled.
    pub async fn send_message(
        &self,
        request: &WebhookRequest,
    ) -> Result<WebhookResponse, DeliveryError> {
        let (id, cancel) = self.begin();

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(DeliveryError::Cancelled),
            result = self.deliver(request) => result,
        };

        self.finish(id);

        match &result {
            Ok(_) => tracing::debug!(send_id = id, "Message delivered"),
            Err(DeliveryError::Cancelled) => {
                tracing::debug!(send_id = id, "Message delivery cancelled")
            }
            Err(e) => tracing::warn!(send_id = id, error = %e, "Message delivery failed"),
        }

        result
    }

    /// Cancel the active send, if any
    pub fn cancel_request(&self) {
        if let Some(active) = self.active().take() {
            tracing::debug!(send_id = active.id, "Cancelling request");
            active.cancel.cancel();
        }
    }

    /// True while a send is outstanding
    pub fn is_active(&self) -> bool {
        self.active().is_some()
    }

    fn active(&self) -> MutexGuard<'_, Option<ActiveSend>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Cancel the previous send and register a new one
    fn begin(&self) -> (u64, CancellationToken) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();

        let mut active = self.active();
        if let Some(previous) = active.replace(ActiveSend {
            id,
            cancel: cancel.clone(),
        }) {
            tracing::debug!(
                send_id = previous.id,
                superseded_by = id,
                "Cancelling superseded request"
            );
            previous.cancel.cancel();
        }

        (id, cancel)
    }

    /// Clear the active handle if it still belongs to this send
    fn finish(&self, id: u64) {
        let mut active = self.active();
        if active.as_ref().is_some_and(|a| a.id == id) {
            *active = None;
        }
    }

    async fn deliver(&self, request: &WebhookRequest) -> Result<WebhookResponse, DeliveryError> {
        let mut builder = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json")
            .json(request);

        if let Some(tokens) = &self.tokens {
            let token = tokens.get_token().await?;
            builder = builder.bearer_auth(token);
        }

        tracing::debug!(url = %self.url, "Sending message to webhook");
        let response = builder.send().await?;

        let status = response.status();
        if !status.is_success() {
            tracing::debug!(status = %status, "Webhook returned error response");
            if status.as_u16() == 401 {
                return Err(DeliveryError::Authentication);
            }
            return Err(DeliveryError::Http {
                status: status.as_u16(),
            });
        }

        Ok(response.json::<WebhookResponse>().await?)
    }
}

impl Drop for DeliveryCoordinator {
    fn drop(&mut self) {
        self.cancel_request();
    }
}
