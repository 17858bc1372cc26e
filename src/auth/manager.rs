use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use reqwest::Client;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::task::{AbortHandle, JoinHandle};

use super::claims;
use super::refresh;
use super::types::{TokenClientOptions, TokenConfig};
use crate::error::TokenError;

type RefreshFuture = Shared<BoxFuture<'static, Result<String, TokenError>>>;

/// Mutable token state, only touched through `Inner::state()`
#[derive(Default)]
struct TokenState {
    /// Most recently obtained token
    token: Option<String>,

    /// Token expiry in epoch seconds
    expires_at: Option<i64>,

    /// Outstanding refresh round-trip that callers attach to
    in_flight: Option<RefreshFuture>,

    /// Task driving `in_flight`, aborted on teardown
    in_flight_task: Option<AbortHandle>,

    /// The single pending renewal timer
    renewal: Option<JoinHandle<()>>,

    /// Bumped by `destroy()` so late completions are discarded
    generation: u64,
}

impl TokenState {
    fn valid_token(&self, now: i64, window: i64) -> Option<String> {
        match (&self.token, self.expires_at) {
            (Some(token), Some(exp)) if now < exp - window => Some(token.clone()),
            _ => None,
        }
    }

    fn cancel_renewal(&mut self) {
        if let Some(renewal) = self.renewal.take() {
            renewal.abort();
        }
    }
}

struct Inner {
    config: TokenConfig,
    client: Client,
    state: Mutex<TokenState>,
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, TokenState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Perform one round-trip and publish its outcome
    async fn run_refresh(self: Arc<Self>, generation: u64) -> Result<String, TokenError> {
        tracing::info!("Refreshing token for issuer {}...", self.config.issuer);

        let result = refresh::request_token(&self.client, &self.config).await;
        let issued_at = now_secs();

        let mut state = self.state();
        if state.generation != generation {
            tracing::debug!("Discarding token refresh result after teardown");
            return Err(TokenError::Aborted);
        }
        state.in_flight = None;
        state.in_flight_task = None;

        match result {
            Ok(token) => {
                let expires_at = claims::resolve_expiry(
                    &token,
                    issued_at,
                    self.config.refresh_interval_secs(),
                );
                state.token = Some(token.clone());
                state.expires_at = Some(expires_at);

                tracing::info!(
                    "Token refreshed successfully. Expires at: {}",
                    format_epoch(expires_at)
                );

                self.schedule_renewal(&mut state, expires_at);
                Ok(token)
            }
            Err(e) => {
                state.token = None;
                state.expires_at = None;
                tracing::error!("Failed to refresh token: {}", e);
                Err(e)
            }
        }
    }

    /// Arm the renewal timer, replacing any pending one
    fn schedule_renewal(self: &Arc<Self>, state: &mut TokenState, expires_at: i64) {
        state.cancel_renewal();

        let delay = renewal_delay(
            expires_at,
            self.config.expiration_window_secs(),
            Utc::now().timestamp_millis(),
        );
        if delay.is_zero() {
            tracing::warn!(
                "Token expires within the {}s expiration window, renewing immediately",
                self.config.expiration_window_secs()
            );
        } else {
            tracing::debug!(
                "Scheduling next token refresh in {} seconds",
                delay.as_secs()
            );
        }

        let weak: Weak<Inner> = Arc::downgrade(self);
        state.renewal = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;

            let Some(inner) = weak.upgrade() else {
                return;
            };
            let manager = TokenManager { inner };
            if let Err(e) = manager.refresh_token().await {
                tracing::warn!("Scheduled token refresh failed: {}", e);
            }
        }));
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        state.cancel_renewal();
        if let Some(task) = state.in_flight_task.take() {
            task.abort();
        }
    }
}

/// Token lifecycle manager
/// Caches one bearer token, coalesces concurrent refreshes into a single
/// round-trip and renews the token ahead of its expiry.
///
/// Cloning yields another handle to the same cache.
#[derive(Clone)]
pub struct TokenManager {
    inner: Arc<Inner>,
}

impl TokenManager {
    /// Create a manager with default HTTP client options
    pub fn new(config: TokenConfig) -> Result<Self> {
        Self::with_options(config, TokenClientOptions::default())
    }

    /// Create a manager whose token requests use the given timeouts
    pub fn with_options(config: TokenConfig, options: TokenClientOptions) -> Result<Self> {
        let client = Client::builder()
            .timeout(options.request_timeout)
            .connect_timeout(options.connect_timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self::with_client(config, client))
    }

    /// Create a manager that shares an existing HTTP client
    pub fn with_client(config: TokenConfig, client: Client) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                client,
                state: Mutex::new(TokenState::default()),
            }),
        }
    }

    pub fn config(&self) -> &TokenConfig {
        &self.inner.config
    }

    /// Get a valid token, refreshing if the cached one is absent or inside
    /// the expiration window
    pub async fn get_token(&self) -> Result<String, TokenError> {
        let cached = self
            .inner
            .state()
            .valid_token(now_secs(), self.inner.config.expiration_window_secs());

        if let Some(token) = cached {
            return Ok(token);
        }

        self.refresh_token().await
    }

    /// Obtain a fresh token from the endpoint
    ///
    /// If a refresh is already outstanding the caller attaches to it and
    /// receives the same outcome; no second request is issued. On failure the
    /// cache is cleared so the next `get_token()` starts over.
    pub async fn refresh_token(&self) -> Result<String, TokenError> {
        let refresh = {
            let mut state = self.inner.state();
            match state.in_flight.clone() {
                Some(refresh) => {
                    tracing::debug!("Token refresh already in progress, waiting...");
                    refresh
                }
                None => {
                    let task = tokio::spawn(Arc::clone(&self.inner).run_refresh(state.generation));
                    let abort = task.abort_handle();
                    let refresh = async move {
                        match task.await {
                            Ok(result) => result,
                            Err(_) => Err(TokenError::Aborted),
                        }
                    }
                    .boxed()
                    .shared();

                    state.in_flight = Some(refresh.clone());
                    state.in_flight_task = Some(abort);
                    refresh
                }
            }
        };

        refresh.await
    }

    /// Cached expiry in epoch seconds, if a token is held
    pub fn expires_at(&self) -> Option<i64> {
        self.inner.state().expires_at
    }

    /// True while a refresh round-trip is outstanding
    pub fn is_refreshing(&self) -> bool {
        self.inner.state().in_flight.is_some()
    }

    /// Cancel the pending renewal and forget the cached token
    ///
    /// An outstanding refresh is aborted; its callers receive
    /// `TokenError::Aborted`. Safe to call repeatedly.
    pub fn destroy(&self) {
        let mut state = self.inner.state();
        state.cancel_renewal();
        if let Some(task) = state.in_flight_task.take() {
            task.abort();
        }
        state.in_flight = None;
        state.token = None;
        state.expires_at = None;
        state.generation = state.generation.wrapping_add(1);
        tracing::debug!("Token manager destroyed");
    }
}

/// Time until the renewal should fire, never negative
fn renewal_delay(expires_at: i64, window: i64, now_millis: i64) -> Duration {
    let fire_at_millis = expires_at.saturating_sub(window).saturating_mul(1000);
    let delay = fire_at_millis.saturating_sub(now_millis).max(0);
    Duration::from_millis(delay as u64)
}

fn now_secs() -> i64 {
    Utc::now().timestamp()
}

fn format_epoch(secs: i64) -> String {
    DateTime::<Utc>::from_timestamp(secs, 0)
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_else(|| secs.to_string())
}
