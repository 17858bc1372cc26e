// Chat session
// Drives the message lifecycle on top of the delivery coordinator

use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio_util::sync::CancellationToken;

use crate::delivery::DeliveryCoordinator;
use crate::error::{DeliveryError, TokenError};
use crate::history::ChatHistory;
use crate::models::{ChatMessage, MessageStatus, RequestContext, WebhookRequest, WebhookResponse};

/// Shown when a send fails for any reason other than authentication
pub const NOTICE_SEND_FAILED: &str = "Failed to send message. Please try again.";

/// Shown when the webhook still rejects the credential after a retry
pub const NOTICE_AUTH_FAILED: &str =
    "Authentication failed. Please try again later or contact support.";

/// Shown when the forced token refresh itself fails
pub const NOTICE_AUTH_UNAVAILABLE: &str = "Unable to authenticate. Please contact support.";

/// Shown when the initial token warm-up fails
pub const NOTICE_INIT_FAILED: &str = "Failed to initialize chat. Please try again later.";

/// Retries allowed after the webhook answers 401
const MAX_AUTH_RETRIES: u32 = 1;

/// Session settings supplied by the host
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Page URL reported in every request's context
    pub page_url: String,

    /// Number of recent messages sent along with each request
    pub history_limit: usize,

    /// Whether system notices are recorded in the history
    pub history_enabled: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            page_url: String::new(),
            history_limit: 10,
            history_enabled: true,
        }
    }
}

/// How a send settled
#[derive(Debug)]
pub enum SendOutcome {
    /// Webhook replied; the reply has been recorded
    Replied(ChatMessage),

    /// Send was superseded or cancelled
    Cancelled,

    /// Send failed; `notice` is the text to show the user
    Failed {
        error: DeliveryError,
        notice: &'static str,
    },
}

/// One conversation with the webhook
pub struct ChatSession {
    id: String,
    coordinator: DeliveryCoordinator,
    options: SessionOptions,
    history: Mutex<ChatHistory>,

    /// Signalled when the latest send is cancelled or superseded; covers
    /// the forced refresh between attempts as well as each attempt
    current: Mutex<CancellationToken>,
}

impl ChatSession {
    pub fn new(coordinator: DeliveryCoordinator, options: SessionOptions) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            coordinator,
            options,
            history: Mutex::new(ChatHistory::new()),
            current: Mutex::new(CancellationToken::new()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Acquire the first token up front so the first send does not pay for it
    pub async fn initialize(&self) -> Result<(), TokenError> {
        let Some(tokens) = self.coordinator.token_manager() else {
            return Ok(());
        };

        tracing::info!("Initializing token...");
        match tokens.get_token().await {
            Ok(_) => {
                tracing::info!("Token initialized successfully");
                Ok(())
            }
            Err(e) => {
                tracing::error!("Failed to initialize token: {}", e);
                self.add_system_message(NOTICE_INIT_FAILED);
                Err(e)
            }
        }
    }

    /// Send a user message and record the outcome
    ///
    /// A 401 from the webhook triggers one forced token refresh and one
    /// retry with the identical request. A second 401 is surfaced.
    pub async fn send(&self, text: &str) -> SendOutcome {
        let cancel = self.begin_send();
        let (message_id, request) = self.prepare(text);

        let mut retries = 0;
        loop {
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return self.cancelled(&message_id),
                result = self.coordinator.send_message(&request) => result,
            };
            let error = match result {
                Ok(response) => return self.complete(&message_id, response),
                Err(_) if cancel.is_cancelled() => return self.cancelled(&message_id),
                Err(e) => e,
            };

            match error {
                DeliveryError::Cancelled => return self.cancelled(&message_id),
                DeliveryError::Authentication => {
                    let Some(tokens) = self.coordinator.token_manager() else {
                        return self.auth_failed(&message_id);
                    };
                    if retries >= MAX_AUTH_RETRIES {
                        tracing::error!("Webhook rejected refreshed token, giving up");
                        return self.auth_failed(&message_id);
                    }

                    tracing::warn!("Webhook rejected token, forcing refresh and retrying");
                    let refreshed = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return self.cancelled(&message_id),
                        result = tokens.refresh_token() => result,
                    };
                    if let Err(e) = refreshed {
                        if cancel.is_cancelled() {
                            return self.cancelled(&message_id);
                        }
                        let error = DeliveryError::Token(e);
                        return self.fail(&message_id, error, NOTICE_AUTH_UNAVAILABLE);
                    }
                    retries += 1;
                }
                other => return self.fail(&message_id, other, NOTICE_SEND_FAILED),
            }
        }
    }

    /// Supersede the previous send and hand out this send's cancellation
    fn begin_send(&self) -> CancellationToken {
        let cancel = CancellationToken::new();
        let previous = std::mem::replace(&mut *self.current(), cancel.clone());
        previous.cancel();
        cancel
    }

    fn current(&self) -> MutexGuard<'_, CancellationToken> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record the user message and build the request that carries it
    fn prepare(&self, text: &str) -> (String, WebhookRequest) {
        let message = ChatMessage::user(text);
        let message_id = message.id.clone();
        let timestamp = message.timestamp.clone();

        let mut history = self.history();
        history.add(message);
        let request = WebhookRequest {
            message: text.to_string(),
            timestamp,
            session_id: self.id.clone(),
            context: RequestContext {
                url: self.options.page_url.clone(),
            },
            history: Some(history.recent(self.options.history_limit)),
        };

        (message_id, request)
    }

    /// Cancel the send in progress, including one waiting to retry
    pub fn cancel(&self) {
        self.current().cancel();
        self.coordinator.cancel_request();
    }

    /// Lock the recorded messages
    pub fn history(&self) -> MutexGuard<'_, ChatHistory> {
        self.history.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn clear_history(&self) {
        self.history().clear();
    }

    /// Stop token renewal and cancel any outstanding send
    pub fn shutdown(&self) {
        self.cancel();
        if let Some(tokens) = self.coordinator.token_manager() {
            tokens.destroy();
        }
        tracing::debug!(session_id = %self.id, "Session shut down");
    }

    fn complete(&self, message_id: &str, response: WebhookResponse) -> SendOutcome {
        let reply = ChatMessage::backend(response.response);
        let mut history = self.history();
        history.update_status(message_id, MessageStatus::Sent);
        history.add(reply.clone());
        SendOutcome::Replied(reply)
    }

    fn cancelled(&self, message_id: &str) -> SendOutcome {
        self.history()
            .update_status(message_id, MessageStatus::Cancelled);
        tracing::debug!("Message {} cancelled", message_id);
        SendOutcome::Cancelled
    }

    fn auth_failed(&self, message_id: &str) -> SendOutcome {
        self.fail(message_id, DeliveryError::Authentication, NOTICE_AUTH_FAILED)
    }

    fn fail(&self, message_id: &str, error: DeliveryError, notice: &'static str) -> SendOutcome {
        self.history().update_status(message_id, MessageStatus::Error);
        self.add_system_message(notice);
        SendOutcome::Failed { error, notice }
    }

    fn add_system_message(&self, text: &str) {
        if self.options.history_enabled {
            self.history().add(ChatMessage::system(text));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Sender;
    use reqwest::Client;

    fn session_for(url: String) -> ChatSession {
        let coordinator = DeliveryCoordinator::with_client(url, None, Client::new());
        ChatSession::new(
            coordinator,
            SessionOptions {
                page_url: "https://shop.example.com".to_string(),
                ..Default::default()
            },
        )
    }

    #[tokio::test]
    async fn test_reply_is_recorded() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/hook")
            .with_status(200)
            .with_body(r#"{"response":"Welcome!"}"#)
            .create_async()
            .await;

        let session = session_for(format!("{}/hook", server.url()));
        let outcome = session.send("hi").await;

        let SendOutcome::Replied(reply) = outcome else {
            panic!("expected reply, got {outcome:?}");
        };
        assert_eq!(reply.text, "Welcome!");

        let history = session.history();
        assert_eq!(history.len(), 2);
        assert_eq!(history.messages()[0].status, Some(MessageStatus::Sent));
        assert_eq!(history.messages()[1].sender, Sender::Backend);
    }

    #[test]
    fn test_request_carries_history_window() {
        let session = session_for("http://127.0.0.1:9/hook".to_string());
        for i in 0..12 {
            session.history().add(ChatMessage::backend(format!("message {i}")));
        }

        let (message_id, request) = session.prepare("final");
        let history = request.history.unwrap();

        assert_eq!(request.message, "final");
        assert_eq!(request.session_id, session.id());
        assert_eq!(request.context.url, "https://shop.example.com");
        assert_eq!(history.len(), 10);
        assert_eq!(history[0].text, "message 3");
        assert_eq!(history[9].id, message_id);
        assert_eq!(history[9].status, Some(MessageStatus::Sending));
        assert_eq!(history[9].timestamp, request.timestamp);
    }

    #[tokio::test]
    async fn test_failure_records_error_and_notice() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/hook")
            .with_status(500)
            .create_async()
            .await;

        let session = session_for(format!("{}/hook", server.url()));
        let outcome = session.send("hi").await;

        let SendOutcome::Failed { error, notice } = outcome else {
            panic!("expected failure, got {outcome:?}");
        };
        assert!(matches!(error, DeliveryError::Http { status: 500 }));
        assert_eq!(notice, NOTICE_SEND_FAILED);

        let history = session.history();
        assert_eq!(history.messages()[0].status, Some(MessageStatus::Error));
        assert_eq!(history.messages()[1].sender, Sender::System);
        assert_eq!(history.messages()[1].text, NOTICE_SEND_FAILED);
    }

    #[tokio::test]
    async fn test_unauthorized_without_token_manager_is_not_retried() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/hook")
            .with_status(401)
            .expect(1)
            .create_async()
            .await;

        let session = session_for(format!("{}/hook", server.url()));
        let outcome = session.send("hi").await;

        assert!(matches!(
            outcome,
            SendOutcome::Failed {
                error: DeliveryError::Authentication,
                notice: NOTICE_AUTH_FAILED
            }
        ));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_notices_skipped_when_history_disabled() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/hook")
            .with_status(503)
            .create_async()
            .await;

        let coordinator =
            DeliveryCoordinator::with_client(format!("{}/hook", server.url()), None, Client::new());
        let session = ChatSession::new(
            coordinator,
            SessionOptions {
                history_enabled: false,
                ..Default::default()
            },
        );

        session.send("hi").await;
        assert_eq!(session.history().len(), 1);
    }

    #[tokio::test]
    async fn test_initialize_without_token_manager() {
        let session = session_for("http://127.0.0.1:9/hook".to_string());
        assert!(session.initialize().await.is_ok());
        assert!(session.history().is_empty());
    }

    #[test]
    fn test_clear_and_shutdown() {
        let session = session_for("http://127.0.0.1:9/hook".to_string());
        session.history().add(ChatMessage::system("welcome"));
        session.clear_history();
        assert!(session.history().is_empty());

        session.shutdown();
        session.shutdown();
    }
}
