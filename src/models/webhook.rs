use serde::{Deserialize, Serialize};

use super::chat::ChatMessage;

/// Page context reported with each message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestContext {
    pub url: String,
}

/// Webhook request body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookRequest {
    pub message: String,
    pub timestamp: String,
    pub session_id: String,
    pub context: RequestContext,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub history: Option<Vec<ChatMessage>>,
}

/// Webhook response body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookResponse {
    pub response: String,
}
