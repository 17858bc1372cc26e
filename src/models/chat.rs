use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Who authored a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Backend,
    System,
}

/// Delivery status of a user message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Sending,
    Sent,
    Cancelled,
    Error,
}

impl std::fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            MessageStatus::Sending => "sending",
            MessageStatus::Sent => "sent",
            MessageStatus::Cancelled => "cancelled",
            MessageStatus::Error => "error",
        };
        f.write_str(label)
    }
}

/// A single entry in the conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub text: String,
    pub sender: Sender,
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<MessageStatus>,
}

impl ChatMessage {
    /// A user message, initially `sending`
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(text, Sender::User, Some(MessageStatus::Sending))
    }

    pub fn backend(text: impl Into<String>) -> Self {
        Self::new(text, Sender::Backend, None)
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(text, Sender::System, None)
    }

    fn new(text: impl Into<String>, sender: Sender, status: Option<MessageStatus>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            text: text.into(),
            sender,
            timestamp: iso_timestamp(),
            status,
        }
    }
}

/// Current time as ISO 8601 with millisecond precision and a `Z` suffix
pub fn iso_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}
