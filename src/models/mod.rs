// Data models for the chat and webhook formats

pub mod chat;
pub mod webhook;

pub use chat::{ChatMessage, MessageStatus, Sender};
pub use webhook::{RequestContext, WebhookRequest, WebhookResponse};
