// Conversation history
// In-memory record of the messages exchanged in one session

use crate::models::{ChatMessage, MessageStatus};

/// Ordered message record for a single session
#[derive(Debug, Default, Clone)]
pub struct ChatHistory {
    messages: Vec<ChatMessage>,
}

impl ChatHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    /// Update the status of a message by id, returning false if unknown
    pub fn update_status(&mut self, id: &str, status: MessageStatus) -> bool {
        match self.messages.iter_mut().find(|m| m.id == id) {
            Some(message) => {
                message.status = Some(status);
                true
            }
            None => false,
        }
    }

    pub fn get(&self, id: &str) -> Option<&ChatMessage> {
        self.messages.iter().find(|m| m.id == id)
    }

    /// The last `limit` messages, oldest first
    pub fn recent(&self, limit: usize) -> Vec<ChatMessage> {
        let start = self.messages.len().saturating_sub(limit);
        self.messages[start..].to_vec()
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }
}
