use std::time::{SystemTime, UNIX_EPOCH};

use ray_llm::WireMessage;

pub use ray_llm::Role;

use crate::ids::MessageId;

/// Lifecycle status for one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageStatus {
    Streaming,
    Complete,
}

/// One transcript entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub role: Role,
    pub content: String,
    pub status: MessageStatus,
    /// Set when the message was finalized by a cancel or a failed turn.
    pub partial: bool,
    pub created_at_unix_millis: u64,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>, status: MessageStatus) -> Self {
        Self {
            id: MessageId::new_v7(),
            role,
            content: content.into(),
            status,
            partial: false,
            created_at_unix_millis: now_unix_millis(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content, MessageStatus::Complete)
    }

    /// Creates the empty assistant placeholder for an in-flight turn.
    pub fn assistant_streaming() -> Self {
        Self::new(Role::Assistant, String::new(), MessageStatus::Streaming)
    }

    pub fn is_streaming(&self) -> bool {
        self.status == MessageStatus::Streaming
    }

    pub fn to_wire(&self) -> WireMessage {
        WireMessage::new(self.id.to_string(), self.role, self.content.clone())
    }
}

fn now_unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}
