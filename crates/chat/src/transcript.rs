//! Ordered message list with the single-streaming-message invariant.
//!
//! Messages are never re-fetched from the server, so every mutation here is
//! final: the transcript only ever grows, and only the one streaming message
//! may change after it is appended.

use ray_llm::WireMessage;
use snafu::ensure;

use crate::error::{
    AlreadyStreamingSnafu, EmptyInputSnafu, FailureKind, InputTooLongSnafu,
    NoStreamingMessageSnafu, TranscriptError,
};
use crate::ids::MessageId;
use crate::message::{Message, MessageStatus};

/// Longest accepted user message, in characters, after trimming.
pub const MAX_MESSAGE_CHARS: usize = 1000;

/// What `abort` did with the in-flight assistant message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortOutcome {
    /// The message had no content and was removed.
    Discarded(MessageId),
    /// The message was finalized with its partial content.
    Partial(MessageId),
}

/// Trims `text` and checks it against the input limits.
pub fn validate_input(text: &str) -> Result<&str, TranscriptError> {
    let trimmed = text.trim();
    ensure!(
        !trimmed.is_empty(),
        EmptyInputSnafu {
            stage: "validate-input"
        }
    );

    let length = trimmed.chars().count();
    ensure!(
        length <= MAX_MESSAGE_CHARS,
        InputTooLongSnafu {
            stage: "validate-input",
            length,
            max: MAX_MESSAGE_CHARS,
        }
    );

    Ok(trimmed)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transcript {
    messages: Vec<Message>,
    streaming_index: Option<usize>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn get(&self, id: MessageId) -> Option<&Message> {
        self.messages.iter().find(|message| message.id == id)
    }

    pub fn streaming_message(&self) -> Option<&Message> {
        self.streaming_index.map(|index| &self.messages[index])
    }

    pub fn append_user_message(&mut self, text: &str) -> Result<&Message, TranscriptError> {
        let text = validate_input(text)?;
        self.ensure_nothing_streaming("append-user-message")?;

        self.messages.push(Message::user(text));
        Ok(&self.messages[self.messages.len() - 1])
    }

    pub fn begin_assistant_message(&mut self) -> Result<MessageId, TranscriptError> {
        self.ensure_nothing_streaming("begin-assistant-message")?;

        let message = Message::assistant_streaming();
        let id = message.id;
        self.streaming_index = Some(self.messages.len());
        self.messages.push(message);
        Ok(id)
    }

    /// Appends to the streaming message. Returns false, and changes nothing,
    /// when no message is streaming.
    pub fn append_delta(&mut self, text: &str) -> bool {
        let Some(index) = self.streaming_index else {
            tracing::warn!(
                delta_len = text.len(),
                "dropping content delta with no streaming message"
            );
            return false;
        };

        self.messages[index].content.push_str(text);
        true
    }

    pub fn finalize(&mut self) -> Result<&Message, TranscriptError> {
        let Some(index) = self.streaming_index.take() else {
            return NoStreamingMessageSnafu { stage: "finalize" }.fail();
        };

        let message = &mut self.messages[index];
        message.status = MessageStatus::Complete;
        Ok(message)
    }

    /// Ends the streaming message early, if there is one.
    pub fn abort(&mut self, reason: FailureKind) -> Option<AbortOutcome> {
        let index = self.streaming_index.take()?;

        let outcome = if self.messages[index].content.is_empty() {
            let removed = self.messages.remove(index);
            AbortOutcome::Discarded(removed.id)
        } else {
            let message = &mut self.messages[index];
            message.status = MessageStatus::Complete;
            message.partial = true;
            AbortOutcome::Partial(message.id)
        };

        tracing::debug!(?reason, ?outcome, "aborted streaming assistant message");
        Some(outcome)
    }

    pub fn clear(&mut self) {
        self.messages.clear();
        self.streaming_index = None;
    }

    /// Completed messages in the shape the chat endpoint expects as context.
    pub fn to_wire_messages(&self) -> Vec<WireMessage> {
        self.messages
            .iter()
            .filter(|message| message.status == MessageStatus::Complete)
            .map(Message::to_wire)
            .collect()
    }

    fn ensure_nothing_streaming(&self, stage: &'static str) -> Result<(), TranscriptError> {
        match self.streaming_message() {
            Some(active) => AlreadyStreamingSnafu {
                stage,
                active: active.id,
            }
            .fail(),
            None => Ok(()),
        }
    }

    #[cfg(test)]
    fn streaming_count(&self) -> usize {
        self.messages
            .iter()
            .filter(|message| message.is_streaming())
            .count()
    }

    #[cfg(test)]
    fn roles(&self) -> Vec<crate::message::Role> {
        self.messages.iter().map(|message| message.role).collect()
    }
}
