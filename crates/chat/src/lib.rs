//! Streaming chat transcript engine.
//!
//! A [`ChatSession`] owns one conversation: it validates input, drives the
//! transport for each turn, folds decoded events into the transcript and
//! publishes every change as a versioned [`ConversationSnapshot`].

mod controller;
mod error;
mod ids;
mod message;
mod session;
mod store;
mod transcript;
mod turn;

pub use error::{FailureKind, TranscriptError, TurnError};
pub use ids::{ConversationId, MessageId, TurnId};
pub use message::{Message, MessageStatus, Role};
pub use session::{ChatSession, TurnConfig};
pub use store::{ConversationSnapshot, ConversationStore, StoreReader, Subscription};
pub use transcript::{AbortOutcome, MAX_MESSAGE_CHARS, Transcript, validate_input};
pub use turn::{
    TurnFailure, TurnStatus, TurnTransition, TurnTransitionRejection, TurnTransitionResult,
};
