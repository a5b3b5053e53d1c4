use ray_llm::{TransportError, TransportErrorKind};
use snafu::Snafu;

use crate::ids::MessageId;
use crate::turn::{TurnStatus, TurnTransitionRejection};

#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum TranscriptError {
    #[snafu(display("message is empty after trimming"))]
    EmptyInput { stage: &'static str },
    #[snafu(display("message has {length} characters, the limit is {max}"))]
    InputTooLong {
        stage: &'static str,
        length: usize,
        max: usize,
    },
    #[snafu(display("assistant message {active} is still streaming"))]
    AlreadyStreaming {
        stage: &'static str,
        active: MessageId,
    },
    #[snafu(display("no assistant message is streaming"))]
    NoStreamingMessage { stage: &'static str },
}

/// User-facing classification of why a submit or a turn did not succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    Validation,
    Busy,
    InvalidState,
    Connection,
    Timeout,
    EmptyBody,
    MalformedFrame,
    Remote,
    Cancelled,
    SessionClosed,
}

impl FailureKind {
    /// Cancellation ends a turn without being reported as an error.
    pub fn is_surfaced(self) -> bool {
        !matches!(self, Self::Cancelled)
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum TurnError {
    #[snafu(display("message rejected on `{stage}`: {source}"))]
    Validation {
        stage: &'static str,
        source: TranscriptError,
    },
    #[snafu(display("a turn is already in progress ({status})"))]
    Busy {
        stage: &'static str,
        status: TurnStatus,
    },
    #[snafu(display("transcript rejected a change on `{stage}`: {source}"))]
    InvalidState {
        stage: &'static str,
        source: TranscriptError,
    },
    #[snafu(display("turn state rejected a transition on `{stage}`: {rejection:?}"))]
    Transition {
        stage: &'static str,
        rejection: TurnTransitionRejection,
    },
    #[snafu(display("{source}"))]
    Transport {
        stage: &'static str,
        source: TransportError,
    },
    #[snafu(display("chat endpoint finished without sending any content"))]
    EmptyBody { stage: &'static str },
    #[snafu(display("malformed stream frame: {detail}"))]
    MalformedFrame {
        stage: &'static str,
        detail: String,
    },
    #[snafu(display("chat endpoint reported an error: {detail}"))]
    Remote {
        stage: &'static str,
        detail: String,
    },
    #[snafu(display("turn cancelled"))]
    Cancelled { stage: &'static str },
    #[snafu(display("chat session has shut down"))]
    SessionClosed { stage: &'static str },
}

impl TurnError {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Validation { .. } => FailureKind::Validation,
            Self::Busy { .. } => FailureKind::Busy,
            Self::InvalidState { .. } | Self::Transition { .. } => FailureKind::InvalidState,
            Self::Transport { source, .. } => match source.kind() {
                TransportErrorKind::Connection => FailureKind::Connection,
                TransportErrorKind::Timeout => FailureKind::Timeout,
                TransportErrorKind::EmptyBody => FailureKind::EmptyBody,
            },
            Self::EmptyBody { .. } => FailureKind::EmptyBody,
            Self::MalformedFrame { .. } => FailureKind::MalformedFrame,
            Self::Remote { .. } => FailureKind::Remote,
            Self::Cancelled { .. } => FailureKind::Cancelled,
            Self::SessionClosed { .. } => FailureKind::SessionClosed,
        }
    }
}
