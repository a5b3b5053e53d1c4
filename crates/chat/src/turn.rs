use std::fmt;

use crate::error::FailureKind;
use crate::ids::TurnId;

/// Why a turn ended in `Failed`, carried on the status itself so the failure
/// is reported exactly once, by the snapshot that enters `Failed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnFailure {
    pub turn_id: TurnId,
    pub kind: FailureKind,
    pub message: String,
}

/// Busy/idle state of a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TurnStatus {
    #[default]
    Idle,
    Submitting(TurnId),
    Streaming(TurnId),
    Failed(TurnFailure),
}

/// State transition input for the turn lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnTransition {
    Submit(TurnId),
    /// The first response event of the turn was decoded.
    FirstEvent(TurnId),
    Complete(TurnId),
    Fail(TurnFailure),
    /// The failure has been delivered to subscribers.
    Acknowledge,
    Reset,
}

/// Rejection reason for illegal turn transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnTransitionRejection {
    Busy {
        active: TurnStatus,
    },
    NoActiveTurn,
    TurnMismatch {
        active: TurnId,
        attempted: TurnId,
    },
    NotStreaming {
        active: TurnId,
    },
    NotFailed,
}

pub type TurnTransitionResult = Result<TurnStatus, TurnTransitionRejection>;

impl fmt::Display for TurnStatus {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => formatter.write_str("idle"),
            Self::Submitting(turn_id) => write!(formatter, "submitting turn {turn_id}"),
            Self::Streaming(turn_id) => write!(formatter, "streaming turn {turn_id}"),
            Self::Failed(failure) => write!(formatter, "turn {} failed", failure.turn_id),
        }
    }
}

impl TurnStatus {
    /// Returns the in-flight turn, if any.
    pub fn active_turn(&self) -> Option<TurnId> {
        match self {
            Self::Submitting(turn_id) | Self::Streaming(turn_id) => Some(*turn_id),
            Self::Idle | Self::Failed(_) => None,
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    /// True while a request is open, the "loading" indicator of the UI.
    pub fn is_busy(&self) -> bool {
        self.active_turn().is_some()
    }

    pub fn failure(&self) -> Option<&TurnFailure> {
        match self {
            Self::Failed(failure) => Some(failure),
            Self::Idle | Self::Submitting(_) | Self::Streaming(_) => None,
        }
    }

    /// Applies one transition deterministically.
    ///
    /// Only `Idle` accepts a new turn; every other transition must name the
    /// turn that is currently in flight.
    pub fn apply(&self, transition: TurnTransition) -> TurnTransitionResult {
        match transition {
            TurnTransition::Submit(turn_id) => self.apply_submit(turn_id),
            TurnTransition::FirstEvent(turn_id) => self.apply_first_event(turn_id),
            TurnTransition::Complete(turn_id) => self.apply_complete(turn_id),
            TurnTransition::Fail(failure) => self.apply_fail(failure),
            TurnTransition::Acknowledge => self.apply_acknowledge(),
            TurnTransition::Reset => Ok(Self::Idle),
        }
    }

    fn apply_submit(&self, turn_id: TurnId) -> TurnTransitionResult {
        match self {
            Self::Idle => Ok(Self::Submitting(turn_id)),
            Self::Submitting(_) | Self::Streaming(_) | Self::Failed(_) => {
                Err(TurnTransitionRejection::Busy {
                    active: self.clone(),
                })
            }
        }
    }

    fn apply_first_event(&self, turn_id: TurnId) -> TurnTransitionResult {
        match self {
            Self::Submitting(active) | Self::Streaming(active) if *active == turn_id => {
                Ok(Self::Streaming(turn_id))
            }
            Self::Submitting(active) | Self::Streaming(active) => {
                Err(TurnTransitionRejection::TurnMismatch {
                    active: *active,
                    attempted: turn_id,
                })
            }
            Self::Idle | Self::Failed(_) => Err(TurnTransitionRejection::NoActiveTurn),
        }
    }

    fn apply_complete(&self, turn_id: TurnId) -> TurnTransitionResult {
        match self {
            Self::Streaming(active) if *active == turn_id => Ok(Self::Idle),
            Self::Streaming(active) => Err(TurnTransitionRejection::TurnMismatch {
                active: *active,
                attempted: turn_id,
            }),
            Self::Submitting(active) => Err(TurnTransitionRejection::NotStreaming {
                active: *active,
            }),
            Self::Idle | Self::Failed(_) => Err(TurnTransitionRejection::NoActiveTurn),
        }
    }

    fn apply_fail(&self, failure: TurnFailure) -> TurnTransitionResult {
        match self {
            Self::Submitting(active) | Self::Streaming(active) if *active == failure.turn_id => {
                Ok(Self::Failed(failure))
            }
            Self::Submitting(active) | Self::Streaming(active) => {
                Err(TurnTransitionRejection::TurnMismatch {
                    active: *active,
                    attempted: failure.turn_id,
                })
            }
            Self::Idle | Self::Failed(_) => Err(TurnTransitionRejection::NoActiveTurn),
        }
    }

    fn apply_acknowledge(&self) -> TurnTransitionResult {
        match self {
            Self::Failed(_) => Ok(Self::Idle),
            Self::Idle | Self::Submitting(_) | Self::Streaming(_) => {
                Err(TurnTransitionRejection::NotFailed)
            }
        }
    }
}
