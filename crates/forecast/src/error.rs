//! Error types.
//!
//! Every failure a flow can hit maps to one [`ErrorKind`]; the router picks the
//! user-facing reply from the kind, never from the message text.

use crate::callback::CallbackParseError;
use crate::model::EventId;
use crate::session::FlowKind;
use crate::transport::TransportError;
use serde::Serialize;
use thiserror::Error;

/// Input that a flow rejects by re-prompting in the same state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("the question cannot be empty")]
    BlankQuestion,

    #[error("the question is too long ({len} characters, at most {max})")]
    QuestionTooLong { len: usize, max: usize },

    #[error("expected between {min} and {max} options, got {got}")]
    OptionCount { got: usize, min: usize, max: usize },

    #[error("option {index} is too long (at most {max} characters)")]
    OptionTooLong { index: usize, max: usize },

    #[error("option '{0}' is listed twice")]
    DuplicateOption(String),

    #[error("options are fixed for this event type")]
    OptionsFixed,

    #[error("could not read the deadline, expected DD.MM.YYYY HH:MM")]
    DeadlineFormat,

    #[error("the deadline must be in the future")]
    DeadlineNotInFuture,

    #[error("'{0}' is not a valid number")]
    InvalidNumber(String),

    #[error("the name cannot be empty")]
    BlankName,

    #[error("option {index} does not exist")]
    OptionOutOfRange { index: usize },

    #[error("please use the buttons above")]
    UseButtons,
}

/// Classification used for logging and for choosing the reply shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    SessionNotFound,
    SessionExpired,
    InvalidContext,
    SessionConflict,
    Validation,
    EventNotFound,
    EventHasVotes,
    EventAlreadyResolved,
    Unauthorized,
    InsufficientParticipation,
    InvalidCallback,
    Transport,
    Storage,
}

impl ErrorKind {
    /// Infrastructure failures get a generic apology instead of an explanation.
    pub fn is_infrastructure(&self) -> bool {
        matches!(self, Self::Transport | Self::Storage)
    }
}

#[derive(Debug, Error)]
pub enum ForecastError {
    #[error("no active session")]
    SessionNotFound,

    #[error("the {flow} session expired")]
    SessionExpired { flow: FlowKind },

    #[error("session context could not be decoded: {reason}")]
    InvalidContext { reason: String },

    #[error("another flow is already active: {existing}")]
    SessionConflict { existing: FlowKind },

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("event {0} not found")]
    EventNotFound(EventId),

    #[error("event {0} already has votes")]
    EventHasVotes(EventId),

    #[error("event {0} is already resolved")]
    EventAlreadyResolved(EventId),

    #[error("not authorized: {reason}")]
    Unauthorized { reason: String },

    #[error("{required} predictions are required to create events, {recorded} recorded")]
    InsufficientParticipation { recorded: u64, required: u64 },

    #[error(transparent)]
    InvalidCallback(#[from] CallbackParseError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl ForecastError {
    pub fn unauthorized(reason: impl Into<String>) -> Self {
        Self::Unauthorized {
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::SessionNotFound => ErrorKind::SessionNotFound,
            Self::SessionExpired { .. } => ErrorKind::SessionExpired,
            Self::InvalidContext { .. } => ErrorKind::InvalidContext,
            Self::SessionConflict { .. } => ErrorKind::SessionConflict,
            Self::Validation(_) => ErrorKind::Validation,
            Self::EventNotFound(_) => ErrorKind::EventNotFound,
            Self::EventHasVotes(_) => ErrorKind::EventHasVotes,
            Self::EventAlreadyResolved(_) => ErrorKind::EventAlreadyResolved,
            Self::Unauthorized { .. } => ErrorKind::Unauthorized,
            Self::InsufficientParticipation { .. } => ErrorKind::InsufficientParticipation,
            Self::InvalidCallback(_) => ErrorKind::InvalidCallback,
            Self::Transport(_) => ErrorKind::Transport,
            Self::Storage(_) => ErrorKind::Storage,
        }
    }

    /// Predictions still missing before event creation is allowed.
    pub fn participation_shortfall(&self) -> Option<u64> {
        match self {
            Self::InsufficientParticipation { recorded, required } => {
                Some(required.saturating_sub(*recorded))
            }
            _ => None,
        }
    }
}

pub type ForecastResult<T> = Result<T, ForecastError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_classify_infrastructure() {
        let storage = ForecastError::Storage(anyhow::anyhow!("connection reset"));
        assert_eq!(storage.kind(), ErrorKind::Storage);
        assert!(storage.kind().is_infrastructure());

        let votes = ForecastError::EventHasVotes(7);
        assert_eq!(votes.kind(), ErrorKind::EventHasVotes);
        assert!(!votes.kind().is_infrastructure());
    }

    #[test]
    fn shortfall_reports_missing_predictions() {
        let err = ForecastError::InsufficientParticipation {
            recorded: 1,
            required: 3,
        };
        assert_eq!(err.participation_shortfall(), Some(2));
        assert_eq!(ForecastError::EventHasVotes(1).participation_shortfall(), None);
    }
}
