//! Detection of a live flow of another kind before a new one starts.

use crate::callback::CallbackAction;
use crate::error::ForecastResult;
use crate::model::UserId;
use crate::session::{FlowKind, Sessions};
use crate::transport::Keyboard;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictCheck {
    /// No live session.
    Free,
    /// A live session of the requested kind.
    SameFlow,
    Conflict { existing: FlowKind },
}

impl ConflictCheck {
    /// Human-readable name of the blocking flow.
    pub fn label(&self) -> Option<&'static str> {
        match self {
            Self::Conflict { existing } => Some(existing.label()),
            Self::Free | Self::SameFlow => None,
        }
    }
}

pub struct ConflictDetector {
    sessions: Sessions,
}

impl ConflictDetector {
    pub fn new(sessions: Sessions) -> Self {
        Self { sessions }
    }

    pub async fn check(&self, owner: UserId, requested: FlowKind) -> ForecastResult<ConflictCheck> {
        let Some(record) = self.sessions.peek(owner).await? else {
            return Ok(ConflictCheck::Free);
        };
        match record.flow_kind() {
            Some(kind) if kind == requested => Ok(ConflictCheck::SameFlow),
            Some(existing) => Ok(ConflictCheck::Conflict { existing }),
            None => {
                warn!(user_id = owner, state = %record.state_name, "session without flow namespace");
                self.sessions.delete(owner).await?;
                Ok(ConflictCheck::Free)
            }
        }
    }
}

/// Choice offered when `requested` is blocked by another flow.
pub fn conflict_keyboard(existing: FlowKind, requested: FlowKind) -> Keyboard {
    Keyboard::new()
        .button(
            format!("Continue {}", existing.label()),
            CallbackAction::ConflictResume.encode(),
        )
        .button(
            format!("Start {}", requested.label()),
            CallbackAction::ConflictRestart(requested).encode(),
        )
}
