//! Conversational flows.
//!
//! Each flow splits into a pure `decide` step, mapping the current state and
//! one input to a [`Decision`], and an effectful handler that persists the
//! decision, tidies the chat and runs the terminal action.
//!
//! ```text
//! input ──► decide(state, input, env) ──► Decision
//!                                           │
//!             Advance ─► cleanup trail ─► prompt ─► Sessions::set
//!             Reject  ─► error reply ─► trail ─► Sessions::set
//!             Finish  ─► flow effect ─► cleanup ─► Sessions::delete ─► final message
//!             Cancel  ─► cleanup ─► Sessions::delete ─► final message
//! ```
//!
//! Prompts, the user's replies and error messages of a step are deleted before
//! the next prompt is sent. Only the final message of a flow stays in the chat.

pub mod creation;
pub mod edit;
pub mod registration;
pub mod resolution;

use crate::callback::{CallbackAction, DEADLINE_PRESETS};
use crate::cleanup::Cleaner;
use crate::error::{ForecastResult, ValidationError};
use crate::messages;
use crate::model::{ChatId, MessageId, UserId};
use crate::services::Services;
use crate::session::{FlowSession, FlowState, Sessions};
use crate::transport::{Button, ChatTransport, Keyboard};
use chrono::{DateTime, FixedOffset, Utc};
use std::sync::Arc;
use tracing::debug;

/// The user driving a flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub user_id: UserId,
    pub display_name: Option<String>,
}

impl Actor {
    pub fn new(user_id: UserId, display_name: Option<String>) -> Self {
        Self {
            user_id,
            display_name,
        }
    }

    pub fn name(&self) -> String {
        self.display_name
            .clone()
            .unwrap_or_else(|| format!("user {}", self.user_id))
    }
}

/// One inbound interaction addressed to an active flow.
#[derive(Debug, Clone, PartialEq)]
pub enum FlowInput {
    Text { message_id: MessageId, text: String },
    Button(CallbackAction),
}

impl FlowInput {
    pub fn text(message_id: MessageId, text: impl Into<String>) -> Self {
        Self::Text {
            message_id,
            text: text.into(),
        }
    }

    /// The user's own message, which is cleaned up with the step.
    pub fn message_id(&self) -> Option<MessageId> {
        match self {
            Self::Text { message_id, .. } => Some(*message_id),
            Self::Button(_) => None,
        }
    }

    pub fn is_cancel(&self) -> bool {
        matches!(self, Self::Button(CallbackAction::Cancel))
    }
}

/// Everything a pure step reads besides the state and the input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepEnv {
    pub now: DateTime<Utc>,
    pub offset: FixedOffset,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Decision<S> {
    /// Move to the next step.
    Advance(S),
    /// Stay and explain what was wrong with the input.
    Reject(ValidationError),
    /// A stale or foreign button; nothing changes.
    Ignore,
    /// All input collected; run the flow's terminal action.
    Finish(S),
    Cancel,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub text: String,
    pub keyboard: Option<Keyboard>,
}

impl Prompt {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            keyboard: None,
        }
    }

    pub fn with_keyboard(text: impl Into<String>, keyboard: Keyboard) -> Self {
        Self {
            text: text.into(),
            keyboard: Some(keyboard),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowOutcome {
    Started,
    Advanced,
    Rejected,
    Ignored,
    Completed,
    Cancelled,
    /// A list to pick from was sent; the flow starts from the chosen button.
    Listed,
    /// The flow could not start; the reason was sent to the user.
    Refused,
}

/// Result of [`Conversation::step`]: either handled, or ready for the terminal action.
pub enum Stepped<S> {
    Done(FlowOutcome),
    Finish(S),
}

/// Chat-side bookkeeping shared by all flows.
#[derive(Clone)]
pub struct Conversation {
    sessions: Sessions,
    transport: Arc<dyn ChatTransport>,
    cleaner: Cleaner,
}

impl Conversation {
    pub fn new(services: &Services) -> Self {
        Self {
            sessions: services.sessions(),
            transport: services.transport.clone(),
            cleaner: services.cleaner(),
        }
    }

    pub fn sessions(&self) -> &Sessions {
        &self.sessions
    }

    pub async fn send(&self, chat: ChatId, prompt: &Prompt) -> ForecastResult<MessageId> {
        Ok(self
            .transport
            .send_message(chat, None, &prompt.text, prompt.keyboard.as_ref())
            .await?)
    }

    /// A message outside any flow step.
    pub async fn say(&self, chat: ChatId, text: &str) -> ForecastResult<MessageId> {
        Ok(self.transport.send_message(chat, None, text, None).await?)
    }

    /// Send the first prompt and persist the new session.
    pub async fn open<S: FlowState>(
        &self,
        owner: UserId,
        mut state: S,
        prompt: Prompt,
    ) -> ForecastResult<FlowOutcome> {
        let chat = state.chat_id();
        let message_id = self.send(chat, &prompt).await?;
        state.trail_mut().last_bot_message_id = Some(message_id);
        if let Err(err) = self.sessions.start(owner, &state.into_session()).await {
            self.cleaner.delete_messages(chat, &[message_id]).await;
            return Err(err);
        }
        debug!(user_id = owner, flow = %S::KIND, "flow started");
        Ok(FlowOutcome::Started)
    }

    /// Apply every decision except [`Decision::Finish`], which is handed back.
    pub async fn step<S: FlowState>(
        &self,
        owner: UserId,
        current: S,
        decision: Decision<S>,
        input: &FlowInput,
        prompt: impl FnOnce(&S) -> Prompt,
    ) -> ForecastResult<Stepped<S>> {
        let outcome = match decision {
            Decision::Advance(next) => {
                let prompt = prompt(&next);
                self.advance(owner, next, prompt, input.message_id()).await?;
                FlowOutcome::Advanced
            }
            Decision::Reject(err) => {
                self.reject(owner, current, &err, input.message_id()).await?;
                FlowOutcome::Rejected
            }
            Decision::Ignore => FlowOutcome::Ignored,
            Decision::Cancel => {
                self.close(owner, current, &messages::cancelled(S::KIND), input.message_id())
                    .await?;
                FlowOutcome::Cancelled
            }
            Decision::Finish(done) => return Ok(Stepped::Finish(done)),
        };
        Ok(Stepped::Done(outcome))
    }

    async fn advance<S: FlowState>(
        &self,
        owner: UserId,
        mut next: S,
        prompt: Prompt,
        input_message: Option<MessageId>,
    ) -> ForecastResult<()> {
        let chat = next.chat_id();
        self.tidy(chat, next.trail_mut().drain(), input_message).await;
        let message_id = self.send(chat, &prompt).await?;
        next.trail_mut().last_bot_message_id = Some(message_id);
        self.sessions.set(owner, &next.into_session()).await
    }

    async fn reject<S: FlowState>(
        &self,
        owner: UserId,
        mut state: S,
        err: &ValidationError,
        input_message: Option<MessageId>,
    ) -> ForecastResult<()> {
        let chat = state.chat_id();
        let reply = self.say(chat, &messages::invalid_input(err)).await?;
        let trail = state.trail_mut();
        trail.error_message_ids.extend(input_message);
        trail.error_message_ids.push(reply);
        self.sessions.set(owner, &state.into_session()).await
    }

    /// End the flow: clean its trail, drop the session and leave `final_text`.
    pub async fn close<S: FlowState>(
        &self,
        owner: UserId,
        mut state: S,
        final_text: &str,
        input_message: Option<MessageId>,
    ) -> ForecastResult<()> {
        let chat = state.chat_id();
        self.tidy(chat, state.trail_mut().drain(), input_message).await;
        self.sessions.delete(owner).await?;
        self.say(chat, final_text).await?;
        Ok(())
    }

    /// Drop a session without a final message.
    pub async fn discard(&self, owner: UserId, mut session: FlowSession) -> ForecastResult<()> {
        let chat = session.chat_id();
        self.tidy(chat, session.trail_mut().drain(), None).await;
        self.sessions.delete(owner).await
    }

    /// Replace the current prompt with a fresh copy at the bottom of the chat.
    pub async fn reprompt(
        &self,
        owner: UserId,
        mut session: FlowSession,
        prompt: Prompt,
    ) -> ForecastResult<()> {
        let chat = session.chat_id();
        let trail = session.trail_mut();
        let stale: Vec<MessageId> = trail.last_bot_message_id.take().into_iter().collect();
        self.cleaner.delete_messages(chat, &stale).await;
        let message_id = self.send(chat, &prompt).await?;
        session.trail_mut().last_bot_message_id = Some(message_id);
        self.sessions.set(owner, &session).await
    }

    async fn tidy(&self, chat: ChatId, mut ids: Vec<MessageId>, input: Option<MessageId>) {
        ids.extend(input);
        if !ids.is_empty() {
            self.cleaner.delete_messages(chat, &ids).await;
        }
    }
}

/// Cancel button appended to every prompt keyboard.
pub(crate) fn cancel_row(keyboard: Keyboard) -> Keyboard {
    keyboard.button("Cancel", CallbackAction::Cancel.encode())
}

/// Preset deadline buttons, four per row.
pub(crate) fn deadline_presets() -> Keyboard {
    DEADLINE_PRESETS.chunks(4).fold(Keyboard::new(), |kb, chunk| {
        kb.row(
            chunk
                .iter()
                .map(|days| {
                    Button::new(
                        messages::preset_label(*days),
                        CallbackAction::DeadlinePreset { days: *days }.encode(),
                    )
                })
                .collect(),
        )
    })
}
