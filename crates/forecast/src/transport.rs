//! Contract with the chat messaging API.
//!
//! The core never talks to the network directly; a transport adapter
//! implements [`ChatTransport`] and the flows await each call inline.

use crate::model::{ChatId, MessageId, ThreadId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// An inline button. `payload` is a colon-delimited callback string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Button {
    pub text: String,
    pub payload: String,
}

impl Button {
    pub fn new(text: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            payload: payload.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Keyboard {
    pub rows: Vec<Vec<Button>>,
}

impl Keyboard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a row of buttons.
    pub fn row(mut self, buttons: Vec<Button>) -> Self {
        if !buttons.is_empty() {
            self.rows.push(buttons);
        }
        self
    }

    /// Append a single-button row.
    pub fn button(self, text: impl Into<String>, payload: impl Into<String>) -> Self {
        self.row(vec![Button::new(text, payload)])
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn payloads(&self) -> impl Iterator<Item = &str> {
        self.rows.iter().flatten().map(|b| b.payload.as_str())
    }
}

/// Reference to a published poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollHandle {
    pub poll_id: String,
    pub message_id: MessageId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatInfo {
    pub chat_id: ChatId,
    pub title: Option<String>,
    pub is_forum: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    #[error("message not found")]
    MessageNotFound,

    #[error("message is too old to delete")]
    MessageTooOld,

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("chat not found")]
    ChatNotFound,

    #[error("api error {code}: {description}")]
    Api { code: u16, description: String },

    #[error("network error: {0}")]
    Network(String),
}

impl TransportError {
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

pub type TransportResult<T> = Result<T, TransportError>;

#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn send_message(
        &self,
        chat: ChatId,
        thread: Option<ThreadId>,
        text: &str,
        markup: Option<&Keyboard>,
    ) -> TransportResult<MessageId>;

    async fn delete_message(&self, chat: ChatId, message: MessageId) -> TransportResult<()>;

    async fn answer_callback(&self, callback_id: &str, text: Option<&str>) -> TransportResult<()>;

    async fn send_poll(
        &self,
        chat: ChatId,
        thread: Option<ThreadId>,
        question: &str,
        options: &[String],
    ) -> TransportResult<PollHandle>;

    async fn stop_poll(&self, chat: ChatId, message: MessageId) -> TransportResult<()>;

    /// Used by group registration to detect forum chats.
    async fn chat_info(&self, chat: ChatId) -> TransportResult<ChatInfo>;
}
