//! Group registration (admins only): `AskName → AskChatId → [AskForum] → [AskTopic]`.
//!
//! The forum question is skipped when the transport can tell whether the chat
//! is a forum. A chat that is already registered is reused, as is a topic.

use super::{cancel_row, Actor, Conversation, Decision, FlowInput, FlowOutcome, Prompt, Stepped};
use crate::callback::CallbackAction;
use crate::error::{ForecastError, ForecastResult, ValidationError};
use crate::messages;
use crate::model::{ChatId, ForumTopic, Group, GroupId, NewGroup, ThreadId};
use crate::services::Services;
use crate::session::{FlowKind, FlowSession, FlowState, PromptTrail};
use crate::transport::{Button, Keyboard};
use crate::validate;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationStep {
    AskName,
    AskChatId,
    AskForum,
    AskTopic,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistrationContext {
    pub chat_id: ChatId,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub target_chat_id: Option<ChatId>,
    #[serde(default)]
    pub is_forum: Option<bool>,
    /// Set when the chat turned out to be registered already.
    #[serde(default)]
    pub existing_group: Option<GroupId>,
    #[serde(default)]
    pub topic_id: Option<ThreadId>,
    #[serde(default)]
    pub trail: PromptTrail,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RegistrationSession {
    pub step: RegistrationStep,
    pub context: RegistrationContext,
}

impl FlowState for RegistrationSession {
    const KIND: FlowKind = FlowKind::GroupRegistration;

    fn chat_id(&self) -> ChatId {
        self.context.chat_id
    }

    fn trail(&self) -> &PromptTrail {
        &self.context.trail
    }

    fn trail_mut(&mut self) -> &mut PromptTrail {
        &mut self.context.trail
    }

    fn into_session(self) -> FlowSession {
        FlowSession::Registration(self)
    }
}

/// What is known about a chat id before asking the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatDetection {
    Registered(Group),
    Detected { is_forum: bool },
    Unknown,
}

pub fn decide(
    session: &RegistrationSession,
    input: &FlowInput,
    detection: Option<&ChatDetection>,
) -> Decision<RegistrationSession> {
    if input.is_cancel() {
        return Decision::Cancel;
    }
    transition(session, input, detection).unwrap_or_else(Decision::Reject)
}

fn transition(
    session: &RegistrationSession,
    input: &FlowInput,
    detection: Option<&ChatDetection>,
) -> Result<Decision<RegistrationSession>, ValidationError> {
    let mut next = session.clone();
    let ctx = &mut next.context;
    match (session.step, input) {
        (RegistrationStep::AskName, FlowInput::Text { text, .. }) => {
            ctx.name = Some(validate::name(text)?);
            next.step = RegistrationStep::AskChatId;
        }
        (RegistrationStep::AskChatId, FlowInput::Text { text, .. }) => {
            ctx.target_chat_id = Some(validate::number::<ChatId>(text)?);
            match detection {
                Some(ChatDetection::Registered(group)) => {
                    ctx.existing_group = Some(group.id);
                    ctx.is_forum = Some(group.is_forum);
                }
                Some(ChatDetection::Detected { is_forum }) => ctx.is_forum = Some(*is_forum),
                Some(ChatDetection::Unknown) | None => {
                    next.step = RegistrationStep::AskForum;
                    return Ok(Decision::Advance(next));
                }
            }
            return Ok(after_forum(next));
        }
        (RegistrationStep::AskForum, FlowInput::Button(CallbackAction::Forum(is_forum))) => {
            ctx.is_forum = Some(*is_forum);
            return Ok(after_forum(next));
        }
        (RegistrationStep::AskTopic, FlowInput::Text { text, .. }) => {
            ctx.topic_id = Some(validate::number::<ThreadId>(text)?);
            return Ok(Decision::Finish(next));
        }
        (RegistrationStep::AskTopic, FlowInput::Button(CallbackAction::SkipTopic)) => {
            return Ok(Decision::Finish(next));
        }
        (RegistrationStep::AskForum, FlowInput::Text { .. }) => {
            return Err(ValidationError::UseButtons);
        }
        _ => return Ok(Decision::Ignore),
    }
    Ok(Decision::Advance(next))
}

fn after_forum(mut next: RegistrationSession) -> Decision<RegistrationSession> {
    if next.context.is_forum == Some(true) {
        next.step = RegistrationStep::AskTopic;
        Decision::Advance(next)
    } else {
        Decision::Finish(next)
    }
}

pub fn prompt(session: &RegistrationSession) -> Prompt {
    match session.step {
        RegistrationStep::AskName => Prompt::with_keyboard(
            "What is the group called?",
            cancel_row(Keyboard::new()),
        ),
        RegistrationStep::AskChatId => Prompt::with_keyboard(
            "Send the chat id of the group, e.g. -1001234567890.",
            cancel_row(Keyboard::new()),
        ),
        RegistrationStep::AskForum => Prompt::with_keyboard(
            "Is the group a forum with topics?",
            cancel_row(Keyboard::new().row(vec![
                Button::new("Yes", CallbackAction::Forum(true).encode()),
                Button::new("No", CallbackAction::Forum(false).encode()),
            ])),
        ),
        RegistrationStep::AskTopic => Prompt::with_keyboard(
            "Send the id of the topic events should go to, or skip to use the whole group.",
            cancel_row(Keyboard::new().button("Skip", CallbackAction::SkipTopic.encode())),
        ),
    }
}

pub struct GroupRegistrationFlow {
    services: Services,
    conversation: Conversation,
}

impl GroupRegistrationFlow {
    pub fn new(services: Services) -> Self {
        let conversation = Conversation::new(&services);
        Self {
            services,
            conversation,
        }
    }

    pub async fn start(&self, actor: &Actor, chat: ChatId) -> ForecastResult<FlowOutcome> {
        if !self.services.auth.is_admin(actor.user_id) {
            return Err(ForecastError::unauthorized("only admins can register groups"));
        }
        let session = RegistrationSession {
            step: RegistrationStep::AskName,
            context: RegistrationContext {
                chat_id: chat,
                ..RegistrationContext::default()
            },
        };
        let prompt = prompt(&session);
        self.conversation.open(actor.user_id, session, prompt).await
    }

    pub async fn handle(
        &self,
        actor: &Actor,
        session: RegistrationSession,
        input: FlowInput,
    ) -> ForecastResult<FlowOutcome> {
        let detection = match (&session.step, &input) {
            (RegistrationStep::AskChatId, FlowInput::Text { text, .. }) => {
                match validate::number::<ChatId>(text) {
                    Ok(chat) => Some(self.detect(chat).await?),
                    Err(_) => None,
                }
            }
            _ => None,
        };
        let decision = decide(&session, &input, detection.as_ref());
        match self
            .conversation
            .step(actor.user_id, session, decision, &input, prompt)
            .await?
        {
            Stepped::Done(outcome) => Ok(outcome),
            Stepped::Finish(done) => self.register(actor, done, &input).await,
        }
    }

    async fn detect(&self, chat: ChatId) -> ForecastResult<ChatDetection> {
        if let Some(group) = self.services.storage.group_by_chat(chat).await? {
            return Ok(ChatDetection::Registered(group));
        }
        match self.services.transport.chat_info(chat).await {
            Ok(info) => Ok(ChatDetection::Detected {
                is_forum: info.is_forum,
            }),
            Err(err) => {
                debug!(chat_id = chat, error = %err, "chat info unavailable");
                Ok(ChatDetection::Unknown)
            }
        }
    }

    async fn register(
        &self,
        actor: &Actor,
        session: RegistrationSession,
        input: &FlowInput,
    ) -> ForecastResult<FlowOutcome> {
        let ctx = &session.context;
        let (Some(name), Some(chat)) = (ctx.name.clone(), ctx.target_chat_id) else {
            self.conversation
                .discard(actor.user_id, session.into_session())
                .await?;
            return Err(ForecastError::InvalidContext {
                reason: "registration context is incomplete".into(),
            });
        };

        let storage = &self.services.storage;
        let existing = match ctx.existing_group {
            Some(id) => storage.group(id).await?,
            None => storage.group_by_chat(chat).await?,
        };
        let (group, reused) = match existing {
            Some(group) => (group, true),
            None => {
                let group = storage
                    .insert_group(
                        NewGroup {
                            chat_id: chat,
                            name,
                            is_forum: ctx.is_forum.unwrap_or(false),
                        },
                        self.services.clock.now(),
                    )
                    .await?;
                info!(group_id = group.id, chat_id = chat, "group registered");
                (group, false)
            }
        };

        let topic_added = match ctx.topic_id {
            Some(thread_id) => {
                storage
                    .add_topic(ForumTopic {
                        group_id: group.id,
                        thread_id,
                        name: None,
                    })
                    .await?
            }
            None => false,
        };
        storage.add_member(actor.user_id, group.id).await?;

        let text = messages::group_registered(&group, ctx.topic_id, reused, topic_added);
        self.conversation
            .close(actor.user_id, session, &text, input.message_id())
            .await?;
        Ok(FlowOutcome::Completed)
    }
}
