//! Event creation: `SelectGroup → AskQuestion → AskEventType → [AskOptions] → AskDeadline → Confirm`.

use super::{
    cancel_row, deadline_presets, Actor, Conversation, Decision, FlowInput, FlowOutcome, Prompt,
    StepEnv, Stepped,
};
use crate::callback::CallbackAction;
use crate::error::{ForecastError, ForecastResult, ValidationError};
use crate::messages;
use crate::model::{ChatId, EventType, GroupId, NewEvent, Options, ThreadId, UserId};
use crate::services::Services;
use crate::session::{FlowKind, FlowSession, FlowState, PromptTrail};
use crate::transport::{Button, Keyboard};
use crate::validate;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreationStep {
    SelectGroup,
    AskQuestion,
    AskEventType,
    AskOptions,
    AskDeadline,
    Confirm,
}

/// A place an event can be published to: a group, or one topic of a forum group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    pub group_id: GroupId,
    #[serde(default)]
    pub thread_id: Option<ThreadId>,
    pub label: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CreationContext {
    pub chat_id: ChatId,
    #[serde(default)]
    pub group_id: Option<GroupId>,
    #[serde(default)]
    pub thread_id: Option<ThreadId>,
    #[serde(default)]
    pub question: Option<String>,
    #[serde(default)]
    pub event_type: Option<EventType>,
    #[serde(default)]
    pub options: Options,
    #[serde(default)]
    pub deadline: Option<DateTime<Utc>>,
    #[serde(default)]
    pub targets: Vec<Target>,
    #[serde(default)]
    pub trail: PromptTrail,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreationSession {
    pub step: CreationStep,
    pub context: CreationContext,
}

impl FlowState for CreationSession {
    const KIND: FlowKind = FlowKind::EventCreation;

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
        FlowSession::Creation(self)
    }
}

/// Pure transition for one input.
pub fn decide(
    session: &CreationSession,
    input: &FlowInput,
    env: &StepEnv,
) -> Decision<CreationSession> {
    if input.is_cancel() {
        return Decision::Cancel;
    }
    transition(session, input, env).unwrap_or_else(Decision::Reject)
}

fn transition(
    session: &CreationSession,
    input: &FlowInput,
    env: &StepEnv,
) -> Result<Decision<CreationSession>, ValidationError> {
    use CreationStep::*;

    let mut next = session.clone();
    let ctx = &mut next.context;
    match (session.step, input) {
        (SelectGroup, FlowInput::Button(CallbackAction::SelectGroup { group_id, thread_id })) => {
            let known = ctx
                .targets
                .iter()
                .any(|t| t.group_id == *group_id && t.thread_id == *thread_id);
            if !known {
                return Ok(Decision::Ignore);
            }
            ctx.group_id = Some(*group_id);
            ctx.thread_id = *thread_id;
            next.step = AskQuestion;
        }
        (AskQuestion, FlowInput::Text { text, .. }) => {
            ctx.question = Some(validate::question(text)?);
            next.step = AskEventType;
        }
        (AskEventType, FlowInput::Button(CallbackAction::EventType(event_type))) => {
            ctx.event_type = Some(*event_type);
            match event_type.fixed_options() {
                Some(options) => {
                    ctx.options = options;
                    next.step = AskDeadline;
                }
                None => {
                    ctx.options = Options::new();
                    next.step = AskOptions;
                }
            }
        }
        (AskOptions, FlowInput::Text { text, .. }) => {
            ctx.options = validate::option_lines(text)?;
            next.step = AskDeadline;
        }
        (AskDeadline, FlowInput::Text { text, .. }) => {
            ctx.deadline = Some(validate::deadline(text, env.offset, env.now)?);
            next.step = Confirm;
        }
        (AskDeadline, FlowInput::Button(CallbackAction::DeadlinePreset { days })) => {
            ctx.deadline = Some(validate::preset_deadline(*days, env.offset, env.now)?);
            next.step = Confirm;
        }
        (Confirm, FlowInput::Button(CallbackAction::Confirm(true))) => {
            return Ok(Decision::Finish(next));
        }
        (Confirm, FlowInput::Button(CallbackAction::Confirm(false))) => {
            return Ok(Decision::Cancel);
        }
        (SelectGroup | AskEventType | Confirm, FlowInput::Text { .. }) => {
            return Err(ValidationError::UseButtons);
        }
        _ => return Ok(Decision::Ignore),
    }
    Ok(Decision::Advance(next))
}

pub fn prompt(session: &CreationSession, env: &StepEnv) -> Prompt {
    let ctx = &session.context;
    match session.step {
        CreationStep::SelectGroup => {
            let keyboard = ctx.targets.iter().fold(Keyboard::new(), |kb, target| {
                kb.button(
                    target.label.clone(),
                    CallbackAction::SelectGroup {
                        group_id: target.group_id,
                        thread_id: target.thread_id,
                    }
                    .encode(),
                )
            });
            Prompt::with_keyboard("Which group is the event for?", cancel_row(keyboard))
        }
        CreationStep::AskQuestion => Prompt::with_keyboard(
            format!(
                "What should people forecast? Send the question as a message (up to {} characters).",
                validate::MAX_QUESTION_LEN
            ),
            cancel_row(Keyboard::new()),
        ),
        CreationStep::AskEventType => {
            let buttons = EventType::ALL
                .iter()
                .map(|t| Button::new(t.label(), CallbackAction::EventType(*t).encode()))
                .collect();
            Prompt::with_keyboard(
                "How is it answered?",
                cancel_row(Keyboard::new().row(buttons)),
            )
        }
        CreationStep::AskOptions => Prompt::with_keyboard(
            "Send the answer options, one per line (2 to 6).",
            cancel_row(Keyboard::new()),
        ),
        CreationStep::AskDeadline => Prompt::with_keyboard(
            format!(
                "When does voting close? Send a date as DD.MM.YYYY HH:MM (UTC{}) or pick a preset.",
                messages::offset_suffix(env.offset)
            ),
            cancel_row(deadline_presets()),
        ),
        CreationStep::Confirm => {
            let summary = messages::event_summary(
                ctx.question.as_deref().unwrap_or_default(),
                ctx.event_type.unwrap_or(EventType::Binary),
                &ctx.options,
                ctx.deadline,
                env.offset,
            );
            let keyboard = Keyboard::new().row(vec![
                Button::new("Publish", CallbackAction::Confirm(true).encode()),
                Button::new("Cancel", CallbackAction::Confirm(false).encode()),
            ]);
            Prompt::with_keyboard(format!("{summary}\n\nPublish this event?"), keyboard)
        }
    }
}

pub struct EventCreationFlow {
    services: Services,
    conversation: Conversation,
}

impl EventCreationFlow {
    pub fn new(services: Services) -> Self {
        let conversation = Conversation::new(&services);
        Self {
            services,
            conversation,
        }
    }

    /// Groups and forum topics `user` may publish to.
    pub async fn targets(&self, user: UserId) -> ForecastResult<Vec<Target>> {
        let storage = &self.services.storage;
        let groups = if self.services.auth.is_admin(user) {
            storage.all_groups().await?
        } else {
            storage.groups_for_user(user).await?
        };

        let mut targets = Vec::new();
        for group in groups {
            targets.push(Target {
                group_id: group.id,
                thread_id: None,
                label: group.name.clone(),
            });
            if group.is_forum {
                for topic in storage.topics(group.id).await? {
                    let topic_name = topic
                        .name
                        .unwrap_or_else(|| format!("topic {}", topic.thread_id));
                    targets.push(Target {
                        group_id: group.id,
                        thread_id: Some(topic.thread_id),
                        label: format!("{} / {}", group.name, topic_name),
                    });
                }
            }
        }
        Ok(targets)
    }

    pub async fn start(&self, actor: &Actor, chat: ChatId) -> ForecastResult<FlowOutcome> {
        self.services.events().check_participation(actor.user_id).await?;

        let targets = self.targets(actor.user_id).await?;
        if targets.is_empty() {
            self.conversation.say(chat, messages::NO_GROUPS).await?;
            return Ok(FlowOutcome::Refused);
        }

        let mut context = CreationContext {
            chat_id: chat,
            ..CreationContext::default()
        };
        let step = match targets.as_slice() {
            [only] => {
                context.group_id = Some(only.group_id);
                context.thread_id = only.thread_id;
                CreationStep::AskQuestion
            }
            _ => CreationStep::SelectGroup,
        };
        context.targets = targets;

        let session = CreationSession { step, context };
        let prompt = prompt(&session, &self.services.step_env());
        self.conversation.open(actor.user_id, session, prompt).await
    }

    pub async fn handle(
        &self,
        actor: &Actor,
        session: CreationSession,
        input: FlowInput,
    ) -> ForecastResult<FlowOutcome> {
        let env = self.services.step_env();
        let decision = decide(&session, &input, &env);
        match self
            .conversation
            .step(actor.user_id, session, decision, &input, |s| prompt(s, &env))
            .await?
        {
            Stepped::Done(outcome) => Ok(outcome),
            Stepped::Finish(done) => self.publish(actor, done, &input).await,
        }
    }

    async fn publish(
        &self,
        actor: &Actor,
        session: CreationSession,
        input: &FlowInput,
    ) -> ForecastResult<FlowOutcome> {
        let new = match new_event(&session.context, actor.user_id) {
            Ok(new) => new,
            Err(err) => {
                self.conversation
                    .discard(actor.user_id, session.into_session())
                    .await?;
                return Err(err);
            }
        };

        let events = self.services.events();
        let event = match events.create_event(new).await {
            Ok(event) => event,
            Err(err) => {
                self.conversation
                    .discard(actor.user_id, session.into_session())
                    .await?;
                return Err(err);
            }
        };
        let event = match events.publish(&event).await {
            Ok(event) => event,
            Err(err) => {
                error!(event_id = event.id, error = %err, "poll could not be published");
                self.conversation
                    .discard(actor.user_id, session.into_session())
                    .await?;
                return Err(err);
            }
        };

        let group = events.group_of(&event).await?;
        match self
            .services
            .achievements()
            .check(actor.user_id, event.group_id)
            .await
        {
            Ok(awarded) if !awarded.is_empty() => {
                self.services
                    .notifier()
                    .notify(group.chat_id, event.forum_topic_id, &actor.name(), &awarded)
                    .await;
            }
            Ok(_) => {}
            Err(err) => warn!(user_id = actor.user_id, error = %err, "achievement check failed"),
        }

        let text = messages::event_created(&event, &group, self.services.config.local_offset());
        self.conversation
            .close(actor.user_id, session, &text, input.message_id())
            .await?;
        Ok(FlowOutcome::Completed)
    }
}

fn new_event(ctx: &CreationContext, created_by: UserId) -> ForecastResult<NewEvent> {
    let missing = |field: &str| ForecastError::InvalidContext {
        reason: format!("creation context has no {field}"),
    };
    Ok(NewEvent {
        group_id: ctx.group_id.ok_or_else(|| missing("group"))?,
        forum_topic_id: ctx.thread_id,
        question: ctx.question.clone().ok_or_else(|| missing("question"))?,
        event_type: ctx.event_type.ok_or_else(|| missing("event type"))?,
        options: ctx.options.clone(),
        deadline: ctx.deadline.ok_or_else(|| missing("deadline"))?,
        created_by,
    })
}
