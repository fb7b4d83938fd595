//! Event editing before the first vote.
//!
//! The flow keeps the event as it was when editing started and a draft the
//! user changes field by field from a menu. Saving sends only the fields that
//! differ, after checking again that nobody has voted.

use super::{
    cancel_row, deadline_presets, Actor, Conversation, Decision, FlowInput, FlowOutcome, Prompt,
    StepEnv, Stepped,
};
use crate::callback::{CallbackAction, EditField};
use crate::error::{ForecastResult, ValidationError};
use crate::messages;
use crate::model::{ChatId, Event, EventId, EventPatch, EventType, Options};
use crate::services::Services;
use crate::session::{FlowKind, FlowSession, FlowState, PromptTrail};
use crate::transport::{Button, Keyboard};
use crate::validate;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EditStep {
    Menu,
    AwaitQuestion,
    AwaitOptions,
    AwaitDeadline,
}

/// The editable fields of an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventSnapshot {
    pub question: String,
    pub options: Options,
    pub deadline: DateTime<Utc>,
}

impl From<&Event> for EventSnapshot {
    fn from(event: &Event) -> Self {
        Self {
            question: event.question.clone(),
            options: event.options.clone(),
            deadline: event.deadline,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EditContext {
    pub chat_id: ChatId,
    pub event_id: EventId,
    pub event_type: EventType,
    pub original: EventSnapshot,
    pub draft: EventSnapshot,
    #[serde(default)]
    pub trail: PromptTrail,
}

impl EditContext {
    pub fn new(chat_id: ChatId, event: &Event) -> Self {
        Self {
            chat_id,
            event_id: event.id,
            event_type: event.event_type,
            original: event.into(),
            draft: event.into(),
            trail: PromptTrail::default(),
        }
    }

    /// Fields of the draft that differ from the original.
    pub fn patch(&self) -> EventPatch {
        EventPatch {
            question: (self.draft.question != self.original.question)
                .then(|| self.draft.question.clone()),
            options: (self.draft.options != self.original.options)
                .then(|| self.draft.options.clone()),
            deadline: (self.draft.deadline != self.original.deadline).then_some(self.draft.deadline),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EditSession {
    pub step: EditStep,
    pub context: EditContext,
}

impl FlowState for EditSession {
    const KIND: FlowKind = FlowKind::EventEdit;

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
        FlowSession::Edit(self)
    }
}

pub fn decide(session: &EditSession, input: &FlowInput, env: &StepEnv) -> Decision<EditSession> {
    match input {
        FlowInput::Button(CallbackAction::Cancel)
        | FlowInput::Button(CallbackAction::EditField {
            field: EditField::Cancel,
            ..
        }) => Decision::Cancel,
        _ => transition(session, input, env).unwrap_or_else(Decision::Reject),
    }
}

fn transition(
    session: &EditSession,
    input: &FlowInput,
    env: &StepEnv,
) -> Result<Decision<EditSession>, ValidationError> {
    let mut next = session.clone();
    let ctx = &mut next.context;
    match (session.step, input) {
        (EditStep::Menu, FlowInput::Button(CallbackAction::EditField { field, event_id })) => {
            if *event_id != ctx.event_id {
                return Ok(Decision::Ignore);
            }
            let step = match field {
                EditField::Question => EditStep::AwaitQuestion,
                EditField::Options if ctx.event_type == EventType::MultiOption => {
                    EditStep::AwaitOptions
                }
                EditField::Options => return Err(ValidationError::OptionsFixed),
                EditField::Deadline => EditStep::AwaitDeadline,
                EditField::Save => return Ok(Decision::Finish(next)),
                EditField::Cancel => return Ok(Decision::Cancel),
            };
            next.step = step;
        }
        (EditStep::AwaitQuestion, FlowInput::Text { text, .. }) => {
            ctx.draft.question = validate::question(text)?;
            next.step = EditStep::Menu;
        }
        (EditStep::AwaitOptions, FlowInput::Text { text, .. }) => {
            ctx.draft.options = validate::option_lines(text)?;
            next.step = EditStep::Menu;
        }
        (EditStep::AwaitDeadline, FlowInput::Text { text, .. }) => {
            ctx.draft.deadline = validate::deadline(text, env.offset, env.now)?;
            next.step = EditStep::Menu;
        }
        (EditStep::AwaitDeadline, FlowInput::Button(CallbackAction::DeadlinePreset { days })) => {
            ctx.draft.deadline = validate::preset_deadline(*days, env.offset, env.now)?;
            next.step = EditStep::Menu;
        }
        (EditStep::Menu, FlowInput::Text { .. }) => return Err(ValidationError::UseButtons),
        _ => return Ok(Decision::Ignore),
    }
    Ok(Decision::Advance(next))
}

pub fn prompt(session: &EditSession, env: &StepEnv) -> Prompt {
    let ctx = &session.context;
    let field = |field: EditField| {
        CallbackAction::EditField {
            field,
            event_id: ctx.event_id,
        }
        .encode()
    };
    match session.step {
        EditStep::Menu => {
            let summary = messages::event_summary(
                &ctx.draft.question,
                ctx.event_type,
                &ctx.draft.options,
                Some(ctx.draft.deadline),
                env.offset,
            );
            let mut fields = vec![Button::new("Question", field(EditField::Question))];
            if ctx.event_type == EventType::MultiOption {
                fields.push(Button::new("Options", field(EditField::Options)));
            }
            fields.push(Button::new("Deadline", field(EditField::Deadline)));
            let keyboard = Keyboard::new().row(fields).row(vec![
                Button::new("Save", field(EditField::Save)),
                Button::new("Cancel", field(EditField::Cancel)),
            ]);
            let pending = if ctx.patch().is_empty() {
                "No changes yet."
            } else {
                "Unsaved changes."
            };
            Prompt::with_keyboard(
                format!("{summary}\n\n{pending} What do you want to change?"),
                keyboard,
            )
        }
        EditStep::AwaitQuestion => Prompt::with_keyboard(
            format!("Current question: {}\n\nSend the new question.", ctx.draft.question),
            cancel_row(Keyboard::new()),
        ),
        EditStep::AwaitOptions => Prompt::with_keyboard(
            format!(
                "Current options:\n{}\n\nSend the new options, one per line (2 to 6).",
                ctx.draft.options.join("\n")
            ),
            cancel_row(Keyboard::new()),
        ),
        EditStep::AwaitDeadline => Prompt::with_keyboard(
            format!(
                "Current deadline: {}\n\nSend the new deadline as DD.MM.YYYY HH:MM (UTC{}) or pick a preset.",
                validate::format_deadline(ctx.draft.deadline, env.offset),
                messages::offset_suffix(env.offset)
            ),
            cancel_row(deadline_presets()),
        ),
    }
}

pub struct EventEditFlow {
    services: Services,
    conversation: Conversation,
}

impl EventEditFlow {
    pub fn new(services: Services) -> Self {
        let conversation = Conversation::new(&services);
        Self {
            services,
            conversation,
        }
    }

    /// Without an id, list the caller's editable events instead of starting.
    pub async fn start(
        &self,
        actor: &Actor,
        chat: ChatId,
        event_id: Option<EventId>,
    ) -> ForecastResult<FlowOutcome> {
        let events = self.services.events();
        let Some(event_id) = event_id else {
            let editable = events.editable_events(actor.user_id).await?;
            if editable.is_empty() {
                self.conversation.say(chat, messages::NO_EDITABLE_EVENTS).await?;
                return Ok(FlowOutcome::Refused);
            }
            let keyboard = editable.iter().fold(Keyboard::new(), |kb, event| {
                kb.button(
                    messages::short_question(&event.question),
                    CallbackAction::EditEvent(event.id).encode(),
                )
            });
            let prompt = Prompt::with_keyboard("Which event do you want to edit?", keyboard);
            self.conversation.send(chat, &prompt).await?;
            return Ok(FlowOutcome::Listed);
        };

        let event = events.ensure_editable(actor.user_id, event_id).await?;
        let session = EditSession {
            step: EditStep::Menu,
            context: EditContext::new(chat, &event),
        };
        let prompt = prompt(&session, &self.services.step_env());
        self.conversation.open(actor.user_id, session, prompt).await
    }

    pub async fn handle(
        &self,
        actor: &Actor,
        session: EditSession,
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
            Stepped::Finish(done) => self.save(actor, done, &input).await,
        }
    }

    async fn save(
        &self,
        actor: &Actor,
        session: EditSession,
        input: &FlowInput,
    ) -> ForecastResult<FlowOutcome> {
        let patch = session.context.patch();
        if patch.is_empty() {
            self.conversation
                .close(actor.user_id, session, messages::NO_CHANGES, input.message_id())
                .await?;
            return Ok(FlowOutcome::Completed);
        }

        let event_id = session.context.event_id;
        match self
            .services
            .events()
            .edit_event(actor.user_id, event_id, patch)
            .await
        {
            Ok(event) => {
                let text = messages::event_updated(&event, self.services.config.local_offset());
                self.conversation
                    .close(actor.user_id, session, &text, input.message_id())
                    .await?;
                Ok(FlowOutcome::Completed)
            }
            Err(err) => {
                self.conversation
                    .discard(actor.user_id, session.into_session())
                    .await?;
                Err(err)
            }
        }
    }
}
