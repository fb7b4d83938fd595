//! Event resolution: `SelectEvent → SelectOption`, then scoring and announcements.

use super::{cancel_row, Actor, Conversation, Decision, FlowInput, FlowOutcome, Prompt, Stepped};
use crate::callback::CallbackAction;
use crate::error::{ForecastError, ForecastResult, ValidationError};
use crate::event_manager::Resolution;
use crate::messages;
use crate::model::{ChatId, Event, EventId, Options, UserId};
use crate::services::Services;
use crate::session::{FlowKind, FlowSession, FlowState, PromptTrail};
use crate::transport::Keyboard;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStep {
    SelectEvent,
    SelectOption,
}

/// An event offered for resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub event_id: EventId,
    pub question: String,
    pub options: Options,
}

impl From<&Event> for Candidate {
    fn from(event: &Event) -> Self {
        Self {
            event_id: event.id,
            question: event.question.clone(),
            options: event.options.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResolutionContext {
    pub chat_id: ChatId,
    #[serde(default)]
    pub candidates: Vec<Candidate>,
    #[serde(default)]
    pub event_id: Option<EventId>,
    #[serde(default)]
    pub option: Option<usize>,
    #[serde(default)]
    pub trail: PromptTrail,
}

impl ResolutionContext {
    pub fn selected(&self) -> Option<&Candidate> {
        let id = self.event_id?;
        self.candidates.iter().find(|c| c.event_id == id)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolutionSession {
    pub step: ResolutionStep,
    pub context: ResolutionContext,
}

impl FlowState for ResolutionSession {
    const KIND: FlowKind = FlowKind::EventResolution;

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
        FlowSession::Resolution(self)
    }
}

pub fn decide(session: &ResolutionSession, input: &FlowInput) -> Decision<ResolutionSession> {
    let mut next = session.clone();
    match (session.step, input) {
        (_, FlowInput::Button(CallbackAction::Cancel)) => Decision::Cancel,
        (ResolutionStep::SelectEvent, FlowInput::Button(CallbackAction::ResolveEvent(id))) => {
            if !session.context.candidates.iter().any(|c| c.event_id == *id) {
                return Decision::Ignore;
            }
            next.context.event_id = Some(*id);
            next.step = ResolutionStep::SelectOption;
            Decision::Advance(next)
        }
        (ResolutionStep::SelectOption, FlowInput::Button(CallbackAction::ResolveOption(index))) => {
            let Some(candidate) = session.context.selected() else {
                return Decision::Ignore;
            };
            if *index >= candidate.options.len() {
                return Decision::Reject(ValidationError::OptionOutOfRange { index: *index });
            }
            next.context.option = Some(*index);
            Decision::Finish(next)
        }
        (_, FlowInput::Text { .. }) => Decision::Reject(ValidationError::UseButtons),
        _ => Decision::Ignore,
    }
}

pub fn prompt(session: &ResolutionSession) -> Prompt {
    let ctx = &session.context;
    match (session.step, ctx.selected()) {
        (ResolutionStep::SelectOption, Some(candidate)) => {
            let keyboard = candidate
                .options
                .iter()
                .enumerate()
                .fold(Keyboard::new(), |kb, (index, option)| {
                    kb.button(option.clone(), CallbackAction::ResolveOption(index).encode())
                });
            Prompt::with_keyboard(
                format!("{}\n\nWhich answer turned out correct?", candidate.question),
                cancel_row(keyboard),
            )
        }
        _ => {
            let keyboard = ctx.candidates.iter().fold(Keyboard::new(), |kb, candidate| {
                kb.button(
                    messages::short_question(&candidate.question),
                    CallbackAction::ResolveEvent(candidate.event_id).encode(),
                )
            });
            Prompt::with_keyboard("Which event do you want to resolve?", cancel_row(keyboard))
        }
    }
}

pub struct EventResolutionFlow {
    services: Services,
    conversation: Conversation,
}

impl EventResolutionFlow {
    pub fn new(services: Services) -> Self {
        let conversation = Conversation::new(&services);
        Self {
            services,
            conversation,
        }
    }

    pub async fn start(&self, actor: &Actor, chat: ChatId) -> ForecastResult<FlowOutcome> {
        let events = self.services.events().manageable_events(actor.user_id).await?;
        if events.is_empty() {
            self.conversation.say(chat, messages::NO_RESOLVABLE_EVENTS).await?;
            return Ok(FlowOutcome::Refused);
        }
        let session = ResolutionSession {
            step: ResolutionStep::SelectEvent,
            context: ResolutionContext {
                chat_id: chat,
                candidates: events.iter().map(Candidate::from).collect(),
                ..ResolutionContext::default()
            },
        };
        let prompt = prompt(&session);
        self.conversation.open(actor.user_id, session, prompt).await
    }

    pub async fn handle(
        &self,
        actor: &Actor,
        session: ResolutionSession,
        input: FlowInput,
    ) -> ForecastResult<FlowOutcome> {
        let decision = decide(&session, &input);
        match self
            .conversation
            .step(actor.user_id, session, decision, &input, prompt)
            .await?
        {
            Stepped::Done(outcome) => Ok(outcome),
            Stepped::Finish(done) => self.resolve(actor, done, &input).await,
        }
    }

    async fn resolve(
        &self,
        actor: &Actor,
        session: ResolutionSession,
        input: &FlowInput,
    ) -> ForecastResult<FlowOutcome> {
        let (Some(event_id), Some(option)) = (session.context.event_id, session.context.option)
        else {
            self.conversation
                .discard(actor.user_id, session.into_session())
                .await?;
            return Err(ForecastError::InvalidContext {
                reason: "resolution context has no selection".into(),
            });
        };

        let events = self.services.events();
        let Resolution { event, deltas } =
            match events.resolve_event(actor.user_id, event_id, option).await {
                Ok(resolution) => resolution,
                Err(err) => {
                    self.conversation
                        .discard(actor.user_id, session.into_session())
                        .await?;
                    return Err(err);
                }
            };
        let participants: Vec<UserId> = deltas.iter().map(|d| d.user_id).collect();
        let awarded = match self
            .services
            .achievements()
            .check_all(event.group_id, &participants)
            .await
        {
            Ok(awarded) => awarded,
            Err(err) => {
                warn!(event_id, error = %err, "achievement check failed");
                Vec::new()
            }
        };

        events.stop_poll(&event).await;

        let group = events.group_of(&event).await?;
        let tally = events.tally(&event).await?;
        let results = messages::resolution_results(&event, &tally, &deltas);
        if let Err(err) = self
            .services
            .transport
            .send_message(group.chat_id, event.forum_topic_id, &results, None)
            .await
        {
            warn!(event_id, error = %err, "results broadcast failed");
        }

        if !awarded.is_empty() {
            let names: HashMap<UserId, String> = deltas
                .iter()
                .filter_map(|d| d.display_name.clone().map(|name| (d.user_id, name)))
                .collect();
            let notifier = self.services.notifier();
            for user in &participants {
                let mine: Vec<_> = awarded.iter().filter(|a| a.user_id == *user).cloned().collect();
                if mine.is_empty() {
                    continue;
                }
                let name = names
                    .get(user)
                    .cloned()
                    .unwrap_or_else(|| format!("user {user}"));
                notifier
                    .notify(group.chat_id, event.forum_topic_id, &name, &mine)
                    .await;
            }
        }

        let text = messages::event_resolved(&event, deltas.len());
        self.conversation
            .close(actor.user_id, session, &text, input.message_id())
            .await?;
        Ok(FlowOutcome::Completed)
    }
}
