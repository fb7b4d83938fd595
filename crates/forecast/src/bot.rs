//! Update router: commands, text replies, button presses and poll answers.
//!
//! Every update runs inside its own span carrying a correlation id. Errors that
//! end an interaction are reported to the chat; transport and storage failures
//! are also returned to the caller, after the user's session is dropped.

use crate::callback::CallbackAction;
use crate::conflict::{conflict_keyboard, ConflictCheck};
use crate::error::{ErrorKind, ForecastError, ForecastResult};
use crate::event_manager::VoteOutcome;
use crate::flows::creation::{self, EventCreationFlow};
use crate::flows::edit::{self, EventEditFlow};
use crate::flows::registration::{self, GroupRegistrationFlow};
use crate::flows::resolution::{self, EventResolutionFlow};
use crate::flows::{Actor, Conversation, FlowInput, FlowOutcome, Prompt};
use crate::messages;
use crate::model::{ChatId, EventId, Group, MessageId, ThreadId, UserId};
use crate::services::Services;
use crate::session::{FlowKind, FlowSession, SessionLookup};
use tracing::{debug, error, info_span, warn, Instrument};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingMessage {
    pub message_id: MessageId,
    pub chat_id: ChatId,
    pub thread_id: Option<ThreadId>,
    pub user_id: UserId,
    pub display_name: Option<String>,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackQuery {
    pub id: String,
    pub chat_id: ChatId,
    /// The message carrying the pressed keyboard.
    pub message_id: Option<MessageId>,
    pub user_id: UserId,
    pub display_name: Option<String>,
    pub data: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollAnswer {
    pub poll_id: String,
    pub user_id: UserId,
    pub display_name: Option<String>,
    /// Empty when the vote was retracted.
    pub option_ids: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Update {
    Message(IncomingMessage),
    Callback(CallbackQuery),
    PollAnswer(PollAnswer),
}

impl Update {
    pub fn user_id(&self) -> UserId {
        match self {
            Self::Message(m) => m.user_id,
            Self::Callback(q) => q.user_id,
            Self::PollAnswer(a) => a.user_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Message(_) => "message",
            Self::Callback(_) => "callback",
            Self::PollAnswer(_) => "poll_answer",
        }
    }

    /// Where errors are reported. Poll answers have no chat.
    fn reply_chat(&self) -> Option<ChatId> {
        match self {
            Self::Message(m) => Some(m.chat_id),
            Self::Callback(q) => Some(q.chat_id),
            Self::PollAnswer(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    CreateEvent,
    /// `/edit_event [id]`
    EditEvent(Option<EventId>),
    ResolveEvent,
    CreateGroup,
    Cancel,
    Rating,
    MyStats,
    Help,
}

impl Command {
    /// Parse `/command[@bot] [args]`. Anything else is not a command.
    pub fn parse(text: &str) -> Option<Self> {
        let mut words = text.trim().split_whitespace();
        let head = words.next()?.strip_prefix('/')?;
        let name = head.split('@').next().unwrap_or(head);
        let command = match name {
            "create_event" => Self::CreateEvent,
            "edit_event" => Self::EditEvent(words.next().and_then(|id| id.parse().ok())),
            "resolve_event" => Self::ResolveEvent,
            "create_group" => Self::CreateGroup,
            "cancel" => Self::Cancel,
            "rating" => Self::Rating,
            "my_stats" => Self::MyStats,
            "help" | "start" => Self::Help,
            _ => return None,
        };
        Some(command)
    }

    /// The flow this command starts, if any.
    pub fn flow(&self) -> Option<FlowKind> {
        match self {
            Self::CreateEvent => Some(FlowKind::EventCreation),
            Self::EditEvent(_) => Some(FlowKind::EventEdit),
            Self::ResolveEvent => Some(FlowKind::EventResolution),
            Self::CreateGroup => Some(FlowKind::GroupRegistration),
            Self::Cancel | Self::Rating | Self::MyStats | Self::Help => None,
        }
    }
}

/// Errors after which the user's session cannot be trusted any more.
fn ends_session(kind: ErrorKind) -> bool {
    kind.is_infrastructure() || matches!(kind, ErrorKind::InvalidContext | ErrorKind::InvalidCallback)
}

#[derive(Clone)]
pub struct Bot {
    services: Services,
    conversation: Conversation,
}

impl Bot {
    pub fn new(services: Services) -> Self {
        let conversation = Conversation::new(&services);
        Self {
            services,
            conversation,
        }
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    /// Handle one update. Only transport and storage failures are returned;
    /// everything else has been answered in the chat.
    pub async fn handle(&self, update: Update) -> ForecastResult<()> {
        let correlation_id = Uuid::new_v4();
        let span = info_span!(
            "update",
            %correlation_id,
            kind = update.kind(),
            user_id = update.user_id()
        );
        async move {
            let result = match &update {
                Update::Message(message) => self.on_message(message).await,
                Update::Callback(query) => self.on_callback(query).await,
                Update::PollAnswer(answer) => self.on_poll_answer(answer).await,
            };
            match result {
                Ok(()) => Ok(()),
                Err(err) => self.fail(&update, err).await,
            }
        }
        .instrument(span)
        .await
    }

    async fn fail(&self, update: &Update, err: ForecastError) -> ForecastResult<()> {
        let kind = err.kind();
        if ends_session(kind) && !matches!(update, Update::PollAnswer(_)) {
            if let Err(cleanup) = self.services.storage.delete_session(update.user_id()).await {
                warn!(error = %cleanup, "could not drop session after failure");
            }
        }
        if let Some(chat) = update.reply_chat() {
            if let Err(send) = self.conversation.say(chat, &messages::error_text(&err)).await {
                warn!(chat_id = chat, error = %send, "could not report error");
            }
        }
        if kind.is_infrastructure() {
            error!(error = %err, "update failed");
            Err(err)
        } else {
            debug!(error = %err, "update refused");
            Ok(())
        }
    }

    async fn on_message(&self, message: &IncomingMessage) -> ForecastResult<()> {
        let actor = Actor::new(message.user_id, message.display_name.clone());
        self.track_membership(message.chat_id, message.user_id).await?;

        if let Some(command) = Command::parse(&message.text) {
            return self.on_command(&actor, message.chat_id, command).await;
        }

        match self.conversation.sessions().get(message.user_id).await? {
            SessionLookup::Active(session) if session.chat_id() == message.chat_id => {
                let input = FlowInput::text(message.message_id, message.text.clone());
                self.route(&actor, session, input).await?;
            }
            SessionLookup::Expired(kind) if message.chat_id == message.user_id => {
                self.conversation
                    .say(message.chat_id, &messages::session_expired(kind))
                    .await?;
            }
            SessionLookup::Active(_) | SessionLookup::Expired(_) | SessionLookup::NotFound => {}
        }
        Ok(())
    }

    /// Anyone writing in a registered group is one of its members.
    async fn track_membership(&self, chat: ChatId, user: UserId) -> ForecastResult<()> {
        if chat == user {
            return Ok(());
        }
        if let Some(group) = self.services.storage.group_by_chat(chat).await? {
            self.services.storage.add_member(user, group.id).await?;
        }
        Ok(())
    }

    async fn on_command(&self, actor: &Actor, chat: ChatId, command: Command) -> ForecastResult<()> {
        debug!(?command, "command");
        match command {
            Command::Help => {
                self.conversation.say(chat, messages::HELP).await?;
            }
            Command::Cancel => self.cancel(actor, chat).await?,
            Command::Rating => self.show_rating(actor, chat).await?,
            Command::MyStats => self.show_stats(actor, chat).await?,
            Command::EditEvent(target) => {
                self.begin(actor, chat, FlowKind::EventEdit, target).await?;
            }
            Command::CreateEvent | Command::ResolveEvent | Command::CreateGroup => {
                if let Some(kind) = command.flow() {
                    self.begin(actor, chat, kind, None).await?;
                }
            }
        }
        Ok(())
    }

    async fn cancel(&self, actor: &Actor, chat: ChatId) -> ForecastResult<()> {
        match self.conversation.sessions().get(actor.user_id).await? {
            SessionLookup::Active(session) => {
                let kind = session.kind();
                let reply_chat = session.chat_id();
                self.conversation.discard(actor.user_id, session).await?;
                self.conversation
                    .say(reply_chat, &messages::cancelled(kind))
                    .await?;
            }
            SessionLookup::Expired(_) | SessionLookup::NotFound => {
                self.conversation.say(chat, messages::NOTHING_TO_CANCEL).await?;
            }
        }
        Ok(())
    }

    /// Start `kind` unless another flow is live. A live flow of the same kind is
    /// discarded and started afresh.
    async fn begin(
        &self,
        actor: &Actor,
        chat: ChatId,
        kind: FlowKind,
        target: Option<EventId>,
    ) -> ForecastResult<FlowOutcome> {
        match self.services.conflicts().check(actor.user_id, kind).await? {
            ConflictCheck::Conflict { existing } => {
                let prompt = Prompt::with_keyboard(
                    messages::conflict(existing, kind),
                    conflict_keyboard(existing, kind),
                );
                self.conversation.send(chat, &prompt).await?;
                return Ok(FlowOutcome::Refused);
            }
            ConflictCheck::SameFlow => self.drop_current(actor.user_id).await?,
            ConflictCheck::Free => {}
        }
        self.start(actor, chat, kind, target).await
    }

    async fn drop_current(&self, user: UserId) -> ForecastResult<()> {
        if let SessionLookup::Active(session) = self.conversation.sessions().get(user).await? {
            debug!(flow = %session.kind(), "discarding current flow");
            self.conversation.discard(user, session).await?;
        }
        Ok(())
    }

    async fn start(
        &self,
        actor: &Actor,
        chat: ChatId,
        kind: FlowKind,
        target: Option<EventId>,
    ) -> ForecastResult<FlowOutcome> {
        let services = self.services.clone();
        match kind {
            FlowKind::EventCreation => EventCreationFlow::new(services).start(actor, chat).await,
            FlowKind::EventEdit => EventEditFlow::new(services).start(actor, chat, target).await,
            FlowKind::EventResolution => EventResolutionFlow::new(services).start(actor, chat).await,
            FlowKind::GroupRegistration => {
                GroupRegistrationFlow::new(services).start(actor, chat).await
            }
        }
    }

    async fn route(
        &self,
        actor: &Actor,
        session: FlowSession,
        input: FlowInput,
    ) -> ForecastResult<FlowOutcome> {
        let services = self.services.clone();
        match session {
            FlowSession::Creation(state) => {
                EventCreationFlow::new(services).handle(actor, state, input).await
            }
            FlowSession::Edit(state) => EventEditFlow::new(services).handle(actor, state, input).await,
            FlowSession::Resolution(state) => {
                EventResolutionFlow::new(services).handle(actor, state, input).await
            }
            FlowSession::Registration(state) => {
                GroupRegistrationFlow::new(services).handle(actor, state, input).await
            }
        }
    }

    fn current_prompt(&self, session: &FlowSession) -> Prompt {
        let env = self.services.step_env();
        match session {
            FlowSession::Creation(state) => creation::prompt(state, &env),
            FlowSession::Edit(state) => edit::prompt(state, &env),
            FlowSession::Resolution(state) => resolution::prompt(state),
            FlowSession::Registration(state) => registration::prompt(state),
        }
    }

    async fn on_callback(&self, query: &CallbackQuery) -> ForecastResult<()> {
        if let Err(err) = self.services.transport.answer_callback(&query.id, None).await {
            debug!(error = %err, "callback answer failed");
        }
        let action = CallbackAction::parse(&query.data).map_err(|err| {
            warn!(payload = %query.data, error = %err, "unreadable callback");
            err
        })?;
        let actor = Actor::new(query.user_id, query.display_name.clone());

        match action {
            CallbackAction::ConflictResume => {
                self.remove_menu(query).await;
                let session = self
                    .conversation
                    .sessions()
                    .get(actor.user_id)
                    .await?
                    .into_active()?;
                let prompt = self.current_prompt(&session);
                self.conversation.reprompt(actor.user_id, session, prompt).await?;
            }
            CallbackAction::ConflictRestart(kind) => {
                self.remove_menu(query).await;
                self.drop_current(actor.user_id).await?;
                self.start(&actor, query.chat_id, kind, None).await?;
            }
            CallbackAction::EditEvent(event_id) => {
                self.remove_menu(query).await;
                self.begin(&actor, query.chat_id, FlowKind::EventEdit, Some(event_id))
                    .await?;
            }
            action => self.press(&actor, query, action).await?,
        }
        Ok(())
    }

    /// A flow button: goes to the live session when it belongs to its kind.
    async fn press(
        &self,
        actor: &Actor,
        query: &CallbackQuery,
        action: CallbackAction,
    ) -> ForecastResult<()> {
        match self.conversation.sessions().get(actor.user_id).await? {
            SessionLookup::Active(session)
                if action.flow().map_or(true, |kind| kind == session.kind()) =>
            {
                self.route(actor, session, FlowInput::Button(action)).await?;
            }
            SessionLookup::Active(session) => {
                debug!(flow = %session.kind(), ?action, "button of another flow ignored");
            }
            SessionLookup::Expired(flow) => return Err(ForecastError::SessionExpired { flow }),
            SessionLookup::NotFound => {
                self.conversation.say(query.chat_id, messages::STALE_BUTTON).await?;
            }
        }
        Ok(())
    }

    /// Delete the menu a button was pressed on.
    async fn remove_menu(&self, query: &CallbackQuery) {
        if let Some(message_id) = query.message_id {
            self.services
                .cleaner()
                .delete_messages(query.chat_id, &[message_id])
                .await;
        }
    }

    async fn on_poll_answer(&self, answer: &PollAnswer) -> ForecastResult<()> {
        let outcome = self
            .services
            .events()
            .record_vote(
                &answer.poll_id,
                answer.user_id,
                answer.display_name.clone(),
                &answer.option_ids,
            )
            .await?;
        let VoteOutcome::Recorded { group_id, .. } = outcome else {
            debug!(?outcome, "poll answer not recorded");
            return Ok(());
        };

        let awarded = self
            .services
            .achievements()
            .check(answer.user_id, group_id)
            .await?;
        if awarded.is_empty() {
            return Ok(());
        }
        if let Some(group) = self.services.storage.group(group_id).await? {
            let actor = Actor::new(answer.user_id, answer.display_name.clone());
            self.services
                .notifier()
                .notify(group.chat_id, None, &actor.name(), &awarded)
                .await;
        }
        Ok(())
    }

    /// The group of the chat, or every group of the user in a private chat.
    async fn groups_in_scope(&self, user: UserId, chat: ChatId) -> ForecastResult<Vec<Group>> {
        if let Some(group) = self.services.storage.group_by_chat(chat).await? {
            return Ok(vec![group]);
        }
        Ok(self.services.storage.groups_for_user(user).await?)
    }

    async fn show_rating(&self, actor: &Actor, chat: ChatId) -> ForecastResult<()> {
        let groups = self.groups_in_scope(actor.user_id, chat).await?;
        if groups.is_empty() {
            self.conversation.say(chat, messages::NO_GROUPS).await?;
            return Ok(());
        }
        let ratings = self.services.ratings();
        let mut boards = Vec::with_capacity(groups.len());
        for group in &groups {
            let top = ratings
                .top_ratings(group.id, self.services.config.leaderboard_size)
                .await?;
            boards.push(messages::leaderboard(group, &top));
        }
        self.conversation.say(chat, &boards.join("\n\n")).await?;
        Ok(())
    }

    async fn show_stats(&self, actor: &Actor, chat: ChatId) -> ForecastResult<()> {
        let groups = self.groups_in_scope(actor.user_id, chat).await?;
        if groups.is_empty() {
            self.conversation.say(chat, messages::NO_GROUPS).await?;
            return Ok(());
        }
        let ratings = self.services.ratings();
        let mut sections = Vec::with_capacity(groups.len());
        for group in &groups {
            let stats = ratings.user_stats(actor.user_id, group.id).await?;
            let earned = self
                .services
                .storage
                .achievements(actor.user_id, group.id)
                .await?;
            sections.push(messages::user_stats(group, &stats, &earned));
        }
        self.conversation.say(chat, &sections.join("\n\n")).await?;
        Ok(())
    }
}
