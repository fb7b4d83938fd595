//! Testing utilities for the forecast bot core.
//!
//! [`RecordingTransport`] stands in for the chat API and keeps everything the
//! bot sent, deleted or published. [`FaultyStore`] wraps the in-memory store
//! and fails chosen writes. [`Harness`] wires them to a manual clock behind a
//! real [`Bot`].

use anyhow::bail;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use forecast_core::achievements::Achievement;
use forecast_core::bot::{Bot, CallbackQuery, IncomingMessage, PollAnswer, Update};
use forecast_core::model::{
    ChatId, Event, EventId, EventType, ForumTopic, Group, GroupId, MessageId, NewEvent, NewGroup,
    Prediction, Rating, ScoreDelta, ThreadId, UserId,
};
use forecast_core::session::{SaveMode, SaveOutcome, SessionRecord};
use forecast_core::store::{
    AchievementRepository, EventRepository, GroupRepository, PredictionRepository,
    RatingRepository, SessionStore,
};
use forecast_core::transport::{
    ChatInfo, ChatTransport, Keyboard, PollHandle, TransportError, TransportResult,
};
use forecast_core::{
    AdminList, Clock, ForecastConfig, ForecastResult, ManualClock, MemoryStore, Services,
};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

const FIRST_BOT_MESSAGE_ID: MessageId = 1_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub message_id: MessageId,
    pub chat_id: ChatId,
    pub thread_id: Option<ThreadId>,
    pub text: String,
    /// Callback payloads of the attached keyboard, in order.
    pub payloads: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentPoll {
    pub poll_id: String,
    pub message_id: MessageId,
    pub chat_id: ChatId,
    pub thread_id: Option<ThreadId>,
    pub question: String,
    pub options: Vec<String>,
}

#[derive(Default)]
struct Recorded {
    next_message_id: MessageId,
    sent: Vec<SentMessage>,
    polls: Vec<SentPoll>,
    deleted: Vec<(ChatId, MessageId)>,
    delete_attempts: Vec<(ChatId, MessageId)>,
    delete_failures: HashMap<MessageId, VecDeque<TransportError>>,
    stopped: Vec<(ChatId, MessageId)>,
    answered: Vec<String>,
    chats: HashMap<ChatId, ChatInfo>,
    fail_polls: bool,
}

impl Recorded {
    fn next_id(&mut self) -> MessageId {
        if self.next_message_id == 0 {
            self.next_message_id = FIRST_BOT_MESSAGE_ID;
        }
        let id = self.next_message_id;
        self.next_message_id += 1;
        id
    }
}

/// In-memory chat API that records every call.
#[derive(Clone, Default)]
pub struct RecordingTransport {
    inner: Arc<Mutex<Recorded>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Recorded> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.lock().sent.clone()
    }

    pub fn sent_to(&self, chat: ChatId) -> Vec<SentMessage> {
        self.lock()
            .sent
            .iter()
            .filter(|m| m.chat_id == chat)
            .cloned()
            .collect()
    }

    pub fn last_to(&self, chat: ChatId) -> Option<SentMessage> {
        self.sent_to(chat).pop()
    }

    /// Whether any message to `chat` contains `needle`.
    pub fn saw(&self, chat: ChatId, needle: &str) -> bool {
        self.lock()
            .sent
            .iter()
            .any(|m| m.chat_id == chat && m.text.contains(needle))
    }

    pub fn polls(&self) -> Vec<SentPoll> {
        self.lock().polls.clone()
    }

    pub fn last_poll(&self) -> Option<SentPoll> {
        self.lock().polls.last().cloned()
    }

    pub fn deleted(&self) -> Vec<(ChatId, MessageId)> {
        self.lock().deleted.clone()
    }

    pub fn delete_attempts(&self) -> Vec<(ChatId, MessageId)> {
        self.lock().delete_attempts.clone()
    }

    pub fn stopped_polls(&self) -> Vec<(ChatId, MessageId)> {
        self.lock().stopped.clone()
    }

    pub fn answered_callbacks(&self) -> Vec<String> {
        self.lock().answered.clone()
    }

    /// Make the next delete of `message` fail with `error`. Calls queue up.
    pub fn fail_delete(&self, message: MessageId, error: TransportError) {
        self.lock()
            .delete_failures
            .entry(message)
            .or_default()
            .push_back(error);
    }

    pub fn set_chat_info(&self, info: ChatInfo) {
        self.lock().chats.insert(info.chat_id, info);
    }

    pub fn fail_polls(&self, fail: bool) {
        self.lock().fail_polls = fail;
    }
}

#[async_trait]
impl ChatTransport for RecordingTransport {
    async fn send_message(
        &self,
        chat: ChatId,
        thread: Option<ThreadId>,
        text: &str,
        markup: Option<&Keyboard>,
    ) -> TransportResult<MessageId> {
        let mut recorded = self.lock();
        let message_id = recorded.next_id();
        recorded.sent.push(SentMessage {
            message_id,
            chat_id: chat,
            thread_id: thread,
            text: text.to_string(),
            payloads: markup
                .map(|kb| kb.payloads().map(str::to_string).collect())
                .unwrap_or_default(),
        });
        Ok(message_id)
    }

    async fn delete_message(&self, chat: ChatId, message: MessageId) -> TransportResult<()> {
        let mut recorded = self.lock();
        recorded.delete_attempts.push((chat, message));
        if let Some(error) = recorded
            .delete_failures
            .get_mut(&message)
            .and_then(VecDeque::pop_front)
        {
            return Err(error);
        }
        recorded.deleted.push((chat, message));
        Ok(())
    }

    async fn answer_callback(&self, callback_id: &str, _text: Option<&str>) -> TransportResult<()> {
        self.lock().answered.push(callback_id.to_string());
        Ok(())
    }

    async fn send_poll(
        &self,
        chat: ChatId,
        thread: Option<ThreadId>,
        question: &str,
        options: &[String],
    ) -> TransportResult<PollHandle> {
        let mut recorded = self.lock();
        if recorded.fail_polls {
            return Err(TransportError::Network("poll rejected".into()));
        }
        let message_id = recorded.next_id();
        let poll_id = format!("poll-{}", recorded.polls.len() + 1);
        recorded.polls.push(SentPoll {
            poll_id: poll_id.clone(),
            message_id,
            chat_id: chat,
            thread_id: thread,
            question: question.to_string(),
            options: options.to_vec(),
        });
        Ok(PollHandle {
            poll_id,
            message_id,
        })
    }

    async fn stop_poll(&self, chat: ChatId, message: MessageId) -> TransportResult<()> {
        self.lock().stopped.push((chat, message));
        Ok(())
    }

    async fn chat_info(&self, chat: ChatId) -> TransportResult<ChatInfo> {
        self.lock()
            .chats
            .get(&chat)
            .cloned()
            .ok_or(TransportError::ChatNotFound)
    }
}

/// [`MemoryStore`] that can be told to fail resolution writes.
///
/// A failed write leaves the inner store untouched, like a rolled back
/// transaction.
pub struct FaultyStore {
    inner: Arc<MemoryStore>,
    fail_resolutions: AtomicBool,
}

impl FaultyStore {
    pub fn new(inner: Arc<MemoryStore>) -> Self {
        Self {
            inner,
            fail_resolutions: AtomicBool::new(false),
        }
    }

    pub fn fail_resolutions(&self, fail: bool) {
        self.fail_resolutions.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl SessionStore for FaultyStore {
    async fn load_session(&self, owner: UserId) -> anyhow::Result<Option<SessionRecord>> {
        self.inner.load_session(owner).await
    }

    async fn save_session(
        &self,
        record: SessionRecord,
        mode: SaveMode,
        now: DateTime<Utc>,
    ) -> anyhow::Result<SaveOutcome> {
        self.inner.save_session(record, mode, now).await
    }

    async fn delete_session(&self, owner: UserId) -> anyhow::Result<bool> {
        self.inner.delete_session(owner).await
    }
}

#[async_trait]
impl EventRepository for FaultyStore {
    async fn insert_event(&self, event: NewEvent, created_at: DateTime<Utc>) -> anyhow::Result<Event> {
        self.inner.insert_event(event, created_at).await
    }

    async fn event(&self, id: EventId) -> anyhow::Result<Option<Event>> {
        self.inner.event(id).await
    }

    async fn event_by_poll(&self, poll_id: &str) -> anyhow::Result<Option<Event>> {
        self.inner.event_by_poll(poll_id).await
    }

    async fn update_event(&self, event: &Event) -> anyhow::Result<()> {
        self.inner.update_event(event).await
    }

    async fn set_poll_reference(
        &self,
        id: EventId,
        poll_id: &str,
        poll_message_id: MessageId,
    ) -> anyhow::Result<()> {
        self.inner.set_poll_reference(id, poll_id, poll_message_id).await
    }

    async fn apply_resolution(
        &self,
        event: &Event,
        option: usize,
        deltas: &[ScoreDelta],
        at: DateTime<Utc>,
    ) -> anyhow::Result<bool> {
        if self.fail_resolutions.load(Ordering::SeqCst) {
            bail!("connection reset while resolving event {}", event.id);
        }
        self.inner.apply_resolution(event, option, deltas, at).await
    }

    async fn active_events(&self, group: Option<GroupId>) -> anyhow::Result<Vec<Event>> {
        self.inner.active_events(group).await
    }

    async fn count_events_created(&self, user: UserId, group: GroupId) -> anyhow::Result<u64> {
        self.inner.count_events_created(user, group).await
    }
}

#[async_trait]
impl PredictionRepository for FaultyStore {
    async fn upsert_prediction(&self, prediction: Prediction) -> anyhow::Result<()> {
        self.inner.upsert_prediction(prediction).await
    }

    async fn delete_prediction(&self, event: EventId, user: UserId) -> anyhow::Result<bool> {
        self.inner.delete_prediction(event, user).await
    }

    async fn predictions_for_event(&self, event: EventId) -> anyhow::Result<Vec<Prediction>> {
        self.inner.predictions_for_event(event).await
    }

    async fn count_predictions_for_event(&self, event: EventId) -> anyhow::Result<u64> {
        self.inner.count_predictions_for_event(event).await
    }

    async fn count_user_predictions(
        &self,
        user: UserId,
        group: Option<GroupId>,
    ) -> anyhow::Result<u64> {
        self.inner.count_user_predictions(user, group).await
    }

    async fn correct_counts_since(
        &self,
        group: GroupId,
        since: DateTime<Utc>,
    ) -> anyhow::Result<Vec<(UserId, u64)>> {
        self.inner.correct_counts_since(group, since).await
    }
}

#[async_trait]
impl RatingRepository for FaultyStore {
    async fn rating(&self, user: UserId, group: GroupId) -> anyhow::Result<Option<Rating>> {
        self.inner.rating(user, group).await
    }

    async fn top_ratings(&self, group: GroupId, limit: usize) -> anyhow::Result<Vec<Rating>> {
        self.inner.top_ratings(group, limit).await
    }

    async fn rank(&self, user: UserId, group: GroupId) -> anyhow::Result<Option<usize>> {
        self.inner.rank(user, group).await
    }
}

#[async_trait]
impl AchievementRepository for FaultyStore {
    async fn achievements(&self, user: UserId, group: GroupId) -> anyhow::Result<Vec<Achievement>> {
        self.inner.achievements(user, group).await
    }

    async fn award(&self, achievement: &Achievement) -> anyhow::Result<bool> {
        self.inner.award(achievement).await
    }
}

#[async_trait]
impl GroupRepository for FaultyStore {
    async fn group(&self, id: GroupId) -> anyhow::Result<Option<Group>> {
        self.inner.group(id).await
    }

    async fn group_by_chat(&self, chat: ChatId) -> anyhow::Result<Option<Group>> {
        self.inner.group_by_chat(chat).await
    }

    async fn all_groups(&self) -> anyhow::Result<Vec<Group>> {
        self.inner.all_groups().await
    }

    async fn insert_group(&self, group: NewGroup, created_at: DateTime<Utc>) -> anyhow::Result<Group> {
        self.inner.insert_group(group, created_at).await
    }

    async fn topics(&self, group: GroupId) -> anyhow::Result<Vec<ForumTopic>> {
        self.inner.topics(group).await
    }

    async fn add_topic(&self, topic: ForumTopic) -> anyhow::Result<bool> {
        self.inner.add_topic(topic).await
    }

    async fn add_member(&self, user: UserId, group: GroupId) -> anyhow::Result<()> {
        self.inner.add_member(user, group).await
    }

    async fn groups_for_user(&self, user: UserId) -> anyhow::Result<Vec<Group>> {
        self.inner.groups_for_user(user).await
    }
}

pub fn message(user: UserId, chat: ChatId, message_id: MessageId, text: &str) -> Update {
    Update::Message(IncomingMessage {
        message_id,
        chat_id: chat,
        thread_id: None,
        user_id: user,
        display_name: Some(format!("user{user}")),
        text: text.to_string(),
    })
}

pub fn callback(user: UserId, chat: ChatId, data: &str) -> Update {
    Update::Callback(CallbackQuery {
        id: format!("cb-{user}-{data}"),
        chat_id: chat,
        message_id: None,
        user_id: user,
        display_name: Some(format!("user{user}")),
        data: data.to_string(),
    })
}

pub fn poll_answer(poll_id: &str, user: UserId, options: &[usize]) -> Update {
    Update::PollAnswer(PollAnswer {
        poll_id: poll_id.to_string(),
        user_id: user,
        display_name: Some(format!("user{user}")),
        option_ids: options.to_vec(),
    })
}

/// Fixed start of time for every harness.
pub fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0)
        .single()
        .unwrap_or_default()
}

pub const ADMIN: UserId = 1;

/// A bot over a memory store, a recording transport and a manual clock.
pub struct Harness {
    pub store: Arc<MemoryStore>,
    /// The storage the bot actually uses; wraps `store`.
    pub faults: Arc<FaultyStore>,
    pub transport: RecordingTransport,
    pub clock: Arc<ManualClock>,
    pub services: Services,
    pub bot: Bot,
    next_message_id: AtomicI32,
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

impl Harness {
    /// [`ADMIN`] is the only admin; everything else uses defaults.
    pub fn new() -> Self {
        Self::with_config(ForecastConfig {
            admin_ids: vec![ADMIN],
            ..ForecastConfig::default()
        })
    }

    pub fn with_config(config: ForecastConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        let faults = Arc::new(FaultyStore::new(store.clone()));
        let transport = RecordingTransport::new();
        let clock = Arc::new(ManualClock::new(epoch()));
        let services = Services::new(
            faults.clone(),
            Arc::new(transport.clone()),
            Arc::new(AdminList::new(config.admin_ids.clone())),
            clock.clone(),
            config,
        );
        let bot = Bot::new(services.clone());
        Self {
            store,
            faults,
            transport,
            clock,
            services,
            bot,
            next_message_id: AtomicI32::new(1),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub async fn send(&self, update: Update) -> ForecastResult<()> {
        self.bot.handle(update).await
    }

    /// A text message with a fresh message id.
    pub async fn say(&self, user: UserId, chat: ChatId, text: &str) -> ForecastResult<()> {
        let id = self.next_message_id.fetch_add(1, Ordering::Relaxed);
        self.send(message(user, chat, id, text)).await
    }

    /// A private-chat message, where the chat id is the user id.
    pub async fn dm(&self, user: UserId, text: &str) -> ForecastResult<()> {
        self.say(user, user, text).await
    }

    pub async fn press(&self, user: UserId, chat: ChatId, data: &str) -> ForecastResult<()> {
        self.send(callback(user, chat, data)).await
    }

    pub async fn vote(&self, poll_id: &str, user: UserId, option: usize) -> ForecastResult<()> {
        self.send(poll_answer(poll_id, user, &[option])).await
    }

    pub async fn session(&self, user: UserId) -> Option<SessionRecord> {
        self.store.load_session(user).await.ok().flatten()
    }

    pub async fn group(&self, chat: ChatId, name: &str) -> Group {
        self.store
            .insert_group(
                NewGroup {
                    chat_id: chat,
                    name: name.to_string(),
                    is_forum: false,
                },
                self.now(),
            )
            .await
            .expect("insert group")
    }

    pub async fn join(&self, user: UserId, group: GroupId) {
        self.store
            .add_member(user, group)
            .await
            .expect("add member");
    }

    /// Create and publish an event the way the creation flow does.
    pub async fn event(
        &self,
        group: GroupId,
        creator: UserId,
        event_type: EventType,
        options: &[&str],
        deadline: DateTime<Utc>,
    ) -> Event {
        let events = self.services.events();
        let event = events
            .create_event(NewEvent {
                group_id: group,
                forum_topic_id: None,
                question: format!("Question by {creator}?"),
                event_type,
                options: options.iter().map(|o| o.to_string()).collect(),
                deadline,
                created_by: creator,
            })
            .await
            .expect("create event");
        events.publish(&event).await.expect("publish event")
    }
}
