//! Persistence contracts.
//!
//! Repository traits are policy-light: they store and query rows and keep the
//! few multi-row writes that must be atomic (session upsert with conflict
//! check, resolving an event together with its score deltas, awarding an
//! achievement) as single calls so an implementation can wrap each in one
//! transaction.
//!
//! Lookups return `Option` so "not found" stays distinct from a zero value.

pub mod memory;

use crate::achievements::Achievement;
use crate::model::{
    ChatId, Event, EventId, ForumTopic, Group, GroupId, MessageId, NewEvent, NewGroup, Prediction,
    Rating, ScoreDelta, UserId,
};
use crate::session::{SaveMode, SaveOutcome, SessionRecord};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub use memory::MemoryStore;

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn load_session(&self, owner: UserId) -> Result<Option<SessionRecord>>;

    /// Upsert unless a live session blocks the write under `mode`.
    ///
    /// On update the existing `created_at` is kept.
    async fn save_session(
        &self,
        record: SessionRecord,
        mode: SaveMode,
        now: DateTime<Utc>,
    ) -> Result<SaveOutcome>;

    /// Idempotent. Returns whether a row was removed.
    async fn delete_session(&self, owner: UserId) -> Result<bool>;
}

#[async_trait]
pub trait EventRepository: Send + Sync {
    async fn insert_event(&self, event: NewEvent, created_at: DateTime<Utc>) -> Result<Event>;

    async fn event(&self, id: EventId) -> Result<Option<Event>>;

    async fn event_by_poll(&self, poll_id: &str) -> Result<Option<Event>>;

    /// Overwrite question, options and deadline.
    async fn update_event(&self, event: &Event) -> Result<()>;

    async fn set_poll_reference(
        &self,
        id: EventId,
        poll_id: &str,
        poll_message_id: MessageId,
    ) -> Result<()>;

    /// Transition `active -> resolved` and apply the score deltas of the
    /// resolution as one write.
    ///
    /// Returns `false`, with nothing written, when the event was not active.
    async fn apply_resolution(
        &self,
        event: &Event,
        option: usize,
        deltas: &[ScoreDelta],
        at: DateTime<Utc>,
    ) -> Result<bool>;

    /// Active events, oldest deadline first; all groups when `group` is `None`.
    async fn active_events(&self, group: Option<GroupId>) -> Result<Vec<Event>>;

    async fn count_events_created(&self, user: UserId, group: GroupId) -> Result<u64>;
}

#[async_trait]
pub trait PredictionRepository: Send + Sync {
    /// Insert or overwrite the vote of `(event_id, user_id)`.
    async fn upsert_prediction(&self, prediction: Prediction) -> Result<()>;

    async fn delete_prediction(&self, event: EventId, user: UserId) -> Result<bool>;

    /// Snapshot of every vote on an event, ordered by `recorded_at`.
    async fn predictions_for_event(&self, event: EventId) -> Result<Vec<Prediction>>;

    async fn count_predictions_for_event(&self, event: EventId) -> Result<u64>;

    /// Votes cast by a user; across all groups when `group` is `None`.
    async fn count_user_predictions(&self, user: UserId, group: Option<GroupId>) -> Result<u64>;

    /// Correct predictions per user on events of `group` resolved at or after `since`.
    async fn correct_counts_since(
        &self,
        group: GroupId,
        since: DateTime<Utc>,
    ) -> Result<Vec<(UserId, u64)>>;
}

#[async_trait]
pub trait RatingRepository: Send + Sync {
    async fn rating(&self, user: UserId, group: GroupId) -> Result<Option<Rating>>;

    /// Highest scores first; ties by correct count, then user id.
    async fn top_ratings(&self, group: GroupId, limit: usize) -> Result<Vec<Rating>>;

    /// 1-based position in the `top_ratings` order, `None` without a rating.
    async fn rank(&self, user: UserId, group: GroupId) -> Result<Option<usize>>;
}

#[async_trait]
pub trait AchievementRepository: Send + Sync {
    async fn achievements(&self, user: UserId, group: GroupId) -> Result<Vec<Achievement>>;

    /// Insert if absent. Returns `true` only when the row is new.
    async fn award(&self, achievement: &Achievement) -> Result<bool>;
}

#[async_trait]
pub trait GroupRepository: Send + Sync {
    async fn group(&self, id: GroupId) -> Result<Option<Group>>;

    async fn group_by_chat(&self, chat: ChatId) -> Result<Option<Group>>;

    async fn all_groups(&self) -> Result<Vec<Group>>;

    async fn insert_group(&self, group: NewGroup, created_at: DateTime<Utc>) -> Result<Group>;

    async fn topics(&self, group: GroupId) -> Result<Vec<ForumTopic>>;

    /// Returns `false` when the topic was already registered.
    async fn add_topic(&self, topic: ForumTopic) -> Result<bool>;

    async fn add_member(&self, user: UserId, group: GroupId) -> Result<()>;

    async fn groups_for_user(&self, user: UserId) -> Result<Vec<Group>>;
}

/// Everything the core persists.
pub trait Storage:
    SessionStore
    + EventRepository
    + PredictionRepository
    + RatingRepository
    + AchievementRepository
    + GroupRepository
    + 'static
{
}

impl<T> Storage for T where
    T: SessionStore
        + EventRepository
        + PredictionRepository
        + RatingRepository
        + AchievementRepository
        + GroupRepository
        + 'static
{
}
