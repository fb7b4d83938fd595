//! In-process storage backed by concurrent maps.
//!
//! Suitable for a single bot instance and for tests. Multi-row writes that the
//! Postgres store runs in a transaction are serialized here behind one lock.

use super::{
    AchievementRepository, EventRepository, GroupRepository, PredictionRepository,
    RatingRepository, SessionStore,
};
use crate::achievements::{Achievement, AchievementCode};
use crate::model::{
    ChatId, Event, EventId, EventStatus, ForumTopic, Group, GroupId, MessageId, NewEvent, NewGroup,
    Prediction, Rating, ScoreDelta, ThreadId, UserId,
};
use crate::session::{SaveMode, SaveOutcome, SessionRecord};
use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;

#[derive(Debug)]
pub struct MemoryStore {
    sessions: DashMap<UserId, SessionRecord>,
    events: DashMap<EventId, Event>,
    next_event_id: AtomicI64,
    predictions: DashMap<(EventId, UserId), Prediction>,
    ratings: DashMap<(GroupId, UserId), Rating>,
    achievements: DashMap<(UserId, GroupId, AchievementCode), Achievement>,
    groups: DashMap<GroupId, Group>,
    next_group_id: AtomicI64,
    topics: DashMap<(GroupId, ThreadId), ForumTopic>,
    members: DashSet<(UserId, GroupId)>,
    write_lock: Mutex<()>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self {
            sessions: DashMap::new(),
            events: DashMap::new(),
            next_event_id: AtomicI64::new(1),
            predictions: DashMap::new(),
            ratings: DashMap::new(),
            achievements: DashMap::new(),
            groups: DashMap::new(),
            next_group_id: AtomicI64::new(1),
            topics: DashMap::new(),
            members: DashSet::new(),
            write_lock: Mutex::new(()),
        }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn leaderboard(&self, group: GroupId) -> Vec<Rating> {
        let mut ratings: Vec<Rating> = self
            .ratings
            .iter()
            .filter(|r| r.group_id == group)
            .map(|r| r.value().clone())
            .collect();
        ratings.sort_by(|a, b| {
            b.score
                .cmp(&a.score)
                .then(b.correct_count.cmp(&a.correct_count))
                .then(a.user_id.cmp(&b.user_id))
        });
        ratings
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn load_session(&self, owner: UserId) -> Result<Option<SessionRecord>> {
        Ok(self.sessions.get(&owner).map(|r| r.value().clone()))
    }

    async fn save_session(
        &self,
        mut record: SessionRecord,
        mode: SaveMode,
        now: DateTime<Utc>,
    ) -> Result<SaveOutcome> {
        match self.sessions.entry(record.owner_id) {
            Entry::Occupied(mut existing) => {
                if !existing.get().admits(&record, mode, now) {
                    return Ok(SaveOutcome::Conflict {
                        existing_state: existing.get().state_name.clone(),
                    });
                }
                if mode == SaveMode::Update && !existing.get().is_expired(now) {
                    record.created_at = existing.get().created_at;
                }
                existing.insert(record);
            }
            Entry::Vacant(slot) => {
                slot.insert(record);
            }
        }
        Ok(SaveOutcome::Saved)
    }

    async fn delete_session(&self, owner: UserId) -> Result<bool> {
        Ok(self.sessions.remove(&owner).is_some())
    }
}

#[async_trait]
impl EventRepository for MemoryStore {
    async fn insert_event(&self, event: NewEvent, created_at: DateTime<Utc>) -> Result<Event> {
        let id = self.next_event_id.fetch_add(1, Ordering::SeqCst);
        let event = Event {
            id,
            group_id: event.group_id,
            forum_topic_id: event.forum_topic_id,
            question: event.question,
            event_type: event.event_type,
            options: event.options,
            deadline: event.deadline,
            status: EventStatus::Active,
            created_by: event.created_by,
            created_at,
            poll_id: None,
            poll_message_id: None,
            resolved_option: None,
            resolved_at: None,
        };
        self.events.insert(id, event.clone());
        Ok(event)
    }

    async fn event(&self, id: EventId) -> Result<Option<Event>> {
        Ok(self.events.get(&id).map(|e| e.value().clone()))
    }

    async fn event_by_poll(&self, poll_id: &str) -> Result<Option<Event>> {
        Ok(self
            .events
            .iter()
            .find(|e| e.poll_id.as_deref() == Some(poll_id))
            .map(|e| e.value().clone()))
    }

    async fn update_event(&self, event: &Event) -> Result<()> {
        let Some(mut stored) = self.events.get_mut(&event.id) else {
            bail!("event {} does not exist", event.id);
        };
        stored.question = event.question.clone();
        stored.options = event.options.clone();
        stored.deadline = event.deadline;
        Ok(())
    }

    async fn set_poll_reference(
        &self,
        id: EventId,
        poll_id: &str,
        poll_message_id: MessageId,
    ) -> Result<()> {
        let Some(mut stored) = self.events.get_mut(&id) else {
            bail!("event {id} does not exist");
        };
        stored.poll_id = Some(poll_id.to_string());
        stored.poll_message_id = Some(poll_message_id);
        Ok(())
    }

    async fn apply_resolution(
        &self,
        event: &Event,
        option: usize,
        deltas: &[ScoreDelta],
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let _guard = self.write_lock.lock().unwrap_or_else(|p| p.into_inner());
        let Some(mut stored) = self.events.get_mut(&event.id) else {
            return Ok(false);
        };
        if stored.status != EventStatus::Active {
            return Ok(false);
        }
        let group = stored.group_id;
        for delta in deltas {
            self.ratings
                .entry((group, delta.user_id))
                .or_insert_with(|| Rating::new(delta.user_id, group, at))
                .apply(delta, at);
        }
        stored.status = EventStatus::Resolved;
        stored.resolved_option = Some(option);
        stored.resolved_at = Some(at);
        Ok(true)
    }

    async fn active_events(&self, group: Option<GroupId>) -> Result<Vec<Event>> {
        let mut events: Vec<Event> = self
            .events
            .iter()
            .filter(|e| e.is_active() && group.map_or(true, |g| e.group_id == g))
            .map(|e| e.value().clone())
            .collect();
        events.sort_by(|a, b| a.deadline.cmp(&b.deadline).then(a.id.cmp(&b.id)));
        Ok(events)
    }

    async fn count_events_created(&self, user: UserId, group: GroupId) -> Result<u64> {
        Ok(self
            .events
            .iter()
            .filter(|e| e.created_by == user && e.group_id == group)
            .count() as u64)
    }
}

#[async_trait]
impl PredictionRepository for MemoryStore {
    async fn upsert_prediction(&self, prediction: Prediction) -> Result<()> {
        self.predictions
            .insert((prediction.event_id, prediction.user_id), prediction);
        Ok(())
    }

    async fn delete_prediction(&self, event: EventId, user: UserId) -> Result<bool> {
        Ok(self.predictions.remove(&(event, user)).is_some())
    }

    async fn predictions_for_event(&self, event: EventId) -> Result<Vec<Prediction>> {
        let mut predictions: Vec<Prediction> = self
            .predictions
            .iter()
            .filter(|p| p.event_id == event)
            .map(|p| p.value().clone())
            .collect();
        predictions.sort_by(|a, b| {
            a.recorded_at
                .cmp(&b.recorded_at)
                .then(a.user_id.cmp(&b.user_id))
        });
        Ok(predictions)
    }

    async fn count_predictions_for_event(&self, event: EventId) -> Result<u64> {
        Ok(self.predictions.iter().filter(|p| p.event_id == event).count() as u64)
    }

    async fn count_user_predictions(&self, user: UserId, group: Option<GroupId>) -> Result<u64> {
        let event_ids: Vec<EventId> = self
            .predictions
            .iter()
            .filter(|p| p.user_id == user)
            .map(|p| p.event_id)
            .collect();
        let Some(group) = group else {
            return Ok(event_ids.len() as u64);
        };
        Ok(event_ids
            .iter()
            .filter(|id| self.events.get(id).is_some_and(|e| e.group_id == group))
            .count() as u64)
    }

    async fn correct_counts_since(
        &self,
        group: GroupId,
        since: DateTime<Utc>,
    ) -> Result<Vec<(UserId, u64)>> {
        let answers: HashMap<EventId, usize> = self
            .events
            .iter()
            .filter(|e| e.group_id == group && e.resolved_at.is_some_and(|at| at >= since))
            .filter_map(|e| e.resolved_option.map(|option| (e.id, option)))
            .collect();

        let mut counts: HashMap<UserId, u64> = HashMap::new();
        for prediction in self.predictions.iter() {
            if answers.get(&prediction.event_id) == Some(&prediction.option_index) {
                *counts.entry(prediction.user_id).or_default() += 1;
            }
        }
        let mut counts: Vec<(UserId, u64)> = counts.into_iter().collect();
        counts.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        Ok(counts)
    }
}

#[async_trait]
impl RatingRepository for MemoryStore {
    async fn rating(&self, user: UserId, group: GroupId) -> Result<Option<Rating>> {
        Ok(self.ratings.get(&(group, user)).map(|r| r.value().clone()))
    }

    async fn top_ratings(&self, group: GroupId, limit: usize) -> Result<Vec<Rating>> {
        let mut ratings = self.leaderboard(group);
        ratings.truncate(limit);
        Ok(ratings)
    }

    async fn rank(&self, user: UserId, group: GroupId) -> Result<Option<usize>> {
        Ok(self
            .leaderboard(group)
            .iter()
            .position(|r| r.user_id == user)
            .map(|index| index + 1))
    }
}

#[async_trait]
impl AchievementRepository for MemoryStore {
    async fn achievements(&self, user: UserId, group: GroupId) -> Result<Vec<Achievement>> {
        let mut earned: Vec<Achievement> = self
            .achievements
            .iter()
            .filter(|a| a.user_id == user && a.group_id == group)
            .map(|a| a.value().clone())
            .collect();
        earned.sort_by(|a, b| a.earned_at.cmp(&b.earned_at).then(a.code.cmp(&b.code)));
        Ok(earned)
    }

    async fn award(&self, achievement: &Achievement) -> Result<bool> {
        match self
            .achievements
            .entry((achievement.user_id, achievement.group_id, achievement.code))
        {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(achievement.clone());
                Ok(true)
            }
        }
    }
}

#[async_trait]
impl GroupRepository for MemoryStore {
    async fn group(&self, id: GroupId) -> Result<Option<Group>> {
        Ok(self.groups.get(&id).map(|g| g.value().clone()))
    }

    async fn group_by_chat(&self, chat: ChatId) -> Result<Option<Group>> {
        Ok(self
            .groups
            .iter()
            .find(|g| g.chat_id == chat)
            .map(|g| g.value().clone()))
    }

    async fn all_groups(&self) -> Result<Vec<Group>> {
        let mut groups: Vec<Group> = self.groups.iter().map(|g| g.value().clone()).collect();
        groups.sort_by_key(|g| g.id);
        Ok(groups)
    }

    async fn insert_group(&self, group: NewGroup, created_at: DateTime<Utc>) -> Result<Group> {
        let _guard = self.write_lock.lock().unwrap_or_else(|p| p.into_inner());
        if self.groups.iter().any(|g| g.chat_id == group.chat_id) {
            bail!("chat {} is already registered", group.chat_id);
        }
        let id = self.next_group_id.fetch_add(1, Ordering::SeqCst);
        let group = Group {
            id,
            chat_id: group.chat_id,
            name: group.name,
            is_forum: group.is_forum,
            created_at,
        };
        self.groups.insert(id, group.clone());
        Ok(group)
    }

    async fn topics(&self, group: GroupId) -> Result<Vec<ForumTopic>> {
        let mut topics: Vec<ForumTopic> = self
            .topics
            .iter()
            .filter(|t| t.group_id == group)
            .map(|t| t.value().clone())
            .collect();
        topics.sort_by_key(|t| t.thread_id);
        Ok(topics)
    }

    async fn add_topic(&self, topic: ForumTopic) -> Result<bool> {
        match self.topics.entry((topic.group_id, topic.thread_id)) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(topic);
                Ok(true)
            }
        }
    }

    async fn add_member(&self, user: UserId, group: GroupId) -> Result<()> {
        self.members.insert((user, group));
        Ok(())
    }

    async fn groups_for_user(&self, user: UserId) -> Result<Vec<Group>> {
        let ids: Vec<GroupId> = self
            .members
            .iter()
            .filter(|m| m.0 == user)
            .map(|m| m.1)
            .collect();
        let mut groups: Vec<Group> = ids
            .into_iter()
            .filter_map(|id| self.groups.get(&id).map(|g| g.value().clone()))
            .collect();
        groups.sort_by_key(|g| g.id);
        Ok(groups)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DeltaBreakdown, EventType};
    use chrono::Duration;
    use serde_json::json;

    fn record(owner: UserId, state: &str, now: DateTime<Utc>) -> SessionRecord {
        SessionRecord {
            owner_id: owner,
            state_name: state.into(),
            context: json!({ "chat_id": owner }),
            created_at: now,
            updated_at: now,
            expires_at: now + Duration::minutes(30),
        }
    }

    #[tokio::test]
    async fn save_rejects_other_flow_until_expiry() {
        let store = MemoryStore::new();
        let now = Utc::now();
        store
            .save_session(record(1, "event_creation:ask_question", now), SaveMode::Create, now)
            .await
            .unwrap();

        let outcome = store
            .save_session(record(1, "group_creation:ask_name", now), SaveMode::Update, now)
            .await
            .unwrap();
        assert_eq!(
            outcome,
            SaveOutcome::Conflict {
                existing_state: "event_creation:ask_question".into()
            }
        );

        let later = now + Duration::minutes(31);
        let outcome = store
            .save_session(record(1, "group_creation:ask_name", later), SaveMode::Create, later)
            .await
            .unwrap();
        assert_eq!(outcome, SaveOutcome::Saved);
    }

    #[tokio::test]
    async fn update_keeps_created_at() {
        let store = MemoryStore::new();
        let now = Utc::now();
        store
            .save_session(record(1, "event_creation:ask_question", now), SaveMode::Create, now)
            .await
            .unwrap();
        let later = now + Duration::minutes(2);
        store
            .save_session(record(1, "event_creation:ask_event_type", later), SaveMode::Update, later)
            .await
            .unwrap();
        let stored = store.load_session(1).await.unwrap().unwrap();
        assert_eq!(stored.created_at, now);
        assert_eq!(stored.state_name, "event_creation:ask_event_type");
        assert!(store.delete_session(1).await.unwrap());
        assert!(!store.delete_session(1).await.unwrap());
    }

    fn delta(user_id: UserId, delta: i64, correct: bool) -> ScoreDelta {
        ScoreDelta {
            user_id,
            display_name: None,
            correct,
            delta,
            breakdown: DeltaBreakdown::default(),
        }
    }

    async fn binary_event(store: &MemoryStore, group_id: GroupId, now: DateTime<Utc>) -> Event {
        store
            .insert_event(
                NewEvent {
                    group_id,
                    forum_topic_id: None,
                    question: "q".into(),
                    event_type: EventType::Binary,
                    options: EventType::Binary.fixed_options().unwrap_or_default(),
                    deadline: now + Duration::days(1),
                    created_by: 5,
                },
                now,
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn resolution_is_applied_once() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let event = binary_event(&store, 7, now).await;

        assert!(store
            .apply_resolution(&event, 0, &[delta(1, 19, true)], now)
            .await
            .unwrap());
        assert!(!store
            .apply_resolution(&event, 1, &[delta(1, 19, true), delta(2, 5, true)], now)
            .await
            .unwrap());

        let stored = store.event(event.id).await.unwrap().unwrap();
        assert_eq!(stored.resolved_option, Some(0));
        assert!(store.active_events(None).await.unwrap().is_empty());
        assert_eq!(store.rating(1, 7).await.unwrap().unwrap().score, 19);
        assert!(store.rating(2, 7).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn leaderboard_breaks_ties_deterministically() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let event = binary_event(&store, 7, now).await;
        store
            .apply_resolution(
                &event,
                0,
                &[delta(3, 10, true), delta(1, 10, true), delta(2, 12, true), delta(4, -3, false)],
                now,
            )
            .await
            .unwrap();

        let top: Vec<UserId> = store
            .top_ratings(7, 3)
            .await
            .unwrap()
            .iter()
            .map(|r| r.user_id)
            .collect();
        assert_eq!(top, vec![2, 1, 3]);
        assert_eq!(store.top_ratings(7, usize::MAX).await.unwrap().len(), 4);
        assert!(store.top_ratings(8, 3).await.unwrap().is_empty());

        assert_eq!(store.rank(3, 7).await.unwrap(), Some(3));
        assert_eq!(store.rank(4, 7).await.unwrap(), Some(4));
        assert_eq!(store.rank(4, 8).await.unwrap(), None);
    }
}
