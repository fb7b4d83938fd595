//! PostgreSQL implementation of the forecast store.
//!
//! This crate provides a PostgreSQL implementation of every repository trait
//! of `forecast-core`, so a `PgStore` can be handed to `Services` as its
//! `Storage`.
//!
//! # Features
//!
//! - Session upsert that refuses to overwrite a live session of another flow
//! - An event's resolution and its score deltas written in a single transaction
//! - Leaderboard rank computed in SQL
//! - Idempotent achievement awards and memberships (`ON CONFLICT DO NOTHING`)
//!
//! # Database Schema
//!
//! ```sql
//! CREATE TABLE groups (
//!     id BIGSERIAL PRIMARY KEY,
//!     chat_id BIGINT NOT NULL UNIQUE,
//!     name TEXT NOT NULL,
//!     is_forum BOOLEAN NOT NULL DEFAULT FALSE,
//!     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
//! );
//!
//! CREATE TABLE forum_topics (
//!     group_id BIGINT NOT NULL REFERENCES groups (id),
//!     thread_id INTEGER NOT NULL,
//!     name TEXT,
//!     PRIMARY KEY (group_id, thread_id)
//! );
//!
//! CREATE TABLE group_members (
//!     user_id BIGINT NOT NULL,
//!     group_id BIGINT NOT NULL REFERENCES groups (id),
//!     PRIMARY KEY (user_id, group_id)
//! );
//!
//! CREATE TABLE events (
//!     id BIGSERIAL PRIMARY KEY,
//!     group_id BIGINT NOT NULL REFERENCES groups (id),
//!     forum_topic_id INTEGER,
//!     question TEXT NOT NULL,
//!     event_type TEXT NOT NULL,
//!     options JSONB NOT NULL,
//!     deadline TIMESTAMPTZ NOT NULL,
//!     status TEXT NOT NULL DEFAULT 'active',
//!     created_by BIGINT NOT NULL,
//!     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
//!
//!     -- Published poll
//!     poll_id TEXT UNIQUE,
//!     poll_message_id INTEGER,
//!
//!     -- Resolution
//!     resolved_option INTEGER,
//!     resolved_at TIMESTAMPTZ
//! );
//!
//! CREATE INDEX idx_events_active ON events (group_id, deadline) WHERE status = 'active';
//!
//! CREATE TABLE predictions (
//!     event_id BIGINT NOT NULL REFERENCES events (id),
//!     user_id BIGINT NOT NULL,
//!     option_index INTEGER NOT NULL,
//!     display_name TEXT,
//!     recorded_at TIMESTAMPTZ NOT NULL,
//!     PRIMARY KEY (event_id, user_id)
//! );
//!
//! CREATE INDEX idx_predictions_user ON predictions (user_id);
//!
//! CREATE TABLE ratings (
//!     group_id BIGINT NOT NULL REFERENCES groups (id),
//!     user_id BIGINT NOT NULL,
//!     score BIGINT NOT NULL DEFAULT 0,
//!     correct_count INTEGER NOT NULL DEFAULT 0,
//!     wrong_count INTEGER NOT NULL DEFAULT 0,
//!     current_streak INTEGER NOT NULL DEFAULT 0,
//!     best_streak INTEGER NOT NULL DEFAULT 0,
//!     display_name TEXT,
//!     updated_at TIMESTAMPTZ NOT NULL,
//!     PRIMARY KEY (group_id, user_id)
//! );
//!
//! CREATE TABLE achievements (
//!     user_id BIGINT NOT NULL,
//!     group_id BIGINT NOT NULL REFERENCES groups (id),
//!     code TEXT NOT NULL,
//!     earned_at TIMESTAMPTZ NOT NULL,
//!     PRIMARY KEY (user_id, group_id, code)
//! );
//!
//! CREATE TABLE sessions (
//!     owner_id BIGINT PRIMARY KEY,
//!     state_name TEXT NOT NULL,
//!     context JSONB NOT NULL,
//!     created_at TIMESTAMPTZ NOT NULL,
//!     updated_at TIMESTAMPTZ NOT NULL,
//!     expires_at TIMESTAMPTZ NOT NULL
//! );
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use forecast_postgres::PgStore;
//! use sqlx::PgPool;
//!
//! let pool = PgPool::connect("postgres://localhost/forecast").await?;
//! let services = Services::new(Arc::new(PgStore::new(pool)), transport, auth, clock, config);
//! ```

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use forecast_core::achievements::{Achievement, AchievementCode};
use forecast_core::model::{
    ChatId, Event, EventId, EventStatus, EventType, ForumTopic, Group, GroupId, MessageId,
    NewEvent, NewGroup, Options, Prediction, Rating, ScoreDelta, UserId,
};
use forecast_core::session::{SaveMode, SaveOutcome, SessionRecord};
use forecast_core::store::{
    AchievementRepository, EventRepository, GroupRepository, PredictionRepository,
    RatingRepository, SessionStore,
};
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use tracing::{debug, warn};

const EVENT_COLUMNS: &str = "id, group_id, forum_topic_id, question, event_type, options, \
     deadline, status, created_by, created_at, poll_id, poll_message_id, resolved_option, \
     resolved_at";

/// PostgreSQL store implementation.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn count(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

fn index(value: i32) -> Result<usize> {
    usize::try_from(value).map_err(|_| anyhow!("negative option index {value}"))
}

fn counter(value: i32) -> u32 {
    u32::try_from(value).unwrap_or(0)
}

fn session_from_row(row: &PgRow) -> Result<SessionRecord> {
    Ok(SessionRecord {
        owner_id: row.try_get("owner_id")?,
        state_name: row.try_get("state_name")?,
        context: row.try_get("context")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        expires_at: row.try_get("expires_at")?,
    })
}

fn event_from_row(row: &PgRow) -> Result<Event> {
    let event_type: String = row.try_get("event_type")?;
    let status: String = row.try_get("status")?;
    let Json(options): Json<Options> = row.try_get("options")?;
    let resolved_option: Option<i32> = row.try_get("resolved_option")?;
    Ok(Event {
        id: row.try_get("id")?,
        group_id: row.try_get("group_id")?,
        forum_topic_id: row.try_get("forum_topic_id")?,
        question: row.try_get("question")?,
        event_type: EventType::parse(&event_type)
            .ok_or_else(|| anyhow!("unknown event type {event_type:?}"))?,
        options,
        deadline: row.try_get("deadline")?,
        status: EventStatus::parse(&status)
            .ok_or_else(|| anyhow!("unknown event status {status:?}"))?,
        created_by: row.try_get("created_by")?,
        created_at: row.try_get("created_at")?,
        poll_id: row.try_get("poll_id")?,
        poll_message_id: row.try_get("poll_message_id")?,
        resolved_option: resolved_option.map(index).transpose()?,
        resolved_at: row.try_get("resolved_at")?,
    })
}

fn prediction_from_row(row: &PgRow) -> Result<Prediction> {
    Ok(Prediction {
        event_id: row.try_get("event_id")?,
        user_id: row.try_get("user_id")?,
        option_index: index(row.try_get("option_index")?)?,
        display_name: row.try_get("display_name")?,
        recorded_at: row.try_get("recorded_at")?,
    })
}

fn rating_from_row(row: &PgRow) -> Result<Rating> {
    Ok(Rating {
        user_id: row.try_get("user_id")?,
        group_id: row.try_get("group_id")?,
        score: row.try_get("score")?,
        correct_count: counter(row.try_get("correct_count")?),
        wrong_count: counter(row.try_get("wrong_count")?),
        current_streak: counter(row.try_get("current_streak")?),
        best_streak: counter(row.try_get("best_streak")?),
        display_name: row.try_get("display_name")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn group_from_row(row: &PgRow) -> Result<Group> {
    Ok(Group {
        id: row.try_get("id")?,
        chat_id: row.try_get("chat_id")?,
        name: row.try_get("name")?,
        is_forum: row.try_get("is_forum")?,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl SessionStore for PgStore {
    async fn load_session(&self, owner: UserId) -> Result<Option<SessionRecord>> {
        let row = sqlx::query(
            r#"
            SELECT owner_id, state_name, context, created_at, updated_at, expires_at
            FROM sessions
            WHERE owner_id = $1
            "#,
        )
        .bind(owner)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(session_from_row).transpose()
    }

    /// Conditional upsert.
    ///
    /// The existing row is replaced when it has expired, or in update mode when
    /// its state belongs to the same flow namespace. Otherwise nothing is
    /// written and the blocking state is returned.
    async fn save_session(
        &self,
        record: SessionRecord,
        mode: SaveMode,
        now: DateTime<Utc>,
    ) -> Result<SaveOutcome> {
        let result = sqlx::query(
            r#"
            INSERT INTO sessions (owner_id, state_name, context, created_at, updated_at, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (owner_id) DO UPDATE
            SET state_name = EXCLUDED.state_name,
                context = EXCLUDED.context,
                created_at = CASE
                    WHEN sessions.expires_at <= $7 THEN EXCLUDED.created_at
                    ELSE sessions.created_at
                END,
                updated_at = EXCLUDED.updated_at,
                expires_at = EXCLUDED.expires_at
            WHERE sessions.expires_at <= $7
               OR ($8 AND split_part(sessions.state_name, ':', 1)
                        = split_part(EXCLUDED.state_name, ':', 1))
            "#,
        )
        .bind(record.owner_id)
        .bind(&record.state_name)
        .bind(&record.context)
        .bind(record.created_at)
        .bind(record.updated_at)
        .bind(record.expires_at)
        .bind(now)
        .bind(mode == SaveMode::Update)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            return Ok(SaveOutcome::Saved);
        }

        let existing_state: Option<String> =
            sqlx::query_scalar("SELECT state_name FROM sessions WHERE owner_id = $1")
                .bind(record.owner_id)
                .fetch_optional(&self.pool)
                .await?;
        debug!(
            owner_id = record.owner_id,
            state = %record.state_name,
            "session write blocked"
        );
        Ok(SaveOutcome::Conflict {
            existing_state: existing_state.unwrap_or_default(),
        })
    }

    async fn delete_session(&self, owner: UserId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM sessions WHERE owner_id = $1")
            .bind(owner)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl EventRepository for PgStore {
    async fn insert_event(&self, event: NewEvent, created_at: DateTime<Utc>) -> Result<Event> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO events
                (group_id, forum_topic_id, question, event_type, options, deadline,
                 status, created_by, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, 'active', $7, $8)
            RETURNING {EVENT_COLUMNS}
            "#
        ))
        .bind(event.group_id)
        .bind(event.forum_topic_id)
        .bind(&event.question)
        .bind(event.event_type.as_str())
        .bind(Json(&event.options))
        .bind(event.deadline)
        .bind(event.created_by)
        .bind(created_at)
        .fetch_one(&self.pool)
        .await?;

        event_from_row(&row)
    }

    async fn event(&self, id: EventId) -> Result<Option<Event>> {
        let row = sqlx::query(&format!("SELECT {EVENT_COLUMNS} FROM events WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(event_from_row).transpose()
    }

    async fn event_by_poll(&self, poll_id: &str) -> Result<Option<Event>> {
        let row = sqlx::query(&format!("SELECT {EVENT_COLUMNS} FROM events WHERE poll_id = $1"))
            .bind(poll_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(event_from_row).transpose()
    }

    async fn update_event(&self, event: &Event) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE events
            SET question = $1,
                options = $2,
                deadline = $3
            WHERE id = $4
            "#,
        )
        .bind(&event.question)
        .bind(Json(&event.options))
        .bind(event.deadline)
        .bind(event.id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn set_poll_reference(
        &self,
        id: EventId,
        poll_id: &str,
        poll_message_id: MessageId,
    ) -> Result<()> {
        sqlx::query("UPDATE events SET poll_id = $1, poll_message_id = $2 WHERE id = $3")
            .bind(poll_id)
            .bind(poll_message_id)
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Flip the status and apply every delta in one transaction.
    ///
    /// A correct answer extends the streak; a wrong one resets it to zero.
    async fn apply_resolution(
        &self,
        event: &Event,
        option: usize,
        deltas: &[ScoreDelta],
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let resolved = sqlx::query(
            r#"
            UPDATE events
            SET status = 'resolved',
                resolved_option = $1,
                resolved_at = $2
            WHERE id = $3 AND status = 'active'
            "#,
        )
        .bind(i32::try_from(option)?)
        .bind(at)
        .bind(event.id)
        .execute(&mut *tx)
        .await?;

        if resolved.rows_affected() != 1 {
            tx.rollback().await?;
            debug!(event_id = event.id, "event was not active, nothing scored");
            return Ok(false);
        }

        for delta in deltas {
            sqlx::query(
                r#"
                INSERT INTO ratings
                    (group_id, user_id, score, correct_count, wrong_count,
                     current_streak, best_streak, display_name, updated_at)
                VALUES (
                    $1, $2, $3,
                    CASE WHEN $4 THEN 1 ELSE 0 END,
                    CASE WHEN $4 THEN 0 ELSE 1 END,
                    CASE WHEN $4 THEN 1 ELSE 0 END,
                    CASE WHEN $4 THEN 1 ELSE 0 END,
                    $5, $6
                )
                ON CONFLICT (group_id, user_id) DO UPDATE
                SET score = ratings.score + EXCLUDED.score,
                    correct_count = ratings.correct_count + EXCLUDED.correct_count,
                    wrong_count = ratings.wrong_count + EXCLUDED.wrong_count,
                    current_streak = CASE WHEN $4 THEN ratings.current_streak + 1 ELSE 0 END,
                    best_streak = GREATEST(
                        ratings.best_streak,
                        CASE WHEN $4 THEN ratings.current_streak + 1 ELSE 0 END
                    ),
                    display_name = COALESCE(EXCLUDED.display_name, ratings.display_name),
                    updated_at = EXCLUDED.updated_at
                "#,
            )
            .bind(event.group_id)
            .bind(delta.user_id)
            .bind(delta.delta)
            .bind(delta.correct)
            .bind(&delta.display_name)
            .bind(at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(true)
    }

    async fn active_events(&self, group: Option<GroupId>) -> Result<Vec<Event>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {EVENT_COLUMNS}
            FROM events
            WHERE status = 'active'
              AND ($1::BIGINT IS NULL OR group_id = $1)
            ORDER BY deadline ASC, id ASC
            "#
        ))
        .bind(group)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(event_from_row).collect()
    }

    async fn count_events_created(&self, user: UserId, group: GroupId) -> Result<u64> {
        let created: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM events WHERE created_by = $1 AND group_id = $2")
                .bind(user)
                .bind(group)
                .fetch_one(&self.pool)
                .await?;

        Ok(count(created))
    }
}

#[async_trait]
impl PredictionRepository for PgStore {
    async fn upsert_prediction(&self, prediction: Prediction) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO predictions (event_id, user_id, option_index, display_name, recorded_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (event_id, user_id) DO UPDATE
            SET option_index = EXCLUDED.option_index,
                display_name = COALESCE(EXCLUDED.display_name, predictions.display_name),
                recorded_at = EXCLUDED.recorded_at
            "#,
        )
        .bind(prediction.event_id)
        .bind(prediction.user_id)
        .bind(i32::try_from(prediction.option_index)?)
        .bind(&prediction.display_name)
        .bind(prediction.recorded_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete_prediction(&self, event: EventId, user: UserId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM predictions WHERE event_id = $1 AND user_id = $2")
            .bind(event)
            .bind(user)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn predictions_for_event(&self, event: EventId) -> Result<Vec<Prediction>> {
        let rows = sqlx::query(
            r#"
            SELECT event_id, user_id, option_index, display_name, recorded_at
            FROM predictions
            WHERE event_id = $1
            ORDER BY recorded_at ASC, user_id ASC
            "#,
        )
        .bind(event)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(prediction_from_row).collect()
    }

    async fn count_predictions_for_event(&self, event: EventId) -> Result<u64> {
        let votes: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM predictions WHERE event_id = $1")
            .bind(event)
            .fetch_one(&self.pool)
            .await?;

        Ok(count(votes))
    }

    async fn count_user_predictions(&self, user: UserId, group: Option<GroupId>) -> Result<u64> {
        let votes: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM predictions p
            JOIN events e ON e.id = p.event_id
            WHERE p.user_id = $1
              AND ($2::BIGINT IS NULL OR e.group_id = $2)
            "#,
        )
        .bind(user)
        .bind(group)
        .fetch_one(&self.pool)
        .await?;

        Ok(count(votes))
    }

    async fn correct_counts_since(
        &self,
        group: GroupId,
        since: DateTime<Utc>,
    ) -> Result<Vec<(UserId, u64)>> {
        let rows = sqlx::query(
            r#"
            SELECT p.user_id, COUNT(*) AS correct
            FROM predictions p
            JOIN events e ON e.id = p.event_id
            WHERE e.group_id = $1
              AND e.status = 'resolved'
              AND e.resolved_at >= $2
              AND p.option_index = e.resolved_option
            GROUP BY p.user_id
            ORDER BY correct DESC, p.user_id ASC
            "#,
        )
        .bind(group)
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<(UserId, u64)> {
                Ok((row.try_get("user_id")?, count(row.try_get("correct")?)))
            })
            .collect()
    }
}

#[async_trait]
impl RatingRepository for PgStore {
    async fn rating(&self, user: UserId, group: GroupId) -> Result<Option<Rating>> {
        let row = sqlx::query(
            r#"
            SELECT user_id, group_id, score, correct_count, wrong_count,
                   current_streak, best_streak, display_name, updated_at
            FROM ratings
            WHERE group_id = $1 AND user_id = $2
            "#,
        )
        .bind(group)
        .bind(user)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(rating_from_row).transpose()
    }

    async fn top_ratings(&self, group: GroupId, limit: usize) -> Result<Vec<Rating>> {
        let rows = sqlx::query(
            r#"
            SELECT user_id, group_id, score, correct_count, wrong_count,
                   current_streak, best_streak, display_name, updated_at
            FROM ratings
            WHERE group_id = $1
            ORDER BY score DESC, correct_count DESC, user_id ASC
            LIMIT $2
            "#,
        )
        .bind(group)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(rating_from_row).collect()
    }

    async fn rank(&self, user: UserId, group: GroupId) -> Result<Option<usize>> {
        let rank: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT 1 + (
                SELECT COUNT(*)
                FROM ratings o
                WHERE o.group_id = me.group_id
                  AND (o.score > me.score
                       OR (o.score = me.score AND o.correct_count > me.correct_count)
                       OR (o.score = me.score AND o.correct_count = me.correct_count
                           AND o.user_id < me.user_id))
            )
            FROM ratings me
            WHERE me.group_id = $1 AND me.user_id = $2
            "#,
        )
        .bind(group)
        .bind(user)
        .fetch_optional(&self.pool)
        .await?;

        Ok(rank.and_then(|r| usize::try_from(r).ok()))
    }
}

#[async_trait]
impl AchievementRepository for PgStore {
    async fn achievements(&self, user: UserId, group: GroupId) -> Result<Vec<Achievement>> {
        let rows = sqlx::query(
            r#"
            SELECT user_id, group_id, code, earned_at
            FROM achievements
            WHERE user_id = $1 AND group_id = $2
            ORDER BY earned_at ASC, code ASC
            "#,
        )
        .bind(user)
        .bind(group)
        .fetch_all(&self.pool)
        .await?;

        let mut earned = Vec::with_capacity(rows.len());
        for row in &rows {
            let code: String = row.try_get("code")?;
            let Some(code) = AchievementCode::parse(&code) else {
                warn!(user_id = user, group_id = group, %code, "unknown achievement code");
                continue;
            };
            earned.push(Achievement {
                user_id: row.try_get("user_id")?,
                group_id: row.try_get("group_id")?,
                code,
                earned_at: row.try_get("earned_at")?,
            });
        }
        Ok(earned)
    }

    async fn award(&self, achievement: &Achievement) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO achievements (user_id, group_id, code, earned_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (user_id, group_id, code) DO NOTHING
            "#,
        )
        .bind(achievement.user_id)
        .bind(achievement.group_id)
        .bind(achievement.code.as_str())
        .bind(achievement.earned_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}

#[async_trait]
impl GroupRepository for PgStore {
    async fn group(&self, id: GroupId) -> Result<Option<Group>> {
        let row = sqlx::query("SELECT id, chat_id, name, is_forum, created_at FROM groups WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(group_from_row).transpose()
    }

    async fn group_by_chat(&self, chat: ChatId) -> Result<Option<Group>> {
        let row = sqlx::query(
            "SELECT id, chat_id, name, is_forum, created_at FROM groups WHERE chat_id = $1",
        )
        .bind(chat)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(group_from_row).transpose()
    }

    async fn all_groups(&self) -> Result<Vec<Group>> {
        let rows = sqlx::query("SELECT id, chat_id, name, is_forum, created_at FROM groups ORDER BY id")
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(group_from_row).collect()
    }

    async fn insert_group(&self, group: NewGroup, created_at: DateTime<Utc>) -> Result<Group> {
        let row = sqlx::query(
            r#"
            INSERT INTO groups (chat_id, name, is_forum, created_at)
            VALUES ($1, $2, $3, $4)
            RETURNING id, chat_id, name, is_forum, created_at
            "#,
        )
        .bind(group.chat_id)
        .bind(&group.name)
        .bind(group.is_forum)
        .bind(created_at)
        .fetch_one(&self.pool)
        .await?;

        group_from_row(&row)
    }

    async fn topics(&self, group: GroupId) -> Result<Vec<ForumTopic>> {
        let rows = sqlx::query(
            "SELECT group_id, thread_id, name FROM forum_topics WHERE group_id = $1 ORDER BY thread_id",
        )
        .bind(group)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<ForumTopic> {
                Ok(ForumTopic {
                    group_id: row.try_get("group_id")?,
                    thread_id: row.try_get("thread_id")?,
                    name: row.try_get("name")?,
                })
            })
            .collect()
    }

    async fn add_topic(&self, topic: ForumTopic) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO forum_topics (group_id, thread_id, name)
            VALUES ($1, $2, $3)
            ON CONFLICT (group_id, thread_id) DO NOTHING
            "#,
        )
        .bind(topic.group_id)
        .bind(topic.thread_id)
        .bind(&topic.name)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn add_member(&self, user: UserId, group: GroupId) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO group_members (user_id, group_id)
            VALUES ($1, $2)
            ON CONFLICT (user_id, group_id) DO NOTHING
            "#,
        )
        .bind(user)
        .bind(group)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn groups_for_user(&self, user: UserId) -> Result<Vec<Group>> {
        let rows = sqlx::query(
            r#"
            SELECT g.id, g.chat_id, g.name, g.is_forum, g.created_at
            FROM groups g
            JOIN group_members m ON m.group_id = g.id
            WHERE m.user_id = $1
            ORDER BY g.id
            "#,
        )
        .bind(user)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(group_from_row).collect()
    }
}

/// Maintenance helpers.
impl PgStore {
    /// Store health at a glance.
    pub async fn stats(&self) -> Result<StoreStats> {
        let row = sqlx::query(
            r#"
            SELECT
                (SELECT COUNT(*) FROM groups) AS groups,
                (SELECT COUNT(*) FROM events WHERE status = 'active') AS active_events,
                (SELECT COUNT(*) FROM events WHERE status = 'resolved') AS resolved_events,
                (SELECT COUNT(*) FROM predictions) AS predictions,
                (SELECT COUNT(*) FROM sessions) AS sessions
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(StoreStats {
            groups: row.try_get("groups")?,
            active_events: row.try_get("active_events")?,
            resolved_events: row.try_get("resolved_events")?,
            predictions: row.try_get("predictions")?,
            sessions: row.try_get("sessions")?,
        })
    }
}

/// Row counts of the main tables.
#[derive(Debug, Clone, Copy)]
pub struct StoreStats {
    pub groups: i64,
    pub active_events: i64,
    pub resolved_events: i64,
    pub predictions: i64,
    pub sessions: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn column_conversions_reject_negatives() {
        assert_eq!(count(-1), 0);
        assert_eq!(count(7), 7);
        assert_eq!(counter(-3), 0);
        assert_eq!(index(2).unwrap(), 2);
        assert!(index(-1).is_err());
    }
}
