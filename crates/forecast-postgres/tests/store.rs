//! Behaviour of `PgStore` against a real database.
//!
//! Every test runs in a fresh schema of the database named by `DATABASE_URL`
//! and is skipped when the variable is unset.

use chrono::{DateTime, Duration, TimeZone, Utc};
use forecast_core::model::{
    DeltaBreakdown, Event, EventStatus, EventType, GroupId, NewEvent, NewGroup, Rating, ScoreDelta,
    UserId,
};
use forecast_core::session::{SaveMode, SaveOutcome, SessionRecord};
use forecast_core::store::{EventRepository, GroupRepository, RatingRepository, SessionStore};
use forecast_postgres::PgStore;
use serde_json::json;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::PgPool;
use std::str::FromStr;
use uuid::Uuid;

const SCHEMA: &str = include_str!("schema.sql");

async fn store() -> Option<PgStore> {
    let Ok(url) = std::env::var("DATABASE_URL") else {
        return None;
    };
    let schema = format!("forecast_test_{}", Uuid::new_v4().simple());
    let admin = PgPool::connect(&url).await.expect("connect");
    sqlx::query(&format!("CREATE SCHEMA {schema}"))
        .execute(&admin)
        .await
        .expect("create schema");

    let options = PgConnectOptions::from_str(&url)
        .expect("parse DATABASE_URL")
        .options([("search_path", schema.as_str())]);
    let pool = PgPoolOptions::new()
        .max_connections(2)
        .connect_with(options)
        .await
        .expect("connect to test schema");
    sqlx::raw_sql(SCHEMA).execute(&pool).await.expect("create tables");
    Some(PgStore::new(pool))
}

fn at() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap()
}

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

fn delta(user_id: UserId, delta: i64, correct: bool) -> ScoreDelta {
    ScoreDelta {
        user_id,
        display_name: Some(format!("user{user_id}")),
        correct,
        delta,
        breakdown: DeltaBreakdown::default(),
    }
}

async fn group(store: &PgStore) -> GroupId {
    store
        .insert_group(
            NewGroup {
                chat_id: -100,
                name: "Forecasters".into(),
                is_forum: false,
            },
            at(),
        )
        .await
        .unwrap()
        .id
}

async fn event(store: &PgStore, group_id: GroupId) -> Event {
    store
        .insert_event(
            NewEvent {
                group_id,
                forum_topic_id: None,
                question: "Will it rain?".into(),
                event_type: EventType::Binary,
                options: EventType::Binary.fixed_options().unwrap_or_default(),
                deadline: at() + Duration::days(2),
                created_by: 1,
            },
            at(),
        )
        .await
        .unwrap()
}

#[tokio::test]
async fn session_upsert_respects_live_flows() {
    let Some(store) = store().await else {
        return;
    };
    let now = at();

    let saved = store
        .save_session(record(5, "event_creation:ask_question", now), SaveMode::Create, now)
        .await
        .unwrap();
    assert_eq!(saved, SaveOutcome::Saved);

    let blocked = store
        .save_session(record(5, "group_creation:ask_name", now), SaveMode::Update, now)
        .await
        .unwrap();
    assert_eq!(
        blocked,
        SaveOutcome::Conflict {
            existing_state: "event_creation:ask_question".into()
        }
    );

    let later = now + Duration::minutes(2);
    store
        .save_session(
            record(5, "event_creation:ask_event_type", later),
            SaveMode::Update,
            later,
        )
        .await
        .unwrap();
    let stored = store.load_session(5).await.unwrap().unwrap();
    assert_eq!(stored.state_name, "event_creation:ask_event_type");
    assert_eq!(stored.created_at, now);

    let expired = now + Duration::minutes(40);
    let replaced = store
        .save_session(record(5, "group_creation:ask_name", expired), SaveMode::Create, expired)
        .await
        .unwrap();
    assert_eq!(replaced, SaveOutcome::Saved);
    assert_eq!(store.load_session(5).await.unwrap().unwrap().created_at, expired);

    assert!(store.delete_session(5).await.unwrap());
    assert!(!store.delete_session(5).await.unwrap());
}

#[tokio::test]
async fn resolution_writes_status_and_scores_once() {
    let Some(store) = store().await else {
        return;
    };
    let group_id = group(&store).await;
    let event = event(&store, group_id).await;

    assert!(store
        .apply_resolution(&event, 0, &[delta(11, 14, true), delta(12, -2, false)], at())
        .await
        .unwrap());
    assert!(!store
        .apply_resolution(&event, 1, &[delta(11, 14, true), delta(13, 5, true)], at())
        .await
        .unwrap());

    let stored = store.event(event.id).await.unwrap().unwrap();
    assert_eq!(stored.status, EventStatus::Resolved);
    assert_eq!(stored.resolved_option, Some(0));
    assert!(store.active_events(Some(group_id)).await.unwrap().is_empty());

    let winner = store.rating(11, group_id).await.unwrap().unwrap();
    assert_eq!((winner.score, winner.correct_count, winner.wrong_count), (14, 1, 0));
    assert_eq!(winner.display_name.as_deref(), Some("user11"));
    assert!(store.rating(13, group_id).await.unwrap().is_none());
}

#[tokio::test]
async fn streaks_grow_and_reset() {
    let Some(store) = store().await else {
        return;
    };
    let group_id = group(&store).await;

    for correct in [true, true, false] {
        let event = event(&store, group_id).await;
        let points = if correct { 11 } else { -2 };
        store
            .apply_resolution(&event, 0, &[delta(11, points, correct)], at())
            .await
            .unwrap();
    }

    let rating = store.rating(11, group_id).await.unwrap().unwrap();
    assert_eq!(rating.score, 20);
    assert_eq!((rating.current_streak, rating.best_streak), (0, 2));
    assert_eq!((rating.correct_count, rating.wrong_count), (2, 1));
}

#[tokio::test]
async fn leaderboard_order_and_rank() {
    let Some(store) = store().await else {
        return;
    };
    let group_id = group(&store).await;
    let event = event(&store, group_id).await;
    store
        .apply_resolution(
            &event,
            0,
            &[
                delta(3, 10, true),
                delta(1, 10, true),
                delta(2, 12, true),
                delta(4, -3, false),
            ],
            at(),
        )
        .await
        .unwrap();

    let order = |ratings: Vec<Rating>| -> Vec<UserId> {
        ratings.iter().map(|r| r.user_id).collect()
    };
    assert_eq!(order(store.top_ratings(group_id, 3).await.unwrap()), vec![2, 1, 3]);
    assert_eq!(
        order(store.top_ratings(group_id, usize::MAX).await.unwrap()),
        vec![2, 1, 3, 4]
    );

    assert_eq!(store.rank(2, group_id).await.unwrap(), Some(1));
    assert_eq!(store.rank(3, group_id).await.unwrap(), Some(3));
    assert_eq!(store.rank(4, group_id).await.unwrap(), Some(4));
    assert_eq!(store.rank(99, group_id).await.unwrap(), None);
}
