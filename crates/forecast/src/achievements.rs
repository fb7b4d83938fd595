//! Achievement evaluation and awarding.
//!
//! [`evaluate`] decides which codes a progress snapshot has earned; it does no
//! IO. [`AchievementTracker::check`] loads the snapshot and awards through an
//! insert-if-absent repository call, so checking twice never awards twice.
//! Notifying the chat is left to [`AchievementNotifier`].

use crate::clock::Clock;
use crate::error::ForecastResult;
use crate::messages;
use crate::model::{ChatId, GroupId, ThreadId, UserId};
use crate::store::Storage;
use crate::transport::ChatTransport;
use chrono::{DateTime, Duration, Utc};
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AchievementCode {
    FirstPrediction,
    ActiveForecaster,
    Veteran,
    Legend,
    HotStreak,
    Sharpshooter,
    Oracle,
    EventCreator,
    QuestionMaster,
    WeeklyLeader,
}

impl AchievementCode {
    pub const ALL: [AchievementCode; 10] = [
        Self::FirstPrediction,
        Self::ActiveForecaster,
        Self::Veteran,
        Self::Legend,
        Self::HotStreak,
        Self::Sharpshooter,
        Self::Oracle,
        Self::EventCreator,
        Self::QuestionMaster,
        Self::WeeklyLeader,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FirstPrediction => "first_prediction",
            Self::ActiveForecaster => "active_forecaster",
            Self::Veteran => "veteran",
            Self::Legend => "legend",
            Self::HotStreak => "hot_streak",
            Self::Sharpshooter => "sharpshooter",
            Self::Oracle => "oracle",
            Self::EventCreator => "event_creator",
            Self::QuestionMaster => "question_master",
            Self::WeeklyLeader => "weekly_leader",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|code| code.as_str() == value)
    }

    pub fn title(&self) -> &'static str {
        match self {
            Self::FirstPrediction => "First Prediction",
            Self::ActiveForecaster => "Active Forecaster",
            Self::Veteran => "Veteran",
            Self::Legend => "Legend",
            Self::HotStreak => "Hot Streak",
            Self::Sharpshooter => "Sharpshooter",
            Self::Oracle => "Oracle",
            Self::EventCreator => "Event Creator",
            Self::QuestionMaster => "Question Master",
            Self::WeeklyLeader => "Weekly Leader",
        }
    }

    pub fn description(&self, thresholds: &AchievementThresholds) -> String {
        match self {
            Self::FirstPrediction => "Made a first prediction".to_string(),
            Self::ActiveForecaster => format!("Made {} predictions", thresholds.active_forecaster),
            Self::Veteran => format!("Made {} predictions", thresholds.veteran),
            Self::Legend => format!("Made {} predictions", thresholds.legend),
            Self::HotStreak => format!("{} correct predictions in a row", thresholds.hot_streak),
            Self::Sharpshooter => format!("{} correct predictions in a row", thresholds.sharpshooter),
            Self::Oracle => format!("{} correct predictions in a row", thresholds.oracle),
            Self::EventCreator => "Created a first event".to_string(),
            Self::QuestionMaster => format!("Created {} events", thresholds.question_master),
            Self::WeeklyLeader => format!(
                "Most correct predictions over the last {} days",
                thresholds.weekly_window_days
            ),
        }
    }
}

impl fmt::Display for AchievementCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AchievementThresholds {
    pub first_prediction: u64,
    pub active_forecaster: u64,
    pub veteran: u64,
    pub legend: u64,
    pub hot_streak: u32,
    pub sharpshooter: u32,
    pub oracle: u32,
    pub event_creator: u64,
    pub question_master: u64,
    pub weekly_leader_min_correct: u64,
    pub weekly_window_days: i64,
}

impl Default for AchievementThresholds {
    fn default() -> Self {
        Self {
            first_prediction: 1,
            active_forecaster: 10,
            veteran: 50,
            legend: 100,
            hot_streak: 3,
            sharpshooter: 5,
            oracle: 10,
            event_creator: 1,
            question_master: 10,
            weekly_leader_min_correct: 3,
            weekly_window_days: 7,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Achievement {
    pub user_id: UserId,
    pub group_id: GroupId,
    pub code: AchievementCode,
    pub earned_at: DateTime<Utc>,
}

/// Counters the predicates are evaluated against, scoped to one group.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgressSnapshot {
    pub best_streak: u32,
    pub predictions: u64,
    pub events_created: u64,
    pub weekly_leader: bool,
}

/// Codes earned by `snapshot` that are not in `earned`, in [`AchievementCode::ALL`] order.
pub fn evaluate(
    thresholds: &AchievementThresholds,
    snapshot: &ProgressSnapshot,
    earned: &HashSet<AchievementCode>,
) -> Vec<AchievementCode> {
    AchievementCode::ALL
        .into_iter()
        .filter(|code| !earned.contains(code))
        .filter(|code| qualifies(thresholds, snapshot, *code))
        .collect()
}

fn qualifies(th: &AchievementThresholds, s: &ProgressSnapshot, code: AchievementCode) -> bool {
    match code {
        AchievementCode::FirstPrediction => s.predictions >= th.first_prediction,
        AchievementCode::ActiveForecaster => s.predictions >= th.active_forecaster,
        AchievementCode::Veteran => s.predictions >= th.veteran,
        AchievementCode::Legend => s.predictions >= th.legend,
        AchievementCode::HotStreak => s.best_streak >= th.hot_streak,
        AchievementCode::Sharpshooter => s.best_streak >= th.sharpshooter,
        AchievementCode::Oracle => s.best_streak >= th.oracle,
        AchievementCode::EventCreator => s.events_created >= th.event_creator,
        AchievementCode::QuestionMaster => s.events_created >= th.question_master,
        AchievementCode::WeeklyLeader => s.weekly_leader,
    }
}

/// Whether `user` has the highest correct count in `counts` with at least
/// `min_correct`. Everyone tied for first qualifies.
pub fn is_weekly_leader(counts: &[(UserId, u64)], user: UserId, min_correct: u64) -> bool {
    let Some(best) = counts.iter().map(|(_, count)| *count).max() else {
        return false;
    };
    best >= min_correct && counts.iter().any(|(id, count)| *id == user && *count == best)
}

pub struct AchievementTracker {
    storage: Arc<dyn Storage>,
    clock: Arc<dyn Clock>,
    thresholds: AchievementThresholds,
}

impl AchievementTracker {
    pub fn new(
        storage: Arc<dyn Storage>,
        clock: Arc<dyn Clock>,
        thresholds: AchievementThresholds,
    ) -> Self {
        Self {
            storage,
            clock,
            thresholds,
        }
    }

    pub fn thresholds(&self) -> &AchievementThresholds {
        &self.thresholds
    }

    pub async fn snapshot(&self, user: UserId, group: GroupId) -> ForecastResult<ProgressSnapshot> {
        let best_streak = self
            .storage
            .rating(user, group)
            .await?
            .map_or(0, |rating| rating.best_streak);
        let predictions = self.storage.count_user_predictions(user, Some(group)).await?;
        let events_created = self.storage.count_events_created(user, group).await?;

        let since = self.clock.now() - Duration::days(self.thresholds.weekly_window_days);
        let counts = self.storage.correct_counts_since(group, since).await?;
        let weekly_leader =
            is_weekly_leader(&counts, user, self.thresholds.weekly_leader_min_correct);

        Ok(ProgressSnapshot {
            best_streak,
            predictions,
            events_created,
            weekly_leader,
        })
    }

    /// Award every newly earned code. Returns only the rows inserted by this call.
    pub async fn check(&self, user: UserId, group: GroupId) -> ForecastResult<Vec<Achievement>> {
        let snapshot = self.snapshot(user, group).await?;
        let earned: HashSet<AchievementCode> = self
            .storage
            .achievements(user, group)
            .await?
            .into_iter()
            .map(|a| a.code)
            .collect();

        let now = self.clock.now();
        let mut awarded = Vec::new();
        for code in evaluate(&self.thresholds, &snapshot, &earned) {
            let achievement = Achievement {
                user_id: user,
                group_id: group,
                code,
                earned_at: now,
            };
            if self.storage.award(&achievement).await? {
                info!(user_id = user, group_id = group, code = %code, "achievement awarded");
                awarded.push(achievement);
            }
        }
        Ok(awarded)
    }

    /// [`check`](Self::check) for every user, concurrently.
    pub async fn check_all(
        &self,
        group: GroupId,
        users: &[UserId],
    ) -> ForecastResult<Vec<Achievement>> {
        let results = try_join_all(users.iter().map(|user| self.check(*user, group))).await?;
        Ok(results.into_iter().flatten().collect())
    }
}

/// Announces new achievements in the group chat. Failures are logged, never raised.
pub struct AchievementNotifier {
    transport: Arc<dyn ChatTransport>,
    thresholds: AchievementThresholds,
}

impl AchievementNotifier {
    pub fn new(transport: Arc<dyn ChatTransport>, thresholds: AchievementThresholds) -> Self {
        Self {
            transport,
            thresholds,
        }
    }

    pub async fn notify(
        &self,
        chat: ChatId,
        thread: Option<ThreadId>,
        name: &str,
        awarded: &[Achievement],
    ) -> usize {
        let mut sent = 0;
        for achievement in awarded {
            let text = messages::achievement_unlocked(name, achievement.code, &self.thresholds);
            match self.transport.send_message(chat, thread, &text, None).await {
                Ok(_) => sent += 1,
                Err(err) => warn!(
                    chat_id = chat,
                    user_id = achievement.user_id,
                    code = %achievement.code,
                    error = %err,
                    "achievement notification failed"
                ),
            }
        }
        sent
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codes(list: &[AchievementCode]) -> HashSet<AchievementCode> {
        list.iter().copied().collect()
    }

    #[test]
    fn codes_round_trip_through_names() {
        for code in AchievementCode::ALL {
            assert_eq!(AchievementCode::parse(code.as_str()), Some(code));
            assert_eq!(serde_json::to_value(code).unwrap(), code.as_str());
        }
        assert_eq!(AchievementCode::parse("grandmaster"), None);
    }

    #[test]
    fn thresholds_are_inclusive() {
        let th = AchievementThresholds::default();
        let snapshot = ProgressSnapshot {
            best_streak: 5,
            predictions: 10,
            events_created: 1,
            weekly_leader: false,
        };
        assert_eq!(
            evaluate(&th, &snapshot, &HashSet::new()),
            vec![
                AchievementCode::FirstPrediction,
                AchievementCode::ActiveForecaster,
                AchievementCode::HotStreak,
                AchievementCode::Sharpshooter,
                AchievementCode::EventCreator,
            ]
        );
    }

    #[test]
    fn earned_codes_are_not_repeated() {
        let th = AchievementThresholds::default();
        let snapshot = ProgressSnapshot {
            predictions: 1,
            ..ProgressSnapshot::default()
        };
        let first = evaluate(&th, &snapshot, &HashSet::new());
        assert_eq!(first, vec![AchievementCode::FirstPrediction]);
        assert!(evaluate(&th, &snapshot, &codes(&first)).is_empty());
    }

    #[test]
    fn weekly_leader_needs_minimum_and_allows_ties() {
        let counts = [(1, 4), (2, 4), (3, 1)];
        assert!(is_weekly_leader(&counts, 1, 3));
        assert!(is_weekly_leader(&counts, 2, 3));
        assert!(!is_weekly_leader(&counts, 3, 3));
        assert!(!is_weekly_leader(&[(1, 2)], 1, 3));
        assert!(!is_weekly_leader(&[], 1, 3));
    }
}
