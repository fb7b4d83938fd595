//! Scoring applied when an event is resolved, and the leaderboard queries.
//!
//! [`compute_deltas`] is pure: the same event, prediction snapshot and correct
//! option always produce the same deltas. [`RatingCalculator`] loads the
//! snapshot; the deltas are persisted together with the status change by
//! [`EventManager::resolve_event`](crate::event_manager::EventManager::resolve_event).

use crate::error::{ForecastResult, ValidationError};
use crate::model::{
    DeltaBreakdown, Event, EventType, GroupId, Prediction, Rating, ScoreDelta, UserId,
};
use crate::store::Storage;
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringRules {
    pub binary_base: i64,
    pub probability_base: i64,
    pub multi_option_base: i64,
    /// Awarded to correct voters whose option drew fewer than
    /// `minority_threshold_percent` of all votes.
    pub minority_bonus: i64,
    pub minority_threshold_percent: u64,
    pub early_vote_bonus: i64,
    /// Votes recorded at most this long after the event was created are early.
    pub early_vote_window_hours: i64,
    /// Added for every voter, right or wrong.
    pub participation_bonus: i64,
    pub wrong_penalty: i64,
}

impl Default for ScoringRules {
    fn default() -> Self {
        Self {
            binary_base: 10,
            probability_base: 10,
            multi_option_base: 15,
            minority_bonus: 5,
            minority_threshold_percent: 40,
            early_vote_bonus: 3,
            early_vote_window_hours: 12,
            participation_bonus: 1,
            wrong_penalty: -3,
        }
    }
}

impl ScoringRules {
    pub fn base_for(&self, event_type: EventType) -> i64 {
        match event_type {
            EventType::Binary => self.binary_base,
            EventType::Probability => self.probability_base,
            EventType::MultiOption => self.multi_option_base,
        }
    }

    fn is_minority(&self, votes: u64, total: u64) -> bool {
        votes * 100 < self.minority_threshold_percent * total
    }

    fn is_early(&self, event: &Event, prediction: &Prediction) -> bool {
        prediction.recorded_at - event.created_at <= Duration::hours(self.early_vote_window_hours)
    }
}

/// Score change of every voter for `event` resolved to `correct`.
///
/// Deltas are returned in snapshot order.
pub fn compute_deltas(
    rules: &ScoringRules,
    event: &Event,
    predictions: &[Prediction],
    correct: usize,
) -> Vec<ScoreDelta> {
    let total = predictions.len() as u64;
    let mut votes = vec![0u64; event.options.len()];
    for prediction in predictions {
        if let Some(count) = votes.get_mut(prediction.option_index) {
            *count += 1;
        }
    }

    predictions
        .iter()
        .map(|prediction| {
            let is_correct = prediction.option_index == correct;
            let mut breakdown = DeltaBreakdown {
                participation_bonus: rules.participation_bonus,
                ..DeltaBreakdown::default()
            };
            if is_correct {
                breakdown.base = rules.base_for(event.event_type);
                let chosen = votes.get(correct).copied().unwrap_or_default();
                if rules.is_minority(chosen, total) {
                    breakdown.minority_bonus = rules.minority_bonus;
                }
                if rules.is_early(event, prediction) {
                    breakdown.early_bonus = rules.early_vote_bonus;
                }
            } else {
                breakdown.penalty = rules.wrong_penalty;
            }
            ScoreDelta {
                user_id: prediction.user_id,
                display_name: prediction.display_name.clone(),
                correct: is_correct,
                delta: breakdown.total(),
                breakdown,
            }
        })
        .collect()
}

/// What `/my_stats` shows.
#[derive(Debug, Clone, PartialEq)]
pub struct UserStats {
    pub rating: Option<Rating>,
    pub predictions: u64,
    /// 1-based position on the group leaderboard, when ranked.
    pub rank: Option<usize>,
}

pub struct RatingCalculator {
    storage: Arc<dyn Storage>,
    rules: ScoringRules,
}

impl RatingCalculator {
    pub fn new(storage: Arc<dyn Storage>, rules: ScoringRules) -> Self {
        Self { storage, rules }
    }

    pub fn rules(&self) -> &ScoringRules {
        &self.rules
    }

    /// Deltas for resolving `event` to `correct`, from one snapshot of its votes.
    pub async fn calculate_scores(
        &self,
        event: &Event,
        correct: usize,
    ) -> ForecastResult<Vec<ScoreDelta>> {
        if correct >= event.options.len() {
            return Err(ValidationError::OptionOutOfRange { index: correct }.into());
        }
        let predictions = self.storage.predictions_for_event(event.id).await?;
        if predictions.is_empty() {
            debug!(event_id = event.id, "resolution without predictions");
        }
        Ok(compute_deltas(&self.rules, event, &predictions, correct))
    }

    pub async fn top_ratings(&self, group: GroupId, limit: usize) -> ForecastResult<Vec<Rating>> {
        Ok(self.storage.top_ratings(group, limit).await?)
    }

    pub async fn user_stats(&self, user: UserId, group: GroupId) -> ForecastResult<UserStats> {
        let rating = self.storage.rating(user, group).await?;
        let predictions = self.storage.count_user_predictions(user, Some(group)).await?;
        let rank = self.storage.rank(user, group).await?;
        Ok(UserStats {
            rating,
            predictions,
            rank,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::EventStatus;
    use chrono::{DateTime, TimeZone, Utc};

    fn created() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap()
    }

    fn event(event_type: EventType, options: &[&str]) -> Event {
        Event {
            id: 1,
            group_id: 1,
            forum_topic_id: None,
            question: "?".into(),
            event_type,
            options: options.iter().map(|o| o.to_string()).collect(),
            deadline: created() + Duration::days(7),
            status: EventStatus::Active,
            created_by: 99,
            created_at: created(),
            poll_id: None,
            poll_message_id: None,
            resolved_option: None,
            resolved_at: None,
        }
    }

    fn vote(user_id: UserId, option_index: usize, hours: i64) -> Prediction {
        Prediction {
            event_id: 1,
            user_id,
            option_index,
            display_name: None,
            recorded_at: created() + Duration::hours(hours),
        }
    }

    #[test]
    fn binary_minority_early_voter() {
        let rules = ScoringRules::default();
        let event = event(EventType::Binary, &["Yes", "No"]);
        let votes = [vote(1, 0, 1), vote(2, 1, 2), vote(3, 1, 20), vote(4, 1, 30)];

        let deltas = compute_deltas(&rules, &event, &votes, 0);

        assert_eq!(deltas[0].delta, 10 + 5 + 3 + 1);
        assert_eq!(
            deltas[0].breakdown,
            DeltaBreakdown {
                base: 10,
                minority_bonus: 5,
                early_bonus: 3,
                participation_bonus: 1,
                penalty: 0,
            }
        );
        for wrong in &deltas[1..] {
            assert!(!wrong.correct);
            assert_eq!(wrong.delta, -2);
        }
    }

    #[test]
    fn majority_late_voter_gets_base_only() {
        let rules = ScoringRules::default();
        let event = event(EventType::MultiOption, &["a", "b", "c"]);
        let votes = [vote(1, 2, 13), vote(2, 2, 40), vote(3, 0, 1)];

        let deltas = compute_deltas(&rules, &event, &votes, 2);

        assert_eq!(deltas[0].delta, 15 + 1);
        assert_eq!(deltas[1].delta, 15 + 1);
        assert_eq!(deltas[2].delta, -2);
    }

    #[test]
    fn early_window_is_inclusive() {
        let rules = ScoringRules::default();
        let event = event(EventType::Probability, &["0-25%", "25-50%", "50-75%", "75-100%"]);
        let votes = [vote(1, 3, 12), vote(2, 3, 12), vote(3, 1, 0)];

        let deltas = compute_deltas(&rules, &event, &votes, 3);

        assert_eq!(deltas[0].breakdown.early_bonus, 3);
        assert_eq!(deltas[0].breakdown.minority_bonus, 0);
    }

    #[test]
    fn forty_percent_is_not_minority() {
        let rules = ScoringRules::default();
        let event = event(EventType::MultiOption, &["a", "b"]);
        let votes = [vote(1, 0, 50), vote(2, 0, 50), vote(3, 1, 50), vote(4, 1, 50), vote(5, 1, 50)];

        let deltas = compute_deltas(&rules, &event, &votes, 0);

        assert_eq!(deltas[0].breakdown.minority_bonus, 0);
    }

    #[test]
    fn deltas_are_deterministic() {
        let rules = ScoringRules::default();
        let event = event(EventType::Binary, &["Yes", "No"]);
        let votes: Vec<Prediction> = (0..20).map(|u| vote(u, (u % 3 == 0) as usize, u)).collect();
        assert_eq!(
            compute_deltas(&rules, &event, &votes, 1),
            compute_deltas(&rules, &event, &votes, 1)
        );
    }
}
