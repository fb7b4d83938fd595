//! Domain entities shared by the flows, the repositories and the scoring engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::fmt;

pub type UserId = i64;
pub type ChatId = i64;
pub type GroupId = i64;
pub type EventId = i64;
pub type MessageId = i32;
pub type ThreadId = i32;

/// Answer options of an event. Never more than [`MAX_OPTIONS`].
pub type Options = SmallVec<[String; 6]>;

pub const MIN_OPTIONS: usize = 2;
pub const MAX_OPTIONS: usize = 6;

const BINARY_OPTIONS: [&str; 2] = ["Yes", "No"];
const PROBABILITY_OPTIONS: [&str; 4] = ["0-25%", "25-50%", "50-75%", "75-100%"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Binary,
    MultiOption,
    Probability,
}

impl EventType {
    pub const ALL: [EventType; 3] = [Self::Binary, Self::MultiOption, Self::Probability];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Binary => "binary",
            Self::MultiOption => "multi_option",
            Self::Probability => "probability",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "binary" => Some(Self::Binary),
            "multi_option" => Some(Self::MultiOption),
            "probability" => Some(Self::Probability),
            _ => None,
        }
    }

    /// Token used in `event_type:<token>` button payloads.
    pub fn callback_token(&self) -> &'static str {
        match self {
            Self::Binary => "binary",
            Self::MultiOption => "multi",
            Self::Probability => "probability",
        }
    }

    pub fn from_callback_token(token: &str) -> Option<Self> {
        match token {
            "binary" => Some(Self::Binary),
            "multi" => Some(Self::MultiOption),
            "probability" => Some(Self::Probability),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Binary => "Yes / No",
            Self::MultiOption => "Multiple choice",
            Self::Probability => "Probability",
        }
    }

    /// Options for types whose answer set is not chosen by the creator.
    pub fn fixed_options(&self) -> Option<Options> {
        let fixed: &[&str] = match self {
            Self::Binary => &BINARY_OPTIONS,
            Self::Probability => &PROBABILITY_OPTIONS,
            Self::MultiOption => return None,
        };
        Some(fixed.iter().map(|o| o.to_string()).collect())
    }

    /// Inclusive bounds on the number of options.
    pub fn option_bounds(&self) -> (usize, usize) {
        match self {
            Self::Binary => (2, 2),
            Self::MultiOption => (MIN_OPTIONS, MAX_OPTIONS),
            Self::Probability => (4, 4),
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Active,
    Resolved,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Resolved => "resolved",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "active" => Some(Self::Active),
            "resolved" => Some(Self::Resolved),
            _ => None,
        }
    }
}

/// A prediction-market question published as a poll.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub group_id: GroupId,
    pub forum_topic_id: Option<ThreadId>,
    pub question: String,
    pub event_type: EventType,
    pub options: Options,
    pub deadline: DateTime<Utc>,
    pub status: EventStatus,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
    pub poll_id: Option<String>,
    pub poll_message_id: Option<MessageId>,
    pub resolved_option: Option<usize>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Event {
    pub fn is_active(&self) -> bool {
        self.status == EventStatus::Active
    }

    pub fn option(&self, index: usize) -> Option<&str> {
        self.options.get(index).map(String::as_str)
    }

    pub fn deadline_passed(&self, now: DateTime<Utc>) -> bool {
        self.deadline <= now
    }
}

/// Input for [`crate::EventManager::create_event`].
#[derive(Debug, Clone, PartialEq)]
pub struct NewEvent {
    pub group_id: GroupId,
    pub forum_topic_id: Option<ThreadId>,
    pub question: String,
    pub event_type: EventType,
    pub options: Options,
    pub deadline: DateTime<Utc>,
    pub created_by: UserId,
}

/// Field changes produced by the edit flow.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventPatch {
    pub question: Option<String>,
    pub options: Option<Options>,
    pub deadline: Option<DateTime<Utc>>,
}

impl EventPatch {
    pub fn is_empty(&self) -> bool {
        self.question.is_none() && self.options.is_none() && self.deadline.is_none()
    }

    /// Whether the published poll must be replaced.
    pub fn touches_poll(&self) -> bool {
        self.question.is_some() || self.options.is_some()
    }
}

/// A user's vote on an event. One per `(event_id, user_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prediction {
    pub event_id: EventId,
    pub user_id: UserId,
    pub option_index: usize,
    pub display_name: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

/// Accumulated score of one user inside one group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rating {
    pub user_id: UserId,
    pub group_id: GroupId,
    pub score: i64,
    pub correct_count: u32,
    pub wrong_count: u32,
    pub current_streak: u32,
    pub best_streak: u32,
    pub display_name: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl Rating {
    pub fn new(user_id: UserId, group_id: GroupId, at: DateTime<Utc>) -> Self {
        Self {
            user_id,
            group_id,
            score: 0,
            correct_count: 0,
            wrong_count: 0,
            current_streak: 0,
            best_streak: 0,
            display_name: None,
            updated_at: at,
        }
    }

    pub fn resolved_count(&self) -> u32 {
        self.correct_count + self.wrong_count
    }

    /// Share of correct predictions in percent, `None` before the first resolution.
    pub fn accuracy_percent(&self) -> Option<f64> {
        let total = self.resolved_count();
        (total > 0).then(|| f64::from(self.correct_count) * 100.0 / f64::from(total))
    }

    /// Fold one resolution outcome into the row.
    pub fn apply(&mut self, delta: &ScoreDelta, at: DateTime<Utc>) {
        self.score += delta.delta;
        if delta.correct {
            self.correct_count += 1;
            self.current_streak += 1;
            self.best_streak = self.best_streak.max(self.current_streak);
        } else {
            self.wrong_count += 1;
            self.current_streak = 0;
        }
        if let Some(name) = &delta.display_name {
            self.display_name = Some(name.clone());
        }
        self.updated_at = at;
    }

    pub fn name_or_id(&self) -> String {
        self.display_name
            .clone()
            .unwrap_or_else(|| format!("user {}", self.user_id))
    }
}

/// Components of a score delta, kept for result messages and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeltaBreakdown {
    pub base: i64,
    pub minority_bonus: i64,
    pub early_bonus: i64,
    pub participation_bonus: i64,
    pub penalty: i64,
}

impl DeltaBreakdown {
    pub fn total(&self) -> i64 {
        self.base + self.minority_bonus + self.early_bonus + self.participation_bonus + self.penalty
    }
}

/// Score change for one voter produced by a resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreDelta {
    pub user_id: UserId,
    pub display_name: Option<String>,
    pub correct: bool,
    pub delta: i64,
    pub breakdown: DeltaBreakdown,
}

/// A chat registered to host events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub id: GroupId,
    pub chat_id: ChatId,
    pub name: String,
    pub is_forum: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewGroup {
    pub chat_id: ChatId,
    pub name: String,
    pub is_forum: bool,
}

/// A sub-thread of a forum group that events may be published to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForumTopic {
    pub group_id: GroupId,
    pub thread_id: ThreadId,
    pub name: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_options_match_bounds() {
        for event_type in EventType::ALL {
            let (min, max) = event_type.option_bounds();
            if let Some(options) = event_type.fixed_options() {
                assert_eq!(options.len(), min);
                assert_eq!(options.len(), max);
            } else {
                assert_eq!((min, max), (MIN_OPTIONS, MAX_OPTIONS));
            }
        }
    }

    #[test]
    fn callback_tokens_are_distinct_from_storage_names() {
        assert_eq!(EventType::MultiOption.callback_token(), "multi");
        assert_eq!(EventType::from_callback_token("multi"), Some(EventType::MultiOption));
        assert_eq!(EventType::parse("multi"), None);
    }

    #[test]
    fn rating_streak_resets_on_wrong() {
        let now = Utc::now();
        let mut rating = Rating::new(1, 1, now);
        let hit = ScoreDelta {
            user_id: 1,
            display_name: Some("ann".into()),
            correct: true,
            delta: 11,
            breakdown: DeltaBreakdown::default(),
        };
        let miss = ScoreDelta {
            correct: false,
            delta: -2,
            display_name: None,
            ..hit.clone()
        };
        rating.apply(&hit, now);
        rating.apply(&hit, now);
        rating.apply(&miss, now);
        assert_eq!(rating.score, 20);
        assert_eq!(rating.current_streak, 0);
        assert_eq!(rating.best_streak, 2);
        assert_eq!(rating.display_name.as_deref(), Some("ann"));
        assert_eq!(rating.accuracy_percent().map(|a| a.round()), Some(67.0));
    }
}
