//! Plain-English texts sent to the chat.

use crate::achievements::{Achievement, AchievementCode, AchievementThresholds};
use crate::error::{ErrorKind, ForecastError, ValidationError};
use crate::model::{Event, EventType, Group, Rating, ScoreDelta, ThreadId};
use crate::rating::UserStats;
use crate::session::FlowKind;
use crate::validate;
use chrono::{DateTime, FixedOffset, Utc};
use std::fmt::Write;

pub const HELP: &str = "\
Commands:
/create_event - create a forecast event
/edit_event [id] - change an event nobody has voted on yet
/resolve_event - announce the outcome of an event
/create_group - register a group (admins)
/rating - group leaderboard
/my_stats - your score, streaks and achievements
/cancel - abort the current dialog";

pub const NO_GROUPS: &str =
    "You are not a member of any registered group yet. Vote in a group poll first.";
pub const NO_EDITABLE_EVENTS: &str = "You have no events that can still be edited.";
pub const NO_RESOLVABLE_EVENTS: &str = "You have no active events to resolve.";
pub const NO_CHANGES: &str = "Nothing was changed.";
pub const NOTHING_TO_CANCEL: &str = "There is nothing to cancel.";
pub const NOTHING_TO_RESUME: &str = "There is no dialog to continue.";
pub const STALE_BUTTON: &str = "This menu is no longer active.";
pub const NO_RATINGS: &str = "No resolved events yet, so there is no leaderboard.";

const QUESTION_PREVIEW_LEN: usize = 40;

fn capitalized(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

pub fn cancelled(kind: FlowKind) -> String {
    format!("{} cancelled.", capitalized(kind.label()))
}

pub fn session_expired(kind: FlowKind) -> String {
    format!(
        "Your {} dialog expired. Start again with {}.",
        kind.label(),
        kind.command()
    )
}

pub fn conflict(existing: FlowKind, requested: FlowKind) -> String {
    format!(
        "You are in the middle of {}. Continue it, or drop it and start {}?",
        existing.label(),
        requested.label()
    )
}

pub fn invalid_input(err: &ValidationError) -> String {
    format!("{}. Please try again.", capitalized(&err.to_string()))
}

/// Reply for an error that ended an interaction.
pub fn error_text(err: &ForecastError) -> String {
    match err.kind() {
        ErrorKind::SessionNotFound => NOTHING_TO_RESUME.to_string(),
        ErrorKind::SessionExpired => match err {
            ForecastError::SessionExpired { flow } => session_expired(*flow),
            _ => "Your dialog expired. Please start again.".to_string(),
        },
        ErrorKind::InvalidContext | ErrorKind::InvalidCallback => {
            "Something went wrong with this dialog. Please start the command again.".to_string()
        }
        ErrorKind::SessionConflict => match err {
            ForecastError::SessionConflict { existing } => format!(
                "Finish or /cancel {} first.",
                existing.label()
            ),
            _ => "Finish or /cancel the current dialog first.".to_string(),
        },
        ErrorKind::Validation => format!("{}.", capitalized(&err.to_string())),
        ErrorKind::EventNotFound => "That event does not exist.".to_string(),
        ErrorKind::EventHasVotes => {
            "This event already has votes and can no longer be edited.".to_string()
        }
        ErrorKind::EventAlreadyResolved => "This event is already resolved.".to_string(),
        ErrorKind::Unauthorized => format!("Not allowed: {}.", unauthorized_reason(err)),
        ErrorKind::InsufficientParticipation => format!(
            "Make {} more prediction(s) before creating your own events.",
            err.participation_shortfall().unwrap_or(1)
        ),
        ErrorKind::Transport | ErrorKind::Storage => {
            "Sorry, something went wrong on our side. Please run the command again.".to_string()
        }
    }
}

fn unauthorized_reason(err: &ForecastError) -> &str {
    match err {
        ForecastError::Unauthorized { reason } => reason.as_str(),
        _ => "permission denied",
    }
}

pub fn preset_label(days: u32) -> String {
    match days {
        1 => "1 day".to_string(),
        7 => "1 week".to_string(),
        14 => "2 weeks".to_string(),
        30 => "1 month".to_string(),
        90 => "3 months".to_string(),
        180 => "6 months".to_string(),
        365 => "1 year".to_string(),
        n => format!("{n} days"),
    }
}

/// `+03:00` style suffix for prompts that mention local time.
pub fn offset_suffix(offset: FixedOffset) -> String {
    let seconds = offset.local_minus_utc();
    let sign = if seconds < 0 { '-' } else { '+' };
    let minutes = seconds.abs() / 60;
    format!("{sign}{:02}:{:02}", minutes / 60, minutes % 60)
}

pub fn short_question(question: &str) -> String {
    if question.chars().count() <= QUESTION_PREVIEW_LEN {
        return question.to_string();
    }
    let cut: String = question.chars().take(QUESTION_PREVIEW_LEN - 1).collect();
    format!("{cut}…")
}

pub fn event_summary(
    question: &str,
    event_type: EventType,
    options: &[String],
    deadline: Option<DateTime<Utc>>,
    offset: FixedOffset,
) -> String {
    let mut text = format!("Question: {question}\nType: {}\nOptions:", event_type.label());
    for (index, option) in options.iter().enumerate() {
        let _ = write!(text, "\n  {}. {option}", index + 1);
    }
    if let Some(deadline) = deadline {
        let _ = write!(
            text,
            "\nDeadline: {} (UTC{})",
            validate::format_deadline(deadline, offset),
            offset_suffix(offset)
        );
    }
    text
}

pub fn event_created(event: &Event, group: &Group, offset: FixedOffset) -> String {
    format!(
        "Event #{} published in {}. Voting closes {}.",
        event.id,
        group.name,
        validate::format_deadline(event.deadline, offset)
    )
}

pub fn event_updated(event: &Event, offset: FixedOffset) -> String {
    format!(
        "Event #{} updated.\n\n{}",
        event.id,
        event_summary(
            &event.question,
            event.event_type,
            &event.options,
            Some(event.deadline),
            offset
        )
    )
}

pub fn event_resolved(event: &Event, voters: usize) -> String {
    format!("Event #{} resolved, {voters} prediction(s) scored.", event.id)
}

pub fn resolution_results(event: &Event, tally: &[u64], deltas: &[ScoreDelta]) -> String {
    let answer = event
        .resolved_option
        .and_then(|index| event.option(index))
        .unwrap_or("?");
    let mut text = format!("Resolved: {}\nCorrect answer: {answer}\n", event.question);

    let total: u64 = tally.iter().sum();
    for (option, votes) in event.options.iter().zip(tally) {
        let share = if total == 0 { 0 } else { votes * 100 / total };
        let _ = write!(text, "\n{option}: {votes} ({share}%)");
    }

    if deltas.is_empty() {
        text.push_str("\n\nNobody voted.");
        return text;
    }
    text.push('\n');
    for delta in deltas {
        let name = delta
            .display_name
            .clone()
            .unwrap_or_else(|| format!("user {}", delta.user_id));
        let mark = if delta.correct { "+" } else { "-" };
        let _ = write!(text, "\n{mark} {name}: {:+}", delta.delta);
    }
    text
}

pub fn group_registered(
    group: &Group,
    topic: Option<ThreadId>,
    reused: bool,
    topic_added: bool,
) -> String {
    let mut text = if reused {
        format!("{} (chat {}) was already registered.", group.name, group.chat_id)
    } else {
        format!("{} (chat {}) registered.", group.name, group.chat_id)
    };
    if let Some(thread) = topic {
        if topic_added {
            let _ = write!(text, " Topic {thread} added.");
        } else {
            let _ = write!(text, " Topic {thread} was already known.");
        }
    }
    text
}

pub fn achievement_unlocked(
    name: &str,
    code: AchievementCode,
    thresholds: &AchievementThresholds,
) -> String {
    format!(
        "{name} unlocked {}: {}.",
        code.title(),
        code.description(thresholds)
    )
}

pub fn leaderboard(group: &Group, ratings: &[Rating]) -> String {
    if ratings.is_empty() {
        return format!("{}\n{NO_RATINGS}", group.name);
    }
    let mut text = format!("Leaderboard of {}", group.name);
    for (place, rating) in ratings.iter().enumerate() {
        let _ = write!(
            text,
            "\n{}. {} {} pts ({}/{} correct)",
            place + 1,
            rating.name_or_id(),
            rating.score,
            rating.correct_count,
            rating.resolved_count()
        );
    }
    text
}

pub fn user_stats(
    group: &Group,
    stats: &UserStats,
    achievements: &[Achievement],
) -> String {
    let mut text = format!("Your stats in {}\nPredictions: {}", group.name, stats.predictions);
    match &stats.rating {
        Some(rating) => {
            let _ = write!(
                text,
                "\nScore: {}\nCorrect: {} / Wrong: {}",
                rating.score, rating.correct_count, rating.wrong_count
            );
            if let Some(accuracy) = rating.accuracy_percent() {
                let _ = write!(text, "\nAccuracy: {accuracy:.0}%");
            }
            let _ = write!(
                text,
                "\nStreak: {} (best {})",
                rating.current_streak, rating.best_streak
            );
        }
        None => text.push_str("\nNo resolved predictions yet."),
    }
    if let Some(rank) = stats.rank {
        let _ = write!(text, "\nRank: #{rank}");
    }
    if !achievements.is_empty() {
        let titles: Vec<&str> = achievements.iter().map(|a| a.code.title()).collect();
        let _ = write!(text, "\nAchievements: {}", titles.join(", "));
    }
    text
}
