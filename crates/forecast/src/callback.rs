//! Button payload encoding.
//!
//! Payloads are colon-delimited tokens, e.g. `select_group:12:7` or
//! `resolve:option:1`. Anything that does not parse is a fatal error for the
//! interaction that carried it.

use crate::model::{EventId, EventType, GroupId, ThreadId};
use crate::session::FlowKind;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Relative deadline presets offered as buttons, in days.
pub const DEADLINE_PRESETS: [u32; 8] = [1, 3, 7, 14, 30, 90, 180, 365];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallbackParseError {
    #[error("empty callback payload")]
    Empty,

    #[error("unknown callback action '{0}'")]
    UnknownAction(String),

    #[error("malformed callback payload '{payload}': {reason}")]
    Malformed {
        payload: String,
        reason: &'static str,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditField {
    Question,
    Options,
    Deadline,
    Save,
    Cancel,
}

impl EditField {
    pub const ALL: [EditField; 5] = [
        Self::Question,
        Self::Options,
        Self::Deadline,
        Self::Save,
        Self::Cancel,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Question => "question",
            Self::Options => "options",
            Self::Deadline => "deadline",
            Self::Save => "save",
            Self::Cancel => "cancel",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.as_str() == value)
    }
}

/// A decoded button press.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackAction {
    SelectGroup {
        group_id: GroupId,
        thread_id: Option<ThreadId>,
    },
    EventType(EventType),
    DeadlinePreset {
        days: u32,
    },
    Confirm(bool),
    ResolveEvent(EventId),
    ResolveOption(usize),
    EditEvent(EventId),
    EditField {
        field: EditField,
        event_id: EventId,
    },
    Forum(bool),
    SkipTopic,
    ConflictResume,
    ConflictRestart(FlowKind),
    Cancel,
}

impl CallbackAction {
    pub fn parse(payload: &str) -> Result<Self, CallbackParseError> {
        let payload = payload.trim();
        if payload.is_empty() {
            return Err(CallbackParseError::Empty);
        }
        let tokens: Vec<&str> = payload.split(':').collect();
        let malformed = |reason: &'static str| CallbackParseError::Malformed {
            payload: payload.to_string(),
            reason,
        };

        let action = match tokens.as_slice() {
            ["select_group", group] => Self::SelectGroup {
                group_id: parse_number(group).ok_or_else(|| malformed("group id"))?,
                thread_id: None,
            },
            ["select_group", group, thread] => Self::SelectGroup {
                group_id: parse_number(group).ok_or_else(|| malformed("group id"))?,
                thread_id: Some(parse_number(thread).ok_or_else(|| malformed("thread id"))?),
            },
            ["event_type", token] => Self::EventType(
                EventType::from_callback_token(token).ok_or_else(|| malformed("event type"))?,
            ),
            ["deadline_preset", preset] => {
                let days = preset
                    .strip_suffix('d')
                    .and_then(parse_number::<u32>)
                    .filter(|days| DEADLINE_PRESETS.contains(days))
                    .ok_or_else(|| malformed("deadline preset"))?;
                Self::DeadlinePreset { days }
            }
            ["confirm", answer] => Self::Confirm(parse_yes_no(answer).ok_or_else(|| malformed("yes/no"))?),
            ["resolve", "option", index] => {
                Self::ResolveOption(parse_number(index).ok_or_else(|| malformed("option index"))?)
            }
            ["resolve", event] => {
                Self::ResolveEvent(parse_number(event).ok_or_else(|| malformed("event id"))?)
            }
            ["edit_event", event] => {
                Self::EditEvent(parse_number(event).ok_or_else(|| malformed("event id"))?)
            }
            ["edit_field", field, event] => Self::EditField {
                field: EditField::parse(field).ok_or_else(|| malformed("edit field"))?,
                event_id: parse_number(event).ok_or_else(|| malformed("event id"))?,
            },
            ["forum", answer] => Self::Forum(parse_yes_no(answer).ok_or_else(|| malformed("yes/no"))?),
            ["topic", "skip"] => Self::SkipTopic,
            ["conflict", "resume"] => Self::ConflictResume,
            ["conflict", "restart", kind] => {
                Self::ConflictRestart(kind.parse().map_err(|_| malformed("flow kind"))?)
            }
            ["cancel"] => Self::Cancel,
            [action, ..] => {
                return Err(if KNOWN_ACTIONS.contains(action) {
                    malformed("unexpected number of tokens")
                } else {
                    CallbackParseError::UnknownAction(action.to_string())
                })
            }
            [] => return Err(CallbackParseError::Empty),
        };
        Ok(action)
    }

    pub fn encode(&self) -> String {
        self.to_string()
    }

    /// The flow a press belongs to, when it belongs to exactly one.
    pub fn flow(&self) -> Option<FlowKind> {
        match self {
            Self::SelectGroup { .. } | Self::EventType(_) | Self::Confirm(_) => {
                Some(FlowKind::EventCreation)
            }
            Self::ResolveEvent(_) | Self::ResolveOption(_) => Some(FlowKind::EventResolution),
            Self::EditEvent(_) | Self::EditField { .. } => Some(FlowKind::EventEdit),
            Self::Forum(_) | Self::SkipTopic => Some(FlowKind::GroupRegistration),
            Self::DeadlinePreset { .. }
            | Self::ConflictResume
            | Self::ConflictRestart(_)
            | Self::Cancel => None,
        }
    }
}

const KNOWN_ACTIONS: [&str; 11] = [
    "select_group",
    "event_type",
    "deadline_preset",
    "confirm",
    "resolve",
    "edit_event",
    "edit_field",
    "forum",
    "topic",
    "conflict",
    "cancel",
];

fn parse_number<T: FromStr>(token: &str) -> Option<T> {
    token.parse().ok()
}

fn parse_yes_no(token: &str) -> Option<bool> {
    match token {
        "yes" => Some(true),
        "no" => Some(false),
        _ => None,
    }
}

fn yes_no(value: bool) -> &'static str {
    if value {
        "yes"
    } else {
        "no"
    }
}

impl fmt::Display for CallbackAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SelectGroup {
                group_id,
                thread_id: Some(thread),
            } => write!(f, "select_group:{group_id}:{thread}"),
            Self::SelectGroup {
                group_id,
                thread_id: None,
            } => write!(f, "select_group:{group_id}"),
            Self::EventType(event_type) => write!(f, "event_type:{}", event_type.callback_token()),
            Self::DeadlinePreset { days } => write!(f, "deadline_preset:{days}d"),
            Self::Confirm(answer) => write!(f, "confirm:{}", yes_no(*answer)),
            Self::ResolveEvent(event_id) => write!(f, "resolve:{event_id}"),
            Self::ResolveOption(index) => write!(f, "resolve:option:{index}"),
            Self::EditEvent(event_id) => write!(f, "edit_event:{event_id}"),
            Self::EditField { field, event_id } => {
                write!(f, "edit_field:{}:{event_id}", field.as_str())
            }
            Self::Forum(answer) => write!(f, "forum:{}", yes_no(*answer)),
            Self::SkipTopic => f.write_str("topic:skip"),
            Self::ConflictResume => f.write_str("conflict:resume"),
            Self::ConflictRestart(kind) => write!(f, "conflict:restart:{}", kind.as_str()),
            Self::Cancel => f.write_str("cancel"),
        }
    }
}

impl FromStr for CallbackAction {
    type Err = CallbackParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_documented_payloads() {
        assert_eq!(
            CallbackAction::parse("select_group:12").unwrap(),
            CallbackAction::SelectGroup {
                group_id: 12,
                thread_id: None
            }
        );
        assert_eq!(
            CallbackAction::parse("select_group:-100123:7").unwrap(),
            CallbackAction::SelectGroup {
                group_id: -100123,
                thread_id: Some(7)
            }
        );
        assert_eq!(
            CallbackAction::parse("event_type:multi").unwrap(),
            CallbackAction::EventType(EventType::MultiOption)
        );
        assert_eq!(
            CallbackAction::parse("deadline_preset:30d").unwrap(),
            CallbackAction::DeadlinePreset { days: 30 }
        );
        assert_eq!(
            CallbackAction::parse("resolve:option:2").unwrap(),
            CallbackAction::ResolveOption(2)
        );
        assert_eq!(
            CallbackAction::parse("resolve:41").unwrap(),
            CallbackAction::ResolveEvent(41)
        );
        assert_eq!(
            CallbackAction::parse("edit_field:save:9").unwrap(),
            CallbackAction::EditField {
                field: EditField::Save,
                event_id: 9
            }
        );
        assert_eq!(
            CallbackAction::parse("conflict:restart:group_creation").unwrap(),
            CallbackAction::ConflictRestart(FlowKind::GroupRegistration)
        );
    }

    #[test]
    fn rejects_malformed_payloads() {
        assert_eq!(CallbackAction::parse(""), Err(CallbackParseError::Empty));
        assert!(matches!(
            CallbackAction::parse("launch:rocket"),
            Err(CallbackParseError::UnknownAction(action)) if action == "launch"
        ));
        for bad in [
            "select_group:abc",
            "deadline_preset:5d",
            "deadline_preset:7",
            "confirm:maybe",
            "event_type:ternary",
            "edit_field:title:3",
            "resolve:option:x",
            "resolve:1:2:3",
        ] {
            assert!(
                matches!(CallbackAction::parse(bad), Err(CallbackParseError::Malformed { .. })),
                "{bad} should be malformed"
            );
        }
    }

    #[test]
    fn display_matches_parse() {
        let actions = [
            CallbackAction::SelectGroup {
                group_id: 3,
                thread_id: Some(11),
            },
            CallbackAction::DeadlinePreset { days: 365 },
            CallbackAction::Confirm(false),
            CallbackAction::EditField {
                field: EditField::Deadline,
                event_id: 5,
            },
            CallbackAction::SkipTopic,
            CallbackAction::ConflictRestart(FlowKind::EventResolution),
        ];
        for action in actions {
            assert_eq!(CallbackAction::parse(&action.encode()).unwrap(), action);
        }
    }
}
