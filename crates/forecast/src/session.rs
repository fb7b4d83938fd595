//! Per-user flow sessions.
//!
//! A session is persisted as `(owner_id, state_name, context_json)`. The state
//! name is namespaced by flow kind (`event_creation:ask_deadline`) and the
//! context is the strongly typed payload of that flow, so decoding either part
//! against the wrong schema fails loudly instead of coercing.
//!
//! ## Invariants
//!
//! 1. **One live session per owner** - the store refuses to start a flow over a
//!    live session and refuses to overwrite a live session of another kind
//! 2. **Every write extends the lifetime** - `expires_at = now + ttl`
//! 3. **Expiry is lazy** - an expired session is purged when read and reported
//!    as [`SessionLookup::Expired`], distinct from [`SessionLookup::NotFound`]
//! 4. **Corruption is fatal** - an undecodable session is deleted and surfaces
//!    as [`ForecastError::InvalidContext`]

use crate::clock::Clock;
use crate::error::{ForecastError, ForecastResult};
use crate::flows::creation::CreationSession;
use crate::flows::edit::EditSession;
use crate::flows::registration::RegistrationSession;
use crate::flows::resolution::ResolutionSession;
use crate::model::{ChatId, MessageId, UserId};
use crate::store::Storage;
use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlowKind {
    EventCreation,
    EventEdit,
    EventResolution,
    GroupRegistration,
}

impl FlowKind {
    pub const ALL: [FlowKind; 4] = [
        Self::EventCreation,
        Self::EventEdit,
        Self::EventResolution,
        Self::GroupRegistration,
    ];

    /// Namespace used in persisted state names.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EventCreation => "event_creation",
            Self::EventEdit => "event_edit",
            Self::EventResolution => "event_resolution",
            Self::GroupRegistration => "group_creation",
        }
    }

    /// Human-readable name used in conflict and expiry messages.
    pub fn label(&self) -> &'static str {
        match self {
            Self::EventCreation => "event creation",
            Self::EventEdit => "event editing",
            Self::EventResolution => "event resolution",
            Self::GroupRegistration => "group creation",
        }
    }

    pub fn command(&self) -> &'static str {
        match self {
            Self::EventCreation => "/create_event",
            Self::EventEdit => "/edit_event",
            Self::EventResolution => "/resolve_event",
            Self::GroupRegistration => "/create_group",
        }
    }
}

impl fmt::Display for FlowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownFlowKind(pub String);

impl FromStr for FlowKind {
    type Err = UnknownFlowKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| UnknownFlowKind(s.to_string()))
    }
}

/// Flow kind encoded in the namespace of a state name.
pub fn namespace_of(state_name: &str) -> Option<FlowKind> {
    let namespace = state_name
        .split_once(':')
        .map_or(state_name, |(namespace, _)| namespace);
    namespace.parse().ok()
}

/// Chat messages produced while a step was active, removed once it completes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptTrail {
    #[serde(default)]
    pub last_bot_message_id: Option<MessageId>,
    #[serde(default)]
    pub last_user_message_id: Option<MessageId>,
    /// Error replies and the rejected inputs they answered.
    #[serde(default)]
    pub error_message_ids: Vec<MessageId>,
}

impl PromptTrail {
    /// Take every tracked id, leaving the trail empty.
    pub fn drain(&mut self) -> Vec<MessageId> {
        let mut ids: Vec<MessageId> = self.error_message_ids.drain(..).collect();
        ids.extend(self.last_user_message_id.take());
        ids.extend(self.last_bot_message_id.take());
        ids
    }

    pub fn is_empty(&self) -> bool {
        self.last_bot_message_id.is_none()
            && self.last_user_message_id.is_none()
            && self.error_message_ids.is_empty()
    }
}

/// Accessors shared by the typed per-flow sessions.
pub trait FlowState: Sized {
    const KIND: FlowKind;

    fn chat_id(&self) -> ChatId;
    fn trail(&self) -> &PromptTrail;
    fn trail_mut(&mut self) -> &mut PromptTrail;
    fn into_session(self) -> FlowSession;
}

/// The active flow of one user, one variant per flow kind.
#[derive(Debug, Clone, PartialEq)]
pub enum FlowSession {
    Creation(CreationSession),
    Edit(EditSession),
    Resolution(ResolutionSession),
    Registration(RegistrationSession),
}

impl FlowSession {
    pub fn kind(&self) -> FlowKind {
        match self {
            Self::Creation(_) => FlowKind::EventCreation,
            Self::Edit(_) => FlowKind::EventEdit,
            Self::Resolution(_) => FlowKind::EventResolution,
            Self::Registration(_) => FlowKind::GroupRegistration,
        }
    }

    pub fn chat_id(&self) -> ChatId {
        match self {
            Self::Creation(s) => s.chat_id(),
            Self::Edit(s) => s.chat_id(),
            Self::Resolution(s) => s.chat_id(),
            Self::Registration(s) => s.chat_id(),
        }
    }

    pub fn trail_mut(&mut self) -> &mut PromptTrail {
        match self {
            Self::Creation(s) => s.trail_mut(),
            Self::Edit(s) => s.trail_mut(),
            Self::Resolution(s) => s.trail_mut(),
            Self::Registration(s) => s.trail_mut(),
        }
    }

    pub fn state_name(&self) -> String {
        let step = match self {
            Self::Creation(s) => step_token(&s.step),
            Self::Edit(s) => step_token(&s.step),
            Self::Resolution(s) => step_token(&s.step),
            Self::Registration(s) => step_token(&s.step),
        };
        format!("{}:{}", self.kind().as_str(), step)
    }

    /// Split into the persisted `(state_name, context)` pair.
    pub fn encode(&self) -> Result<(String, Value), serde_json::Error> {
        let context = match self {
            Self::Creation(s) => serde_json::to_value(&s.context)?,
            Self::Edit(s) => serde_json::to_value(&s.context)?,
            Self::Resolution(s) => serde_json::to_value(&s.context)?,
            Self::Registration(s) => serde_json::to_value(&s.context)?,
        };
        Ok((self.state_name(), context))
    }

    pub fn decode(state_name: &str, context: &Value) -> Result<Self, String> {
        let (namespace, step) = state_name
            .split_once(':')
            .ok_or_else(|| format!("state name '{state_name}' has no flow namespace"))?;
        let kind: FlowKind = namespace
            .parse()
            .map_err(|UnknownFlowKind(k)| format!("unknown flow kind '{k}'"))?;

        let session = match kind {
            FlowKind::EventCreation => Self::Creation(CreationSession {
                step: parse_step(step)?,
                context: parse_context(context)?,
            }),
            FlowKind::EventEdit => Self::Edit(EditSession {
                step: parse_step(step)?,
                context: parse_context(context)?,
            }),
            FlowKind::EventResolution => Self::Resolution(ResolutionSession {
                step: parse_step(step)?,
                context: parse_context(context)?,
            }),
            FlowKind::GroupRegistration => Self::Registration(RegistrationSession {
                step: parse_step(step)?,
                context: parse_context(context)?,
            }),
        };
        Ok(session)
    }
}

fn step_token<S: Serialize>(step: &S) -> String {
    match serde_json::to_value(step) {
        Ok(Value::String(token)) => token,
        Ok(other) => other.to_string(),
        Err(err) => format!("unserializable({err})"),
    }
}

fn parse_step<S: DeserializeOwned>(token: &str) -> Result<S, String> {
    serde_json::from_value(Value::String(token.to_string()))
        .map_err(|err| format!("unknown step '{token}': {err}"))
}

fn parse_context<C: DeserializeOwned>(context: &Value) -> Result<C, String> {
    serde_json::from_value(context.clone()).map_err(|err| format!("invalid context: {err}"))
}

/// A session row as the store persists it.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionRecord {
    pub owner_id: UserId,
    pub state_name: String,
    pub context: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl SessionRecord {
    pub fn flow_kind(&self) -> Option<FlowKind> {
        namespace_of(&self.state_name)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Whether `incoming` may replace this record under `mode`.
    pub fn admits(&self, incoming: &SessionRecord, mode: SaveMode, now: DateTime<Utc>) -> bool {
        if self.is_expired(now) {
            return true;
        }
        match mode {
            SaveMode::Create => false,
            SaveMode::Update => self.flow_kind() == incoming.flow_kind(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveMode {
    /// Begin a flow; any live session blocks the write.
    Create,
    /// Advance a flow; only a live session of another kind blocks the write.
    Update,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    Saved,
    Conflict { existing_state: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionLookup {
    Active(FlowSession),
    NotFound,
    Expired(FlowKind),
}

impl SessionLookup {
    /// The live session, or the error that explains why there is none.
    pub fn into_active(self) -> ForecastResult<FlowSession> {
        match self {
            Self::Active(session) => Ok(session),
            Self::NotFound => Err(ForecastError::SessionNotFound),
            Self::Expired(flow) => Err(ForecastError::SessionExpired { flow }),
        }
    }
}

enum Loaded {
    Live(SessionRecord),
    Expired(Option<FlowKind>),
    Missing,
}

/// Typed access to the session table.
#[derive(Clone)]
pub struct Sessions {
    store: Arc<dyn Storage>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

impl Sessions {
    pub fn new(store: Arc<dyn Storage>, clock: Arc<dyn Clock>, ttl: Duration) -> Self {
        Self { store, clock, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub async fn get(&self, owner: UserId) -> ForecastResult<SessionLookup> {
        let record = match self.load(owner).await? {
            Loaded::Live(record) => record,
            Loaded::Expired(Some(kind)) => return Ok(SessionLookup::Expired(kind)),
            Loaded::Expired(None) | Loaded::Missing => return Ok(SessionLookup::NotFound),
        };

        match FlowSession::decode(&record.state_name, &record.context) {
            Ok(session) => Ok(SessionLookup::Active(session)),
            Err(reason) => {
                warn!(
                    user_id = owner,
                    state = %record.state_name,
                    %reason,
                    "dropping corrupted session"
                );
                self.store.delete_session(owner).await?;
                Err(ForecastError::InvalidContext { reason })
            }
        }
    }

    /// The live record without decoding its context. Purges an expired one.
    pub async fn peek(&self, owner: UserId) -> ForecastResult<Option<SessionRecord>> {
        match self.load(owner).await? {
            Loaded::Live(record) => Ok(Some(record)),
            Loaded::Expired(_) | Loaded::Missing => Ok(None),
        }
    }

    async fn load(&self, owner: UserId) -> ForecastResult<Loaded> {
        let Some(record) = self.store.load_session(owner).await? else {
            return Ok(Loaded::Missing);
        };
        if record.is_expired(self.clock.now()) {
            debug!(user_id = owner, state = %record.state_name, "purging expired session");
            self.store.delete_session(owner).await?;
            return Ok(Loaded::Expired(record.flow_kind()));
        }
        Ok(Loaded::Live(record))
    }

    /// Persist the first state of a flow.
    pub async fn start(&self, owner: UserId, session: &FlowSession) -> ForecastResult<()> {
        self.write(owner, session, SaveMode::Create).await
    }

    /// Persist a transition of the caller's current flow.
    pub async fn set(&self, owner: UserId, session: &FlowSession) -> ForecastResult<()> {
        self.write(owner, session, SaveMode::Update).await
    }

    pub async fn delete(&self, owner: UserId) -> ForecastResult<()> {
        self.store.delete_session(owner).await?;
        Ok(())
    }

    async fn write(&self, owner: UserId, session: &FlowSession, mode: SaveMode) -> ForecastResult<()> {
        let (state_name, context) = session
            .encode()
            .map_err(|err| ForecastError::InvalidContext {
                reason: err.to_string(),
            })?;
        let now = self.clock.now();
        let record = SessionRecord {
            owner_id: owner,
            state_name,
            context,
            created_at: now,
            updated_at: now,
            expires_at: now + self.ttl,
        };

        match self.store.save_session(record, mode, now).await? {
            SaveOutcome::Saved => Ok(()),
            SaveOutcome::Conflict { existing_state } => Err(ForecastError::SessionConflict {
                existing: namespace_of(&existing_state).unwrap_or(session.kind()),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flows::creation::{CreationContext, CreationStep};
    use crate::model::EventType;
    use serde_json::json;

    fn creation() -> FlowSession {
        FlowSession::Creation(CreationSession {
            step: CreationStep::AskDeadline,
            context: CreationContext {
                chat_id: 42,
                group_id: Some(3),
                question: Some("Will it rain?".into()),
                event_type: Some(EventType::Binary),
                options: EventType::Binary.fixed_options().unwrap_or_default(),
                ..CreationContext::default()
            },
        })
    }

    #[test]
    fn state_name_is_namespaced() {
        assert_eq!(creation().state_name(), "event_creation:ask_deadline");
        assert_eq!(namespace_of("group_creation:ask_topic"), Some(FlowKind::GroupRegistration));
        assert_eq!(namespace_of("garbage"), None);
    }

    #[test]
    fn encode_then_decode_preserves_session() {
        let session = creation();
        let (state, context) = session.encode().unwrap();
        assert_eq!(FlowSession::decode(&state, &context).unwrap(), session);
    }

    #[test]
    fn decode_rejects_mismatched_schema() {
        assert!(FlowSession::decode("event_creation:ask_question", &json!({"chat_id": "x"})).is_err());
        assert!(FlowSession::decode("event_creation:fly_away", &json!({"chat_id": 1})).is_err());
        assert!(FlowSession::decode("group_creation:ask_name", &json!([1, 2])).is_err());
        assert!(FlowSession::decode("no_namespace", &json!({})).is_err());
    }

    #[test]
    fn trail_drain_empties() {
        let mut trail = PromptTrail {
            last_bot_message_id: Some(10),
            last_user_message_id: Some(11),
            error_message_ids: vec![12, 13],
        };
        let mut ids = trail.drain();
        ids.sort_unstable();
        assert_eq!(ids, vec![10, 11, 12, 13]);
        assert!(trail.is_empty());
    }

    #[test]
    fn admits_follows_mode() {
        let now = Utc::now();
        let existing = SessionRecord {
            owner_id: 1,
            state_name: "event_creation:ask_question".into(),
            context: json!({}),
            created_at: now,
            updated_at: now,
            expires_at: now + Duration::minutes(5),
        };
        let same = existing.clone();
        let other = SessionRecord {
            state_name: "group_creation:ask_name".into(),
            ..existing.clone()
        };
        assert!(existing.admits(&same, SaveMode::Update, now));
        assert!(!existing.admits(&other, SaveMode::Update, now));
        assert!(!existing.admits(&same, SaveMode::Create, now));
        assert!(existing.admits(&other, SaveMode::Create, now + Duration::minutes(6)));
    }
}
