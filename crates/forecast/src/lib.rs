//! # Forecast
//!
//! Core of a group-chat prediction market: members vote in polls on questions
//! about the future, organisers resolve them, and the bot keeps a per-group
//! leaderboard with streaks and achievements.
//!
//! ## Core Concepts
//!
//! Multi-step dialogs are **flows** whose state lives in a persisted
//! **session**, one per user:
//! - [`FlowSession`] = where a user is in a dialog (state name + JSON context)
//! - [`Decision`] = what one input does to that state, computed without IO
//!
//! The key principle: **one live dialog per user**. Starting another flow is
//! refused with a choice between resuming the old one and replacing it.
//!
//! ## Architecture
//!
//! ```text
//! Update (message / button / poll answer)
//!     │
//!     ▼
//! Bot::handle ── span(correlation_id)
//!     │
//!     ├─► command ─► ConflictDetector ─► Flow::start ─► Sessions::start
//!     │
//!     ├─► text / button ─► Sessions::get ─► Flow::handle
//!     │                                        │
//!     │                          decide(state, input) ─► Decision
//!     │                                        │
//!     │                          Conversation::step ─► Sessions::set
//!     │                                        │
//!     │                          Finish ─► EventManager / RatingCalculator
//!     │                                      / AchievementTracker
//!     │
//!     └─► poll answer ─► EventManager::record_vote ─► AchievementTracker
//! ```
//!
//! ## Key Invariants
//!
//! 1. **At most one live session per user** - the store refuses a second one
//! 2. **Sessions expire** - an expired session behaves as absent and is purged
//! 3. **Events with votes are frozen** - editing is refused once anyone voted
//! 4. **Scoring happens once** - an event is resolved at most once
//! 5. **Achievements are awarded once** - per user, group and code
//! 6. **Decisions are pure** - all IO happens in the flow handlers
//!
//! ## Example
//!
//! ```ignore
//! use forecast_core::{AdminList, Bot, ForecastConfig, MemoryStore, Services, SystemClock};
//! use std::sync::Arc;
//!
//! let config = ForecastConfig::from_env()?;
//! let services = Services::new(
//!     Arc::new(MemoryStore::new()),
//!     Arc::new(my_transport),
//!     Arc::new(AdminList::new(config.admin_ids.clone())),
//!     Arc::new(SystemClock),
//!     config,
//! );
//! let bot = Bot::new(services);
//!
//! while let Some(update) = updates.next().await {
//!     let bot = bot.clone();
//!     tokio::spawn(async move { bot.handle(update).await });
//! }
//! ```

pub mod achievements;
pub mod auth;
pub mod bot;
pub mod callback;
pub mod cleanup;
pub mod clock;
pub mod config;
pub mod conflict;
pub mod error;
pub mod event_manager;
pub mod flows;
pub mod messages;
pub mod model;
pub mod rating;
pub mod services;
pub mod session;
pub mod store;
pub mod transport;
pub mod validate;

pub use achievements::{
    Achievement, AchievementCode, AchievementNotifier, AchievementThresholds, AchievementTracker,
};
pub use auth::{AdminList, AuthorizationPolicy};
pub use bot::{Bot, CallbackQuery, Command, IncomingMessage, PollAnswer, Update};
pub use callback::{CallbackAction, CallbackParseError, EditField};
pub use cleanup::{Cleaner, CleanupPolicy, CleanupReport, RetryReport};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::ForecastConfig;
pub use conflict::{conflict_keyboard, ConflictCheck, ConflictDetector};
pub use error::{ErrorKind, ForecastError, ForecastResult, ValidationError};
pub use event_manager::{EventManager, IgnoreReason, Resolution, VoteOutcome};
pub use flows::{Actor, Decision, FlowInput, FlowOutcome, Prompt, StepEnv};
pub use model::{
    ChatId, Event, EventId, EventPatch, EventStatus, EventType, ForumTopic, Group, GroupId,
    MessageId, NewEvent, NewGroup, Options, Prediction, Rating, ScoreDelta, ThreadId, UserId,
};
pub use rating::{RatingCalculator, ScoringRules, UserStats};
pub use services::Services;
pub use session::{FlowKind, FlowSession, SessionLookup, SessionRecord, Sessions};
pub use store::{MemoryStore, Storage};
pub use transport::{Button, ChatInfo, ChatTransport, Keyboard, PollHandle, TransportError};
