//! Lifecycle of events: creation, pre-vote edits, resolution and votes.
//!
//! Every mutation re-validates its preconditions against storage, so a flow
//! that checked them earlier in the conversation cannot act on stale state.

use crate::auth::AuthorizationPolicy;
use crate::clock::Clock;
use crate::error::{ForecastError, ForecastResult, ValidationError};
use crate::model::{
    Event, EventId, EventPatch, EventStatus, EventType, Group, GroupId, NewEvent, Prediction,
    ScoreDelta, UserId,
};
use crate::rating::RatingCalculator;
use crate::store::Storage;
use crate::transport::ChatTransport;
use crate::validate;
use anyhow::anyhow;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    UnknownPoll,
    Resolved,
    DeadlinePassed,
    OptionOutOfRange,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoteOutcome {
    Recorded { event_id: EventId, group_id: GroupId },
    Retracted { event_id: EventId },
    Ignored(IgnoreReason),
}

/// A resolved event and the score change of every voter.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub event: Event,
    pub deltas: Vec<ScoreDelta>,
}

pub struct EventManager {
    storage: Arc<dyn Storage>,
    transport: Arc<dyn ChatTransport>,
    auth: Arc<dyn AuthorizationPolicy>,
    clock: Arc<dyn Clock>,
    ratings: RatingCalculator,
    min_predictions_to_create: u64,
}

impl EventManager {
    pub fn new(
        storage: Arc<dyn Storage>,
        transport: Arc<dyn ChatTransport>,
        auth: Arc<dyn AuthorizationPolicy>,
        clock: Arc<dyn Clock>,
        ratings: RatingCalculator,
        min_predictions_to_create: u64,
    ) -> Self {
        Self {
            storage,
            transport,
            auth,
            clock,
            ratings,
            min_predictions_to_create,
        }
    }

    /// Non-admins must have voted enough before they may create events.
    pub async fn check_participation(&self, user: UserId) -> ForecastResult<()> {
        if self.auth.is_admin(user) {
            return Ok(());
        }
        let recorded = self.storage.count_user_predictions(user, None).await?;
        if recorded < self.min_predictions_to_create {
            return Err(ForecastError::InsufficientParticipation {
                recorded,
                required: self.min_predictions_to_create,
            });
        }
        Ok(())
    }

    pub async fn create_event(&self, new: NewEvent) -> ForecastResult<Event> {
        validate::question(&new.question)?;
        validate::options_for(new.event_type, &new.options)?;
        validate::future(new.deadline, self.clock.now())?;

        let event = self.storage.insert_event(new, self.clock.now()).await?;
        info!(
            event_id = event.id,
            group_id = event.group_id,
            created_by = event.created_by,
            event_type = %event.event_type,
            "event created"
        );
        Ok(event)
    }

    /// Send the poll for `event` and store its reference.
    pub async fn publish(&self, event: &Event) -> ForecastResult<Event> {
        let group = self.group_of(event).await?;
        let poll = self
            .transport
            .send_poll(
                group.chat_id,
                event.forum_topic_id,
                &event.question,
                event.options.as_slice(),
            )
            .await?;
        self.storage
            .set_poll_reference(event.id, &poll.poll_id, poll.message_id)
            .await?;
        debug!(event_id = event.id, poll_id = %poll.poll_id, "poll published");
        Ok(Event {
            poll_id: Some(poll.poll_id),
            poll_message_id: Some(poll.message_id),
            ..event.clone()
        })
    }

    pub async fn event(&self, id: EventId) -> ForecastResult<Event> {
        self.storage
            .event(id)
            .await?
            .ok_or(ForecastError::EventNotFound(id))
    }

    pub async fn group_of(&self, event: &Event) -> ForecastResult<Group> {
        self.storage
            .group(event.group_id)
            .await?
            .ok_or_else(|| anyhow!("group {} of event {} is missing", event.group_id, event.id).into())
    }

    /// The event, provided `user` may edit it now.
    pub async fn ensure_editable(&self, user: UserId, id: EventId) -> ForecastResult<Event> {
        let event = self.ensure_manageable(user, id).await?;
        if self.storage.count_predictions_for_event(id).await? > 0 {
            return Err(ForecastError::EventHasVotes(id));
        }
        Ok(event)
    }

    async fn ensure_manageable(&self, user: UserId, id: EventId) -> ForecastResult<Event> {
        let event = self.event(id).await?;
        if !event.is_active() {
            return Err(ForecastError::EventAlreadyResolved(id));
        }
        if !self.auth.can_manage(user, &event) {
            return Err(ForecastError::unauthorized(
                "only the creator or an admin can change this event",
            ));
        }
        Ok(event)
    }

    /// Apply `patch` and republish the poll when its question or options changed.
    pub async fn edit_event(
        &self,
        user: UserId,
        id: EventId,
        patch: EventPatch,
    ) -> ForecastResult<Event> {
        let mut event = self.ensure_editable(user, id).await?;
        if patch.is_empty() {
            return Ok(event);
        }

        if let Some(question) = &patch.question {
            event.question = validate::question(question)?;
        }
        if let Some(options) = &patch.options {
            if event.event_type != EventType::MultiOption {
                return Err(ValidationError::OptionsFixed.into());
            }
            validate::options_for(event.event_type, options)?;
            event.options = options.clone();
        }
        if let Some(deadline) = patch.deadline {
            event.deadline = validate::future(deadline, self.clock.now())?;
        }

        self.storage.update_event(&event).await?;
        info!(event_id = id, user_id = user, "event edited");

        if patch.touches_poll() {
            self.stop_poll(&event).await;
            event = self.publish(&event).await?;
        }
        Ok(event)
    }

    /// Active events `user` may resolve.
    pub async fn manageable_events(&self, user: UserId) -> ForecastResult<Vec<Event>> {
        let events = self.storage.active_events(None).await?;
        Ok(events
            .into_iter()
            .filter(|event| self.auth.can_manage(user, event))
            .collect())
    }

    /// Active events `user` may edit, i.e. without votes.
    pub async fn editable_events(&self, user: UserId) -> ForecastResult<Vec<Event>> {
        let mut editable = Vec::new();
        for event in self.manageable_events(user).await? {
            if self.storage.count_predictions_for_event(event.id).await? == 0 {
                editable.push(event);
            }
        }
        Ok(editable)
    }

    /// Resolve the event to `option` and score every vote.
    ///
    /// The status change and the rating updates are one storage write: on
    /// failure the event stays active and can be resolved again.
    pub async fn resolve_event(
        &self,
        user: UserId,
        id: EventId,
        option: usize,
    ) -> ForecastResult<Resolution> {
        let event = self.ensure_manageable(user, id).await?;
        let deltas = self.ratings.calculate_scores(&event, option).await?;

        let now = self.clock.now();
        if !self
            .storage
            .apply_resolution(&event, option, &deltas, now)
            .await?
        {
            return Err(ForecastError::EventAlreadyResolved(id));
        }
        info!(
            event_id = id,
            group_id = event.group_id,
            user_id = user,
            option,
            voters = deltas.len(),
            correct = deltas.iter().filter(|d| d.correct).count(),
            "event resolved"
        );
        Ok(Resolution {
            event: Event {
                status: EventStatus::Resolved,
                resolved_option: Some(option),
                resolved_at: Some(now),
                ..event
            },
            deltas,
        })
    }

    /// Close the published poll. Failures are logged only.
    pub async fn stop_poll(&self, event: &Event) {
        let Some(message_id) = event.poll_message_id else {
            return;
        };
        let chat = match self.group_of(event).await {
            Ok(group) => group.chat_id,
            Err(err) => {
                warn!(event_id = event.id, error = %err, "cannot stop poll");
                return;
            }
        };
        if let Err(err) = self.transport.stop_poll(chat, message_id).await {
            warn!(event_id = event.id, error = %err, "failed to stop poll");
        }
    }

    /// Record a poll answer. An empty `option_ids` retracts the vote.
    pub async fn record_vote(
        &self,
        poll_id: &str,
        user: UserId,
        display_name: Option<String>,
        option_ids: &[usize],
    ) -> ForecastResult<VoteOutcome> {
        let Some(event) = self.storage.event_by_poll(poll_id).await? else {
            debug!(poll_id, "answer for unknown poll");
            return Ok(VoteOutcome::Ignored(IgnoreReason::UnknownPoll));
        };
        if !event.is_active() {
            return Ok(VoteOutcome::Ignored(IgnoreReason::Resolved));
        }
        let now = self.clock.now();
        if event.deadline_passed(now) {
            debug!(event_id = event.id, user_id = user, "vote after deadline");
            return Ok(VoteOutcome::Ignored(IgnoreReason::DeadlinePassed));
        }

        let Some(&option_index) = option_ids.first() else {
            self.storage.delete_prediction(event.id, user).await?;
            return Ok(VoteOutcome::Retracted { event_id: event.id });
        };
        if option_index >= event.options.len() {
            return Ok(VoteOutcome::Ignored(IgnoreReason::OptionOutOfRange));
        }

        self.storage
            .upsert_prediction(Prediction {
                event_id: event.id,
                user_id: user,
                option_index,
                display_name,
                recorded_at: now,
            })
            .await?;
        self.storage.add_member(user, event.group_id).await?;
        debug!(event_id = event.id, user_id = user, option_index, "vote recorded");
        Ok(VoteOutcome::Recorded {
            event_id: event.id,
            group_id: event.group_id,
        })
    }

    /// Vote count per option.
    pub async fn tally(&self, event: &Event) -> ForecastResult<Vec<u64>> {
        let mut counts = vec![0u64; event.options.len()];
        for prediction in self.storage.predictions_for_event(event.id).await? {
            if let Some(count) = counts.get_mut(prediction.option_index) {
                *count += 1;
            }
        }
        Ok(counts)
    }
}
