//! Shared collaborators handed to the router and the flows.

use crate::achievements::{AchievementNotifier, AchievementTracker};
use crate::auth::AuthorizationPolicy;
use crate::cleanup::{Cleaner, CleanupPolicy};
use crate::clock::Clock;
use crate::config::ForecastConfig;
use crate::conflict::ConflictDetector;
use crate::event_manager::EventManager;
use crate::flows::StepEnv;
use crate::rating::RatingCalculator;
use crate::session::Sessions;
use crate::store::Storage;
use crate::transport::ChatTransport;
use std::sync::Arc;

/// Cheap to clone; every field is shared.
#[derive(Clone)]
pub struct Services {
    pub storage: Arc<dyn Storage>,
    pub transport: Arc<dyn ChatTransport>,
    pub auth: Arc<dyn AuthorizationPolicy>,
    pub clock: Arc<dyn Clock>,
    pub config: Arc<ForecastConfig>,
}

impl Services {
    pub fn new(
        storage: Arc<dyn Storage>,
        transport: Arc<dyn ChatTransport>,
        auth: Arc<dyn AuthorizationPolicy>,
        clock: Arc<dyn Clock>,
        config: ForecastConfig,
    ) -> Self {
        Self {
            storage,
            transport,
            auth,
            clock,
            config: Arc::new(config),
        }
    }

    pub fn sessions(&self) -> Sessions {
        Sessions::new(
            self.storage.clone(),
            self.clock.clone(),
            self.config.session_ttl(),
        )
    }

    pub fn cleaner(&self) -> Cleaner {
        Cleaner::new(
            self.transport.clone(),
            CleanupPolicy::from_config(&self.config),
        )
    }

    pub fn conflicts(&self) -> ConflictDetector {
        ConflictDetector::new(self.sessions())
    }

    pub fn events(&self) -> EventManager {
        EventManager::new(
            self.storage.clone(),
            self.transport.clone(),
            self.auth.clone(),
            self.clock.clone(),
            self.ratings(),
            self.config.min_predictions_to_create,
        )
    }

    pub fn ratings(&self) -> RatingCalculator {
        RatingCalculator::new(self.storage.clone(), self.config.scoring.clone())
    }

    pub fn achievements(&self) -> AchievementTracker {
        AchievementTracker::new(
            self.storage.clone(),
            self.clock.clone(),
            self.config.achievements.clone(),
        )
    }

    pub fn notifier(&self) -> AchievementNotifier {
        AchievementNotifier::new(self.transport.clone(), self.config.achievements.clone())
    }

    /// Inputs of the pure step functions, taken at call time.
    pub fn step_env(&self) -> StepEnv {
        StepEnv {
            now: self.clock.now(),
            offset: self.config.local_offset(),
        }
    }
}
