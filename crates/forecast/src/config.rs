//! Runtime configuration.
//!
//! Every field has a default so a bare environment yields a working setup.
//! Values can also be supplied as JSON (e.g. from a config file).

use crate::achievements::AchievementThresholds;
use crate::model::UserId;
use crate::rating::ScoringRules;
use anyhow::{Context, Result};
use chrono::{FixedOffset, Offset, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

pub const ENV_SESSION_TTL_MINUTES: &str = "FORECAST_SESSION_TTL_MINUTES";
pub const ENV_ADMIN_IDS: &str = "FORECAST_ADMIN_IDS";
pub const ENV_MIN_PREDICTIONS: &str = "FORECAST_MIN_PREDICTIONS_TO_CREATE";
pub const ENV_UTC_OFFSET_MINUTES: &str = "FORECAST_UTC_OFFSET_MINUTES";
pub const ENV_CLEANUP_BACKOFF_MS: &str = "FORECAST_CLEANUP_BACKOFF_MS";
pub const ENV_CLEANUP_MAX_BACKOFF_MS: &str = "FORECAST_CLEANUP_MAX_BACKOFF_MS";
pub const ENV_LEADERBOARD_SIZE: &str = "FORECAST_LEADERBOARD_SIZE";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForecastConfig {
    /// Lifetime of a flow session, refreshed on every transition.
    pub session_ttl_minutes: i64,
    pub admin_ids: Vec<UserId>,
    /// Predictions a non-admin must have recorded before creating events.
    pub min_predictions_to_create: u64,
    /// Offset of the local time used to read and print deadlines.
    pub utc_offset_minutes: i32,
    /// Backoff before the single cleanup retry when the API gives no hint.
    pub cleanup_backoff_ms: u64,
    /// Upper bound applied to the API's retry hint.
    pub cleanup_max_backoff_ms: u64,
    pub leaderboard_size: usize,
    pub scoring: ScoringRules,
    pub achievements: AchievementThresholds,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            session_ttl_minutes: 30,
            admin_ids: Vec::new(),
            min_predictions_to_create: 3,
            utc_offset_minutes: 0,
            cleanup_backoff_ms: 1_000,
            cleanup_max_backoff_ms: 30_000,
            leaderboard_size: 10,
            scoring: ScoringRules::default(),
            achievements: AchievementThresholds::default(),
        }
    }
}

impl ForecastConfig {
    /// Defaults overridden by whichever `FORECAST_*` variables are set.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(raw).context("invalid forecast config JSON")?;
        config.validate()?;
        Ok(config)
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(ttl) = parse_var(&lookup, ENV_SESSION_TTL_MINUTES)? {
            config.session_ttl_minutes = ttl;
        }
        if let Some(raw) = lookup(ENV_ADMIN_IDS) {
            config.admin_ids = parse_id_list(&raw)
                .with_context(|| format!("{ENV_ADMIN_IDS} must be a comma-separated id list"))?;
        }
        if let Some(min) = parse_var(&lookup, ENV_MIN_PREDICTIONS)? {
            config.min_predictions_to_create = min;
        }
        if let Some(offset) = parse_var(&lookup, ENV_UTC_OFFSET_MINUTES)? {
            config.utc_offset_minutes = offset;
        }
        if let Some(backoff) = parse_var(&lookup, ENV_CLEANUP_BACKOFF_MS)? {
            config.cleanup_backoff_ms = backoff;
        }
        if let Some(max) = parse_var(&lookup, ENV_CLEANUP_MAX_BACKOFF_MS)? {
            config.cleanup_max_backoff_ms = max;
        }
        if let Some(size) = parse_var(&lookup, ENV_LEADERBOARD_SIZE)? {
            config.leaderboard_size = size;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.session_ttl_minutes > 0, "session TTL must be positive");
        anyhow::ensure!(
            FixedOffset::east_opt(self.utc_offset_minutes * 60).is_some(),
            "UTC offset of {} minutes is out of range",
            self.utc_offset_minutes
        );
        anyhow::ensure!(
            self.cleanup_backoff_ms <= self.cleanup_max_backoff_ms,
            "cleanup backoff exceeds its maximum"
        );
        Ok(())
    }

    pub fn session_ttl(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.session_ttl_minutes)
    }

    pub fn local_offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_minutes * 60)
            .unwrap_or_else(|| Utc.fix())
    }

    pub fn cleanup_backoff(&self) -> Duration {
        Duration::from_millis(self.cleanup_backoff_ms)
    }

    pub fn cleanup_max_backoff(&self) -> Duration {
        Duration::from_millis(self.cleanup_max_backoff_ms)
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    lookup(name)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .with_context(|| format!("{name} has invalid value '{raw}'"))
        })
        .transpose()
}

fn parse_id_list(raw: &str) -> Result<Vec<UserId>> {
    raw.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| part.parse::<UserId>().map_err(Into::into))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn empty_environment_gives_defaults() {
        let config = ForecastConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, ForecastConfig::default());
        assert_eq!(config.session_ttl(), chrono::Duration::minutes(30));
    }

    #[test]
    fn environment_overrides() {
        let config = ForecastConfig::from_lookup(lookup(&[
            (ENV_ADMIN_IDS, "10, 20,,30"),
            (ENV_UTC_OFFSET_MINUTES, "180"),
            (ENV_SESSION_TTL_MINUTES, "15"),
        ]))
        .unwrap();
        assert_eq!(config.admin_ids, vec![10, 20, 30]);
        assert_eq!(config.local_offset().local_minus_utc(), 3 * 3600);
        assert_eq!(config.session_ttl_minutes, 15);
    }

    #[test]
    fn invalid_values_are_reported() {
        let err = ForecastConfig::from_lookup(lookup(&[(ENV_LEADERBOARD_SIZE, "ten")])).unwrap_err();
        assert!(err.to_string().contains(ENV_LEADERBOARD_SIZE));
        assert!(ForecastConfig::from_lookup(lookup(&[(ENV_SESSION_TTL_MINUTES, "0")])).is_err());
    }

    #[test]
    fn json_fills_missing_fields() {
        let config = ForecastConfig::from_json(r#"{"min_predictions_to_create": 0, "scoring": {"wrong_penalty": -5}}"#)
            .unwrap();
        assert_eq!(config.min_predictions_to_create, 0);
        assert_eq!(config.scoring.wrong_penalty, -5);
        assert_eq!(config.scoring.multi_option_base, ScoringRules::default().multi_option_base);
    }
}
