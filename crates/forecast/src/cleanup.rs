//! Best-effort deletion of transient chat messages.
//!
//! Every id is attempted independently. Ids rejected with a rate limit are
//! retried exactly once on a single detached task after a backoff; whatever
//! still fails is given up. Nothing here ever fails the caller.

use crate::config::ForecastConfig;
use crate::model::{ChatId, MessageId};
use crate::transport::ChatTransport;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CleanupPolicy {
    /// Used when no rate-limited response carried a retry hint.
    pub default_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for CleanupPolicy {
    fn default() -> Self {
        Self {
            default_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl CleanupPolicy {
    pub fn from_config(config: &ForecastConfig) -> Self {
        Self {
            default_backoff: config.cleanup_backoff(),
            max_backoff: config.cleanup_max_backoff(),
        }
    }

    /// Longest hint, capped; the default when there is none.
    pub fn backoff(&self, hints: impl IntoIterator<Item = Option<Duration>>) -> Duration {
        hints
            .into_iter()
            .flatten()
            .max()
            .map_or(self.default_backoff, |hint| hint.min(self.max_backoff))
    }
}

/// Outcome of the deferred retry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetryReport {
    pub deleted: Vec<MessageId>,
    pub abandoned: Vec<MessageId>,
}

#[derive(Debug, Default)]
pub struct CleanupReport {
    pub deleted: Vec<MessageId>,
    /// Failed for a reason other than rate limiting.
    pub ignored: Vec<MessageId>,
    /// Rate limited and handed to the retry task.
    pub deferred: Vec<MessageId>,
    retry: Option<JoinHandle<RetryReport>>,
}

impl CleanupReport {
    pub fn has_pending_retry(&self) -> bool {
        self.retry.is_some()
    }

    /// Await the retry task, if one was spawned.
    pub async fn wait_for_retry(self) -> Option<RetryReport> {
        match self.retry {
            Some(handle) => handle.await.ok(),
            None => None,
        }
    }
}

#[derive(Clone)]
pub struct Cleaner {
    transport: Arc<dyn ChatTransport>,
    policy: CleanupPolicy,
}

impl Cleaner {
    pub fn new(transport: Arc<dyn ChatTransport>, policy: CleanupPolicy) -> Self {
        Self { transport, policy }
    }

    pub fn policy(&self) -> CleanupPolicy {
        self.policy
    }

    pub async fn delete_messages(&self, chat: ChatId, ids: &[MessageId]) -> CleanupReport {
        let mut report = CleanupReport::default();
        let mut hints = Vec::new();
        let mut seen = HashSet::new();

        for &id in ids.iter().filter(|id| seen.insert(**id)) {
            match self.transport.delete_message(chat, id).await {
                Ok(()) => report.deleted.push(id),
                Err(err) if err.is_rate_limit() => {
                    hints.push(err.retry_after());
                    report.deferred.push(id);
                }
                Err(err) => {
                    debug!(chat_id = chat, message_id = id, error = %err, "message not deleted");
                    report.ignored.push(id);
                }
            }
        }

        if !report.deferred.is_empty() {
            let backoff = self.policy.backoff(hints);
            debug!(
                chat_id = chat,
                count = report.deferred.len(),
                backoff_ms = backoff.as_millis() as u64,
                "deferring rate-limited deletions"
            );
            report.retry = Some(tokio::spawn(retry_once(
                self.transport.clone(),
                chat,
                report.deferred.clone(),
                backoff,
            )));
        }
        report
    }
}

async fn retry_once(
    transport: Arc<dyn ChatTransport>,
    chat: ChatId,
    ids: Vec<MessageId>,
    backoff: Duration,
) -> RetryReport {
    tokio::time::sleep(backoff).await;

    let mut report = RetryReport::default();
    for id in ids {
        match transport.delete_message(chat, id).await {
            Ok(()) => report.deleted.push(id),
            Err(err) => {
                warn!(chat_id = chat, message_id = id, error = %err, "giving up on message deletion");
                report.abandoned.push(id);
            }
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_takes_longest_hint_capped() {
        let policy = CleanupPolicy {
            default_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(10),
        };
        assert_eq!(policy.backoff([None, None]), Duration::from_secs(1));
        assert_eq!(
            policy.backoff([Some(Duration::from_secs(2)), None, Some(Duration::from_secs(4))]),
            Duration::from_secs(4)
        );
        assert_eq!(policy.backoff([Some(Duration::from_secs(60))]), Duration::from_secs(10));
    }
}
