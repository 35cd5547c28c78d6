// Freshness polling.
// Watches the backend's last-updated timestamp and refetches a session when it moves forward.

use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::session::WeakSession;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Unchanged,
    Refetched,
    /// Session gone, cancelled, or the timestamp endpoint gave up.
    Stopped,
}

/// True when `observed` is strictly newer than what the session has seen.
pub fn is_newer(seen: Option<DateTime<Utc>>, observed: DateTime<Utc>) -> bool {
    seen.is_none_or(|seen| observed > seen)
}

/// Best-effort poller bound to one request generation of a session.
///
/// Holds only a weak handle, so a dropped session ends the poller on its
/// next tick.
pub struct FreshnessPoller {
    session: WeakSession,
    generation: u64,
    interval: Duration,
    cancel: CancellationToken,
}

impl FreshnessPoller {
    pub(crate) fn new(
        session: WeakSession,
        generation: u64,
        interval: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            session,
            generation,
            interval,
            cancel,
        }
    }

    /// Record the current timestamp as the baseline.
    pub async fn prime(&self) -> bool {
        let Some(session) = self.session.upgrade() else {
            return false;
        };
        match session.fetch_last_updated().await {
            Ok(Some(ts)) => {
                session.record_last_updated(self.generation, ts).await;
                true
            }
            Ok(None) => {
                debug!("no last-updated timestamp, freshness polling off");
                false
            }
            Err(error) => {
                debug!(%error, "last-updated fetch failed, freshness polling off");
                false
            }
        }
    }

    /// One tick: fetch the timestamp and refetch if it moved forward.
    pub async fn check_once(&self) -> PollOutcome {
        if self.cancel.is_cancelled() {
            return PollOutcome::Stopped;
        }
        let Some(session) = self.session.upgrade() else {
            return PollOutcome::Stopped;
        };
        let observed = match session.fetch_last_updated().await {
            Ok(Some(ts)) => ts,
            Ok(None) | Err(_) => return PollOutcome::Stopped,
        };
        if !is_newer(session.last_updated_seen().await, observed) {
            return PollOutcome::Unchanged;
        }

        debug!(%observed, "data updated upstream, refetching");
        session.refetch_silently().await;
        session.record_last_updated(self.generation, observed).await;
        PollOutcome::Refetched
    }

    /// Prime, then check every interval until stopped.
    ///
    /// Boxed because the poller refetches through the session that spawns it.
    pub fn run(self) -> BoxFuture<'static, ()> {
        async move {
            if !self.prime().await {
                return;
            }
            loop {
                tokio::select! {
                    _ = self.cancel.cancelled() => return,
                    _ = tokio::time::sleep(self.interval) => {}
                }
                if self.check_once().await == PollOutcome::Stopped {
                    return;
                }
            }
        }
        .boxed()
    }
}
