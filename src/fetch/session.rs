// Fetch sessions.
// One logical request driven through the cache, the coalescer and the retry state machine.

use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::freshness::FreshnessPoller;
use super::layer::LayerShared;
use super::retry::{Attempt, AttemptPolicy, Step};
use super::state::{FetchPhase, FetchState, LoadingState};
use crate::api::{DataRequest, DataSource};
use crate::error::{FetchError, FetchResult};
use crate::pagination::Page;

struct SessionState {
    request: DataRequest,
    fetch: FetchState,
    value: Option<Arc<Value>>,
    /// Bumped on every request change; work started under an older
    /// generation must not touch the state.
    generation: u64,
    /// Cancels the loads, pollers and count fetches of this generation.
    generation_cancel: CancellationToken,
    poller_started: bool,
    count_pending: bool,
}

pub(crate) struct SessionInner {
    layer: Arc<LayerShared>,
    state: Mutex<SessionState>,
    run_lock: Mutex<()>,
    cancel: CancellationToken,
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// A logical request (data key, cursor, date range) and its fetch state.
///
/// Loads on one session are serialized; identical requests from different
/// sessions share one network call through the coalescer. After the first
/// success a session never reports an error again: later failures keep the
/// last good value.
#[derive(Clone)]
pub struct FetchSession {
    inner: Arc<SessionInner>,
}

/// Non-owning handle used by background tasks.
#[derive(Clone)]
pub struct WeakSession(Weak<SessionInner>);

impl WeakSession {
    pub fn upgrade(&self) -> Option<FetchSession> {
        self.0.upgrade().map(|inner| FetchSession { inner })
    }
}

/// Item-count fetch detached from the session, so a background run does
/// not keep the session alive.
struct CountJob {
    data_key: String,
    generation: u64,
    cancel: CancellationToken,
    source: Arc<dyn DataSource>,
    policy: AttemptPolicy,
}

impl CountJob {
    async fn run(&self) -> FetchResult<u64> {
        self.policy
            .run(&self.cancel, |timeout| {
                let source = Arc::clone(&self.source);
                let data_key = self.data_key.clone();
                async move {
                    match source.item_count(&data_key, timeout).await {
                        Ok(Some(total)) => Ok(total),
                        Ok(None) => Err(FetchError::EmptyResponse),
                        Err(e) => Err(e),
                    }
                }
            })
            .await
    }
}

impl FetchSession {
    pub(crate) fn new(layer: Arc<LayerShared>, request: DataRequest) -> Self {
        let cancel = layer.cancel.child_token();
        let fetch = FetchState::new(request.cache_key(), layer.profile.initial_retry_delay);
        let state = SessionState {
            request,
            fetch,
            value: None,
            generation: 0,
            generation_cancel: cancel.child_token(),
            poller_started: false,
            count_pending: false,
        };
        Self {
            inner: Arc::new(SessionInner {
                layer,
                state: Mutex::new(state),
                run_lock: Mutex::new(()),
                cancel,
            }),
        }
    }

    pub fn downgrade(&self) -> WeakSession {
        WeakSession(Arc::downgrade(&self.inner))
    }

    /// Read the current request: cache first, then the network with retries.
    pub async fn load(&self) -> FetchResult<Arc<Value>> {
        let _running = self.inner.run_lock.lock().await;

        let (request, generation, cancel) = {
            let mut state = self.inner.state.lock().await;
            if state.generation_cancel.is_cancelled() {
                return Err(FetchError::Cancelled);
            }
            state.fetch.is_fetching = true;
            state.fetch.phase = FetchPhase::Fetching;
            (
                state.request.clone(),
                state.generation,
                state.generation_cancel.clone(),
            )
        };

        let key = request.cache_key();
        let result = self.run_attempts(&request, &key, generation, &cancel).await;
        self.finish(&request, generation, &result).await;
        result
    }

    async fn run_attempts(
        &self,
        request: &DataRequest,
        key: &str,
        generation: u64,
        cancel: &CancellationToken,
    ) -> FetchResult<Arc<Value>> {
        let layer = &self.inner.layer;
        loop {
            if let Some(hit) = layer.cache.get(key).await {
                let mut state = self.inner.state.lock().await;
                if state.generation != generation {
                    return Err(FetchError::Cancelled);
                }
                state.fetch.phase = FetchPhase::Success;
                state.fetch.has_succeeded_once = true;
                return Ok(hit);
            }

            let attempt = tokio::select! {
                _ = cancel.cancelled() => return Err(FetchError::Cancelled),
                result = self.attempt(request, key) => Attempt::classify(result),
            };

            let step = {
                let mut state = self.inner.state.lock().await;
                if state.generation != generation {
                    return Err(FetchError::Cancelled);
                }
                layer.scheduler.on_attempt(&mut state.fetch, attempt)
            };

            match step {
                Step::Succeeded(value) => {
                    let value = Arc::new(value);
                    layer.cache.set(key, Arc::clone(&value)).await;
                    return Ok(value);
                }
                Step::RetryAfter(delay) => {
                    debug!(key, ?delay, "response not ready, retrying");
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(FetchError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Step::Fail(error) => {
                    warn!(key, %error, "fetch failed");
                    return Err(error);
                }
                Step::KeepStale(error) => {
                    debug!(key, %error, "refresh failed, keeping last good value");
                    let state = self.inner.state.lock().await;
                    return state.value.clone().ok_or(error);
                }
            }
        }
    }

    /// One network call, shared with any identical call already in flight.
    async fn attempt(&self, request: &DataRequest, key: &str) -> FetchResult<Value> {
        let layer = &self.inner.layer;
        let source = Arc::clone(&layer.source);
        let request = request.clone();
        let timeout = layer.profile.request_timeout;
        layer
            .coalescer
            .coalesce(key, move || async move { source.fetch(&request, timeout).await })
            .await
    }

    async fn finish(&self, request: &DataRequest, generation: u64, result: &FetchResult<Arc<Value>>) {
        let (start_poller, fetch_count) = {
            let mut state = self.inner.state.lock().await;
            if state.generation != generation {
                return;
            }
            state.fetch.is_fetching = false;
            match result {
                Ok(value) => {
                    state.value = Some(Arc::clone(value));
                    let start_poller = !state.poller_started;
                    state.poller_started = true;
                    let fetch_count = !state.count_pending
                        && request.cursor().is_some_and(|c| c.total_count().is_none());
                    if fetch_count {
                        state.count_pending = true;
                    }
                    (start_poller, fetch_count)
                }
                Err(FetchError::Cancelled) => {
                    if !state.fetch.phase.is_terminal() {
                        state.fetch.phase = FetchPhase::Idle;
                    }
                    (false, false)
                }
                Err(_) => (false, false),
            }
        };

        if fetch_count {
            let job = self.count_job().await;
            let session = self.downgrade();
            tokio::spawn(async move {
                let result = job.run().await;
                if let Some(session) = session.upgrade() {
                    session.store_total(&job, result).await;
                }
            });
        }
        if start_poller {
            if let Some(interval) = self.inner.layer.profile.freshness_interval {
                let poller = self.freshness_poller(interval).await;
                tokio::spawn(poller.run());
            }
        }
    }

    /// Fetch the item count for the session's data key and store it on the
    /// cursor. Failure leaves the total unknown; the page itself is unaffected.
    pub async fn refresh_total_count(&self) -> Option<u64> {
        let job = self.count_job().await;
        let result = job.run().await;
        self.store_total(&job, result).await
    }

    async fn count_job(&self) -> CountJob {
        let state = self.inner.state.lock().await;
        CountJob {
            data_key: state.request.bare_key().to_string(),
            generation: state.generation,
            cancel: state.generation_cancel.clone(),
            source: Arc::clone(&self.inner.layer.source),
            policy: AttemptPolicy::item_count(&self.inner.layer.profile),
        }
    }

    async fn store_total(&self, job: &CountJob, result: FetchResult<u64>) -> Option<u64> {
        let mut state = self.inner.state.lock().await;
        if state.generation == job.generation {
            state.count_pending = false;
        }
        match result {
            Ok(total) => {
                if state.request.bare_key() == job.data_key {
                    if let Some(cursor) = state.request.cursor_mut() {
                        cursor.set_total_count(Some(total));
                    }
                }
                Some(total)
            }
            Err(error) => {
                warn!(data_key = %job.data_key, %error, "item count unavailable");
                None
            }
        }
    }

    /// Replace the request. A different cache key resets the fetch state,
    /// drops the value and cancels work started for the old request.
    pub async fn set_request(&self, request: DataRequest) -> bool {
        let mut state = self.inner.state.lock().await;
        if state.request.cache_key() == request.cache_key() {
            return false;
        }
        state.generation_cancel.cancel();
        state.generation_cancel = self.inner.cancel.child_token();
        state.generation += 1;
        state.fetch = FetchState::new(
            request.cache_key(),
            self.inner.layer.profile.initial_retry_delay,
        );
        state.value = None;
        state.poller_started = false;
        state.count_pending = false;
        state.request = request;
        true
    }

    /// Sort by `key` (toggling direction on the current key).
    pub async fn request_sort(&self, key: &str) -> FetchResult<bool> {
        let mut request = self.request().await;
        request
            .cursor_mut()
            .ok_or_else(|| FetchError::config("request is not paginated"))?
            .request_sort(key)?;
        Ok(self.set_request(request).await)
    }

    pub async fn set_page(&self, page: u32) -> FetchResult<bool> {
        let mut request = self.request().await;
        request
            .cursor_mut()
            .ok_or_else(|| FetchError::config("request is not paginated"))?
            .set_page(page)?;
        Ok(self.set_request(request).await)
    }

    /// Drop the cached entry and load again. Errors stay silent.
    pub async fn refetch_silently(&self) {
        let key = self.inner.state.lock().await.request.cache_key();
        self.inner.layer.cache.invalidate(&key).await;
        if let Err(error) = self.load().await {
            debug!(key, %error, "silent refetch failed");
        }
    }

    /// Build a poller for the current request generation.
    pub async fn freshness_poller(&self, interval: std::time::Duration) -> FreshnessPoller {
        let state = self.inner.state.lock().await;
        FreshnessPoller::new(
            self.downgrade(),
            state.generation,
            interval,
            state.generation_cancel.clone(),
        )
    }

    pub(crate) async fn fetch_last_updated(&self) -> FetchResult<Option<DateTime<Utc>>> {
        let data_key = self.inner.state.lock().await.request.bare_key().to_string();
        let layer = &self.inner.layer;
        layer
            .source
            .last_updated(&data_key, layer.profile.request_timeout)
            .await
    }

    pub(crate) async fn last_updated_seen(&self) -> Option<DateTime<Utc>> {
        self.inner.state.lock().await.fetch.last_updated_seen
    }

    pub(crate) async fn record_last_updated(&self, generation: u64, seen: DateTime<Utc>) {
        let mut state = self.inner.state.lock().await;
        if state.generation == generation {
            state.fetch.last_updated_seen = Some(seen);
        }
    }

    /// Stop pending retries, pollers and count fetches for good.
    pub fn close(&self) {
        self.inner.cancel.cancel();
    }

    pub async fn request(&self) -> DataRequest {
        self.inner.state.lock().await.request.clone()
    }

    pub async fn state(&self) -> FetchState {
        self.inner.state.lock().await.fetch.clone()
    }

    pub async fn value(&self) -> Option<Arc<Value>> {
        self.inner.state.lock().await.value.clone()
    }

    pub async fn view(&self) -> LoadingState<Arc<Value>> {
        let state = self.inner.state.lock().await;
        LoadingState::from_phase(&state.fetch.phase, state.value.clone())
    }

    /// The current value with its cursor, for paginated requests.
    pub async fn page(&self) -> Option<Page<Arc<Value>>> {
        let state = self.inner.state.lock().await;
        let cursor = state.request.cursor()?.clone();
        let value = state.value.clone()?;
        Some(Page::new(value, cursor))
    }
}
