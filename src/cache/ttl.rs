// In-memory TTL cache with jittered expiry.
// Each entry owns an eviction timer; a periodic sweep catches anything left behind.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use rand::Rng;
use tokio::sync::Mutex;
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Inclusive range a TTL is drawn from.
///
/// Keys written in the same instant get different lifetimes, so they do not
/// all expire (and get refetched) together.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TtlRange {
    min: Duration,
    max: Duration,
}

impl TtlRange {
    pub fn new(min: Duration, max: Duration) -> Self {
        if min <= max {
            Self { min, max }
        } else {
            Self { min: max, max: min }
        }
    }

    /// A range without jitter.
    pub fn fixed(ttl: Duration) -> Self {
        Self { min: ttl, max: ttl }
    }

    pub fn min(&self) -> Duration {
        self.min
    }

    pub fn max(&self) -> Duration {
        self.max
    }

    /// Draw a TTL uniformly from the range, at millisecond resolution.
    pub fn sample(&self) -> Duration {
        if self.min == self.max {
            return self.min;
        }
        let lo = self.min.as_millis() as u64;
        let hi = self.max.as_millis() as u64;
        Duration::from_millis(rand::rng().random_range(lo..=hi))
    }
}

struct Entry<V> {
    value: V,
    expires_at: Instant,
    generation: u64,
    eviction: AbortHandle,
}

struct Inner<V> {
    entries: Mutex<HashMap<String, Entry<V>>>,
    ttl: TtlRange,
    generation: AtomicU64,
}

/// Shared key/value cache where every value expires.
///
/// Cloning yields another handle to the same storage. Time comes from
/// tokio's clock, so a paused runtime drives expiry deterministically.
pub struct TtlCache<V> {
    inner: Arc<Inner<V>>,
}

impl<V> Clone for TtlCache<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V> TtlCache<V>
where
    V: Clone + Send + 'static,
{
    pub fn new(ttl: TtlRange) -> Self {
        Self {
            inner: Arc::new(Inner {
                entries: Mutex::new(HashMap::new()),
                ttl,
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// Look up a live value. An entry at or past its expiry is a miss.
    pub async fn get(&self, key: &str) -> Option<V> {
        let mut entries = self.inner.entries.lock().await;
        let expired = match entries.get(key) {
            Some(entry) if Instant::now() < entry.expires_at => return Some(entry.value.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            if let Some(entry) = entries.remove(key) {
                entry.eviction.abort();
            }
        }
        None
    }

    /// Store a value with a TTL drawn from the cache's range.
    pub async fn set(&self, key: impl Into<String>, value: V) {
        let ttl = self.inner.ttl.sample();
        self.set_with_ttl(key, value, ttl).await;
    }

    /// Store a value with an explicit TTL, replacing any previous entry and
    /// cancelling its eviction timer.
    pub async fn set_with_ttl(&self, key: impl Into<String>, value: V, ttl: Duration) {
        let key = key.into();
        let expires_at = Instant::now() + ttl;
        let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed);
        let eviction = spawn_eviction(Arc::downgrade(&self.inner), key.clone(), generation, expires_at);

        let mut entries = self.inner.entries.lock().await;
        let previous = entries.insert(
            key,
            Entry {
                value,
                expires_at,
                generation,
                eviction,
            },
        );
        if let Some(previous) = previous {
            previous.eviction.abort();
        }
    }

    /// Drop an entry and its timer.
    pub async fn invalidate(&self, key: &str) -> Option<V> {
        let removed = self.inner.entries.lock().await.remove(key);
        removed.map(|entry| {
            entry.eviction.abort();
            entry.value
        })
    }

    /// Remove every expired entry. Returns how many were dropped.
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.inner.entries.lock().await;
        let before = entries.len();
        entries.retain(|_, entry| {
            let live = now < entry.expires_at;
            if !live {
                entry.eviction.abort();
            }
            live
        });
        before - entries.len()
    }

    /// Number of stored entries, expired or not.
    pub async fn len(&self) -> usize {
        self.inner.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Run `purge_expired` every `interval` until `cancel` fires.
    pub fn spawn_sweeper(&self, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        let cache = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // the first tick completes immediately
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let purged = cache.purge_expired().await;
                        if purged > 0 {
                            debug!(purged, "swept expired cache entries");
                        }
                    }
                }
            }
        })
    }

    #[cfg(test)]
    async fn eviction_handle(&self, key: &str) -> Option<AbortHandle> {
        self.inner
            .entries
            .lock()
            .await
            .get(key)
            .map(|entry| entry.eviction.clone())
    }
}

fn spawn_eviction<V>(
    inner: Weak<Inner<V>>,
    key: String,
    generation: u64,
    expires_at: Instant,
) -> AbortHandle
where
    V: Send + 'static,
{
    tokio::spawn(async move {
        tokio::time::sleep_until(expires_at).await;
        let Some(inner) = inner.upgrade() else {
            return;
        };
        let mut entries = inner.entries.lock().await;
        if entries.get(&key).is_some_and(|e| e.generation == generation) {
            entries.remove(&key);
        }
    })
    .abort_handle()
}
