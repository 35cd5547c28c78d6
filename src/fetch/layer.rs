// Data layer service object.
// Owns the shared cache, coalescer and data source that every session uses.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::coalescer::RequestCoalescer;
use super::retry::{RetryPolicy, RetryScheduler};
use super::session::FetchSession;
use crate::api::{DataRequest, DataSource};
use crate::cache::TtlCache;
use crate::config::FetchProfile;
use crate::error::FetchResult;

pub(crate) struct LayerShared {
    pub(crate) source: Arc<dyn DataSource>,
    pub(crate) cache: TtlCache<Arc<Value>>,
    pub(crate) coalescer: RequestCoalescer<FetchResult<Value>>,
    pub(crate) scheduler: RetryScheduler,
    pub(crate) profile: FetchProfile,
    pub(crate) cancel: CancellationToken,
    started: AtomicBool,
}

/// Entry point for callers: build once at startup, hand out clones.
#[derive(Clone)]
pub struct DataLayer {
    shared: Arc<LayerShared>,
}

impl DataLayer {
    pub fn new(source: Arc<dyn DataSource>, profile: FetchProfile) -> Self {
        Self {
            shared: Arc::new(LayerShared {
                source,
                cache: TtlCache::new(profile.ttl),
                coalescer: RequestCoalescer::new(),
                scheduler: RetryScheduler::new(RetryPolicy::from_profile(&profile)),
                profile,
                cancel: CancellationToken::new(),
                started: AtomicBool::new(false),
            }),
        }
    }

    /// Start the cache sweep. Later calls are no-ops.
    pub fn init(&self) -> bool {
        if self.shared.started.swap(true, Ordering::AcqRel) {
            return false;
        }
        let interval = self.shared.profile.sweep_interval;
        self.shared
            .cache
            .spawn_sweeper(interval, self.shared.cancel.child_token());
        info!(?interval, "data layer started");
        true
    }

    /// Stop the sweep and cancel every session, retry and poller.
    pub fn shutdown(&self) {
        self.shared.cancel.cancel();
    }

    pub fn is_shut_down(&self) -> bool {
        self.shared.cancel.is_cancelled()
    }

    /// A session bound to `request`. Dropping the last handle cancels its timers.
    pub fn session(&self, request: DataRequest) -> FetchSession {
        FetchSession::new(Arc::clone(&self.shared), request)
    }

    /// One-shot read through a throwaway session.
    pub async fn load(&self, request: DataRequest) -> FetchResult<Arc<Value>> {
        self.session(request).load().await
    }

    pub fn cache(&self) -> &TtlCache<Arc<Value>> {
        &self.shared.cache
    }

    pub fn profile(&self) -> &FetchProfile {
        &self.shared.profile
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FetchError;
    use crate::testing::ScriptedSource;
    use serde_json::json;

    #[tokio::test]
    async fn test_init_once_and_shutdown() {
        let source = Arc::new(ScriptedSource::new());
        let layer = DataLayer::new(source, FetchProfile::dashboard());

        assert!(layer.init());
        assert!(!layer.init());

        layer.shutdown();
        assert!(layer.is_shut_down());

        let err = layer
            .load(DataRequest::new("providers").unwrap())
            .await
            .unwrap_err();
        assert_eq!(err, FetchError::Cancelled);
    }

    #[tokio::test]
    async fn test_one_shot_load_populates_cache() {
        let source = Arc::new(ScriptedSource::new());
        source.respond("/chains", vec![Ok(json!({"data": ["LAV1", "ETH1"]}))]);
        let layer = DataLayer::new(source.clone(), FetchProfile::dashboard());

        let request = DataRequest::new("chains").unwrap();
        let value = layer.load(request.clone()).await.unwrap();
        assert_eq!(value["data"][1], "ETH1");

        layer.load(request.clone()).await.unwrap();
        assert_eq!(source.calls("/chains"), 1);
        assert!(layer.cache().get(&request.cache_key()).await.is_some());
    }
}
