// Revalidation daemon.
// Walks the entity catalog on a timer and warms the server cache.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{Instant, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::catalog::{Collection, default_catalog};
use super::log::RevalidationLog;
use crate::api::{DataSource, usable_payload};
use crate::cache::ServerCache;
use crate::config::FetchProfile;
use crate::error::{FetchError, FetchResult};
use crate::fetch::AttemptPolicy;

/// Configuration for the revalidation daemon.
#[derive(Debug, Clone)]
pub struct RevalidationConfig {
    /// Interval between passes.
    pub interval: Duration,
    /// Whether to run a pass right after `init()`.
    pub run_on_startup: bool,
    /// Retry budget for list fetches.
    pub list_policy: AttemptPolicy,
    /// Timeout of each member fetch. Members get a single attempt.
    pub member_timeout: Duration,
    pub catalog: Vec<Collection>,
}

impl Default for RevalidationConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(300), // 5 minutes
            run_on_startup: true,
            list_policy: AttemptPolicy::list(),
            member_timeout: FetchProfile::server().request_timeout,
            catalog: default_catalog(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum RevalidationPhase {
    #[default]
    Idle,
    FetchingList(&'static str),
    WarmingMembers(&'static str),
}

impl RevalidationPhase {
    pub fn display(&self) -> String {
        match self {
            RevalidationPhase::Idle => "Idle".to_string(),
            RevalidationPhase::FetchingList(name) => format!("Fetching {} list", name),
            RevalidationPhase::WarmingMembers(name) => format!("Warming {}", name),
        }
    }
}

/// Counters since the daemon was created.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RevalidationMetrics {
    pub passes: u64,
    pub members_warmed: u64,
    pub errors: u64,
    pub last_pass_at: Option<DateTime<Utc>>,
    pub last_pass_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DaemonStatus {
    pub started: bool,
    pub pass_running: bool,
    pub phase: String,
    #[serde(flatten)]
    pub metrics: RevalidationMetrics,
}

/// Result of one pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassReport {
    pub lists_refreshed: usize,
    pub members_warmed: usize,
    pub errors: usize,
}

struct DaemonShared {
    source: Arc<dyn DataSource>,
    cache: ServerCache,
    log: RevalidationLog,
    config: RevalidationConfig,
    cancel: CancellationToken,
    started: AtomicBool,
    running: AtomicBool,
    phase: RwLock<RevalidationPhase>,
    metrics: RwLock<RevalidationMetrics>,
}

/// Clears the running flag even if a pass is dropped mid-way.
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Process-wide cache warmer. Build once, `init()` once, clone freely.
#[derive(Clone)]
pub struct RevalidationDaemon {
    shared: Arc<DaemonShared>,
}

impl RevalidationDaemon {
    pub fn new(source: Arc<dyn DataSource>, cache: ServerCache, config: RevalidationConfig) -> Self {
        Self {
            shared: Arc::new(DaemonShared {
                source,
                cache,
                log: RevalidationLog::new(),
                config,
                cancel: CancellationToken::new(),
                started: AtomicBool::new(false),
                running: AtomicBool::new(false),
                phase: RwLock::new(RevalidationPhase::Idle),
                metrics: RwLock::new(RevalidationMetrics::default()),
            }),
        }
    }

    pub fn log(&self) -> &RevalidationLog {
        &self.shared.log
    }

    pub fn cache(&self) -> &ServerCache {
        &self.shared.cache
    }

    pub fn config(&self) -> &RevalidationConfig {
        &self.shared.config
    }

    /// Spawn the pass loop. Returns `None` if already started.
    pub fn init(&self) -> Option<JoinHandle<()>> {
        if self.shared.started.swap(true, Ordering::AcqRel) {
            return None;
        }
        let daemon = self.clone();
        Some(tokio::spawn(async move { daemon.run_loop().await }))
    }

    pub fn shutdown(&self) {
        self.shared.cancel.cancel();
    }

    pub fn is_shut_down(&self) -> bool {
        self.shared.cancel.is_cancelled()
    }

    async fn run_loop(&self) {
        let config = &self.shared.config;
        let cancel = &self.shared.cancel;
        self.shared.log.info(format!(
            "revalidation daemon started, interval {}s",
            config.interval.as_secs()
        ));

        if config.run_on_startup {
            self.trigger().await;
        }

        let mut ticker = interval_at(Instant::now() + config.interval, config.interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.trigger().await;
                }
            }
        }
        self.shared.log.info("revalidation daemon stopped");
    }

    /// Run one pass now. A pass already in progress makes this a no-op.
    pub async fn trigger(&self) -> Option<PassReport> {
        if self
            .shared
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("revalidation already running, trigger ignored");
            return None;
        }
        let _guard = RunningGuard(&self.shared.running);

        let started = Instant::now();
        self.shared.log.info("revalidation pass started");

        let mut report = PassReport::default();
        for collection in &self.shared.config.catalog {
            if self.shared.cancel.is_cancelled() {
                break;
            }
            self.revalidate(collection, &mut report).await;
        }
        *self.shared.phase.write().await = RevalidationPhase::Idle;

        let elapsed = started.elapsed();
        {
            let mut metrics = self.shared.metrics.write().await;
            metrics.passes += 1;
            metrics.members_warmed += report.members_warmed as u64;
            metrics.errors += report.errors as u64;
            metrics.last_pass_at = Some(Utc::now());
            metrics.last_pass_ms = Some(elapsed.as_millis() as u64);
        }
        self.shared.log.info(format!(
            "revalidation pass finished: {} lists, {} members warmed, {} errors in {}ms",
            report.lists_refreshed,
            report.members_warmed,
            report.errors,
            elapsed.as_millis()
        ));
        Some(report)
    }

    async fn revalidate(&self, collection: &Collection, report: &mut PassReport) {
        let log = &self.shared.log;
        *self.shared.phase.write().await = RevalidationPhase::FetchingList(collection.name);

        let list = match self.fetch_list(collection).await {
            Ok(list) => list,
            Err(FetchError::Cancelled) => return,
            Err(error) => {
                report.errors += 1;
                log.error(format!("failed to fetch {} list: {}", collection.name, error));
                return;
            }
        };
        report.lists_refreshed += 1;

        let ids = collection.member_ids(&list);
        log.info(format!("fetched {} list: {} members", collection.name, ids.len()));

        *self.shared.phase.write().await = RevalidationPhase::WarmingMembers(collection.name);
        for id in ids {
            if self.shared.cancel.is_cancelled() {
                return;
            }
            match self.warm_member(collection, &id).await {
                Ok(()) => {
                    report.members_warmed += 1;
                    log.info(format!("warmed {} {}", collection.member_key, id));
                }
                Err(error) => {
                    report.errors += 1;
                    log.error(format!(
                        "failed to revalidate {} {}: {}",
                        collection.member_key, id, error
                    ));
                }
            }
        }
    }

    async fn fetch_list(&self, collection: &Collection) -> FetchResult<Value> {
        let request = collection.list_request()?;
        let source = &self.shared.source;
        let value = self
            .shared
            .config
            .list_policy
            .run(&self.shared.cancel, |timeout| {
                let request = request.clone();
                async move { usable_payload(source.fetch(&request, timeout).await) }
            })
            .await?;
        self.shared.cache.put(&request.cache_key(), value.clone()).await;
        Ok(value)
    }

    async fn warm_member(&self, collection: &Collection, id: &str) -> FetchResult<()> {
        let request = collection.member_request(id)?;
        let timeout = self.shared.config.member_timeout;
        let value = tokio::select! {
            _ = self.shared.cancel.cancelled() => return Err(FetchError::Cancelled),
            result = self.shared.source.fetch(&request, timeout) => usable_payload(result)?,
        };
        self.shared.cache.put(&request.cache_key(), value).await;
        Ok(())
    }

    pub async fn status(&self) -> DaemonStatus {
        DaemonStatus {
            started: self.shared.started.load(Ordering::Acquire) && !self.is_shut_down(),
            pass_running: self.shared.running.load(Ordering::Acquire),
            phase: self.shared.phase.read().await.display(),
            metrics: self.shared.metrics.read().await.clone(),
        }
    }
}
