// Proxy application.
// Wires the backend client, server cache and revalidation daemon, and runs the HTTP server.

use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::api::{DataSource, RestClient};
use crate::cache::ServerCache;
use crate::cache::paths::snapshot_dir;
use crate::config::{Config, FetchProfile};
use crate::error::Result;
use crate::revalidation::{RevalidationConfig, RevalidationDaemon};
use crate::server::{ProxyState, router};

/// Process-wide services of the proxy.
pub struct App {
    pub config: Config,
    pub cache: ServerCache,
    pub daemon: RevalidationDaemon,
    source: Arc<dyn DataSource>,
    profile: FetchProfile,
    cancel: CancellationToken,
}

impl App {
    /// Build against the configured REST backend.
    pub fn new(config: Config) -> Result<Self> {
        let client = RestClient::from_config(&config)?;
        Ok(Self::with_source(config, Arc::new(client)))
    }

    /// Build against any data source.
    pub fn with_source(config: Config, source: Arc<dyn DataSource>) -> Self {
        let profile = FetchProfile::server();
        let mut cache = ServerCache::new(&profile);
        match snapshot_dir(config.cache_dir.as_deref()) {
            Some(dir) => cache = cache.with_snapshots(dir),
            None => warn!("no cache directory available, snapshots disabled"),
        }
        let daemon = RevalidationDaemon::new(
            Arc::clone(&source),
            cache.clone(),
            RevalidationConfig::default(),
        );
        Self {
            config,
            cache,
            daemon,
            source,
            profile,
            cancel: CancellationToken::new(),
        }
    }

    pub fn router(&self) -> Router {
        router(ProxyState::new(
            Arc::clone(&self.source),
            self.cache.clone(),
            self.daemon.clone(),
            self.profile.request_timeout,
        ))
    }

    /// Start background work: the cache sweep and the daemon.
    pub fn start(&self) {
        self.cache.spawn_sweeper(self.cancel.child_token());
        self.daemon.init();
    }

    pub fn shutdown(&self) {
        self.daemon.shutdown();
        self.cancel.cancel();
    }

    /// Serve until ctrl-c, then stop background work.
    pub async fn serve(&self) -> Result<()> {
        let listener = TcpListener::bind(self.config.listen_addr).await?;
        info!(addr = %self.config.listen_addr, backend = %self.config.rest_url, "proxy listening");

        let cancel = self.cancel.clone();
        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => info!("shutdown requested"),
                    _ = cancel.cancelled() => {}
                }
            })
            .await?;

        self.shutdown();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedSource;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::json;
    use tempfile::TempDir;
    use tower::ServiceExt;

    fn config(dir: &TempDir) -> Config {
        let cache_dir = dir.path().to_string_lossy().to_string();
        Config::from_lookup(|name| match name {
            "NETSTATS_REST_URL" => Some("http://localhost:8080/".to_string()),
            "NETSTATS_CACHE_DIR" => Some(cache_dir.clone()),
            _ => None,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_router_serves_from_shared_cache() {
        let dir = TempDir::new().unwrap();
        let source = Arc::new(ScriptedSource::new());
        let app = App::with_source(config(&dir), source.clone());

        app.cache.put("/specs", json!(["LAV1"])).await;
        let request = Request::builder()
            .uri("/api/data/specs")
            .body(Body::empty())
            .unwrap();
        let response = app.router().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(source.total_calls(), 0);
        assert!(dir.path().join("snapshots").join("specs.json").exists());
    }

    #[tokio::test]
    async fn test_start_and_shutdown() {
        let dir = TempDir::new().unwrap();
        let app = App::with_source(config(&dir), Arc::new(ScriptedSource::new()));
        app.start();
        assert!(app.daemon.init().is_none());
        app.shutdown();
        assert!(app.daemon.is_shut_down());
    }
}
