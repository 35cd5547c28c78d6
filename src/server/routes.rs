// Proxy routes.
// Serve warmed cache entries, fall back to one fresh fetch, expose the revalidation log.

use std::sync::Arc;
use std::time::Duration;

use axum::Json;
use axum::Router;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use serde_json::{Value, json};
use tracing::debug;

use crate::api::{DataRequest, DataSource, usable_payload};
use crate::cache::ServerCache;
use crate::error::FetchResult;
use crate::fetch::RequestCoalescer;
use crate::revalidation::RevalidationDaemon;

/// Shared handles for every handler.
#[derive(Clone)]
pub struct ProxyState {
    pub source: Arc<dyn DataSource>,
    pub cache: ServerCache,
    pub daemon: RevalidationDaemon,
    /// Timeout of the fallback fetch on a cache miss.
    pub fetch_timeout: Duration,
    /// Concurrent misses on one key share a single backend fetch.
    misses: RequestCoalescer<FetchResult<Value>>,
}

impl ProxyState {
    pub fn new(
        source: Arc<dyn DataSource>,
        cache: ServerCache,
        daemon: RevalidationDaemon,
        fetch_timeout: Duration,
    ) -> Self {
        Self {
            source,
            cache,
            daemon,
            fetch_timeout,
            misses: RequestCoalescer::new(),
        }
    }
}

pub fn router(state: ProxyState) -> Router {
    Router::new()
        .route("/api/data/{data_key}", get(data))
        .route("/api/data/{data_key}/{data_sub_key}", get(data_with_sub_key))
        .route("/api/revalidation-log", get(revalidation_log))
        .route("/health", get(health))
        .with_state(state)
}

async fn data(State(state): State<ProxyState>, Path(data_key): Path<String>) -> Response {
    serve_data(&state, data_key, None).await
}

async fn data_with_sub_key(
    State(state): State<ProxyState>,
    Path((data_key, data_sub_key)): Path<(String, String)>,
) -> Response {
    serve_data(&state, data_key, Some(data_sub_key)).await
}

async fn serve_data(state: &ProxyState, data_key: String, sub_key: Option<String>) -> Response {
    let request = match sub_key {
        Some(sub) => DataRequest::new(data_key).and_then(|r| r.with_sub_key(sub)),
        None => DataRequest::new(data_key),
    };
    let request = match request {
        Ok(request) => request,
        Err(error) => {
            return (StatusCode::BAD_REQUEST, Json(json!({"error": error.to_string()})))
                .into_response();
        }
    };

    let key = request.cache_key();
    if let Some(value) = state.cache.get(&key).await {
        return Json(Value::clone(&value)).into_response();
    }

    let source = Arc::clone(&state.source);
    let timeout = state.fetch_timeout;
    let fetched = state
        .misses
        .coalesce(&key, move || async move { source.fetch(&request, timeout).await })
        .await;

    match usable_payload(fetched) {
        Ok(value) => {
            let value = state.cache.put(&key, value).await;
            Json(Value::clone(&value)).into_response()
        }
        Err(error) => {
            debug!(key, %error, "proxy miss without data");
            not_found()
        }
    }
}

fn not_found() -> Response {
    (StatusCode::NOT_FOUND, Json(json!({"error": "no data found"}))).into_response()
}

async fn revalidation_log(State(state): State<ProxyState>) -> String {
    state.daemon.log().render()
}

async fn health(State(state): State<ProxyState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "revalidation": state.daemon.status().await,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FetchProfile;
    use crate::error::FetchError;
    use crate::revalidation::RevalidationConfig;
    use crate::testing::ScriptedSource;
    use axum::body::Body;
    use axum::http::{Request, header};
    use http_body_util::BodyExt;
    use tower::ServiceExt; // for `oneshot`

    fn setup() -> (Arc<ScriptedSource>, ProxyState) {
        state_with(ScriptedSource::new())
    }

    fn state_with(source: ScriptedSource) -> (Arc<ScriptedSource>, ProxyState) {
        let source = Arc::new(source);
        let dyn_source = Arc::clone(&source) as Arc<dyn DataSource>;
        let cache = ServerCache::new(&FetchProfile::server());
        let daemon = RevalidationDaemon::new(
            Arc::clone(&dyn_source),
            cache.clone(),
            RevalidationConfig::default(),
        );
        let state = ProxyState::new(dyn_source, cache, daemon, Duration::from_millis(500));
        (source, state)
    }

    async fn get_path(state: &ProxyState, uri: &str) -> (StatusCode, Vec<u8>) {
        let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
        let response = router(state.clone()).oneshot(request).await.unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, body.to_vec())
    }

    #[tokio::test]
    async fn test_cached_entry_is_served() {
        let (source, state) = setup();
        state.cache.put("/providers", json!({"data": ["lava@1"]})).await;

        let (status, body) = get_path(&state, "/api/data/providers").await;
        assert_eq!(status, StatusCode::OK);
        let body: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["data"][0], "lava@1");
        assert_eq!(source.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_miss_fetches_and_stores() {
        let (source, state) = setup();
        source.respond("/spec/LAV1", vec![Ok(json!({"chainId": "LAV1"}))]);

        let (status, body) = get_path(&state, "/api/data/spec/LAV1").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(serde_json::from_slice::<Value>(&body).unwrap()["chainId"], "LAV1");

        get_path(&state, "/api/data/spec/LAV1").await;
        assert_eq!(source.calls("/spec/LAV1"), 1);
        assert!(state.cache.get("/spec/LAV1").await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_misses_share_one_fetch() {
        let (source, state) = state_with(ScriptedSource::with_latency(Duration::from_millis(200)));
        source.respond("/provider/lava@1", vec![Ok(json!({"provider": "lava@1"}))]);

        let (first, second) = tokio::join!(
            get_path(&state, "/api/data/provider/lava@1"),
            get_path(&state, "/api/data/provider/lava@1"),
        );
        assert_eq!(first.0, StatusCode::OK);
        assert_eq!(second.0, StatusCode::OK);
        assert_eq!(first.1, second.1);
        assert_eq!(source.calls("/provider/lava@1"), 1);
        assert_eq!(state.misses.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_nothing_found_is_404() {
        let (source, state) = setup();
        source.respond("/consumer/lava@x", vec![Ok(json!({"error": "unknown consumer"}))]);
        source.respond(
            "/provider/lava@y",
            vec![Err(FetchError::Transport("connection refused".into()))],
        );

        for uri in [
            "/api/data/events",
            "/api/data/consumer/lava@x",
            "/api/data/provider/lava@y",
        ] {
            let (status, body) = get_path(&state, uri).await;
            assert_eq!(status, StatusCode::NOT_FOUND, "{}", uri);
            assert_eq!(
                serde_json::from_slice::<Value>(&body).unwrap(),
                json!({"error": "no data found"})
            );
        }
        assert!(state.cache.get("/events").await.is_none());
    }

    #[tokio::test]
    async fn test_revalidation_log_is_plain_text() {
        let (_source, state) = setup();
        state.daemon.log().info("revalidation pass started");
        state.daemon.log().error("failed to revalidate provider lava@3: reset");

        let request = Request::builder()
            .uri("/api/revalidation-log")
            .body(Body::empty())
            .unwrap();
        let response = router(state.clone()).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(
            response.headers()[header::CONTENT_TYPE]
                .to_str()
                .unwrap()
                .starts_with("text/plain")
        );
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert_eq!(text.lines().count(), 2);
        assert!(text.contains("lava@3"));
    }

    #[tokio::test]
    async fn test_health_reports_daemon_status() {
        let (_source, state) = setup();
        let (status, body) = get_path(&state, "/health").await;
        assert_eq!(status, StatusCode::OK);
        let body: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["revalidation"]["passes"], 0);
        assert_eq!(body["revalidation"]["phase"], "Idle");
    }
}
