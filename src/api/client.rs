// Backend REST HTTP client.
// Builds URLs from the configured base, applies per-request timeouts and maps transport failures.

use std::time::Duration;

use reqwest::{
    Client, Response,
    header::{ACCEPT, HeaderMap, HeaderValue, USER_AGENT},
};
use serde_json::Value;
use tracing::debug;

use crate::config::Config;
use crate::error::{FetchError, FetchResult, NetStatsError, Result};

/// HTTP client for the statistics backend.
#[derive(Debug, Clone)]
pub struct RestClient {
    client: Client,
    base_url: String,
}

impl RestClient {
    /// Create a client for the given base URL.
    pub fn new(base_url: &str) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(USER_AGENT, HeaderValue::from_static("netstats"));

        let client = Client::builder()
            .default_headers(headers)
            .build()
            .map_err(NetStatsError::Http)?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(&config.rest_url)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Absolute URL for a path relative to the base.
    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Make a GET request.
    pub async fn get(&self, path: &str, timeout: Duration) -> FetchResult<Response> {
        self.get_with_params(path, &[] as &[(&str, String)], timeout)
            .await
    }

    /// Make a GET request with query parameters.
    pub async fn get_with_params<T: serde::Serialize + ?Sized>(
        &self,
        path: &str,
        params: &T,
        timeout: Duration,
    ) -> FetchResult<Response> {
        let url = self.url(path);
        debug!(%url, "GET");
        self.client
            .get(&url)
            .query(params)
            .timeout(timeout)
            .send()
            .await
            .map_err(transport_error)
    }

    /// Read a JSON body.
    ///
    /// Error statuses still yield `Ok` when the body is JSON, so an explicit
    /// `{"error": ...}` reaches the classifier instead of looking like a
    /// transport failure.
    pub async fn read_json(response: Response) -> FetchResult<Value> {
        let status = response.status();
        let text = response.text().await.map_err(transport_error)?;

        match serde_json::from_str::<Value>(&text) {
            Ok(body) if status.is_success() || body.get("error").is_some() => Ok(body),
            Ok(_) => Err(FetchError::Transport(format!("HTTP {}", status))),
            Err(_) if status.is_success() && text.trim().is_empty() => Ok(Value::Null),
            Err(e) if status.is_success() => {
                Err(FetchError::Transport(format!("invalid JSON body: {}", e)))
            }
            Err(_) => Err(FetchError::Transport(format!(
                "HTTP {}: {}",
                status,
                truncate(&text, 200)
            ))),
        }
    }
}

/// Timeouts (including aborted requests) are retried like empty responses;
/// everything else counts against the transport error budget.
fn transport_error(err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        FetchError::TransportTimeout
    } else {
        FetchError::Transport(err.to_string())
    }
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
