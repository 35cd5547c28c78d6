// Backend endpoint functions.
// Typed calls for the data, item-count and last-updated endpoints.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use super::client::RestClient;
use super::request::DataRequest;
use super::types::{ItemCount, LAST_UPDATED_HEADER, LastUpdatedBody, parse_timestamp};
use super::DataSource;
use crate::error::{FetchError, FetchResult};

impl RestClient {
    /// `GET {base}/{dataKey}[/{subKey}]?pagination=..&f=..&t=..`
    pub async fn fetch_data(&self, request: &DataRequest, timeout: Duration) -> FetchResult<Value> {
        let response = self
            .get_with_params(&request.path(), &request.query_pairs(), timeout)
            .await?;
        Self::read_json(response).await
    }

    /// `GET {base}/item-count/{dataKey}`
    pub async fn fetch_item_count(&self, data_key: &str, timeout: Duration) -> FetchResult<Option<u64>> {
        let path = format!("item-count/{}", data_key.trim_end_matches('/'));
        let body = Self::read_json(self.get(&path, timeout).await?).await?;
        if let Some(message) = body.get("error").and_then(Value::as_str) {
            return Err(FetchError::ServerReported(message.to_string()));
        }
        match serde_json::from_value::<ItemCount>(body) {
            Ok(count) => Ok(Some(count.item_count)),
            Err(_) => Ok(None),
        }
    }

    /// `GET {base}/last-updated/{dataKey}`; header first, then the body field.
    pub async fn fetch_last_updated(
        &self,
        data_key: &str,
        timeout: Duration,
    ) -> FetchResult<Option<DateTime<Utc>>> {
        let path = format!("last-updated/{}", data_key.trim_end_matches('/'));
        let response = self.get(&path, timeout).await?;

        let from_header = response
            .headers()
            .get(LAST_UPDATED_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_timestamp);
        if from_header.is_some() {
            return Ok(from_header);
        }

        let body = Self::read_json(response).await?;
        let parsed: LastUpdatedBody = serde_json::from_value(body).unwrap_or_default();
        Ok(parsed.last_updated.as_deref().and_then(parse_timestamp))
    }
}

#[async_trait]
impl DataSource for RestClient {
    async fn fetch(&self, request: &DataRequest, timeout: Duration) -> FetchResult<Value> {
        self.fetch_data(request, timeout).await
    }

    async fn item_count(&self, data_key: &str, timeout: Duration) -> FetchResult<Option<u64>> {
        self.fetch_item_count(data_key, timeout).await
    }

    async fn last_updated(
        &self,
        data_key: &str,
        timeout: Duration,
    ) -> FetchResult<Option<DateTime<Utc>>> {
        self.fetch_last_updated(data_key, timeout).await
    }
}
