// Backend API module.
// HTTP client, request model and response types for the statistics REST backend.

pub mod client;
pub mod endpoints;
pub mod request;
pub mod types;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::FetchResult;

pub use client::RestClient;
pub use request::{DataRequest, DateRange};
pub use types::{
    ItemCount, LAST_UPDATED_HEADER, PayloadKind, classify_payload, parse_timestamp,
    usable_payload,
};

/// Where fetches go. `RestClient` in production, in-memory doubles in tests.
///
/// Implementations return the raw body; deciding whether it is data, still
/// warming, or an authoritative error is the retry scheduler's job.
#[async_trait]
pub trait DataSource: Send + Sync {
    async fn fetch(&self, request: &DataRequest, timeout: Duration) -> FetchResult<Value>;

    async fn item_count(&self, data_key: &str, timeout: Duration) -> FetchResult<Option<u64>>;

    async fn last_updated(
        &self,
        data_key: &str,
        timeout: Duration,
    ) -> FetchResult<Option<DateTime<Utc>>>;
}
