// In-memory data source for tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::api::{DataRequest, DataSource};
use crate::error::{FetchError, FetchResult};

/// Replays scripted responses per request path. The last scripted response
/// of a path repeats once the script runs out; unscripted paths answer `{}`.
#[derive(Default)]
pub(crate) struct ScriptedSource {
    scripts: Mutex<HashMap<String, VecDeque<FetchResult<Value>>>>,
    calls: Mutex<HashMap<String, usize>>,
    item_counts: Mutex<HashMap<String, FetchResult<Option<u64>>>>,
    item_count_calls: Mutex<usize>,
    last_updated: Mutex<HashMap<String, FetchResult<Option<DateTime<Utc>>>>>,
    latency: Option<Duration>,
}

impl ScriptedSource {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_latency(latency: Duration) -> Self {
        Self {
            latency: Some(latency),
            ..Self::default()
        }
    }

    pub(crate) fn respond(&self, path: &str, responses: Vec<FetchResult<Value>>) {
        self.scripts
            .lock()
            .unwrap()
            .insert(path.to_string(), responses.into());
    }

    pub(crate) fn calls(&self, path: &str) -> usize {
        self.calls.lock().unwrap().get(path).copied().unwrap_or(0)
    }

    pub(crate) fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }

    pub(crate) fn set_item_count(&self, data_key: &str, result: FetchResult<Option<u64>>) {
        self.item_counts
            .lock()
            .unwrap()
            .insert(data_key.to_string(), result);
    }

    pub(crate) fn item_count_calls(&self) -> usize {
        *self.item_count_calls.lock().unwrap()
    }

    pub(crate) fn set_last_updated(
        &self,
        data_key: &str,
        result: FetchResult<Option<DateTime<Utc>>>,
    ) {
        self.last_updated
            .lock()
            .unwrap()
            .insert(data_key.to_string(), result);
    }

    fn next_response(&self, path: &str) -> FetchResult<Value> {
        *self
            .calls
            .lock()
            .unwrap()
            .entry(path.to_string())
            .or_insert(0) += 1;

        let mut scripts = self.scripts.lock().unwrap();
        match scripts.get_mut(path) {
            Some(script) if script.len() > 1 => script.pop_front().unwrap(),
            Some(script) => script
                .front()
                .cloned()
                .unwrap_or(Ok(Value::Object(Default::default()))),
            None => Ok(Value::Object(Default::default())),
        }
    }
}

#[async_trait]
impl DataSource for ScriptedSource {
    async fn fetch(&self, request: &DataRequest, _timeout: Duration) -> FetchResult<Value> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        self.next_response(&request.path())
    }

    async fn item_count(&self, data_key: &str, _timeout: Duration) -> FetchResult<Option<u64>> {
        *self.item_count_calls.lock().unwrap() += 1;
        self.item_counts
            .lock()
            .unwrap()
            .get(data_key)
            .cloned()
            .unwrap_or(Err(FetchError::EmptyResponse))
    }

    async fn last_updated(
        &self,
        data_key: &str,
        _timeout: Duration,
    ) -> FetchResult<Option<DateTime<Utc>>> {
        self.last_updated
            .lock()
            .unwrap()
            .get(data_key)
            .cloned()
            .unwrap_or(Ok(None))
    }
}
