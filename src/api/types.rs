// Backend response types.
// Body shapes of the data, item-count and last-updated endpoints.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{FetchError, FetchResult};

/// Header carrying the backend's last-modified time for a data key.
pub const LAST_UPDATED_HEADER: &str = "X-Data-Last-Updated";

/// Body of `GET item-count/{dataKey}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemCount {
    #[serde(rename = "itemCount")]
    pub item_count: u64,
}

/// Body of `GET last-updated/{dataKey}` when the timestamp is not in a header.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LastUpdatedBody {
    #[serde(rename = "X-Data-Last-Updated", default)]
    pub last_updated: Option<String>,
}

/// How a data response body should be treated.
#[derive(Debug, Clone, PartialEq)]
pub enum PayloadKind {
    /// Usable data, including legitimately empty result sets like `{"data": []}`.
    Data,
    /// `{}` or `null`: the backend is still warming its own cache.
    Empty,
    /// `{"error": ...}`: the backend refused authoritatively.
    Error(String),
}

/// Classify a response body.
pub fn classify_payload(body: &Value) -> PayloadKind {
    match body {
        Value::Null => PayloadKind::Empty,
        Value::Object(map) if map.is_empty() => PayloadKind::Empty,
        Value::Object(map) => match map.get("error") {
            Some(Value::Null) | None => PayloadKind::Data,
            Some(Value::String(message)) => PayloadKind::Error(message.clone()),
            Some(other) => PayloadKind::Error(other.to_string()),
        },
        _ => PayloadKind::Data,
    }
}

/// Parse an ISO 8601 / RFC 3339 timestamp.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Keep a fetched body only when it is usable data.
pub fn usable_payload(result: FetchResult<Value>) -> FetchResult<Value> {
    let body = result?;
    match classify_payload(&body) {
        PayloadKind::Data => Ok(body),
        PayloadKind::Empty => Err(FetchError::EmptyResponse),
        PayloadKind::Error(message) => Err(FetchError::ServerReported(message)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_classify_payload() {
        assert_eq!(classify_payload(&json!({})), PayloadKind::Empty);
        assert_eq!(classify_payload(&Value::Null), PayloadKind::Empty);
        assert_eq!(classify_payload(&json!({"data": []})), PayloadKind::Data);
        assert_eq!(classify_payload(&json!([])), PayloadKind::Data);
        assert_eq!(
            classify_payload(&json!({"providers": [{"address": "lava@1"}]})),
            PayloadKind::Data
        );
        assert_eq!(
            classify_payload(&json!({"error": "unknown spec"})),
            PayloadKind::Error("unknown spec".into())
        );
        assert_eq!(
            classify_payload(&json!({"error": {"code": 5}})),
            PayloadKind::Error("{\"code\":5}".into())
        );
        assert_eq!(classify_payload(&json!({"error": null, "data": 1})), PayloadKind::Data);
    }

    #[test]
    fn test_item_count_body() {
        let count: ItemCount = serde_json::from_value(json!({"itemCount": 412})).unwrap();
        assert_eq!(count.item_count, 412);
    }

    #[test]
    fn test_parse_timestamp() {
        let ts = parse_timestamp("2024-05-01T12:30:00Z").unwrap();
        assert_eq!(ts.to_rfc3339(), "2024-05-01T12:30:00+00:00");
        assert!(parse_timestamp("2024-05-01T14:30:00+02:00").unwrap() == ts);
        assert!(parse_timestamp("yesterday").is_none());
    }
}
