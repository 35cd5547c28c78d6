// Logical data requests.
// A data key plus optional sub key, pagination cursor and date range.

use chrono::NaiveDate;

use crate::error::FetchError;
use crate::pagination::PaginationCursor;

/// Inclusive date window sent as `f`/`t` query parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

impl DateRange {
    pub fn new(from: NaiveDate, to: NaiveDate) -> Result<Self, FetchError> {
        if from > to {
            return Err(FetchError::config(format!(
                "date range starts after it ends ({} > {})",
                from, to
            )));
        }
        Ok(Self { from, to })
    }
}

/// What a caller asks for. Built once, validated up front.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataRequest {
    data_key: String,
    sub_key: Option<String>,
    cursor: Option<PaginationCursor>,
    date_range: Option<DateRange>,
}

impl DataRequest {
    pub fn new(data_key: impl Into<String>) -> Result<Self, FetchError> {
        let data_key = data_key.into();
        let data_key = data_key.trim_start_matches('/').to_string();
        validate_key(&data_key, "data key")?;
        Ok(Self {
            data_key,
            sub_key: None,
            cursor: None,
            date_range: None,
        })
    }

    pub fn with_sub_key(mut self, sub_key: impl Into<String>) -> Result<Self, FetchError> {
        let sub_key = sub_key.into();
        let sub_key = sub_key.trim_matches('/').to_string();
        validate_key(&sub_key, "data sub key")?;
        self.sub_key = Some(sub_key);
        Ok(self)
    }

    pub fn with_cursor(mut self, cursor: PaginationCursor) -> Self {
        self.cursor = Some(cursor);
        self
    }

    /// Decode a cursor string and attach it.
    pub fn with_pagination(self, cursor: &str) -> Result<Self, FetchError> {
        Ok(self.with_cursor(PaginationCursor::decode(cursor)?))
    }

    pub fn with_date_range(mut self, range: DateRange) -> Self {
        self.date_range = Some(range);
        self
    }

    pub fn data_key(&self) -> &str {
        &self.data_key
    }

    pub fn sub_key(&self) -> Option<&str> {
        self.sub_key.as_deref()
    }

    pub fn cursor(&self) -> Option<&PaginationCursor> {
        self.cursor.as_ref()
    }

    pub fn cursor_mut(&mut self) -> Option<&mut PaginationCursor> {
        self.cursor.as_mut()
    }

    pub fn date_range(&self) -> Option<DateRange> {
        self.date_range
    }

    /// Data key with any trailing slash removed, as the companion
    /// item-count and last-updated endpoints expect it.
    pub fn bare_key(&self) -> &str {
        self.data_key.trim_end_matches('/')
    }

    /// Path relative to the backend base URL.
    pub fn path(&self) -> String {
        match &self.sub_key {
            Some(sub) => format!("/{}/{}", self.bare_key(), sub),
            None => format!("/{}", self.data_key),
        }
    }

    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        if let Some(cursor) = &self.cursor {
            pairs.push(("pagination", cursor.encode()));
        }
        if let Some(range) = &self.date_range {
            pairs.push(("f", range.from.format("%Y-%m-%d").to_string()));
            pairs.push(("t", range.to.format("%Y-%m-%d").to_string()));
        }
        pairs
    }

    /// Identity of this request in caches and the coalescer.
    pub fn cache_key(&self) -> String {
        let pairs = self.query_pairs();
        if pairs.is_empty() {
            return self.path();
        }
        let query: Vec<String> = pairs.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        format!("{}?{}", self.path(), query.join("&"))
    }
}

fn validate_key(key: &str, what: &str) -> Result<(), FetchError> {
    if key.trim_end_matches('/').is_empty() {
        return Err(FetchError::config(format!("{} must not be empty", what)));
    }
    if key.chars().any(|c| c.is_whitespace() || matches!(c, '?' | '#' | '&')) {
        return Err(FetchError::config(format!(
            "{} {:?} contains invalid characters",
            what, key
        )));
    }
    if key.split('/').any(|segment| segment == "..") {
        return Err(FetchError::config(format!(
            "{} {:?} escapes its path",
            what, key
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_plain_key() {
        let request = DataRequest::new("providers").unwrap();
        assert_eq!(request.path(), "/providers");
        assert_eq!(request.cache_key(), "/providers");
        assert!(request.query_pairs().is_empty());
    }

    #[test]
    fn test_sub_key_and_query() {
        let request = DataRequest::new("provider/")
            .unwrap()
            .with_sub_key("lava@1abc")
            .unwrap()
            .with_pagination("rank|desc,2,20")
            .unwrap()
            .with_date_range(DateRange::new(date(2024, 1, 1), date(2024, 1, 31)).unwrap());

        assert_eq!(request.bare_key(), "provider");
        assert_eq!(request.path(), "/provider/lava@1abc");
        assert_eq!(
            request.cache_key(),
            "/provider/lava@1abc?pagination=rank,d,2,20&f=2024-01-01&t=2024-01-31"
        );
    }

    #[test]
    fn test_trailing_slash_kept_in_path() {
        let request = DataRequest::new("/chainWalletApi/").unwrap();
        assert_eq!(request.path(), "/chainWalletApi/");
        assert_eq!(request.bare_key(), "chainWalletApi");
    }

    #[test]
    fn test_invalid_keys() {
        for key in ["", "/", "has space", "a?b=1", "../etc", "x#y"] {
            assert!(
                matches!(DataRequest::new(key), Err(FetchError::Configuration(_))),
                "{:?} should be rejected",
                key
            );
        }
        let request = DataRequest::new("providers").unwrap();
        assert!(request.with_sub_key("").is_err());
    }

    #[test]
    fn test_bad_pagination_is_rejected() {
        let err = DataRequest::new("events")
            .unwrap()
            .with_pagination("rank,a,0,20")
            .unwrap_err();
        assert!(matches!(err, FetchError::Configuration(_)));
    }

    #[test]
    fn test_inverted_date_range() {
        assert!(DateRange::new(date(2024, 2, 1), date(2024, 1, 1)).is_err());
        assert!(DateRange::new(date(2024, 1, 1), date(2024, 1, 1)).is_ok());
    }
}
