// Pagination cursor.
// Sort key, direction and page window, serialized as a compact query string value.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::FetchError;

/// Sort direction of a paginated table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Ascending,
    Descending,
}

impl SortDirection {
    /// Single-character wire token.
    pub fn token(&self) -> char {
        match self {
            SortDirection::Ascending => 'a',
            SortDirection::Descending => 'd',
        }
    }

    pub fn toggled(&self) -> Self {
        match self {
            SortDirection::Ascending => SortDirection::Descending,
            SortDirection::Descending => SortDirection::Ascending,
        }
    }

    fn parse(token: &str) -> Option<Self> {
        match token {
            "a" | "asc" => Some(SortDirection::Ascending),
            "d" | "desc" => Some(SortDirection::Descending),
            _ => None,
        }
    }
}

/// Sort and page state passed between a table and the backend.
///
/// Encodes as `<sortKey>,<a|d>,<page>,<pageSize>`. The legacy
/// `<sortKey>|<asc|desc>,<page>,<pageSize>` form still decodes; without the
/// `|direction` suffix the direction is ascending. `total_count` is never
/// part of the encoding: it arrives later from the item-count endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaginationCursor {
    sort_key: String,
    direction: SortDirection,
    page: u32,
    page_size: u32,
    total_count: Option<u64>,
}

impl PaginationCursor {
    pub fn new(
        sort_key: impl Into<String>,
        direction: SortDirection,
        page: u32,
        page_size: u32,
    ) -> Result<Self, FetchError> {
        let sort_key = sort_key.into();
        validate_sort_key(&sort_key)?;
        if page == 0 {
            return Err(FetchError::config("page must be a positive integer"));
        }
        if page_size == 0 {
            return Err(FetchError::config("page size must be a positive integer"));
        }
        Ok(Self {
            sort_key,
            direction,
            page,
            page_size,
            total_count: None,
        })
    }

    /// Parse either cursor form. Malformed input is a caller bug and is
    /// reported as a configuration error rather than defaulted.
    pub fn decode(input: &str) -> Result<Self, FetchError> {
        let malformed = || FetchError::config(format!("malformed pagination cursor {:?}", input));
        let parts: Vec<&str> = input.split(',').collect();

        let (sort_key, direction, page, page_size) = match parts.as_slice() {
            [key, dir, page, size] => {
                let direction = SortDirection::parse(dir).ok_or_else(malformed)?;
                (*key, direction, *page, *size)
            }
            [head, page, size] => match head.split_once('|') {
                Some((key, dir)) => {
                    let direction = SortDirection::parse(dir).ok_or_else(malformed)?;
                    (key, direction, *page, *size)
                }
                None => (*head, SortDirection::Ascending, *page, *size),
            },
            _ => return Err(malformed()),
        };

        let page = parse_positive(page).ok_or_else(malformed)?;
        let page_size = parse_positive(page_size).ok_or_else(malformed)?;
        Self::new(sort_key, direction, page, page_size)
    }

    pub fn encode(&self) -> String {
        format!(
            "{},{},{},{}",
            self.sort_key,
            self.direction.token(),
            self.page,
            self.page_size
        )
    }

    /// Sort by `key`: same key flips the direction, a new key starts
    /// ascending. Either way the view returns to the first page.
    pub fn request_sort(&mut self, key: &str) -> Result<(), FetchError> {
        if key == self.sort_key {
            self.direction = self.direction.toggled();
        } else {
            validate_sort_key(key)?;
            self.sort_key = key.to_string();
            self.direction = SortDirection::Ascending;
        }
        self.page = 1;
        Ok(())
    }

    pub fn set_page(&mut self, page: u32) -> Result<(), FetchError> {
        if page == 0 {
            return Err(FetchError::config("page must be a positive integer"));
        }
        self.page = page;
        Ok(())
    }

    pub fn set_total_count(&mut self, total: Option<u64>) {
        self.total_count = total;
    }

    pub fn sort_key(&self) -> &str {
        &self.sort_key
    }

    pub fn direction(&self) -> SortDirection {
        self.direction
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    pub fn total_count(&self) -> Option<u64> {
        self.total_count
    }

    /// Number of pages, once the total count is known.
    pub fn total_pages(&self) -> Option<u64> {
        self.total_count
            .map(|total| total.div_ceil(u64::from(self.page_size)).max(1))
    }
}

impl fmt::Display for PaginationCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl FromStr for PaginationCursor {
    type Err = FetchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::decode(s)
    }
}

fn validate_sort_key(key: &str) -> Result<(), FetchError> {
    if key.trim().is_empty() {
        return Err(FetchError::config("sort key must not be empty"));
    }
    if key.contains([',', '|']) {
        return Err(FetchError::config(format!(
            "sort key {:?} contains a reserved character",
            key
        )));
    }
    Ok(())
}

fn parse_positive(raw: &str) -> Option<u32> {
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    raw.parse().ok().filter(|n| *n > 0)
}
