// Runtime configuration.
// Environment-driven settings plus the fetch profiles used by each call site.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::cache::TtlRange;
use crate::error::{NetStatsError, Result};

pub const REST_URL_VAR: &str = "NETSTATS_REST_URL";
pub const LISTEN_ADDR_VAR: &str = "NETSTATS_LISTEN_ADDR";
pub const CACHE_DIR_VAR: &str = "NETSTATS_CACHE_DIR";
pub const LOG_VAR: &str = "NETSTATS_LOG";
pub const LOG_FORMAT_VAR: &str = "NETSTATS_LOG_FORMAT";

const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:4000";
const DEFAULT_LOG_FILTER: &str = "info";

/// Process configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Backend REST base URL, without trailing slash.
    pub rest_url: String,
    pub listen_addr: SocketAddr,
    /// Snapshot directory override for the server cache.
    pub cache_dir: Option<PathBuf>,
    pub log_filter: String,
    pub log_json: bool,
}

impl Config {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let rest_url = lookup(REST_URL_VAR)
            .filter(|url| !url.trim().is_empty())
            .ok_or(NetStatsError::MissingEnv(REST_URL_VAR))?;
        let rest_url = normalize_base_url(&rest_url)?;

        let listen_addr = lookup(LISTEN_ADDR_VAR)
            .unwrap_or_else(|| DEFAULT_LISTEN_ADDR.to_string())
            .parse()
            .map_err(|e| NetStatsError::InvalidConfig(format!("{}: {}", LISTEN_ADDR_VAR, e)))?;

        let log_filter = lookup(LOG_VAR)
            .or_else(|| lookup("RUST_LOG"))
            .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());

        let log_json = lookup(LOG_FORMAT_VAR).is_some_and(|f| f.eq_ignore_ascii_case("json"));

        Ok(Self {
            rest_url,
            listen_addr,
            cache_dir: lookup(CACHE_DIR_VAR).map(PathBuf::from),
            log_filter,
            log_json,
        })
    }
}

fn normalize_base_url(raw: &str) -> Result<String> {
    let trimmed = raw.trim().trim_end_matches('/');
    reqwest::Url::parse(trimmed)
        .map_err(|e| NetStatsError::InvalidConfig(format!("{}: {}", REST_URL_VAR, e)))?;
    Ok(trimmed.to_string())
}

/// Timing and retry constants for one kind of call site.
///
/// Dashboard sessions and the server cache run the same machinery and
/// differ only in these numbers.
#[derive(Debug, Clone)]
pub struct FetchProfile {
    /// Jittered TTL for successful results.
    pub ttl: TtlRange,
    /// How often expired entries are swept.
    pub sweep_interval: Duration,
    /// Per-attempt request timeout.
    pub request_timeout: Duration,
    /// Delay before the first retry.
    pub initial_retry_delay: Duration,
    /// Added to the delay after every empty or timed out attempt.
    pub retry_increment: Duration,
    /// Empty/timeout retries before giving up with "request timed out".
    pub max_retries: u32,
    /// Other transport errors tolerated before the error becomes fatal.
    pub max_transport_errors: u32,
    /// Last-updated polling interval; `None` disables freshness polling.
    pub freshness_interval: Option<Duration>,
    /// Attempts for the item-count request.
    pub item_count_attempts: u32,
    /// Pause between item-count attempts.
    pub item_count_pause: Duration,
}

impl FetchProfile {
    /// Paginated dashboard tables.
    pub fn dashboard() -> Self {
        Self {
            ttl: TtlRange::new(Duration::from_secs(25), Duration::from_secs(35)),
            sweep_interval: Duration::from_secs(60),
            request_timeout: Duration::from_millis(5000),
            initial_retry_delay: Duration::from_millis(100),
            retry_increment: Duration::from_millis(100),
            max_retries: 50,
            max_transport_errors: 5,
            freshness_interval: Some(Duration::from_secs(60)),
            item_count_attempts: 3,
            item_count_pause: Duration::from_secs(30),
        }
    }

    /// Server-side cache entries served by the proxy routes.
    pub fn server() -> Self {
        Self {
            ttl: TtlRange::new(Duration::from_secs(60), Duration::from_secs(120)),
            sweep_interval: Duration::from_secs(5 * 60),
            request_timeout: Duration::from_millis(500),
            freshness_interval: None,
            ..Self::dashboard()
        }
    }
}

impl Default for FetchProfile {
    fn default() -> Self {
        Self::dashboard()
    }
}
