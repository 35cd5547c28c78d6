// Error types for netstats.
// Fetch classification errors shared through the coalescer, plus the crate-level error.

use thiserror::Error;

/// Errors produced while fetching a data key.
///
/// Clonable so one in-flight result can be handed to every coalesced caller.
/// `EmptyResponse`, `TransportTimeout` and `Transport` are transient and are
/// absorbed by the retry loop until its budget runs out.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("empty response")]
    EmptyResponse,

    #[error("connection timed out")]
    TransportTimeout,

    #[error("transport error: {0}")]
    Transport(String),

    /// The backend answered with an explicit `error` field. Surfaced verbatim.
    #[error("{0}")]
    ServerReported(String),

    #[error("invalid request: {0}")]
    Configuration(String),

    #[error("request timed out")]
    RetriesExhausted,

    #[error("request cancelled")]
    Cancelled,
}

impl FetchError {
    /// Whether another attempt could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            FetchError::EmptyResponse | FetchError::TransportTimeout | FetchError::Transport(_)
        )
    }

    pub(crate) fn config(message: impl Into<String>) -> Self {
        FetchError::Configuration(message.into())
    }
}

#[derive(Error, Debug)]
pub enum NetStatsError {
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("Missing {0} environment variable")]
    MissingEnv(&'static str),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, NetStatsError>;

pub type FetchResult<T> = std::result::Result<T, FetchError>;
