// Fetch session state.
// Phase of the retry state machine plus the counters it drives.

use std::time::Duration;

use chrono::{DateTime, Utc};

/// Where a session is in its fetch cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum FetchPhase {
    #[default]
    Idle,
    Fetching,
    Success,
    /// Last attempt was empty or timed out; another is scheduled.
    EmptyRetry,
    /// Last attempt failed at the transport level; another is scheduled.
    TransientError,
    FatalError(String),
}

impl FetchPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, FetchPhase::Success | FetchPhase::FatalError(_))
    }

    pub fn display(&self) -> &'static str {
        match self {
            FetchPhase::Idle => "Idle",
            FetchPhase::Fetching => "Fetching",
            FetchPhase::Success => "Success",
            FetchPhase::EmptyRetry => "Waiting for data",
            FetchPhase::TransientError => "Retrying",
            FetchPhase::FatalError(_) => "Error",
        }
    }
}

/// Per-request bookkeeping. Reset whenever the request changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchState {
    /// Cache key of the request (path and query).
    pub url: String,
    pub phase: FetchPhase,
    /// Wait before the next retry.
    pub retry_delay: Duration,
    /// Empty/timeout retries taken.
    pub retry_count: u32,
    /// Transport errors seen.
    pub error_count: u32,
    pub is_fetching: bool,
    pub has_succeeded_once: bool,
    pub last_updated_seen: Option<DateTime<Utc>>,
}

impl FetchState {
    pub fn new(url: impl Into<String>, initial_delay: Duration) -> Self {
        Self {
            url: url.into(),
            phase: FetchPhase::Idle,
            retry_delay: initial_delay,
            retry_count: 0,
            error_count: 0,
            is_fetching: false,
            has_succeeded_once: false,
            last_updated_seen: None,
        }
    }
}

/// What a caller renders.
#[derive(Debug, Clone, Default)]
pub enum LoadingState<T> {
    #[default]
    Idle,
    Loading,
    Loaded(T),
    Error(String),
}

impl<T> LoadingState<T> {
    pub fn is_loading(&self) -> bool {
        matches!(self, LoadingState::Loading)
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self, LoadingState::Loaded(_))
    }

    pub fn data(&self) -> Option<&T> {
        match self {
            LoadingState::Loaded(data) => Some(data),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            LoadingState::Error(message) => Some(message),
            _ => None,
        }
    }

    /// Derive the caller view. A value, once present, wins over any phase.
    pub fn from_phase(phase: &FetchPhase, value: Option<T>) -> Self {
        if let Some(value) = value {
            return LoadingState::Loaded(value);
        }
        match phase {
            FetchPhase::Idle => LoadingState::Idle,
            FetchPhase::Fetching
            | FetchPhase::EmptyRetry
            | FetchPhase::TransientError
            | FetchPhase::Success => LoadingState::Loading,
            FetchPhase::FatalError(message) => LoadingState::Error(message.clone()),
        }
    }
}
