// Retry scheduling.
// Classifies each attempt and decides between success, a delayed retry, or a terminal error.

use std::future::Future;
use std::time::Duration;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::state::{FetchPhase, FetchState};
use crate::api::{PayloadKind, classify_payload};
use crate::config::FetchProfile;
use crate::error::{FetchError, FetchResult};

/// Retry limits and linear backoff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub initial_delay: Duration,
    pub increment: Duration,
    pub max_retries: u32,
    pub max_transport_errors: u32,
}

impl RetryPolicy {
    pub fn from_profile(profile: &FetchProfile) -> Self {
        Self {
            initial_delay: profile.initial_retry_delay,
            increment: profile.retry_increment,
            max_retries: profile.max_retries,
            max_transport_errors: profile.max_transport_errors,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_profile(&FetchProfile::default())
    }
}

/// Outcome of one network call, after classification.
#[derive(Debug, Clone, PartialEq)]
pub enum Attempt {
    Data(Value),
    Empty,
    ServerError(String),
    Timeout,
    TransportError(String),
}

impl Attempt {
    pub fn classify(result: FetchResult<Value>) -> Self {
        match result {
            Ok(body) => match classify_payload(&body) {
                PayloadKind::Data => Attempt::Data(body),
                PayloadKind::Empty => Attempt::Empty,
                PayloadKind::Error(message) => Attempt::ServerError(message),
            },
            Err(FetchError::EmptyResponse) => Attempt::Empty,
            Err(FetchError::TransportTimeout) => Attempt::Timeout,
            Err(FetchError::ServerReported(message)) => Attempt::ServerError(message),
            Err(other) => Attempt::TransportError(other.to_string()),
        }
    }
}

/// What the session does next.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    Succeeded(Value),
    RetryAfter(Duration),
    Fail(FetchError),
    /// A terminal error after the session already delivered data. The
    /// caller keeps the previous value and never sees this error.
    KeepStale(FetchError),
}

/// The retry state machine, free of I/O and timers.
#[derive(Debug, Clone, Default)]
pub struct RetryScheduler {
    policy: RetryPolicy,
}

impl RetryScheduler {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    /// Apply one attempt to `state` and decide the next step.
    pub fn on_attempt(&self, state: &mut FetchState, attempt: Attempt) -> Step {
        match attempt {
            Attempt::Data(value) => {
                state.phase = FetchPhase::Success;
                state.has_succeeded_once = true;
                Step::Succeeded(value)
            }
            Attempt::Empty | Attempt::Timeout => {
                if state.retry_count >= self.policy.max_retries {
                    return self.terminal(state, FetchError::RetriesExhausted);
                }
                state.phase = FetchPhase::EmptyRetry;
                state.retry_count += 1;
                Step::RetryAfter(self.next_delay(state))
            }
            Attempt::ServerError(message) => {
                self.terminal(state, FetchError::ServerReported(message))
            }
            Attempt::TransportError(message) => {
                state.error_count += 1;
                if state.error_count > self.policy.max_transport_errors {
                    return self.terminal(state, FetchError::Transport(message));
                }
                state.phase = FetchPhase::TransientError;
                Step::RetryAfter(self.next_delay(state))
            }
        }
    }

    /// Current delay, then grow it by the fixed increment.
    fn next_delay(&self, state: &mut FetchState) -> Duration {
        let delay = state.retry_delay;
        state.retry_delay += self.policy.increment;
        delay
    }

    fn terminal(&self, state: &mut FetchState, error: FetchError) -> Step {
        if state.has_succeeded_once {
            state.phase = FetchPhase::Success;
            return Step::KeepStale(error);
        }
        state.phase = FetchPhase::FatalError(error.to_string());
        Step::Fail(error)
    }
}

/// A fixed number of attempts with a fixed pause, for requests that sit
/// outside a session: the daemon's list fetches and the item count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptPolicy {
    pub attempts: u32,
    pub pause: Duration,
    pub timeout: Duration,
}

impl AttemptPolicy {
    /// Entity list fetches of the revalidation daemon.
    pub fn list() -> Self {
        Self {
            attempts: 5,
            pause: Duration::from_millis(500),
            timeout: Duration::from_millis(500),
        }
    }

    /// Item-count fetches backing a cursor's total.
    pub fn item_count(profile: &FetchProfile) -> Self {
        Self {
            attempts: profile.item_count_attempts,
            pause: profile.item_count_pause,
            timeout: profile.request_timeout,
        }
    }

    /// Run `op` until it succeeds, fails non-transiently, or attempts run out.
    pub async fn run<T, F, Fut>(&self, cancel: &CancellationToken, mut op: F) -> FetchResult<T>
    where
        F: FnMut(Duration) -> Fut,
        Fut: Future<Output = FetchResult<T>>,
    {
        let attempts = self.attempts.max(1);
        let mut last_error = FetchError::RetriesExhausted;

        for attempt in 1..=attempts {
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(FetchError::Cancelled),
                result = op(self.timeout) => result,
            };
            match result {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_transient() => return Err(e),
                Err(e) => {
                    debug!(attempt, attempts, error = %e, "attempt failed");
                    last_error = e;
                }
            }
            if attempt < attempts {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(FetchError::Cancelled),
                    _ = tokio::time::sleep(self.pause) => {}
                }
            }
        }

        Err(last_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            initial_delay: Duration::from_millis(100),
            increment: Duration::from_millis(100),
            max_retries,
            max_transport_errors: 5,
        }
    }

    fn state() -> FetchState {
        FetchState::new("/providers", Duration::from_millis(100))
    }

    #[test]
    fn test_classify() {
        assert_eq!(Attempt::classify(Ok(json!({}))), Attempt::Empty);
        assert_eq!(
            Attempt::classify(Ok(json!({"error": "nope"}))),
            Attempt::ServerError("nope".into())
        );
        assert_eq!(
            Attempt::classify(Err(FetchError::TransportTimeout)),
            Attempt::Timeout
        );
        assert!(matches!(
            Attempt::classify(Err(FetchError::Transport("reset".into()))),
            Attempt::TransportError(_)
        ));
        assert_eq!(
            Attempt::classify(Ok(json!({"data": []}))),
            Attempt::Data(json!({"data": []}))
        );
    }

    #[test]
    fn test_empty_retries_with_linear_backoff() {
        let scheduler = RetryScheduler::new(policy(50));
        let mut state = state();

        let delays: Vec<Step> = (0..3)
            .map(|_| scheduler.on_attempt(&mut state, Attempt::Empty))
            .collect();
        assert_eq!(
            delays,
            vec![
                Step::RetryAfter(Duration::from_millis(100)),
                Step::RetryAfter(Duration::from_millis(200)),
                Step::RetryAfter(Duration::from_millis(300)),
            ]
        );
        assert_eq!(state.phase, FetchPhase::EmptyRetry);

        let step = scheduler.on_attempt(&mut state, Attempt::Data(json!({"providers": []})));
        assert!(matches!(step, Step::Succeeded(_)));
        assert_eq!(state.retry_count, 3);
        assert_eq!(state.phase, FetchPhase::Success);
    }

    #[test]
    fn test_empty_responses_stop_at_cap() {
        let scheduler = RetryScheduler::new(policy(4));
        let mut state = state();

        for _ in 0..4 {
            assert!(matches!(
                scheduler.on_attempt(&mut state, Attempt::Timeout),
                Step::RetryAfter(_)
            ));
        }
        let step = scheduler.on_attempt(&mut state, Attempt::Empty);
        assert_eq!(step, Step::Fail(FetchError::RetriesExhausted));
        assert_eq!(state.retry_count, 4);
        assert_eq!(state.phase, FetchPhase::FatalError("request timed out".into()));
    }

    #[test]
    fn test_server_error_is_fatal_immediately() {
        let scheduler = RetryScheduler::new(policy(50));
        let mut state = state();
        let step = scheduler.on_attempt(&mut state, Attempt::ServerError("bad spec".into()));
        assert_eq!(step, Step::Fail(FetchError::ServerReported("bad spec".into())));
        assert_eq!(state.retry_count, 0);
    }

    #[test]
    fn test_transport_errors_tolerated_up_to_threshold() {
        let scheduler = RetryScheduler::new(policy(50));
        let mut state = state();

        for _ in 0..5 {
            let step = scheduler.on_attempt(&mut state, Attempt::TransportError("reset".into()));
            assert!(matches!(step, Step::RetryAfter(_)));
            assert_eq!(state.phase, FetchPhase::TransientError);
        }
        let step = scheduler.on_attempt(&mut state, Attempt::TransportError("reset".into()));
        assert!(matches!(step, Step::Fail(FetchError::Transport(_))));
        assert_eq!(state.error_count, 6);
        assert_eq!(state.retry_count, 0);
    }

    #[test]
    fn test_errors_after_success_are_suppressed() {
        let scheduler = RetryScheduler::new(policy(0));
        let mut state = state();
        scheduler.on_attempt(&mut state, Attempt::Data(json!([1])));

        let step = scheduler.on_attempt(&mut state, Attempt::ServerError("gone".into()));
        assert_eq!(step, Step::KeepStale(FetchError::ServerReported("gone".into())));
        assert_eq!(state.phase, FetchPhase::Success);

        let step = scheduler.on_attempt(&mut state, Attempt::Empty);
        assert_eq!(step, Step::KeepStale(FetchError::RetriesExhausted));
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_policy_retries_transient() {
        let calls = AtomicU32::new(0);
        let policy = AttemptPolicy::list();
        let result = policy
            .run(&CancellationToken::new(), |_| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(FetchError::TransportTimeout)
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;
        assert_eq!(result, Ok(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_policy_gives_up() {
        let calls = AtomicU32::new(0);
        let policy = AttemptPolicy {
            attempts: 3,
            pause: Duration::from_secs(30),
            timeout: Duration::from_secs(1),
        };
        let start = tokio::time::Instant::now();
        let result: FetchResult<()> = policy
            .run(&CancellationToken::new(), |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(FetchError::EmptyResponse) }
            })
            .await;

        assert_eq!(result, Err(FetchError::EmptyResponse));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(start.elapsed() >= Duration::from_secs(60));
        assert!(start.elapsed() < Duration::from_secs(61));
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_policy_stops_on_server_error() {
        let calls = AtomicU32::new(0);
        let result: FetchResult<()> = AttemptPolicy::list()
            .run(&CancellationToken::new(), |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(FetchError::ServerReported("no such list".into())) }
            })
            .await;
        assert!(matches!(result, Err(FetchError::ServerReported(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
