// Client-side data access.
// Cached, coalesced and retried reads of backend data keys.

pub mod coalescer;
pub mod freshness;
pub mod layer;
pub mod retry;
pub mod session;
pub mod state;

pub use coalescer::RequestCoalescer;
pub use freshness::{FreshnessPoller, PollOutcome};
pub use layer::DataLayer;
pub use retry::{Attempt, AttemptPolicy, RetryPolicy, RetryScheduler, Step};
pub use session::{FetchSession, WeakSession};
pub use state::{FetchPhase, FetchState, LoadingState};
