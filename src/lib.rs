// netstats: data access for a network statistics dashboard.
// Cached, coalesced and retried reads of backend data keys, plus a
// revalidating proxy that keeps a server-side cache warm.

pub mod api;
pub mod app;
pub mod cache;
pub mod config;
pub mod error;
pub mod fetch;
pub mod logging;
pub mod pagination;
pub mod revalidation;
pub mod server;

#[cfg(test)]
mod testing;

pub use error::{FetchError, NetStatsError, Result};
