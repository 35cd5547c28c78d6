// Cache module.
// In-memory TTL cache, the server-side cache layer and its disk snapshots.

pub mod paths;
pub mod server;
pub mod store;
pub mod ttl;

pub use server::{SNAPSHOT_TTL, ServerCache};
pub use ttl::{TtlCache, TtlRange};
