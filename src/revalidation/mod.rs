// Server-side revalidation.
// Keeps the proxy's cache warm independent of any client.

pub mod catalog;
pub mod daemon;
pub mod log;

pub use catalog::{Collection, default_catalog};
pub use daemon::{
    DaemonStatus, PassReport, RevalidationConfig, RevalidationDaemon, RevalidationMetrics,
    RevalidationPhase,
};
pub use log::{LogLevel, LogLine, RevalidationLog};
