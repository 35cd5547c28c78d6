// HTTP proxy server.

pub mod routes;

pub use routes::{ProxyState, router};
