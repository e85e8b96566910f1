pub mod client;
pub mod registry;
pub mod retry;
pub mod utils;
pub mod watcher;

#[cfg(feature = "server")]
pub mod web;

use once_cell::sync::Lazy;

pub use client::{Client, ClientConfig, ClientError, Heartbeat};
pub use registry::{Application, InMemoryRegistry, Instance, Registry, Status};
pub use watcher::{Event, EventKind, Watcher, DEFAULT_POLL_INTERVAL};

/// Registry endpoints from the comma-separated `EUREKA_ENDPOINTS` variable.
pub static EUREKA_ENDPOINTS: Lazy<Vec<String>> = Lazy::new(|| {
    std::env::var("EUREKA_ENDPOINTS")
        .map(|raw| parse_endpoints(&raw))
        .unwrap_or_default()
});

/// Loads `.env` into the process environment, if present.
pub fn init_env() {
    dotenv::dotenv().ok();
}

pub fn parse_endpoints(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|e| !e.is_empty())
        .map(String::from)
        .collect()
}
