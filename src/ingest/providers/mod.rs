// src/ingest/providers/mod.rs
pub mod twitter;
pub mod uber;

use std::time::Duration;

/// Shared HTTP client for the upstream APIs.
pub(crate) fn http_client(timeout: Duration) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(concat!("ubertweets-ingest/", env!("CARGO_PKG_VERSION")))
        .connect_timeout(Duration::from_secs(4).min(timeout))
        .timeout(timeout)
        .build()
}
