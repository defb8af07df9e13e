//! Ingest error types.

use std::time::Duration;

use thiserror::Error;

/// Failure of one search poll. Decides how long the recovery loop backs off.
#[derive(Debug, Error)]
pub enum PollError {
    #[error("search source rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    #[error("search source unavailable: {0}")]
    Unavailable(String),

    #[error("malformed search response: {0}")]
    Malformed(String),
}

/// Failure of one fare estimate. Local to a single candidate.
#[derive(Debug, Error)]
pub enum EnrichmentError {
    #[error("fare service unavailable: {0}")]
    Unavailable(String),

    #[error("malformed fare response: {0}")]
    Malformed(String),
}

/// Failure of one sink append. Aborts the rest of the batch.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("sink unavailable: {0}")]
    Unavailable(String),

    #[error("sink rejected payload: {0}")]
    Rejected(String),
}

/// Anything that sends the recovery loop into cooldown.
#[derive(Debug, Error)]
pub enum CycleError {
    #[error(transparent)]
    Poll(#[from] PollError),

    #[error(transparent)]
    Sink(#[from] SinkError),
}

impl CycleError {
    /// Short label used for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            CycleError::Poll(PollError::RateLimited { .. }) => "poll_rate_limited",
            CycleError::Poll(PollError::Unavailable(_)) => "poll_unavailable",
            CycleError::Poll(PollError::Malformed(_)) => "poll_malformed",
            CycleError::Sink(SinkError::Unavailable(_)) => "sink_unavailable",
            CycleError::Sink(SinkError::Rejected(_)) => "sink_rejected",
        }
    }
}
