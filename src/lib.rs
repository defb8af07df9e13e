// src/lib.rs
// Public library surface for the daemon binary and integration tests.

pub mod bootstrap;
pub mod config;
pub mod ingest;
pub mod metrics;

// ---- Re-exports for stable public API ----
pub use crate::config::IngestConfig;
pub use crate::ingest::{
    process_batch, BatchOutcome, CycleError, EnrichedRecord, EnrichmentError, FusionOptions,
    GeoCursor, GeoPoint, LoopState, PollError, RecoveryLoop, SinkError,
};
