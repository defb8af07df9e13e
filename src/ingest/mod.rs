// src/ingest/mod.rs
pub mod cursor;
pub mod error;
pub mod fusion;
pub mod mock;
pub mod providers;
pub mod recovery;
pub mod sink;
pub mod types;

use metrics::{describe_counter, describe_gauge, describe_histogram};
use once_cell::sync::OnceCell;

pub use cursor::{GeoCursor, SearchQuery};
pub use error::{CycleError, EnrichmentError, PollError, SinkError};
pub use fusion::{process_batch, BatchOutcome, FusionOptions};
pub use recovery::{LoopState, RecoveryLoop};
pub use types::{
    CandidateRecord, EnrichedRecord, FareEstimator, GeoPoint, PriceQuoteMap, PriceRange,
    RecordSink, SearchSource,
};

/// One-time metrics registration (so series show up on /metrics).
pub(crate) fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("ingest_polls_total", "Search polls attempted.");
        describe_counter!("ingest_candidates_total", "Candidates returned by search polls.");
        describe_counter!(
            "ingest_skipped_total",
            "Candidates dropped before enrichment (missing geo/id/user)."
        );
        describe_counter!(
            "ingest_enrich_errors_total",
            "Fare estimates that failed; the record is dropped."
        );
        describe_counter!(
            "ingest_rejected_total",
            "Records the sink refused as malformed; the record is dropped."
        );
        describe_counter!("ingest_delivered_total", "Enriched records acknowledged by the sink.");
        describe_counter!(
            "ingest_cycle_failures_total",
            "Cycles that ended in cooldown, by error kind."
        );
        describe_histogram!("ingest_poll_ms", "Search poll time in milliseconds.");
        describe_histogram!("ingest_enrich_ms", "Fare estimate time in milliseconds.");
        describe_gauge!("ingest_watermark", "Committed minimum unseen id.");
        describe_gauge!("ingest_cooldown_secs", "Length of the current cooldown.");
        describe_gauge!("ingest_last_cycle_ts", "Unix ts of the last completed cycle.");
    });
}

/// Normalize tweet text: decode HTML entities, collapse whitespace, trim.
pub fn normalize_text(s: &str) -> String {
    let decoded = html_escape::decode_html_entities(s);

    static RE_WS: OnceCell<regex::Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| regex::Regex::new(r"\s+").unwrap());
    re_ws.replace_all(&decoded, " ").trim().to_string()
}

/// Replace every non-ASCII character with `?`.
pub fn ascii_fold(s: &str) -> String {
    s.chars()
        .map(|c| if c.is_ascii() { c } else { '?' })
        .collect()
}
