//! # Fusion Engine
//! Turns one page of search candidates into enriched records and hands them
//! to the sink in arrival order.
//!
//! Policy: a candidate without geo/id/user never reaches the fare service.
//! A failed fare estimate drops that record only, and so does a payload the
//! sink rejects. An unavailable sink stops the batch; whatever was
//! acknowledged before it is reported, nothing after it is attempted. The cursor itself is never touched here; callers commit
//! `watermark_candidate` once the batch finished without abort.

use std::time::Duration;

use futures::stream::{self, StreamExt};
use metrics::counter;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::ingest::cursor::GeoCursor;
use crate::ingest::error::{EnrichmentError, SinkError};
use crate::ingest::sink::{encode_record, DEFAULT_DELIMITER};
use crate::ingest::types::{
    CandidateRecord, EnrichedRecord, FareEstimator, GeoPoint, RecordSink,
};
use crate::ingest::{ascii_fold, normalize_text};

#[derive(Debug, Clone)]
pub struct FusionOptions {
    pub enrich_timeout: Duration,
    pub sink_timeout: Duration,
    /// Fare estimates in flight at once. Delivery order is unaffected.
    pub enrich_concurrency: usize,
    pub ascii_text: bool,
    /// The sink's record delimiter; serialized records never contain it.
    pub delimiter: String,
}

impl Default for FusionOptions {
    fn default() -> Self {
        Self {
            enrich_timeout: Duration::from_secs(10),
            sink_timeout: Duration::from_secs(10),
            enrich_concurrency: 1,
            ascii_text: false,
            delimiter: DEFAULT_DELIMITER.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    MissingId,
    MissingUser,
    MissingGeo,
    /// Already below the committed watermark.
    Stale,
}

impl SkipReason {
    fn label(self) -> &'static str {
        match self {
            SkipReason::MissingId => "missing_id",
            SkipReason::MissingUser => "missing_user",
            SkipReason::MissingGeo => "missing_geo",
            SkipReason::Stale => "stale",
        }
    }
}

/// A candidate that passed validation.
#[derive(Debug, Clone, PartialEq)]
pub struct Usable {
    pub id: u64,
    pub screen_name: String,
    pub text: String,
    pub geo: GeoPoint,
}

/// Check the fields the pipeline cannot do without.
pub fn validate(c: CandidateRecord, cursor: &GeoCursor) -> Result<Usable, SkipReason> {
    let geo = c
        .geo
        .filter(GeoPoint::is_valid)
        .ok_or(SkipReason::MissingGeo)?;
    let id = c.id.filter(|id| *id > 0).ok_or(SkipReason::MissingId)?;
    let screen_name = c
        .screen_name
        .filter(|s| !s.trim().is_empty())
        .ok_or(SkipReason::MissingUser)?;
    if id < cursor.min_unseen_id() {
        return Err(SkipReason::Stale);
    }
    Ok(Usable {
        id,
        screen_name,
        text: c.text.unwrap_or_default(),
        geo,
    })
}

#[derive(Debug)]
pub struct EnrichFailure {
    pub id: u64,
    pub error: EnrichmentError,
}

/// Output of the enrichment phase, still in arrival order.
#[derive(Debug, Default)]
pub struct FusedBatch {
    pub items: Vec<Result<EnrichedRecord, EnrichFailure>>,
    pub skipped: usize,
}

#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub delivered: usize,
    pub skipped: usize,
    pub enrich_failed: usize,
    /// Payloads the sink refused. Dropped, never retried.
    pub rejected: usize,
    /// `max id + 1` over delivered and rejected records; `None` when there
    /// were none.
    pub watermark_candidate: Option<u64>,
    /// Set when the sink was unavailable; the rest of the batch was not attempted.
    pub abort: Option<SinkError>,
}

impl BatchOutcome {
    pub fn is_complete(&self) -> bool {
        self.abort.is_none()
    }
}

fn build_text(raw: &str, opts: &FusionOptions) -> String {
    let t = normalize_text(raw);
    if opts.ascii_text {
        ascii_fold(&t)
    } else {
        t
    }
}

async fn enrich_one(
    u: Usable,
    estimator: &dyn FareEstimator,
    opts: &FusionOptions,
) -> Result<EnrichedRecord, EnrichFailure> {
    let res = match timeout(opts.enrich_timeout, estimator.estimate(u.geo.lat, u.geo.lon)).await {
        Ok(r) => r,
        Err(_) => Err(EnrichmentError::Unavailable(format!(
            "estimate timed out after {:?}",
            opts.enrich_timeout
        ))),
    };
    match res {
        Ok(prices) => Ok(EnrichedRecord::new(
            u.id,
            u.screen_name,
            build_text(&u.text, opts),
            u.geo,
            chrono::Utc::now(),
            prices,
        )),
        Err(error) => Err(EnrichFailure { id: u.id, error }),
    }
}

/// Validate and enrich. Estimates may overlap up to `enrich_concurrency`,
/// results come back in the original order.
pub async fn enrich_batch(
    candidates: Vec<CandidateRecord>,
    cursor: &GeoCursor,
    estimator: &dyn FareEstimator,
    opts: &FusionOptions,
) -> FusedBatch {
    let mut skipped = 0usize;
    let mut usable = Vec::with_capacity(candidates.len());
    for c in candidates {
        match validate(c, cursor) {
            Ok(u) => usable.push(u),
            Err(reason) => {
                skipped += 1;
                counter!("ingest_skipped_total", "reason" => reason.label()).increment(1);
            }
        }
    }

    let items = stream::iter(usable)
        .map(|u| enrich_one(u, estimator, opts))
        .buffered(opts.enrich_concurrency.max(1))
        .collect::<Vec<_>>()
        .await;

    FusedBatch { items, skipped }
}

/// Deliver enriched records strictly in order. A rejected payload is skipped;
/// the first unavailable sink stops the batch.
pub async fn deliver_batch(
    batch: FusedBatch,
    sink: &dyn RecordSink,
    opts: &FusionOptions,
) -> BatchOutcome {
    let mut out = BatchOutcome {
        skipped: batch.skipped,
        ..Default::default()
    };
    // delivered and rejected records are both finished; neither is polled again
    let mut max_done: Option<u64> = None;

    for item in batch.items {
        let rec = match item {
            Ok(rec) => rec,
            Err(EnrichFailure { id, error }) => {
                warn!(target: "ingest", id, error = %error, "fare estimate failed, record dropped");
                counter!("ingest_enrich_errors_total").increment(1);
                out.enrich_failed += 1;
                continue;
            }
        };

        let appended = match encode_record(&rec, &opts.delimiter) {
            Ok(payload) => match timeout(opts.sink_timeout, sink.append(&payload)).await {
                Ok(r) => r,
                Err(_) => Err(SinkError::Unavailable(format!(
                    "append timed out after {:?}",
                    opts.sink_timeout
                ))),
            },
            Err(e) => Err(e),
        };

        match appended {
            Ok(ack) => {
                debug!(target: "ingest", id = rec.id, record_id = ?ack.record_id, "record delivered");
                counter!("ingest_delivered_total").increment(1);
                out.delivered += 1;
                max_done = Some(max_done.map_or(rec.id, |m| m.max(rec.id)));
            }
            Err(e @ SinkError::Rejected(_)) => {
                warn!(target: "ingest", id = rec.id, error = %e, "sink rejected record, dropped");
                counter!("ingest_rejected_total").increment(1);
                out.rejected += 1;
                max_done = Some(max_done.map_or(rec.id, |m| m.max(rec.id)));
            }
            Err(e) => {
                warn!(target: "ingest", id = rec.id, error = %e, "sink append failed, aborting batch");
                out.abort = Some(e);
                break;
            }
        }
    }

    out.watermark_candidate = max_done.map(|m| m.saturating_add(1));
    out
}

/// Enrich then deliver one page of candidates.
pub async fn process_batch(
    candidates: Vec<CandidateRecord>,
    cursor: &GeoCursor,
    estimator: &dyn FareEstimator,
    sink: &dyn RecordSink,
    opts: &FusionOptions,
) -> BatchOutcome {
    let fused = enrich_batch(candidates, cursor, estimator, opts).await;
    deliver_batch(fused, sink, opts).await
}
