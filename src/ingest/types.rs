// src/ingest/types.rs
use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ingest::cursor::SearchQuery;
use crate::ingest::error::{EnrichmentError, PollError, SinkError};

/// Field names of [`EnrichedRecord`] that a product name may not shadow once flattened.
pub const RESERVED_KEYS: [&str; 5] = ["id", "user", "text", "geo", "timestamp"];

/// A latitude/longitude pair. Serialized the way the search API shapes `geo`:
/// `{"coordinates": [lat, lon]}`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "GeoJson", into = "GeoJson")]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lon.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lon)
    }
}

#[derive(Serialize, Deserialize)]
struct GeoJson {
    coordinates: [f64; 2],
}

impl From<GeoJson> for GeoPoint {
    fn from(g: GeoJson) -> Self {
        GeoPoint::new(g.coordinates[0], g.coordinates[1])
    }
}

impl From<GeoPoint> for GeoJson {
    fn from(p: GeoPoint) -> Self {
        GeoJson {
            coordinates: [p.lat, p.lon],
        }
    }
}

/// Raw search hit, before any validation.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CandidateRecord {
    pub id: Option<u64>,
    pub screen_name: Option<String>,
    pub text: Option<String>,
    pub geo: Option<GeoPoint>,
}

/// One product line from the fare service.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PriceQuote {
    pub display_name: String,
    #[serde(default)]
    pub low_estimate: Option<f64>,
    #[serde(default)]
    pub high_estimate: Option<f64>,
}

/// `[low, high]` on the wire; either end may be unknown (metered products).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "(Option<f64>, Option<f64>)", into = "(Option<f64>, Option<f64>)")]
pub struct PriceRange {
    pub low: Option<f64>,
    pub high: Option<f64>,
}

impl From<(Option<f64>, Option<f64>)> for PriceRange {
    fn from((low, high): (Option<f64>, Option<f64>)) -> Self {
        Self { low, high }
    }
}

impl From<PriceRange> for (Option<f64>, Option<f64>) {
    fn from(r: PriceRange) -> Self {
        (r.low, r.high)
    }
}

/// Product name -> estimate. The product set is open-ended.
pub type PriceQuoteMap = BTreeMap<String, PriceRange>;

/// Fold quote lines into a map; a repeated product name keeps the last line.
pub fn quote_map<I: IntoIterator<Item = PriceQuote>>(quotes: I) -> PriceQuoteMap {
    quotes
        .into_iter()
        .filter(|q| !q.display_name.trim().is_empty())
        .map(|q| {
            (
                q.display_name,
                PriceRange {
                    low: q.low_estimate,
                    high: q.high_estimate,
                },
            )
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRef {
    pub screen_name: String,
}

/// Candidate fields merged with its fare quotes. The only thing a sink ever sees.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedRecord {
    pub id: u64,
    pub user: UserRef,
    pub text: String,
    pub geo: GeoPoint,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub prices: PriceQuoteMap,
}

impl EnrichedRecord {
    pub fn new(
        id: u64,
        screen_name: String,
        text: String,
        geo: GeoPoint,
        timestamp: DateTime<Utc>,
        mut prices: PriceQuoteMap,
    ) -> Self {
        prices.retain(|name, _| {
            let clash = RESERVED_KEYS.contains(&name.as_str());
            if clash {
                tracing::debug!(product = %name, "dropping product that shadows a record field");
            }
            !clash
        });
        Self {
            id,
            user: UserRef { screen_name },
            text,
            geo,
            timestamp,
            prices,
        }
    }
}

/// Receipt from a sink for one appended payload.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Ack {
    pub record_id: Option<String>,
}

#[async_trait]
pub trait SearchSource: Send + Sync {
    /// Fetch one page of candidates newer than `query.since_id`.
    async fn poll(&self, query: &SearchQuery) -> Result<Vec<CandidateRecord>, PollError>;
    fn name(&self) -> &'static str;
}

#[async_trait]
pub trait FareEstimator: Send + Sync {
    /// Single-point estimate: origin and destination are both `(lat, lon)`.
    async fn estimate(&self, lat: f64, lon: f64) -> Result<PriceQuoteMap, EnrichmentError>;
    fn name(&self) -> &'static str;
}

#[async_trait]
pub trait RecordSink: Send + Sync {
    /// Append one serialized record. The sink adds its own delimiter.
    async fn append(&self, payload: &str) -> Result<Ack, SinkError>;
    fn name(&self) -> &'static str;
}
