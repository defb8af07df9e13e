// src/ingest/mock.rs
//! In-memory doubles for the three pipeline seams. Used by tests and dry runs.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::ingest::cursor::SearchQuery;
use crate::ingest::error::{EnrichmentError, PollError, SinkError};
use crate::ingest::types::{
    Ack, CandidateRecord, FareEstimator, GeoPoint, PriceQuoteMap, PriceRange, RecordSink,
    SearchSource,
};

/// Shorthand for building candidates in tests.
pub fn candidate(id: u64, geo: Option<(f64, f64)>, user: &str, text: &str) -> CandidateRecord {
    CandidateRecord {
        id: Some(id),
        screen_name: (!user.is_empty()).then(|| user.to_string()),
        text: Some(text.to_string()),
        geo: geo.map(|(lat, lon)| GeoPoint::new(lat, lon)),
    }
}

/// Scripted search source: each poll pops the next scripted response; once the
/// script runs out every poll returns an empty page. Queries are recorded.
pub struct StaticSource {
    script: Mutex<VecDeque<Result<Vec<CandidateRecord>, PollError>>>,
    pub queries: Mutex<Vec<SearchQuery>>,
}

impl StaticSource {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            queries: Mutex::new(Vec::new()),
        }
    }

    pub fn then_page(self, page: Vec<CandidateRecord>) -> Self {
        self.script.lock().unwrap().push_back(Ok(page));
        self
    }

    pub fn then_error(self, err: PollError) -> Self {
        self.script.lock().unwrap().push_back(Err(err));
        self
    }

    pub fn since_ids(&self) -> Vec<u64> {
        self.queries.lock().unwrap().iter().map(|q| q.since_id).collect()
    }
}

impl Default for StaticSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SearchSource for StaticSource {
    async fn poll(&self, query: &SearchQuery) -> Result<Vec<CandidateRecord>, PollError> {
        self.queries.lock().unwrap().push(*query);
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(Vec::new()))
    }

    fn name(&self) -> &'static str {
        "static"
    }
}

/// Returns the same quote for any coordinates, except for points listed as
/// failing or hanging.
pub struct FixedEstimator {
    quote: PriceQuoteMap,
    failing: HashSet<(u64, u64)>,
    hanging: HashSet<(u64, u64)>,
    calls: AtomicUsize,
    pub seen: Mutex<Vec<GeoPoint>>,
}

fn key(lat: f64, lon: f64) -> (u64, u64) {
    (lat.to_bits(), lon.to_bits())
}

impl FixedEstimator {
    pub fn new(quote: PriceQuoteMap) -> Self {
        Self {
            quote,
            failing: HashSet::new(),
            hanging: HashSet::new(),
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        }
    }

    /// A single `uberX: [5, 7]` product.
    pub fn uber_x() -> Self {
        let mut m = PriceQuoteMap::new();
        m.insert(
            "uberX".to_string(),
            PriceRange {
                low: Some(5.0),
                high: Some(7.0),
            },
        );
        Self::new(m)
    }

    pub fn failing_at(mut self, lat: f64, lon: f64) -> Self {
        self.failing.insert(key(lat, lon));
        self
    }

    /// Estimates for this point never complete.
    pub fn hanging_at(mut self, lat: f64, lon: f64) -> Self {
        self.hanging.insert(key(lat, lon));
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FareEstimator for FixedEstimator {
    async fn estimate(&self, lat: f64, lon: f64) -> Result<PriceQuoteMap, EnrichmentError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push(GeoPoint::new(lat, lon));
        if self.hanging.contains(&key(lat, lon)) {
            std::future::pending::<()>().await;
        }
        if self.failing.contains(&key(lat, lon)) {
            return Err(EnrichmentError::Unavailable("scripted failure".into()));
        }
        Ok(self.quote.clone())
    }

    fn name(&self) -> &'static str {
        "fixed"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailMode {
    Unavailable,
    Rejected,
    /// The append never completes.
    Hang,
}

/// Keeps appended payloads in memory. Can be told to fail on specific calls
/// (0-based, counted across the sink's lifetime).
pub struct MemorySink {
    pub records: Mutex<Vec<String>>,
    fail_on: Mutex<HashMap<usize, FailMode>>,
    calls: AtomicUsize,
}

impl MemorySink {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(Vec::new()),
            fail_on: Mutex::new(HashMap::new()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn fail_on(self, call: usize, mode: FailMode) -> Self {
        self.fail_on.lock().unwrap().insert(call, mode);
        self
    }

    /// Appends attempted so far, failed ones included.
    pub fn attempts(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn delivered(&self) -> Vec<String> {
        self.records.lock().unwrap().clone()
    }

    /// Ids of delivered records, in delivery order.
    pub fn delivered_ids(&self) -> Vec<u64> {
        self.delivered()
            .iter()
            .filter_map(|p| serde_json::from_str::<serde_json::Value>(p).ok())
            .filter_map(|v| v["id"].as_u64())
            .collect()
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RecordSink for MemorySink {
    async fn append(&self, payload: &str) -> Result<Ack, SinkError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        let mode = self.fail_on.lock().unwrap().get(&n).copied();
        match mode {
            Some(FailMode::Unavailable) => {
                return Err(SinkError::Unavailable(format!("scripted outage on call {n}")))
            }
            Some(FailMode::Rejected) => {
                return Err(SinkError::Rejected(format!("scripted rejection on call {n}")))
            }
            Some(FailMode::Hang) => std::future::pending::<()>().await,
            None => {}
        }
        self.records.lock().unwrap().push(payload.to_string());
        Ok(Ack {
            record_id: Some(n.to_string()),
        })
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
