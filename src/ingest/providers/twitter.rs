// src/ingest/providers/twitter.rs
use std::time::{Duration, Instant};

use async_trait::async_trait;
use metrics::{counter, histogram};
use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use serde::Deserialize;

use crate::ingest::cursor::SearchQuery;
use crate::ingest::error::PollError;
use crate::ingest::types::{CandidateRecord, GeoPoint, SearchSource};

pub const DEFAULT_BASE_URL: &str = "https://api.twitter.com";
const SEARCH_PATH: &str = "/1.1/search/tweets.json";
/// Twitter's "Rate limit exceeded" error code.
const RATE_LIMIT_CODE: i64 = 88;

#[derive(Debug, Deserialize)]
struct SearchResponse {
    statuses: Vec<Status>,
}

#[derive(Debug, Deserialize)]
struct Status {
    id: Option<u64>,
    text: Option<String>,
    full_text: Option<String>,
    user: Option<User>,
    geo: Option<Geo>,
}

#[derive(Debug, Deserialize)]
struct User {
    screen_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Geo {
    coordinates: Option<Vec<f64>>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    errors: Vec<ApiError>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    code: Option<i64>,
}

impl From<Status> for CandidateRecord {
    fn from(s: Status) -> Self {
        let geo = s
            .geo
            .and_then(|g| g.coordinates)
            .and_then(|c| match c.as_slice() {
                [lat, lon] => Some(GeoPoint::new(*lat, *lon)),
                _ => None,
            });
        CandidateRecord {
            id: s.id,
            screen_name: s.user.and_then(|u| u.screen_name),
            text: s.full_text.or(s.text),
            geo,
        }
    }
}

/// Parse a search response body into candidates, preserving response order.
pub fn parse_search_response(body: &str) -> Result<Vec<CandidateRecord>, PollError> {
    let resp: SearchResponse =
        serde_json::from_str(body).map_err(|e| PollError::Malformed(e.to_string()))?;
    Ok(resp.statuses.into_iter().map(CandidateRecord::from).collect())
}

/// Seconds until `x-rate-limit-reset` (unix seconds), relative to `now`.
pub fn retry_after_from_reset(reset: Option<&str>, now_unix: i64) -> Option<Duration> {
    let reset: i64 = reset?.trim().parse().ok()?;
    Some(Duration::from_secs(reset.saturating_sub(now_unix).max(0) as u64))
}

fn is_rate_limited(status: StatusCode, body: &str) -> bool {
    // 420 is the legacy "Enhance Your Calm" response
    if status == StatusCode::TOO_MANY_REQUESTS || status.as_u16() == 420 {
        return true;
    }
    serde_json::from_str::<ErrorBody>(body)
        .map(|b| b.errors.iter().any(|e| e.code == Some(RATE_LIMIT_CODE)))
        .unwrap_or(false)
}

fn rate_limit_reset(headers: &HeaderMap) -> Option<Duration> {
    let raw = headers
        .get("x-rate-limit-reset")
        .and_then(|v| v.to_str().ok());
    retry_after_from_reset(raw, chrono::Utc::now().timestamp())
}

pub struct TwitterSearch {
    mode: Mode,
    page_size: u32,
}

enum Mode {
    Fixture(String),
    Http {
        base_url: String,
        bearer_token: String,
        client: reqwest::Client,
    },
}

impl TwitterSearch {
    /// Replays a canned search response on every poll.
    pub fn from_fixture(s: &str) -> Self {
        Self {
            mode: Mode::Fixture(s.to_string()),
            page_size: 100,
        }
    }

    pub fn from_http(
        base_url: impl Into<String>,
        bearer_token: impl Into<String>,
        page_size: u32,
        timeout: Duration,
    ) -> reqwest::Result<Self> {
        let client = super::http_client(timeout)?;
        Ok(Self {
            mode: Mode::Http {
                base_url: base_url.into().trim_end_matches('/').to_string(),
                bearer_token: bearer_token.into(),
                client,
            },
            page_size: page_size.clamp(1, 100),
        })
    }

    fn query_params(&self, q: &SearchQuery) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("q", String::new()),
            ("geocode", q.geocode()),
            ("count", self.page_size.to_string()),
            ("result_type", "recent".to_string()),
        ];
        // since_id=0 is rejected upstream; an unset watermark means "from the newest page"
        if q.since_id > 0 {
            params.push(("since_id", q.since_id.to_string()));
        }
        params
    }
}

#[async_trait]
impl SearchSource for TwitterSearch {
    async fn poll(&self, query: &SearchQuery) -> Result<Vec<CandidateRecord>, PollError> {
        let t0 = Instant::now();
        counter!("ingest_polls_total").increment(1);

        let out = match &self.mode {
            Mode::Fixture(s) => parse_search_response(s),
            Mode::Http {
                base_url,
                bearer_token,
                client,
            } => {
                let url = format!("{base_url}{SEARCH_PATH}");
                let resp = client
                    .get(&url)
                    .bearer_auth(bearer_token)
                    .query(&self.query_params(query))
                    .send()
                    .await
                    .map_err(|e| {
                        tracing::warn!(error = ?e, provider = "twitter", "search http error");
                        PollError::Unavailable(e.to_string())
                    })?;

                let status = resp.status();
                let retry_after = rate_limit_reset(resp.headers());
                let body = resp
                    .text()
                    .await
                    .map_err(|e| PollError::Unavailable(format!("reading body: {e}")))?;

                if !status.is_success() {
                    if is_rate_limited(status, &body) {
                        return Err(PollError::RateLimited { retry_after });
                    }
                    return Err(PollError::Unavailable(format!("search http status {status}")));
                }
                parse_search_response(&body)
            }
        };

        histogram!("ingest_poll_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
        if let Ok(v) = &out {
            counter!("ingest_candidates_total").increment(v.len() as u64);
            tracing::debug!(target: "ingest", since_id = query.since_id, count = v.len(), "search page");
        }
        out
    }

    fn name(&self) -> &'static str {
        "twitter"
    }
}
