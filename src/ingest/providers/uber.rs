// src/ingest/providers/uber.rs
use std::time::{Duration, Instant};

use async_trait::async_trait;
use metrics::histogram;
use serde::Deserialize;

use crate::ingest::error::EnrichmentError;
use crate::ingest::types::{quote_map, FareEstimator, PriceQuote, PriceQuoteMap};

pub const DEFAULT_BASE_URL: &str = "https://api.uber.com";
const ESTIMATE_PATH: &str = "/v1.2/estimates/price";
const SEAT_COUNT: u8 = 2;

#[derive(Debug, Deserialize)]
struct EstimateResponse {
    prices: Vec<serde_json::Value>,
}

/// Parse an estimate body. Lines without a `display_name` are ignored; a body
/// without a `prices` list is malformed.
pub fn parse_estimate_response(body: &str) -> Result<PriceQuoteMap, EnrichmentError> {
    let resp: EstimateResponse =
        serde_json::from_str(body).map_err(|e| EnrichmentError::Malformed(e.to_string()))?;
    let quotes = resp
        .prices
        .into_iter()
        .filter_map(|line| serde_json::from_value::<PriceQuote>(line).ok());
    Ok(quote_map(quotes))
}

pub struct UberEstimator {
    mode: Mode,
}

enum Mode {
    Fixture(String),
    Http {
        base_url: String,
        server_token: String,
        client: reqwest::Client,
    },
}

impl UberEstimator {
    /// Answers every estimate with the same canned body.
    pub fn from_fixture(s: &str) -> Self {
        Self {
            mode: Mode::Fixture(s.to_string()),
        }
    }

    pub fn from_http(
        base_url: impl Into<String>,
        server_token: impl Into<String>,
        timeout: Duration,
    ) -> reqwest::Result<Self> {
        let client = super::http_client(timeout)?;
        Ok(Self {
            mode: Mode::Http {
                base_url: base_url.into().trim_end_matches('/').to_string(),
                server_token: server_token.into(),
                client,
            },
        })
    }
}

#[async_trait]
impl FareEstimator for UberEstimator {
    async fn estimate(&self, lat: f64, lon: f64) -> Result<PriceQuoteMap, EnrichmentError> {
        match &self.mode {
            Mode::Fixture(s) => parse_estimate_response(s),
            Mode::Http {
                base_url,
                server_token,
                client,
            } => {
                let t0 = Instant::now();
                let url = format!("{base_url}{ESTIMATE_PATH}");
                let resp = client
                    .get(&url)
                    .header(reqwest::header::AUTHORIZATION, format!("Token {server_token}"))
                    .query(&[
                        ("start_latitude", lat.to_string()),
                        ("start_longitude", lon.to_string()),
                        ("end_latitude", lat.to_string()),
                        ("end_longitude", lon.to_string()),
                        ("seat_count", SEAT_COUNT.to_string()),
                    ])
                    .send()
                    .await
                    .map_err(|e| EnrichmentError::Unavailable(e.to_string()))?;

                let status = resp.status();
                if !status.is_success() {
                    return Err(EnrichmentError::Unavailable(format!(
                        "estimate http status {status}"
                    )));
                }
                let body = resp
                    .text()
                    .await
                    .map_err(|e| EnrichmentError::Unavailable(format!("reading body: {e}")))?;
                histogram!("ingest_enrich_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
                parse_estimate_response(&body)
            }
        }
    }

    fn name(&self) -> &'static str {
        "uber"
    }
}
