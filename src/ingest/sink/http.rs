// src/ingest/sink/http.rs
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};

use super::frame;
use crate::ingest::error::SinkError;
use crate::ingest::types::{Ack, RecordSink};

/// POSTs each framed record to a collector endpoint.
#[derive(Clone)]
pub struct HttpSink {
    url: String,
    delimiter: String,
    client: Client,
}

impl HttpSink {
    pub fn new(url: &str, delimiter: &str, timeout: Duration) -> reqwest::Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            url: url.to_string(),
            delimiter: delimiter.to_string(),
            client,
        })
    }
}

fn is_rejection(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::BAD_REQUEST | StatusCode::PAYLOAD_TOO_LARGE | StatusCode::UNPROCESSABLE_ENTITY
    )
}

#[async_trait]
impl RecordSink for HttpSink {
    async fn append(&self, payload: &str) -> Result<Ack, SinkError> {
        let body = frame(payload, &self.delimiter)?;
        let rsp = self
            .client
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "application/x-ndjson")
            .body(body)
            .send()
            .await
            .map_err(|e| SinkError::Unavailable(format!("http sink request failed: {e}")))?;

        let status = rsp.status();
        if is_rejection(status) {
            return Err(SinkError::Rejected(format!("http sink status {status}")));
        }
        if !status.is_success() {
            return Err(SinkError::Unavailable(format!("http sink status {status}")));
        }
        let record_id = rsp
            .headers()
            .get("x-record-id")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        Ok(Ack { record_id })
    }

    fn name(&self) -> &'static str {
        "http"
    }
}
