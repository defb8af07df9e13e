// src/ingest/sink/firehose.rs
//! Kinesis Firehose delivery stream sink (`PutRecord`, one record per call).

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_firehose::primitives::Blob;
use aws_sdk_firehose::types::Record;
use aws_sdk_firehose::Client;
use tracing::info;

use super::frame;
use crate::ingest::error::SinkError;
use crate::ingest::types::{Ack, RecordSink};

/// Firehose caps a single record at 1000 KiB before base64.
const MAX_RECORD_BYTES: usize = 1_000 * 1_024;

pub struct FirehoseSink {
    client: Client,
    stream_name: String,
    delimiter: String,
}

impl FirehoseSink {
    /// Credentials come from the default AWS provider chain.
    pub async fn new(region: Option<&str>, stream_name: &str, delimiter: &str) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(r) = region {
            loader = loader.region(aws_sdk_firehose::config::Region::new(r.to_string()));
        }
        let aws_cfg = loader.load().await;

        info!(stream = %stream_name, region = ?region, "Firehose sink initialised");
        Self::from_client(Client::new(&aws_cfg), stream_name, delimiter)
    }

    pub fn from_client(client: Client, stream_name: &str, delimiter: &str) -> Self {
        Self {
            client,
            stream_name: stream_name.to_string(),
            delimiter: delimiter.to_string(),
        }
    }

    /// Framed record bytes, checked against the service's size limit.
    fn record_bytes(&self, payload: &str) -> Result<Vec<u8>, SinkError> {
        let framed = frame(payload, &self.delimiter)?;
        if framed.len() > MAX_RECORD_BYTES {
            return Err(SinkError::Rejected(format!(
                "record of {} bytes exceeds firehose limit",
                framed.len()
            )));
        }
        Ok(framed.into_bytes())
    }
}

#[async_trait]
impl RecordSink for FirehoseSink {
    async fn append(&self, payload: &str) -> Result<Ack, SinkError> {
        let record = Record::builder()
            .data(Blob::new(self.record_bytes(payload)?))
            .build()
            .map_err(|e| SinkError::Rejected(e.to_string()))?;

        match self
            .client
            .put_record()
            .delivery_stream_name(&self.stream_name)
            .record(record)
            .send()
            .await
        {
            Ok(out) => Ok(Ack {
                record_id: Some(out.record_id().to_string()),
            }),
            Err(e) => {
                let svc = e.into_service_error();
                if svc.is_invalid_argument_exception() {
                    Err(SinkError::Rejected(format!("{svc:?}")))
                } else {
                    Err(SinkError::Unavailable(format!("{svc:?}")))
                }
            }
        }
    }

    fn name(&self) -> &'static str {
        "firehose"
    }
}
