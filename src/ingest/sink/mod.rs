// src/ingest/sink/mod.rs
//! Append-only delivery targets. One payload per call, no reads.

pub mod file;
#[cfg(feature = "sink-firehose")]
pub mod firehose;
pub mod http;

use std::io;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::ser::Formatter;

use crate::config::{SinkConfig, SinkKind};
use crate::ingest::error::SinkError;
use crate::ingest::types::RecordSink;

pub const DEFAULT_DELIMITER: &str = "\n";

/// Terminate `payload` with `delimiter`. A payload that already contains the
/// delimiter would corrupt record framing, so it is rejected.
pub fn frame(payload: &str, delimiter: &str) -> Result<String, SinkError> {
    if payload.is_empty() {
        return Err(SinkError::Rejected("empty payload".into()));
    }
    if !delimiter.is_empty() && payload.contains(delimiter) {
        return Err(SinkError::Rejected(format!(
            "payload contains record delimiter {delimiter:?}"
        )));
    }
    let mut out = String::with_capacity(payload.len() + delimiter.len());
    out.push_str(payload);
    out.push_str(delimiter);
    Ok(out)
}

/// Compact JSON writer that emits the listed characters as `\uXXXX` inside
/// strings and object keys.
struct EscapeChars<'a>(&'a [char]);

impl Formatter for EscapeChars<'_> {
    fn write_string_fragment<W>(&mut self, writer: &mut W, fragment: &str) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        let mut start = 0;
        for (i, c) in fragment.char_indices() {
            if self.0.contains(&c) {
                writer.write_all(fragment[start..i].as_bytes())?;
                let mut units = [0u16; 2];
                for u in c.encode_utf16(&mut units) {
                    write!(writer, "\\u{:04x}", u)?;
                }
                start = i + c.len_utf8();
            }
        }
        writer.write_all(fragment[start..].as_bytes())
    }
}

/// Serialize `value` so that string content can never spell out `delimiter`.
///
/// Delimiter characters that JSON itself needs (alphanumerics, `\`, `"`) are
/// left alone; every other one is `\u`-escaped wherever it shows up in a
/// string. A delimiter built only from JSON syntax can still collide, which
/// `frame` reports as `Rejected`.
pub fn encode_record<T: Serialize>(value: &T, delimiter: &str) -> Result<String, SinkError> {
    let escape: Vec<char> = delimiter
        .chars()
        .filter(|c| !c.is_ascii_alphanumeric() && *c != '\\' && *c != '"')
        .collect();
    let mut buf = Vec::with_capacity(256);
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, EscapeChars(&escape));
    value
        .serialize(&mut ser)
        .map_err(|e| SinkError::Rejected(format!("serializing record: {e}")))?;
    String::from_utf8(buf).map_err(|e| SinkError::Rejected(format!("serializing record: {e}")))
}

/// Build the sink selected in config.
pub async fn build_sink(cfg: &SinkConfig) -> Result<Arc<dyn RecordSink>> {
    let sink: Arc<dyn RecordSink> = match cfg.kind {
        SinkKind::File => {
            let path = cfg
                .path
                .as_ref()
                .context("sink.kind = \"file\" requires sink.path")?;
            Arc::new(
                file::FileSink::open(path, &cfg.delimiter)
                    .await
                    .with_context(|| format!("opening sink file {}", path.display()))?,
            )
        }
        SinkKind::Http => {
            let url = cfg
                .url
                .as_ref()
                .context("sink.kind = \"http\" requires sink.url")?;
            Arc::new(
                http::HttpSink::new(url, &cfg.delimiter, cfg.timeout())
                    .context("building http sink client")?,
            )
        }
        #[cfg(feature = "sink-firehose")]
        SinkKind::Firehose => {
            let stream = cfg
                .stream_name
                .as_ref()
                .context("sink.kind = \"firehose\" requires sink.stream_name")?;
            Arc::new(firehose::FirehoseSink::new(cfg.region.as_deref(), stream, &cfg.delimiter).await)
        }
        #[cfg(not(feature = "sink-firehose"))]
        SinkKind::Firehose => {
            anyhow::bail!("sink.kind = \"firehose\" needs the `sink-firehose` feature")
        }
    };
    tracing::info!(sink = sink.name(), "delivery sink ready");
    Ok(sink)
}
