// src/ingest/sink/file.rs
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use super::frame;
use crate::ingest::error::SinkError;
use crate::ingest::types::{Ack, RecordSink};

/// Local append-only file. Every record is synced before it is acknowledged.
pub struct FileSink {
    path: PathBuf,
    delimiter: String,
    file: Mutex<File>,
}

impl FileSink {
    pub async fn open(path: &Path, delimiter: &str) -> std::io::Result<Self> {
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                tokio::fs::create_dir_all(dir).await?;
            }
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        Ok(Self {
            path: path.to_path_buf(),
            delimiter: delimiter.to_string(),
            file: Mutex::new(file),
        })
    }
}

#[async_trait]
impl RecordSink for FileSink {
    async fn append(&self, payload: &str) -> Result<Ack, SinkError> {
        let framed = frame(payload, &self.delimiter)?;
        let mut f = self.file.lock().await;
        f.write_all(framed.as_bytes())
            .await
            .map_err(|e| SinkError::Unavailable(format!("{}: {e}", self.path.display())))?;
        f.sync_data()
            .await
            .map_err(|e| SinkError::Unavailable(format!("{}: {e}", self.path.display())))?;
        Ok(Ack::default())
    }

    fn name(&self) -> &'static str {
        "file"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn appends_and_never_truncates() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("records.jsonl");

        let sink = FileSink::open(&path, "\n").await.unwrap();
        sink.append(r#"{"id":1}"#).await.unwrap();
        drop(sink);

        // reopen: previous content must survive
        let sink = FileSink::open(&path, "\n").await.unwrap();
        sink.append(r#"{"id":2}"#).await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "{\"id\":1}\n{\"id\":2}\n");
    }

    #[tokio::test]
    async fn framing_violation_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.jsonl");
        let sink = FileSink::open(&path, "\n").await.unwrap();
        let err = sink.append("line\nbreak").await.unwrap_err();
        assert!(matches!(err, SinkError::Rejected(_)));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "");
    }
}
