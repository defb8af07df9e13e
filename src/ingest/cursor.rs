// src/ingest/cursor.rs
//! Geo search cursor: the id watermark plus the fixed search area.
//!
//! The watermark is the smallest id not yet delivered. It only moves forward,
//! and only when the recovery loop commits a fully completed batch.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::ingest::types::GeoPoint;

/// Everything the poller needs to build the next search request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchQuery {
    pub since_id: u64,
    pub center: GeoPoint,
    pub radius_km: u32,
}

impl SearchQuery {
    /// `"{lat},{lon},{radius}km"` as the search API expects it.
    pub fn geocode(&self) -> String {
        format!(
            "{:.6},{:.6},{}km",
            self.center.lat, self.center.lon, self.radius_km
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GeoCursor {
    min_unseen_id: u64,
    center: GeoPoint,
    radius_km: u32,
}

impl GeoCursor {
    pub fn new(center: GeoPoint, radius_km: u32) -> Self {
        Self {
            min_unseen_id: 0,
            center,
            radius_km,
        }
    }

    /// Start from a previously committed watermark.
    pub fn resume(center: GeoPoint, radius_km: u32, min_unseen_id: u64) -> Self {
        Self {
            min_unseen_id,
            center,
            radius_km,
        }
    }

    pub fn min_unseen_id(&self) -> u64 {
        self.min_unseen_id
    }

    pub fn center(&self) -> GeoPoint {
        self.center
    }

    pub fn radius_km(&self) -> u32 {
        self.radius_km
    }

    /// Move the watermark to `newest_seen_id + 1`. Stale ids (older than the
    /// current watermark minus one) are ignored. Returns whether it moved.
    pub fn advance(&mut self, newest_seen_id: u64) -> bool {
        if newest_seen_id.saturating_add(1) < self.min_unseen_id {
            return false;
        }
        let next = newest_seen_id.saturating_add(1);
        let moved = next != self.min_unseen_id;
        self.min_unseen_id = next;
        moved
    }

    /// Commit a watermark candidate as produced by the fusion engine
    /// (already `max delivered id + 1`).
    pub fn commit(&mut self, watermark_candidate: u64) -> bool {
        match watermark_candidate.checked_sub(1) {
            Some(newest) => self.advance(newest),
            None => false,
        }
    }

    pub fn current_query(&self) -> SearchQuery {
        SearchQuery {
            since_id: self.min_unseen_id,
            center: self.center,
            radius_km: self.radius_km,
        }
    }
}

/// On-disk form of the watermark.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct CursorState {
    pub min_unseen_id: u64,
    #[serde(default)]
    pub updated_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// Missing file is not an error: the cursor simply starts from zero.
pub async fn load_state(path: &Path) -> Result<Option<CursorState>> {
    match tokio::fs::read_to_string(path).await {
        Ok(s) => {
            let st: CursorState = serde_json::from_str(&s)
                .with_context(|| format!("parsing cursor state {}", path.display()))?;
            Ok(Some(st))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).with_context(|| format!("reading cursor state {}", path.display())),
    }
}

/// Write via tmp + rename so a crash never leaves a half-written file.
pub async fn save_state(path: &Path, cursor: &GeoCursor) -> Result<()> {
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() {
            tokio::fs::create_dir_all(dir)
                .await
                .with_context(|| format!("creating {}", dir.display()))?;
        }
    }
    let st = CursorState {
        min_unseen_id: cursor.min_unseen_id(),
        updated_at: Some(chrono::Utc::now()),
    };
    let json = serde_json::to_string_pretty(&st)?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, json)
        .await
        .with_context(|| format!("writing {}", tmp.display()))?;
    tokio::fs::rename(&tmp, path)
        .await
        .with_context(|| format!("renaming into {}", path.display()))?;
    Ok(())
}
