// src/bootstrap.rs
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::config::IngestConfig;
use crate::ingest::cursor::{load_state, GeoCursor};
use crate::ingest::providers::{twitter::TwitterSearch, uber::UberEstimator};
use crate::ingest::recovery::RecoveryLoop;
use crate::ingest::sink::build_sink;
use crate::ingest::types::{FareEstimator, SearchSource};

pub fn build_source(cfg: &IngestConfig) -> Result<Arc<dyn SearchSource>> {
    let s = &cfg.search;
    if let Some(p) = &s.fixture_path {
        let body = std::fs::read_to_string(p)
            .with_context(|| format!("reading search fixture {}", p.display()))?;
        warn!(path = %p.display(), "search source replays a fixture");
        return Ok(Arc::new(TwitterSearch::from_fixture(&body)));
    }
    let src = TwitterSearch::from_http(
        &s.base_url,
        &s.bearer_token,
        s.page_size,
        Duration::from_secs(s.timeout_secs),
    )
    .context("building search http client")?;
    Ok(Arc::new(src))
}

pub fn build_estimator(cfg: &IngestConfig) -> Result<Arc<dyn FareEstimator>> {
    let f = &cfg.fares;
    if let Some(p) = &f.fixture_path {
        let body = std::fs::read_to_string(p)
            .with_context(|| format!("reading fare fixture {}", p.display()))?;
        warn!(path = %p.display(), "fare estimator replays a fixture");
        return Ok(Arc::new(UberEstimator::from_fixture(&body)));
    }
    let est = UberEstimator::from_http(
        &f.base_url,
        &f.server_token,
        Duration::from_secs(f.timeout_secs),
    )
    .context("building fare http client")?;
    Ok(Arc::new(est))
}

/// Cursor from persisted state when configured, otherwise fresh.
pub async fn initial_cursor(cfg: &IngestConfig) -> Result<GeoCursor> {
    let center = cfg.center();
    let radius = cfg.search.radius_km;
    if let Some(path) = &cfg.cursor_state_path {
        if let Some(st) = load_state(path).await? {
            info!(since_id = st.min_unseen_id, path = %path.display(), "resuming from persisted cursor");
            return Ok(GeoCursor::resume(center, radius, st.min_unseen_id));
        }
    }
    Ok(GeoCursor::new(center, radius))
}

/// Wire every component described by `cfg` into a ready-to-run loop.
pub async fn build_loop(cfg: &IngestConfig) -> Result<RecoveryLoop> {
    let source = build_source(cfg)?;
    let estimator = build_estimator(cfg)?;
    let sink = build_sink(&cfg.sink).await?;
    let cursor = initial_cursor(cfg).await?;

    info!(
        center = ?cfg.center(),
        radius_km = cfg.search.radius_km,
        enrich_concurrency = cfg.fares.concurrency,
        "pipeline configured"
    );

    let mut lp = RecoveryLoop::new(source, estimator, sink, cursor)
        .with_options(cfg.fusion_options())
        .with_policy(cfg.cooldown_policy());
    if let Some(p) = &cfg.cursor_state_path {
        lp = lp.with_cursor_path(p.clone());
    }
    Ok(lp)
}
