// src/ingest/recovery.rs
//! Long-running poll → fuse → deliver loop.
//!
//! `Idle → Polling → Fusing → Delivering → Idle` on success,
//! `… → Cooldown → Polling` on any poll or sink failure. The cursor is only
//! written after a batch was delivered without abort.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use metrics::{counter, gauge};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::ingest::cursor::{save_state, GeoCursor};
use crate::ingest::error::{CycleError, PollError};
use crate::ingest::fusion::{deliver_batch, enrich_batch, BatchOutcome, FusionOptions};
use crate::ingest::types::{FareEstimator, RecordSink, SearchSource};

/// 61 × 15 s: one full search rate-limit window plus a little slack.
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(61 * 15);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Polling,
    Fusing,
    Delivering,
    Cooldown,
}

#[derive(Debug, Clone)]
pub struct CooldownPolicy {
    /// Upper bound when the search source reports a rate limit.
    pub rate_limited: Duration,
    /// Any other poll or sink failure.
    pub transient: Duration,
    /// Pause between successful cycles.
    pub poll_interval: Duration,
}

impl Default for CooldownPolicy {
    fn default() -> Self {
        Self {
            rate_limited: DEFAULT_COOLDOWN,
            transient: DEFAULT_COOLDOWN,
            poll_interval: Duration::from_secs(5),
        }
    }
}

impl CooldownPolicy {
    pub fn cooldown_for(&self, err: &CycleError) -> Duration {
        match err {
            CycleError::Poll(PollError::RateLimited {
                retry_after: Some(d),
            }) => (*d).min(self.rate_limited),
            CycleError::Poll(PollError::RateLimited { retry_after: None }) => self.rate_limited,
            _ => self.transient,
        }
    }
}

/// Summary of one successful cycle.
#[derive(Debug)]
pub struct CycleReport {
    pub candidates: usize,
    pub outcome: BatchOutcome,
    pub watermark: u64,
}

pub struct RecoveryLoop {
    source: Arc<dyn SearchSource>,
    estimator: Arc<dyn FareEstimator>,
    sink: Arc<dyn RecordSink>,
    cursor: GeoCursor,
    opts: FusionOptions,
    policy: CooldownPolicy,
    cursor_path: Option<PathBuf>,
    state: watch::Sender<LoopState>,
}

impl RecoveryLoop {
    pub fn new(
        source: Arc<dyn SearchSource>,
        estimator: Arc<dyn FareEstimator>,
        sink: Arc<dyn RecordSink>,
        cursor: GeoCursor,
    ) -> Self {
        let (state, _) = watch::channel(LoopState::Idle);
        Self {
            source,
            estimator,
            sink,
            cursor,
            opts: FusionOptions::default(),
            policy: CooldownPolicy::default(),
            cursor_path: None,
            state,
        }
    }

    pub fn with_options(mut self, opts: FusionOptions) -> Self {
        self.opts = opts;
        self
    }

    pub fn with_policy(mut self, policy: CooldownPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Persist the watermark here after every committed advance.
    pub fn with_cursor_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.cursor_path = Some(path.into());
        self
    }

    pub fn cursor(&self) -> &GeoCursor {
        &self.cursor
    }

    pub fn state(&self) -> LoopState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<LoopState> {
        self.state.subscribe()
    }

    fn enter(&self, s: LoopState) {
        self.state.send_replace(s);
    }

    /// One poll → fuse → deliver pass. On error the cursor is untouched.
    pub async fn run_cycle(&mut self) -> Result<CycleReport, CycleError> {
        crate::ingest::ensure_metrics_described();

        self.enter(LoopState::Polling);
        let query = self.cursor.current_query();
        let candidates = self.source.poll(&query).await?;
        let n = candidates.len();

        self.enter(LoopState::Fusing);
        let fused = enrich_batch(candidates, &self.cursor, self.estimator.as_ref(), &self.opts).await;

        self.enter(LoopState::Delivering);
        let mut outcome = deliver_batch(fused, self.sink.as_ref(), &self.opts).await;
        if let Some(e) = outcome.abort.take() {
            return Err(CycleError::Sink(e));
        }

        if let Some(candidate) = outcome.watermark_candidate {
            if self.cursor.commit(candidate) {
                self.persist_cursor().await;
            }
        }
        let watermark = self.cursor.min_unseen_id();
        gauge!("ingest_watermark").set(watermark as f64);
        gauge!("ingest_last_cycle_ts").set(chrono::Utc::now().timestamp() as f64);

        info!(
            target: "ingest",
            candidates = n,
            delivered = outcome.delivered,
            skipped = outcome.skipped,
            enrich_failed = outcome.enrich_failed,
            rejected = outcome.rejected,
            watermark,
            "cycle complete"
        );

        self.enter(LoopState::Idle);
        Ok(CycleReport {
            candidates: n,
            outcome,
            watermark,
        })
    }

    async fn persist_cursor(&self) {
        if let Some(path) = &self.cursor_path {
            if let Err(e) = save_state(path, &self.cursor).await {
                warn!(target: "ingest", error = ?e, path = %path.display(), "cursor persist failed");
            }
        }
    }

    /// Sleep unless shut down first. Returns false on shutdown.
    async fn pause(shutdown: &CancellationToken, d: Duration) -> bool {
        tokio::select! {
            _ = shutdown.cancelled() => false,
            _ = tokio::time::sleep(d) => true,
        }
    }

    /// Run until `shutdown` is cancelled. Returns the final cursor.
    pub async fn run(mut self, shutdown: CancellationToken) -> GeoCursor {
        info!(
            target: "ingest",
            source = self.source.name(),
            estimator = self.estimator.name(),
            sink = self.sink.name(),
            center = ?self.cursor.center(),
            radius_km = self.cursor.radius_km(),
            since_id = self.cursor.min_unseen_id(),
            "ingest loop starting"
        );

        loop {
            let res = tokio::select! {
                _ = shutdown.cancelled() => break,
                r = self.run_cycle() => r,
            };

            let keep_going = match res {
                Ok(_) => Self::pause(&shutdown, self.policy.poll_interval).await,
                Err(e) => {
                    let d = self.policy.cooldown_for(&e);
                    counter!("ingest_cycle_failures_total", "kind" => e.kind()).increment(1);
                    gauge!("ingest_cooldown_secs").set(d.as_secs_f64());
                    warn!(
                        target: "ingest",
                        error = %e,
                        kind = e.kind(),
                        cooldown_secs = d.as_secs(),
                        since_id = self.cursor.min_unseen_id(),
                        "cycle failed, cooling down"
                    );
                    self.enter(LoopState::Cooldown);
                    let cont = Self::pause(&shutdown, d).await;
                    gauge!("ingest_cooldown_secs").set(0.0);
                    cont
                }
            };
            if !keep_going {
                break;
            }
        }

        self.enter(LoopState::Idle);
        info!(target: "ingest", since_id = self.cursor.min_unseen_id(), "ingest loop stopped");
        self.cursor
    }
}
