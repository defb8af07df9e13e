// tests/recovery_loop.rs
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use ubertweets_ingest::ingest::cursor::load_state;
use ubertweets_ingest::ingest::mock::{candidate, FailMode, FixedEstimator, MemorySink, StaticSource};
use ubertweets_ingest::ingest::recovery::CooldownPolicy;
use ubertweets_ingest::ingest::sink::file::FileSink;
use ubertweets_ingest::ingest::{
    CycleError, FusionOptions, GeoCursor, GeoPoint, LoopState, PollError, RecoveryLoop,
    SinkError,
};

fn cursor() -> GeoCursor {
    GeoCursor::new(GeoPoint::new(37.773972, -122.431297), 85)
}

fn page(ids: &[u64]) -> Vec<ubertweets_ingest::ingest::CandidateRecord> {
    ids.iter()
        .map(|&i| candidate(i, Some((37.0 + i as f64 / 100.0, -122.0)), "u", "t"))
        .collect()
}

fn policy() -> CooldownPolicy {
    CooldownPolicy {
        rate_limited: Duration::from_secs(900),
        transient: Duration::from_secs(60),
        poll_interval: Duration::from_secs(5),
    }
}

#[tokio::test]
async fn successful_cycle_commits_watermark_and_next_poll_uses_it() {
    let source = Arc::new(StaticSource::new().then_page(page(&[3, 2, 1])).then_page(page(&[5])));
    let sink = Arc::new(MemorySink::new());
    let mut lp = RecoveryLoop::new(
        source.clone(),
        Arc::new(FixedEstimator::uber_x()),
        sink.clone(),
        cursor(),
    );

    let r1 = lp.run_cycle().await.unwrap();
    assert_eq!(r1.outcome.delivered, 3);
    assert_eq!(lp.cursor().min_unseen_id(), 4);
    assert_eq!(lp.state(), LoopState::Idle);

    let r2 = lp.run_cycle().await.unwrap();
    assert_eq!(r2.watermark, 6);
    assert_eq!(source.since_ids(), vec![0, 4]);
}

#[tokio::test]
async fn watermark_never_decreases_across_cycles() {
    let source = Arc::new(
        StaticSource::new()
            .then_page(page(&[10]))
            .then_page(Vec::new())
            .then_page(page(&[12, 11])),
    );
    let mut lp = RecoveryLoop::new(
        source,
        Arc::new(FixedEstimator::uber_x()),
        Arc::new(MemorySink::new()),
        cursor(),
    );
    let mut last = lp.cursor().min_unseen_id();
    let mut seen = Vec::new();
    for _ in 0..3 {
        let r = lp.run_cycle().await.unwrap();
        assert!(r.watermark >= last);
        if r.outcome.delivered > 0 {
            assert!(r.watermark > last);
        }
        last = r.watermark;
        seen.push(last);
    }
    assert_eq!(seen, vec![11, 11, 13]);
}

#[tokio::test]
async fn sink_failure_leaves_cursor_unchanged_and_enters_error() {
    let source = Arc::new(StaticSource::new().then_page(page(&[1, 2, 3])).then_page(page(&[1, 2, 3])));
    let sink = Arc::new(MemorySink::new().fail_on(1, FailMode::Unavailable));
    let mut lp = RecoveryLoop::new(
        source.clone(),
        Arc::new(FixedEstimator::uber_x()),
        sink.clone(),
        cursor(),
    );

    let err = lp.run_cycle().await.unwrap_err();
    assert!(matches!(err, CycleError::Sink(SinkError::Unavailable(_))));
    assert_eq!(lp.cursor().min_unseen_id(), 0);

    // retry re-uses the same watermark; record 1 may be re-delivered, nothing is lost
    lp.run_cycle().await.unwrap();
    assert_eq!(source.since_ids(), vec![0, 0]);
    assert_eq!(sink.delivered_ids(), vec![1, 1, 2, 3]);
    assert_eq!(lp.cursor().min_unseen_id(), 4);
}

#[tokio::test]
async fn poll_failure_leaves_cursor_unchanged() {
    let source = Arc::new(
        StaticSource::new()
            .then_page(page(&[7]))
            .then_error(PollError::Unavailable("connection reset".into())),
    );
    let mut lp = RecoveryLoop::new(
        source,
        Arc::new(FixedEstimator::uber_x()),
        Arc::new(MemorySink::new()),
        cursor(),
    );
    lp.run_cycle().await.unwrap();
    assert_eq!(lp.cursor().min_unseen_id(), 8);

    let err = lp.run_cycle().await.unwrap_err();
    assert_eq!(err.kind(), "poll_unavailable");
    assert_eq!(lp.cursor().min_unseen_id(), 8);
}

#[tokio::test(start_paused = true)]
async fn run_cools_down_after_failure_then_resumes() {
    let source = Arc::new(
        StaticSource::new()
            .then_error(PollError::Unavailable("down".into()))
            .then_page(page(&[1, 2, 3])),
    );
    let sink = Arc::new(MemorySink::new());
    let lp = RecoveryLoop::new(
        source.clone(),
        Arc::new(FixedEstimator::uber_x()),
        sink.clone(),
        cursor(),
    )
    .with_policy(policy());
    let mut states = lp.subscribe();

    let shutdown = CancellationToken::new();
    let handle = tokio::spawn(lp.run(shutdown.clone()));

    // first poll fails at t=0; nothing else happens during the 60 s cooldown
    tokio::time::sleep(Duration::from_secs(59)).await;
    assert_eq!(source.since_ids(), vec![0]);
    assert_eq!(*states.borrow_and_update(), LoopState::Cooldown);
    assert!(sink.delivered().is_empty());

    // cooldown over at t=60: same watermark, batch delivered
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(source.since_ids(), vec![0, 0]);
    assert_eq!(sink.delivered_ids(), vec![1, 2, 3]);

    // next successful poll 5 s later uses the committed watermark
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(source.since_ids(), vec![0, 0, 4]);

    shutdown.cancel();
    let final_cursor = handle.await.unwrap();
    assert_eq!(final_cursor.min_unseen_id(), 4);
}

#[tokio::test(start_paused = true)]
async fn rate_limit_uses_long_cooldown() {
    let source = Arc::new(
        StaticSource::new().then_error(PollError::RateLimited { retry_after: None }),
    );
    let lp = RecoveryLoop::new(
        source.clone(),
        Arc::new(FixedEstimator::uber_x()),
        Arc::new(MemorySink::new()),
        cursor(),
    )
    .with_policy(policy());

    let shutdown = CancellationToken::new();
    let handle = tokio::spawn(lp.run(shutdown.clone()));

    tokio::time::sleep(Duration::from_secs(899)).await;
    assert_eq!(source.since_ids().len(), 1);
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(source.since_ids().len(), 2);

    shutdown.cancel();
    handle.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn shutdown_interrupts_cooldown() {
    let source = Arc::new(StaticSource::new().then_error(PollError::Malformed("html".into())));
    let lp = RecoveryLoop::new(
        source,
        Arc::new(FixedEstimator::uber_x()),
        Arc::new(MemorySink::new()),
        cursor(),
    )
    .with_policy(policy());

    let shutdown = CancellationToken::new();
    let handle = tokio::spawn(lp.run(shutdown.clone()));

    tokio::time::sleep(Duration::from_secs(1)).await;
    let started = tokio::time::Instant::now();
    shutdown.cancel();
    let c = handle.await.unwrap();
    assert_eq!(c.min_unseen_id(), 0);
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[tokio::test]
async fn committed_cursor_is_persisted() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cursor.json");
    let source = Arc::new(StaticSource::new().then_page(page(&[41, 40])));
    let mut lp = RecoveryLoop::new(
        source,
        Arc::new(FixedEstimator::uber_x()),
        Arc::new(MemorySink::new()),
        cursor(),
    )
    .with_cursor_path(&path);

    lp.run_cycle().await.unwrap();
    let st = load_state(&path).await.unwrap().unwrap();
    assert_eq!(st.min_unseen_id, 42);
}

#[tokio::test]
async fn legacy_delimiter_in_tweet_text_does_not_stall_the_loop() {
    let delim = "\\$0$";
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("records.dat");
    let batch = vec![
        candidate(5, Some((37.1, -122.1)), "a", "ok"),
        candidate(4, Some((37.2, -122.2)), "b", r"see \$0$ lol"),
        candidate(3, Some((37.3, -122.3)), "c", "later"),
    ];
    let source = Arc::new(StaticSource::new().then_page(batch));
    let sink = Arc::new(FileSink::open(&path, delim).await.unwrap());
    let mut lp = RecoveryLoop::new(
        source.clone(),
        Arc::new(FixedEstimator::uber_x()),
        sink,
        cursor(),
    )
    .with_options(FusionOptions {
        delimiter: delim.to_string(),
        ..Default::default()
    });

    for _ in 0..3 {
        lp.run_cycle().await.unwrap();
    }
    assert_eq!(source.since_ids(), vec![0, 6, 6]);
    assert_eq!(lp.cursor().min_unseen_id(), 6);

    let content = std::fs::read_to_string(&path).unwrap();
    let recs: Vec<serde_json::Value> = content
        .split(delim)
        .filter(|s| !s.is_empty())
        .map(|s| serde_json::from_str(s).unwrap())
        .collect();
    let ids: Vec<u64> = recs.iter().map(|v| v["id"].as_u64().unwrap()).collect();
    assert_eq!(ids, vec![5, 4, 3]);
    assert_eq!(recs[1]["text"], r"see \$0$ lol");
}

#[tokio::test]
async fn rejected_record_is_not_retried() {
    let source = Arc::new(StaticSource::new().then_page(page(&[5, 4, 3])));
    let sink = Arc::new(MemorySink::new().fail_on(1, FailMode::Rejected));
    let mut lp = RecoveryLoop::new(
        source.clone(),
        Arc::new(FixedEstimator::uber_x()),
        sink.clone(),
        cursor(),
    );

    let r = lp.run_cycle().await.unwrap();
    assert_eq!(r.outcome.rejected, 1);
    assert_eq!(r.watermark, 6);

    lp.run_cycle().await.unwrap();
    assert_eq!(source.since_ids(), vec![0, 6]);
    assert_eq!(sink.delivered_ids(), vec![5, 3]);
}

#[tokio::test]
async fn page_of_only_rejected_records_still_moves_the_watermark() {
    let source = Arc::new(StaticSource::new().then_page(page(&[9])));
    let sink = Arc::new(MemorySink::new().fail_on(0, FailMode::Rejected));
    let mut lp = RecoveryLoop::new(
        source.clone(),
        Arc::new(FixedEstimator::uber_x()),
        sink.clone(),
        cursor(),
    );

    let r = lp.run_cycle().await.unwrap();
    assert_eq!(r.outcome.delivered, 0);
    assert_eq!(r.watermark, 10);

    lp.run_cycle().await.unwrap();
    assert_eq!(source.since_ids(), vec![0, 10]);
    assert_eq!(sink.attempts(), 1);
}

#[tokio::test(start_paused = true)]
async fn shutdown_during_in_flight_estimate_leaves_cursor_unchanged() {
    let source = Arc::new(StaticSource::new().then_page(vec![
        candidate(2, Some((37.5, -122.5)), "a", "x"),
        candidate(1, Some((37.6, -122.6)), "b", "y"),
    ]));
    let sink = Arc::new(MemorySink::new());
    let lp = RecoveryLoop::new(
        source,
        Arc::new(FixedEstimator::uber_x().hanging_at(37.5, -122.5)),
        sink.clone(),
        cursor(),
    )
    .with_options(FusionOptions {
        enrich_timeout: Duration::from_secs(3600),
        ..Default::default()
    })
    .with_policy(policy());
    let states = lp.subscribe();

    let shutdown = CancellationToken::new();
    let handle = tokio::spawn(lp.run(shutdown.clone()));

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(*states.borrow(), LoopState::Fusing);

    shutdown.cancel();
    let c = handle.await.unwrap();
    assert_eq!(c.min_unseen_id(), 0);
    assert!(sink.delivered().is_empty());
}
