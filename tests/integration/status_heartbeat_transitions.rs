//! Integration coverage for the StatusPusher's derived health states as a
//! stream moves through healthy, stale, and failing phases (spec §4.3,
//! invariant I4).

use std::sync::Arc;
use std::time::Duration;

use gateway_core::config::{RequesterConfig, StatusConfig};
use gateway_core::strategy::{ScriptedOutcome, ScriptedStrategy, StrategyError};
use gateway_core::stream_key::StreamKey;
use gateway_core::tracker::StreamTracker;
use gateway_core::{Requester, StatusPusher};
use gateway_protocol::{StatusBody, StreamKind, StreamState};
use tokio::sync::Mutex;

fn key() -> StreamKey {
    StreamKey::new("tenant-a", StreamKind::Climate, "farm-1", "site-1", None).unwrap()
}

async fn collect_states(
    tracker: StreamTracker,
    outcomes: Vec<ScriptedOutcome>,
    mut status_config: StatusConfig,
    advance_by: Duration,
) -> Vec<StatusBody> {
    status_config.heartbeat_interval = Duration::from_millis(10);
    let strategy = Arc::new(ScriptedStrategy::new("scripted", outcomes));
    let requester = Requester::new(key(), RequesterConfig::default(), strategy, tracker.clone());
    let pusher = StatusPusher::new(key(), status_config, tracker, requester);

    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_clone = seen.clone();
    pusher
        .on_emit(move |_, status| {
            let seen_clone = seen_clone.clone();
            tokio::spawn(async move { seen_clone.lock().await.push(status) });
        })
        .await;

    let handle = tokio::spawn(pusher.clone().run());
    tokio::time::advance(advance_by).await;
    tokio::task::yield_now().await;
    pusher.stop();
    let _ = handle.await;

    seen.lock().await.clone()
}

#[tokio::test(start_paused = true)]
async fn a_freshly_succeeding_stream_reports_ok() {
    let tracker = StreamTracker::new();
    tracker.register_stream(&key()).await;
    tracker.update_success(&key(), 12).await;

    let states = collect_states(tracker, vec![], StatusConfig::default(), Duration::from_millis(15)).await;
    assert!(!states.is_empty());
    assert_eq!(states[0].state, StreamState::Ok);
    assert_eq!(states[0].consecutive_errors, 0);
}

#[tokio::test(start_paused = true)]
async fn a_stream_that_never_succeeded_and_has_gone_stale_reports_partial() {
    let tracker = StreamTracker::new();
    tracker.register_stream(&key()).await;

    let mut config = StatusConfig::default();
    config.stale_threshold_ok = Duration::from_secs(1);
    let states = collect_states(tracker, vec![], config, Duration::from_millis(15)).await;

    assert!(!states.is_empty());
    assert_eq!(states[0].state, StreamState::Partial);
}

#[tokio::test(start_paused = true)]
async fn consecutive_errors_past_the_threshold_report_failing() {
    let tracker = StreamTracker::new();
    tracker.register_stream(&key()).await;
    for _ in 0..4 {
        tracker.update_error(&key(), "boom").await;
    }

    let mut config = StatusConfig::default();
    config.max_consecutive_errors = 3;
    let states = collect_states(tracker, vec![], config, Duration::from_millis(15)).await;

    assert!(states.iter().any(|s| s.state == StreamState::Failing));
}

#[tokio::test(start_paused = true)]
async fn an_open_circuit_on_a_stream_not_expecting_urgent_traffic_reports_paused() {
    let mut config = RequesterConfig::default();
    config.max_consecutive_errors = 1;
    config.circuit_pause_duration = Duration::from_secs(3600);

    let tracker = StreamTracker::new();
    tracker.register_stream(&key()).await;
    let strategy = Arc::new(ScriptedStrategy::new(
        "scripted",
        vec![ScriptedOutcome::Fail(StrategyError::Server5xx("boom".to_owned()))],
    ));
    let requester = Requester::new(key(), config, strategy, tracker.clone());
    let req_handle = tokio::spawn(requester.clone().run());

    let time_range = gateway_core::request::TimeRange {
        from: chrono::Utc::now(),
        to: chrono::Utc::now(),
    };
    requester
        .enqueue(gateway_core::request::Request::new(
            key(),
            time_range,
            gateway_protocol::Priority::Normal,
            "cloud",
        ))
        .await
        .unwrap();
    // Let the failing poll complete and open the circuit.
    tokio::time::advance(Duration::from_millis(5)).await;
    tokio::task::yield_now().await;

    let mut status_config = StatusConfig::default();
    status_config.heartbeat_interval = Duration::from_millis(10);
    status_config.expects_urgent = false;
    let pusher = StatusPusher::new(key(), status_config, tracker, requester.clone());

    let seen: Arc<Mutex<Vec<StatusBody>>> = Arc::new(Mutex::new(Vec::new()));
    let seen_clone = seen.clone();
    pusher
        .on_emit(move |_, status| {
            let seen_clone = seen_clone.clone();
            tokio::spawn(async move { seen_clone.lock().await.push(status) });
        })
        .await;

    let pusher_handle = tokio::spawn(pusher.clone().run());
    tokio::time::advance(Duration::from_millis(15)).await;
    tokio::task::yield_now().await;
    pusher.stop();
    requester.stop();
    let _ = pusher_handle.await;
    let _ = req_handle.await;

    let seen = seen.lock().await;
    assert!(seen.iter().any(|s| s.state == StreamState::Paused));
}
