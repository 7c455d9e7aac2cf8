//! Integration coverage for the Requester's sequential execution and
//! request-timeout deadline (spec §4.2, invariants I1/I2).

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use gateway_core::config::RequesterConfig;
use gateway_core::request::{ErrorCode, Request, TimeRange};
use gateway_core::strategy::{ScriptedOutcome, ScriptedStrategy};
use gateway_core::stream_key::StreamKey;
use gateway_core::tracker::StreamTracker;
use gateway_core::Requester;
use gateway_protocol::{Priority, StreamKind};
use tokio::sync::mpsc;

fn key() -> StreamKey {
    StreamKey::new("tenant-a", StreamKind::Feeding, "farm-1", "site-1", None).unwrap()
}

fn request(priority: Priority) -> Request {
    Request::new(
        key(),
        TimeRange {
            from: Utc::now(),
            to: Utc::now(),
        },
        priority,
        "cloud",
    )
}

async fn spawn_requester(
    config: RequesterConfig,
    outcomes: Vec<ScriptedOutcome>,
) -> (Arc<Requester>, mpsc::UnboundedReceiver<gateway_core::request::PollResult>) {
    let strategy = Arc::new(ScriptedStrategy::new("scripted", outcomes));
    let requester = Requester::new(key(), config, strategy, StreamTracker::new());
    let (tx, rx) = mpsc::unbounded_channel();
    requester
        .on_result(move |result| {
            let _ = tx.send(result);
        })
        .await;
    (requester, rx)
}

#[tokio::test(start_paused = true)]
async fn a_hanging_strategy_call_fails_with_timeout_after_the_configured_deadline() {
    let mut config = RequesterConfig::default();
    config.request_timeout = Duration::from_secs(5);
    let (requester, mut rx) = spawn_requester(config, vec![ScriptedOutcome::Hang]).await;
    let handle = tokio::spawn(requester.clone().run());

    requester.enqueue(request(Priority::Normal)).await.unwrap();
    tokio::time::advance(Duration::from_secs(5) + Duration::from_millis(1)).await;

    let result = rx.recv().await.expect("a result must be emitted");
    assert!(!result.is_success());
    assert_eq!(result.error_code, Some(ErrorCode::Timeout));

    requester.stop();
    handle.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn second_request_is_not_dispatched_until_the_first_completes() {
    let mut config = RequesterConfig::default();
    config.request_timeout = Duration::from_secs(5);
    config.coalescing_enabled = false;
    let (requester, mut rx) = spawn_requester(
        config,
        vec![ScriptedOutcome::Hang, ScriptedOutcome::Success(vec![2])],
    )
    .await;
    let handle = tokio::spawn(requester.clone().run());

    requester.enqueue(request(Priority::Normal)).await.unwrap();
    tokio::task::yield_now().await;
    requester.enqueue(request(Priority::Normal)).await.unwrap();

    // Still waiting on the first (hanging) call — nothing has completed yet.
    assert!(rx.try_recv().is_err());

    tokio::time::advance(Duration::from_secs(6)).await;
    let first = rx.recv().await.unwrap();
    assert_eq!(first.error_code, Some(ErrorCode::Timeout));

    let second = rx.recv().await.unwrap();
    assert!(second.is_success(), "second request only runs after the first finishes");

    requester.stop();
    handle.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn urgent_priority_bypasses_an_open_circuit() {
    let mut config = RequesterConfig::default();
    config.max_consecutive_errors = 1;
    config.circuit_pause_duration = Duration::from_secs(3600);
    let (requester, mut rx) = spawn_requester(
        config,
        vec![
            ScriptedOutcome::Fail(gateway_core::strategy::StrategyError::Server5xx("boom".to_owned())),
            ScriptedOutcome::Success(vec![9]),
        ],
    )
    .await;
    let handle = tokio::spawn(requester.clone().run());

    requester.enqueue(request(Priority::Normal)).await.unwrap();
    let first = rx.recv().await.unwrap();
    assert!(!first.is_success());

    let rejected = requester.enqueue(request(Priority::Normal)).await;
    assert!(rejected.is_err(), "circuit should now be open for non-urgent traffic");

    requester.enqueue(request(Priority::Urgent)).await.unwrap();
    let urgent = rx.recv().await.unwrap();
    assert!(urgent.is_success());

    requester.stop();
    handle.await.unwrap();
}
