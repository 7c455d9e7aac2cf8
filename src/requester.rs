//! Requester: the per-stream sequential upstream poller (§4.2).
//!
//! One Requester owns exactly one stream. Its internal loop mirrors the
//! teacher's per-connection task shape (a `tokio::select!` over a wakeup
//! signal and the process-wide cancellation token, seen in
//! `ws_forwarder.rs`/`ws_receiver.rs`), generalized from a WebSocket
//! read-loop to a sequential upstream-poll loop.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, Notify};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::RequesterConfig;
use crate::error::RequesterError;
use crate::request::{now_millis, ErrorCode, PollResult, Request};
use crate::strategy::{Strategy, StrategyError};
use crate::stream_key::StreamKey;
use crate::tracker::StreamTracker;
use gateway_protocol::Priority;

struct QueuedRequest {
    request: Request,
    admitted_at_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CircuitStateKind {
    Closed,
    Open,
    HalfOpen,
}

struct Circuit {
    state: CircuitStateKind,
    opened_at: Option<Instant>,
    probe_dispatched: bool,
}

impl Circuit {
    fn new() -> Self {
        Self {
            state: CircuitStateKind::Closed,
            opened_at: None,
            probe_dispatched: false,
        }
    }

    /// Gate an enqueue attempt, auto-transitioning Open -> HalfOpen once the
    /// pause duration has elapsed.
    fn gate(&mut self, priority: Priority, pause: Duration) -> Result<(), RequesterError> {
        match self.state {
            CircuitStateKind::Closed => Ok(()),
            CircuitStateKind::Open => {
                let elapsed = self.opened_at.map(|t| t.elapsed()).unwrap_or_default();
                if elapsed >= pause {
                    self.state = CircuitStateKind::HalfOpen;
                    self.probe_dispatched = false;
                    self.gate(priority, pause)
                } else if priority == Priority::Urgent {
                    Ok(())
                } else {
                    Err(RequesterError::CircuitOpen)
                }
            }
            CircuitStateKind::HalfOpen => {
                if !self.probe_dispatched {
                    self.probe_dispatched = true;
                    Ok(())
                } else if priority == Priority::Urgent {
                    Ok(())
                } else {
                    Err(RequesterError::CircuitOpen)
                }
            }
        }
    }

    fn record_success(&mut self) {
        self.state = CircuitStateKind::Closed;
        self.opened_at = None;
        self.probe_dispatched = false;
    }

    fn record_failure(&mut self, consecutive_errors: u32, max_consecutive_errors: u32) {
        if consecutive_errors >= max_consecutive_errors {
            self.state = CircuitStateKind::Open;
            self.opened_at = Some(Instant::now());
            self.probe_dispatched = false;
        }
    }

    fn is_open(&self) -> bool {
        matches!(self.state, CircuitStateKind::Open)
    }
}

#[derive(Debug, Clone, Default)]
pub struct RequesterMetrics {
    pub in_flight: bool,
    pub queue_len: usize,
    pub total_success: u64,
    pub total_errors: u64,
    pub consecutive_errors: u32,
    pub last_latency_ms: Option<u64>,
    pub circuit_open: bool,
}

struct MetricsInner {
    total_success: u64,
    total_errors: u64,
    consecutive_errors: u32,
    last_latency_ms: Option<u64>,
    in_flight: bool,
}

type ResultSink = dyn Fn(PollResult) + Send + Sync;

pub struct Requester {
    stream_key: StreamKey,
    config: RequesterConfig,
    strategy: Arc<dyn Strategy>,
    tracker: StreamTracker,
    queue: Mutex<Vec<QueuedRequest>>,
    circuit: Mutex<Circuit>,
    metrics: Mutex<MetricsInner>,
    notify: Notify,
    cancel: CancellationToken,
    on_result: Mutex<Option<Arc<ResultSink>>>,
}

impl Requester {
    pub fn new(
        stream_key: StreamKey,
        config: RequesterConfig,
        strategy: Arc<dyn Strategy>,
        tracker: StreamTracker,
    ) -> Arc<Self> {
        Arc::new(Self {
            stream_key,
            config,
            strategy,
            tracker,
            queue: Mutex::new(Vec::new()),
            circuit: Mutex::new(Circuit::new()),
            metrics: Mutex::new(MetricsInner {
                total_success: 0,
                total_errors: 0,
                consecutive_errors: 0,
                last_latency_ms: None,
                in_flight: false,
            }),
            notify: Notify::new(),
            cancel: CancellationToken::new(),
            on_result: Mutex::new(None),
        })
    }

    /// Registers the single sink invoked synchronously after each
    /// `PollResult` is produced.
    pub async fn on_result(&self, sink: impl Fn(PollResult) + Send + Sync + 'static) {
        *self.on_result.lock().await = Some(Arc::new(sink));
    }

    pub fn stream_key(&self) -> &StreamKey {
        &self.stream_key
    }

    /// Admit, reject, or coalesce a request. Never blocks.
    pub async fn enqueue(&self, mut request: Request) -> Result<(), RequesterError> {
        if self.cancel.is_cancelled() {
            return Err(RequesterError::Stopped);
        }

        {
            let mut circuit = self.circuit.lock().await;
            circuit.gate(request.priority, self.config.circuit_pause_duration)?;
        }

        let mut queue = self.queue.lock().await;

        if self.config.coalescing_enabled {
            let fingerprint = request.fingerprint();
            let now = now_millis();
            let window_ms = self.config.coalescing_window.as_millis() as u64;
            let coalesces = queue.iter().any(|q| {
                q.request.fingerprint() == fingerprint && now.saturating_sub(q.admitted_at_ms) < window_ms
            });
            if coalesces {
                return Err(RequesterError::Coalesced);
            }
        }

        if queue.len() >= self.config.max_queue_size {
            let min_idx = pick_min_priority_index(&queue).ok_or(RequesterError::QueueFull)?;
            if request.priority > queue[min_idx].request.priority {
                queue.remove(min_idx);
            } else {
                return Err(RequesterError::QueueFull);
            }
        }

        request.admitted_seq = now_millis();
        queue.push(QueuedRequest {
            request,
            admitted_at_ms: now_millis(),
        });
        drop(queue);
        self.notify.notify_one();
        Ok(())
    }

    pub async fn metrics(&self) -> RequesterMetrics {
        let queue_len = self.queue.lock().await.len();
        let circuit_open = self.circuit.lock().await.is_open();
        let m = self.metrics.lock().await;
        RequesterMetrics {
            in_flight: m.in_flight,
            queue_len,
            total_success: m.total_success,
            total_errors: m.total_errors,
            consecutive_errors: m.consecutive_errors,
            last_latency_ms: m.last_latency_ms,
            circuit_open,
        }
    }

    /// Cancels the in-flight strategy call and drains pending requests,
    /// each emitting a cancelled Result.
    pub fn stop(&self) {
        self.cancel.cancel();
        self.notify.notify_one();
    }

    /// Runs the sequential poll loop until cancelled. Spawn this as its own
    /// tokio task; it never returns until `stop()` is called.
    pub async fn run(self: Arc<Self>) {
        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    self.drain_cancelled().await;
                    return;
                }
                () = self.notify.notified() => {}
            }

            while let Some(request) = self.dequeue().await {
                if self.cancel.is_cancelled() {
                    self.emit_cancelled(request).await;
                    continue;
                }
                self.execute_one(request).await;
            }
        }
    }

    async fn dequeue(&self) -> Option<Request> {
        let mut queue = self.queue.lock().await;
        let idx = pick_max_priority_index(&queue)?;
        Some(queue.remove(idx).request)
    }

    async fn drain_cancelled(&self) {
        let pending: Vec<Request> = {
            let mut queue = self.queue.lock().await;
            queue.drain(..).map(|q| q.request).collect()
        };
        for request in pending {
            self.emit_cancelled(request).await;
        }
    }

    async fn emit_cancelled(&self, request: Request) {
        let result = PollResult::failure(
            request.stream_key,
            request.source,
            0,
            ErrorCode::Cancelled,
            "requester stopped",
        );
        self.emit(result).await;
    }

    async fn execute_one(&self, request: Request) {
        self.tracker.mark_in_flight(&self.stream_key).await;
        {
            let mut m = self.metrics.lock().await;
            m.in_flight = true;
        }

        let start = Instant::now();
        let outcome = tokio::select! {
            () = self.cancel.cancelled() => None,
            res = timeout(self.config.request_timeout, self.strategy.execute(&request)) => Some(res),
        };
        let latency_ms = start.elapsed().as_millis() as u64;

        self.tracker.clear_in_flight(&self.stream_key).await;
        {
            let mut m = self.metrics.lock().await;
            m.in_flight = false;
        }

        let result = match outcome {
            None => {
                PollResult::failure(
                    request.stream_key.clone(),
                    request.source.clone(),
                    latency_ms,
                    ErrorCode::Cancelled,
                    "requester stopped",
                )
            }
            Some(Err(_elapsed)) => {
                self.record_error(ErrorCode::Timeout).await;
                PollResult::failure(
                    request.stream_key.clone(),
                    request.source.clone(),
                    latency_ms,
                    ErrorCode::Timeout,
                    "request timed out",
                )
            }
            Some(Ok(Ok(payload))) => {
                self.record_success(latency_ms).await;
                PollResult::success(request.stream_key.clone(), request.source.clone(), latency_ms, payload)
            }
            Some(Ok(Err(err))) => {
                let code = classify(&err);
                self.record_error(code).await;
                PollResult::failure(request.stream_key.clone(), request.source.clone(), latency_ms, code, err.to_string())
            }
        };

        let consecutive_errors = self.metrics.lock().await.consecutive_errors;
        self.emit(result).await;

        if consecutive_errors > 0 {
            let backoff = self.config.backoff_for(consecutive_errors);
            if !backoff.is_zero() {
                debug!(stream_key = %self.stream_key, ?backoff, consecutive_errors, "backing off after error");
                tokio::select! {
                    () = self.cancel.cancelled() => {}
                    () = tokio::time::sleep(backoff) => {}
                }
            }
        }
    }

    async fn record_success(&self, latency_ms: u64) {
        self.tracker.update_success(&self.stream_key, latency_ms).await;
        let mut m = self.metrics.lock().await;
        m.total_success += 1;
        m.consecutive_errors = 0;
        m.last_latency_ms = Some(latency_ms);
        drop(m);
        self.circuit.lock().await.record_success();
        info!(stream_key = %self.stream_key, latency_ms, "poll succeeded");
    }

    async fn record_error(&self, code: ErrorCode) {
        self.tracker.update_error(&self.stream_key, code.as_str()).await;
        let mut m = self.metrics.lock().await;
        m.total_errors += 1;
        m.consecutive_errors += 1;
        let consecutive_errors = m.consecutive_errors;
        drop(m);
        self.circuit
            .lock()
            .await
            .record_failure(consecutive_errors, self.config.max_consecutive_errors);
        warn!(stream_key = %self.stream_key, ?code, consecutive_errors, "poll failed");
    }

    async fn emit(&self, result: PollResult) {
        if let Some(sink) = self.on_result.lock().await.clone() {
            sink(result);
        }
    }
}

fn classify(err: &StrategyError) -> ErrorCode {
    match err {
        StrategyError::Connection(_) => ErrorCode::Connection,
        StrategyError::Server5xx(_) => ErrorCode::Server5xx,
        StrategyError::Client4xx(_) => ErrorCode::Client4xx,
        StrategyError::Decode(_) => ErrorCode::Decode,
    }
}

fn pick_max_priority_index(queue: &[QueuedRequest]) -> Option<usize> {
    queue
        .iter()
        .enumerate()
        .max_by(|(_, a), (_, b)| {
            a.request
                .priority
                .cmp(&b.request.priority)
                .then(b.admitted_at_ms.cmp(&a.admitted_at_ms))
        })
        .map(|(idx, _)| idx)
}

fn pick_min_priority_index(queue: &[QueuedRequest]) -> Option<usize> {
    queue
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| {
            a.request
                .priority
                .cmp(&b.request.priority)
                .then(a.admitted_at_ms.cmp(&b.admitted_at_ms))
        })
        .map(|(idx, _)| idx)
}
