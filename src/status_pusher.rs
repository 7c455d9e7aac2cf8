//! StatusPusher: periodic per-stream health heartbeat emitter (§4.3).

use std::sync::Arc;

use chrono::Utc;
use gateway_protocol::{StatusBody, StreamState};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::config::StatusConfig;
use crate::requester::Requester;
use crate::stream_key::StreamKey;
use crate::tracker::StreamTracker;

type EmitSink = dyn Fn(StreamKey, StatusBody) + Send + Sync;

pub struct StatusPusher {
    stream_key: StreamKey,
    config: StatusConfig,
    tracker: StreamTracker,
    requester: Arc<Requester>,
    cancel: CancellationToken,
    on_emit: tokio::sync::Mutex<Option<Arc<EmitSink>>>,
}

impl StatusPusher {
    pub fn new(
        stream_key: StreamKey,
        config: StatusConfig,
        tracker: StreamTracker,
        requester: Arc<Requester>,
    ) -> Arc<Self> {
        Arc::new(Self {
            stream_key,
            config,
            tracker,
            requester,
            cancel: CancellationToken::new(),
            on_emit: tokio::sync::Mutex::new(None),
        })
    }

    /// Registers the single sink invoked on every tick. The sink MUST be
    /// non-blocking (e.g. an unbounded channel send) — a slow consumer must
    /// never stall the tick loop.
    pub async fn on_emit(&self, sink: impl Fn(StreamKey, StatusBody) + Send + Sync + 'static) {
        *self.on_emit.lock().await = Some(Arc::new(sink));
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub async fn run(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.heartbeat_interval);
        // A missed tick is skipped, never queued, so heartbeats stay
        // monotone in `emittedAt` without bursting on a slow tick.
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => return,
                _ = ticker.tick() => self.emit_heartbeat().await,
            }
        }
    }

    async fn emit_heartbeat(&self) {
        let kpi = self.tracker.snapshot(&self.stream_key).await;
        let metrics = self.requester.metrics().await;

        let staleness_sec = kpi
            .last_success_ts
            .map(|ts| (Utc::now() - ts).num_seconds().max(0) as u64);

        let state = if metrics.circuit_open && !self.config.expects_urgent {
            StreamState::Paused
        } else if kpi.consecutive_errors >= self.config.max_consecutive_errors || metrics.circuit_open {
            StreamState::Failing
        } else if staleness_sec.is_none_or(|s| s > self.config.stale_threshold_ok.as_secs()) {
            StreamState::Partial
        } else {
            StreamState::Ok
        };

        let status = StatusBody {
            state,
            staleness_sec,
            in_flight: kpi.in_flight,
            last_success_ts: kpi.last_success_ts.map(|ts| ts.to_rfc3339()),
            last_latency_ms: kpi.last_latency_ms,
            consecutive_errors: kpi.consecutive_errors,
            circuit_open: metrics.circuit_open,
            last_error_ts: kpi.last_error_ts.map(|ts| ts.to_rfc3339()),
            last_error_msg: kpi.last_error_msg.clone(),
        };

        if let Some(sink) = self.on_emit.lock().await.clone() {
            sink(self.stream_key.clone(), status);
        }
    }
}
