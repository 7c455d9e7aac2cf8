//! Core engine for the multi-tenant telemetry gateway: per-stream polling
//! (`Requester`), health heartbeats (`StatusPusher`), and fan-out to
//! subscribed clients (`Router`). Transport (WebSocket, HTTP admin) lives in
//! the `gateway` service binary; this crate is the part it composes.

pub mod config;
pub mod error;
pub mod request;
pub mod router;
pub mod session;
pub mod status_pusher;
pub mod strategy;
pub mod stream_key;
pub mod tracker;

mod requester;

pub use requester::{Requester, RequesterMetrics};
pub use router::Router;
pub use status_pusher::StatusPusher;
pub use stream_key::StreamKey;
pub use tracker::StreamTracker;

use std::collections::HashMap;
use std::sync::Arc;

use gateway_protocol::StatusBody;
use tokio::sync::RwLock;

use crate::config::{RequesterConfig, StatusConfig};
use crate::request::PollResult;
use crate::strategy::Strategy;

/// The composition root: one `StreamTracker` shared by every stream, a
/// `Router` shared by every client, and a `Requester`/`StatusPusher` pair
/// per registered stream.
pub struct Gateway {
    tracker: StreamTracker,
    router: Arc<Router>,
    streams: RwLock<HashMap<StreamKey, StreamHandle>>,
}

struct StreamHandle {
    requester: Arc<Requester>,
    pusher: Arc<StatusPusher>,
}

impl Gateway {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            tracker: StreamTracker::new(),
            router: Router::new(),
            streams: RwLock::new(HashMap::new()),
        })
    }

    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    pub fn tracker(&self) -> &StreamTracker {
        &self.tracker
    }

    /// Registers a stream: starts its `Requester` and `StatusPusher` tasks
    /// and wires their output into the `Router`. Idempotent per `StreamKey`
    /// — a second call for an already-registered key is a no-op.
    pub async fn register_stream(
        self: &Arc<Self>,
        key: StreamKey,
        requester_config: RequesterConfig,
        status_config: StatusConfig,
        strategy: Arc<dyn Strategy>,
    ) {
        if self.streams.read().await.contains_key(&key) {
            return;
        }

        self.tracker.register_stream(&key).await;
        let requester = Requester::new(key.clone(), requester_config, strategy, self.tracker.clone());
        let pusher = StatusPusher::new(key.clone(), status_config, self.tracker.clone(), requester.clone());

        let router = self.router.clone();
        let result_key = key.clone();
        requester
            .on_result(move |result: PollResult| {
                let router = router.clone();
                let result_key = result_key.clone();
                tokio::spawn(async move {
                    if result.is_success() {
                        router.route_data(&result_key, &result).await;
                    }
                });
            })
            .await;

        let router = self.router.clone();
        pusher
            .on_emit(move |stream_key: StreamKey, status: StatusBody| {
                let router = router.clone();
                tokio::spawn(async move {
                    router.route_status(&stream_key, "gateway", status).await;
                });
            })
            .await;

        tokio::spawn(requester.clone().run());
        tokio::spawn(pusher.clone().run());

        self.streams
            .write()
            .await
            .insert(key, StreamHandle { requester, pusher });
    }

    pub async fn requester_for(&self, key: &StreamKey) -> Option<Arc<Requester>> {
        self.streams.read().await.get(key).map(|h| h.requester.clone())
    }

    pub async fn unregister_stream(&self, key: &StreamKey) {
        if let Some(handle) = self.streams.write().await.remove(key) {
            handle.requester.stop();
            handle.pusher.stop();
        }
    }
}
