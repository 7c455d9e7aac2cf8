//! StreamTracker: the authoritative in-memory KPI store per stream.
//!
//! Guarded by a fixed power-of-two number of shards rather than one global
//! lock, so contention on unrelated streams never serializes through a
//! single mutex — the same reasoning the teacher applies to keeping its
//! `BroadcastRegistry`/`ReceiverSessionRegistry` as independent
//! `Arc<RwLock<HashMap<..>>>` instances instead of one shared state lock.

use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::stream_key::StreamKey;

const SHARD_COUNT: usize = 16;

#[derive(Debug, Clone, Default)]
pub struct StreamKpi {
    pub last_success_ts: Option<DateTime<Utc>>,
    pub last_error_ts: Option<DateTime<Utc>>,
    pub last_error_msg: Option<String>,
    pub last_latency_ms: Option<u64>,
    pub consecutive_errors: u32,
    pub in_flight: bool,
    pub registered_at: Option<DateTime<Utc>>,
}

struct Shard {
    entries: Mutex<HashMap<StreamKey, StreamKpi>>,
}

/// Sharded map of per-stream KPI records. Cloning is cheap (`Arc` share);
/// clone to hand a handle to each Requester/StatusPusher task.
#[derive(Clone)]
pub struct StreamTracker {
    shards: Arc<Vec<Shard>>,
}

impl Default for StreamTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamTracker {
    pub fn new() -> Self {
        let shards = (0..SHARD_COUNT)
            .map(|_| Shard {
                entries: Mutex::new(HashMap::new()),
            })
            .collect();
        Self {
            shards: Arc::new(shards),
        }
    }

    fn shard_for(&self, key: &StreamKey) -> &Shard {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        key.canonical().hash(&mut hasher);
        let idx = (hasher.finish() as usize) % self.shards.len();
        &self.shards[idx]
    }

    /// Idempotent: creates a zero-valued KPI if one does not already exist.
    pub async fn register_stream(&self, key: &StreamKey) {
        let mut entries = self.shard_for(key).entries.lock().await;
        entries.entry(key.clone()).or_insert_with(|| StreamKpi {
            registered_at: Some(Utc::now()),
            ..Default::default()
        });
    }

    pub async fn update_success(&self, key: &StreamKey, latency_ms: u64) {
        let mut entries = self.shard_for(key).entries.lock().await;
        let kpi = entries.entry(key.clone()).or_default();
        kpi.last_success_ts = Some(Utc::now());
        kpi.last_latency_ms = Some(latency_ms);
        kpi.consecutive_errors = 0;
        kpi.last_error_msg = None;
    }

    pub async fn update_error(&self, key: &StreamKey, msg: impl Into<String>) {
        let mut entries = self.shard_for(key).entries.lock().await;
        let kpi = entries.entry(key.clone()).or_default();
        kpi.last_error_ts = Some(Utc::now());
        kpi.last_error_msg = Some(msg.into());
        kpi.consecutive_errors += 1;
    }

    pub async fn mark_in_flight(&self, key: &StreamKey) {
        let mut entries = self.shard_for(key).entries.lock().await;
        entries.entry(key.clone()).or_default().in_flight = true;
    }

    pub async fn clear_in_flight(&self, key: &StreamKey) {
        let mut entries = self.shard_for(key).entries.lock().await;
        entries.entry(key.clone()).or_default().in_flight = false;
    }

    /// Returns a self-consistent value copy; never a torn read, since the
    /// whole record is held behind one shard lock.
    pub async fn snapshot(&self, key: &StreamKey) -> StreamKpi {
        let entries = self.shard_for(key).entries.lock().await;
        entries.get(key).cloned().unwrap_or_default()
    }

    /// All currently registered stream keys, used by the StatusPusher
    /// supervisor to discover which streams need a heartbeat actor.
    pub async fn registered_keys(&self) -> Vec<StreamKey> {
        let mut keys = Vec::new();
        for shard in self.shards.iter() {
            let entries = shard.entries.lock().await;
            keys.extend(entries.keys().cloned());
        }
        keys
    }
}
