//! ClientState, Scope, and the per-client token bucket (§3, §4.4.2-3).
//!
//! `ClientState`'s subscription list lives in the Router's
//! `SubscriptionIndex` rather than duplicated here; this struct carries the
//! fields the Router mutates while routing (buffers, throttle state) and
//! the fields authorization reads (tenant, scopes).

use std::collections::HashMap;
use std::time::Instant;

use gateway_protocol::Capability;
use tokio::sync::mpsc;

use crate::config::ThrottleConfig;
use crate::router::buffer::StreamBuffer;
use crate::stream_key::StreamKey;
use gateway_protocol::ServerMessage;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScopeResource {
    Any,
    Farm(String),
    Site(String),
    Cage(String),
}

/// `{tenantId, resource, permissions, farmIds?, siteIds?, cageIds?}` (§3).
/// Access is granted iff the tenant matches and either `resource` is `Any`
/// or its id matches the event's corresponding field, AND every configured
/// id-set (when present) contains the event's corresponding id.
#[derive(Debug, Clone)]
pub struct Scope {
    pub tenant_id: String,
    pub resource: ScopeResource,
    pub permissions: std::collections::HashSet<Capability>,
    pub farm_ids: Option<std::collections::HashSet<String>>,
    pub site_ids: Option<std::collections::HashSet<String>>,
    pub cage_ids: Option<std::collections::HashSet<String>>,
}

impl Scope {
    pub fn authorizes(&self, key: &StreamKey) -> bool {
        if self.tenant_id != key.tenant_id {
            return false;
        }
        let resource_ok = match &self.resource {
            ScopeResource::Any => true,
            ScopeResource::Farm(id) => *id == key.farm_id,
            ScopeResource::Site(id) => *id == key.site_id,
            ScopeResource::Cage(id) => key.cage_id.as_deref() == Some(id.as_str()),
        };
        resource_ok && self.id_sets_allow(key)
    }

    fn id_sets_allow(&self, key: &StreamKey) -> bool {
        if let Some(farms) = &self.farm_ids {
            if !farms.contains(&key.farm_id) {
                return false;
            }
        }
        if let Some(sites) = &self.site_ids {
            if !sites.contains(&key.site_id) {
                return false;
            }
        }
        if let Some(cages) = &self.cage_ids {
            match &key.cage_id {
                Some(cage) if cages.contains(cage) => {}
                _ => return false,
            }
        }
        true
    }

    pub fn has_capability(&self, capability: Capability) -> bool {
        self.permissions.contains(&capability)
    }
}

struct TokenBucket {
    capacity: f64,
    tokens: f64,
    refill_per_sec: f64,
    last_refill: Instant,
}

impl TokenBucket {
    fn new(capacity: u32, refill_per_sec: f64) -> Self {
        let capacity = f64::from(capacity).max(1.0);
        Self {
            capacity,
            // A non-positive rate must admit nothing, ever (§4.4.3's
            // `maxRatePerSec=0` boundary case) — starting with a full bucket
            // would let the first `burstSize` events through regardless.
            tokens: if refill_per_sec <= 0.0 { 0.0 } else { capacity },
            refill_per_sec,
            last_refill: Instant::now(),
        }
    }

    fn try_take(&mut self) -> bool {
        if self.refill_per_sec <= 0.0 {
            return false;
        }
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        self.last_refill = now;
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ClientStats {
    pub events_sent: u64,
    pub events_dropped_backpressure: u64,
    pub events_dropped_unauthorized: u64,
}

pub struct ClientState {
    pub client_id: String,
    pub tenant_id: String,
    pub scopes: Vec<Scope>,
    pub throttle_config: ThrottleConfig,
    pub outbound: mpsc::UnboundedSender<ServerMessage>,
    pub stream_buffers: HashMap<StreamKey, StreamBuffer>,
    pub stats: ClientStats,
    token_bucket: TokenBucket,
    last_sent_at: Option<Instant>,
    round_robin_cursor: usize,
}

impl ClientState {
    pub fn new(
        client_id: impl Into<String>,
        tenant_id: impl Into<String>,
        scopes: Vec<Scope>,
        throttle_config: ThrottleConfig,
        outbound: mpsc::UnboundedSender<ServerMessage>,
    ) -> Self {
        let token_bucket = TokenBucket::new(throttle_config.burst_size, throttle_config.max_rate_per_sec);
        Self {
            client_id: client_id.into(),
            tenant_id: tenant_id.into(),
            scopes,
            throttle_config,
            outbound,
            stream_buffers: HashMap::new(),
            stats: ClientStats::default(),
            token_bucket,
            last_sent_at: None,
            round_robin_cursor: 0,
        }
    }

    pub fn authorized_for(&self, key: &StreamKey, capability: Capability) -> bool {
        self.tenant_id == key.tenant_id
            && self.scopes.iter().any(|s| s.authorizes(key) && s.has_capability(capability))
    }

    /// Throttle gate: at least `throttleMs` elapsed since the previous send
    /// AND a token is available (§4.4.3). Consumes state on admission.
    pub fn gate_admits(&mut self) -> bool {
        let now = Instant::now();
        let throttle_elapsed = self
            .last_sent_at
            .map(|t| now.duration_since(t).as_millis() as u64 >= self.throttle_config.throttle_ms)
            .unwrap_or(true);
        if !throttle_elapsed || !self.token_bucket.try_take() {
            return false;
        }
        self.last_sent_at = Some(now);
        true
    }

    pub fn buffer_for(&mut self, key: &StreamKey) -> &mut StreamBuffer {
        let buffer_size = self.throttle_config.buffer_size;
        self.stream_buffers
            .entry(key.clone())
            .or_insert_with(|| StreamBuffer::new(buffer_size))
    }

    /// Pop one buffered event, scanning streams round-robin from where the
    /// last drain left off, preserving FIFO within each stream's buffer.
    pub fn drain_one(&mut self) -> Option<ServerMessage> {
        if self.stream_buffers.is_empty() {
            return None;
        }
        let keys: Vec<StreamKey> = self.stream_buffers.keys().cloned().collect();
        for offset in 0..keys.len() {
            let idx = (self.round_robin_cursor + offset) % keys.len();
            let key = &keys[idx];
            if let Some(buffer) = self.stream_buffers.get_mut(key) {
                if let Some(message) = buffer.pop_front() {
                    self.round_robin_cursor = (idx + 1) % keys.len();
                    return Some(message);
                }
            }
        }
        None
    }
}
