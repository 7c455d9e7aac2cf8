//! gateway-protocol: wire types for the telemetry gateway's client-facing
//! WebSocket protocol, plus the shared HTTP error envelope.
//!
//! Inbound client messages use a top-level `type` field for discriminated
//! deserialization; outbound server messages use the same convention.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

// ---------------------------------------------------------------------------
// Shared sub-types
// ---------------------------------------------------------------------------

/// Telemetry kind a stream carries. `Status` is reserved for heartbeat
/// events and is never a kind a Requester polls directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamKind {
    Feeding,
    Biometric,
    Climate,
    Ops,
    Status,
}

impl StreamKind {
    pub fn as_str(self) -> &'static str {
        match self {
            StreamKind::Feeding => "feeding",
            StreamKind::Biometric => "biometric",
            StreamKind::Climate => "climate",
            StreamKind::Ops => "ops",
            StreamKind::Status => "status",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "feeding" => Some(StreamKind::Feeding),
            "biometric" => Some(StreamKind::Biometric),
            "climate" => Some(StreamKind::Climate),
            "ops" => Some(StreamKind::Ops),
            "status" => Some(StreamKind::Status),
            _ => None,
        }
    }

    /// The read capability this kind requires (status inherits the
    /// underlying data kind's capability).
    pub fn capability(self) -> Capability {
        match self {
            StreamKind::Feeding => Capability::FeedingRead,
            StreamKind::Biometric => Capability::BiometricRead,
            StreamKind::Climate => Capability::ClimateRead,
            StreamKind::Ops | StreamKind::Status => Capability::OpsRead,
        }
    }
}

/// Read capability grantable on a scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    FeedingRead,
    BiometricRead,
    ClimateRead,
    OpsRead,
}

/// Requester scheduling priority. Ordered so that `Urgent > High > Normal > Low`
/// for use directly as a `BinaryHeap` key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Normal,
    High,
    Urgent,
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Normal
    }
}

/// A filter over stream-identifying fields. Every specified field must
/// match; unspecified fields are unconstrained. This is a tagged predicate,
/// not an expression language — see DESIGN.md.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<StreamKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub farm_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub site_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cage_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sources: Option<BTreeSet<String>>,
}

/// The envelope carried on every DATA/STATUS frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub stream: String,
    pub source: String,
    pub timestamp: String,
    /// Present on DATA frames; absent on STATUS frames.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence: Option<u64>,
}

/// Metadata attached to a DATA frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataMetadata {
    pub latency_ms: u64,
    pub source: String,
    pub priority: Priority,
}

/// The derived health state carried on a STATUS frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamState {
    Ok,
    Partial,
    Failing,
    Paused,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusBody {
    pub state: StreamState,
    /// `None` represents "never succeeded" (infinite staleness).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub staleness_sec: Option<u64>,
    pub in_flight: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_success_ts: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_latency_ms: Option<u64>,
    pub consecutive_errors: u32,
    pub circuit_open: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error_ts: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error_msg: Option<String>,
}

// ---------------------------------------------------------------------------
// Client -> Server messages
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
#[serde(rename_all = "snake_case")]
pub enum ClientMessage {
    Sub {
        filter: SubscriptionFilter,
        #[serde(default)]
        include_status: bool,
    },
    Unsub {
        subscription_id: String,
    },
    Ping,
}

// ---------------------------------------------------------------------------
// Server -> Client messages
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
#[serde(rename_all = "snake_case")]
pub enum ServerMessage {
    Ack {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        correlation: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        subscription_id: Option<String>,
    },
    Err {
        code: String,
        message: String,
    },
    Pong,
    Data {
        kind: StreamKind,
        timestamp: String,
        envelope: Envelope,
        payload: serde_json::Value,
        metadata: DataMetadata,
    },
    Status {
        /// Frozen discriminator for the heartbeat payload shape.
        kind: String,
        timestamp: String,
        envelope: Envelope,
        status: StatusBody,
    },
}

impl ServerMessage {
    pub fn status_heartbeat_v1(timestamp: String, envelope: Envelope, status: StatusBody) -> Self {
        ServerMessage::Status {
            kind: "status.heartbeat.v1".to_owned(),
            timestamp,
            envelope,
            status,
        }
    }
}

/// Frozen wire error codes.
pub mod error_codes {
    pub const AUTH_REQUIRED: &str = "auth_required";
    pub const FORBIDDEN: &str = "forbidden";
    pub const BAD_FILTER: &str = "bad_filter";
    pub const NOT_FOUND: &str = "not_found";
    pub const INTERNAL: &str = "internal";
    pub const BACKPRESSURE_DROPPED: &str = "backpressure_dropped";
}

/// Frozen HTTP error envelope used by all non-2xx admin responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpErrorEnvelope {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}
