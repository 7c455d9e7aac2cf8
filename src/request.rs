//! Request and PollResult: the values that flow into and out of a Requester.

use std::hash::{Hash, Hasher};
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use gateway_protocol::Priority;

use crate::stream_key::StreamKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

/// An upstream poll request, created by an external scheduler and consumed
/// exactly once by its target Requester.
#[derive(Debug, Clone)]
pub struct Request {
    pub stream_key: StreamKey,
    pub time_range: TimeRange,
    pub priority: Priority,
    pub source: String,
    /// Monotonically increasing per-process sequence, used only to break
    /// ties between requests of equal priority and equal fingerprint so the
    /// queue stays a strict FIFO within a priority band.
    pub(crate) admitted_seq: u64,
}

impl Request {
    pub fn new(
        stream_key: StreamKey,
        time_range: TimeRange,
        priority: Priority,
        source: impl Into<String>,
    ) -> Self {
        Self {
            stream_key,
            time_range,
            priority,
            source: source.into(),
            admitted_seq: 0,
        }
    }

    /// Derived from `(streamKey, timeRange, source)`; requests with an
    /// identical fingerprint are coalescing candidates.
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        self.stream_key.hash(&mut hasher);
        self.time_range.from.timestamp_nanos_opt().hash(&mut hasher);
        self.time_range.to.timestamp_nanos_opt().hash(&mut hasher);
        self.source.hash(&mut hasher);
        hasher.finish()
    }
}

/// Why a poll failed. `Cancelled` is only ever produced by `Requester::stop`
/// draining the pending queue (§4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    Timeout,
    Connection,
    Server5xx,
    Client4xx,
    Decode,
    Cancelled,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::Timeout => "timeout",
            ErrorCode::Connection => "connection",
            ErrorCode::Server5xx => "server_5xx",
            ErrorCode::Client4xx => "client_4xx",
            ErrorCode::Decode => "decode",
            ErrorCode::Cancelled => "cancelled",
        }
    }

    /// 4xx/decode errors are permanent: the caller should not re-enqueue an
    /// identical request (§7).
    pub fn is_permanent(self) -> bool {
        matches!(self, ErrorCode::Client4xx | ErrorCode::Decode)
    }
}

/// Outcome of a single `Strategy::execute` call. `payload` is present iff
/// `err` is `None`; immutable after emission.
#[derive(Debug, Clone)]
pub struct PollResult {
    pub stream_key: StreamKey,
    pub source: String,
    pub latency_ms: u64,
    pub completed_at: DateTime<Utc>,
    pub payload: Option<Vec<u8>>,
    pub err: Option<String>,
    pub error_code: Option<ErrorCode>,
}

impl PollResult {
    pub fn success(stream_key: StreamKey, source: String, latency_ms: u64, payload: Vec<u8>) -> Self {
        Self {
            stream_key,
            source,
            latency_ms,
            completed_at: Utc::now(),
            payload: Some(payload),
            err: None,
            error_code: None,
        }
    }

    pub fn failure(
        stream_key: StreamKey,
        source: String,
        latency_ms: u64,
        error_code: ErrorCode,
        message: impl Into<String>,
    ) -> Self {
        Self {
            stream_key,
            source,
            latency_ms,
            completed_at: Utc::now(),
            payload: None,
            err: Some(message.into()),
            error_code: Some(error_code),
        }
    }

    pub fn is_success(&self) -> bool {
        self.err.is_none()
    }
}

/// Monotonic millisecond clock, used for coalescing-window comparisons
/// where wall-clock `DateTime<Utc>` would be needlessly heavy.
pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
