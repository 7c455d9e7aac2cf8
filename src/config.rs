//! Ambient process configuration: per-stream tunables for the Requester,
//! StatusPusher, and Router/client throttle, with `Default` impls matching
//! §6's documented defaults and a `validate()` rejecting the nonsensical
//! combinations called out in the spec's open questions.

use std::time::Duration;

use crate::error::ConfigError;

#[derive(Debug, Clone)]
pub struct RequesterConfig {
    pub request_timeout: Duration,
    pub max_consecutive_errors: u32,
    pub circuit_pause_duration: Duration,
    pub backoff_initial: Duration,
    pub backoff_step2: Duration,
    pub backoff_step3: Duration,
    pub max_queue_size: usize,
    pub coalescing_enabled: bool,
    pub coalescing_window: Duration,
}

impl Default for RequesterConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            max_consecutive_errors: 5,
            circuit_pause_duration: Duration::from_secs(30),
            backoff_initial: Duration::from_millis(500),
            backoff_step2: Duration::from_secs(2),
            backoff_step3: Duration::from_secs(10),
            max_queue_size: 64,
            coalescing_enabled: true,
            coalescing_window: Duration::from_millis(250),
        }
    }
}

impl RequesterConfig {
    /// `requestTimeout <= 0` is rejected (Open Question 3 in DESIGN.md):
    /// a zero-or-negative timeout can never complete a strategy call, so
    /// construction fails loudly instead of silently hanging forever.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.request_timeout.is_zero() {
            return Err(ConfigError::InvalidTimeout);
        }
        if self.max_queue_size == 0 {
            return Err(ConfigError::InvalidQueueSize);
        }
        if self.circuit_pause_duration.is_zero() {
            return Err(ConfigError::InvalidDuration("circuitPauseDuration"));
        }
        if self.backoff_initial.is_zero() {
            return Err(ConfigError::InvalidDuration("backoffInitial"));
        }
        Ok(())
    }

    /// Step function from §4.2: `k=1 -> initial`, `k=2 -> step2`, `k>=3 -> step3`.
    pub fn backoff_for(&self, consecutive_errors: u32) -> Duration {
        match consecutive_errors {
            0 => Duration::ZERO,
            1 => self.backoff_initial,
            2 => self.backoff_step2,
            _ => self.backoff_step3,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StatusConfig {
    pub heartbeat_interval: Duration,
    pub stale_threshold_ok: Duration,
    pub stale_threshold_degraded: Duration,
    pub max_consecutive_errors: u32,
    /// Whether this stream is expected to see URGENT traffic while its
    /// circuit is open. When true, an open circuit reports `failing`
    /// rather than `paused` (Open Question 2, resolved in DESIGN.md).
    pub expects_urgent: bool,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(5),
            stale_threshold_ok: Duration::from_secs(30),
            stale_threshold_degraded: Duration::from_secs(120),
            max_consecutive_errors: 5,
            expects_urgent: false,
        }
    }
}

impl StatusConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.heartbeat_interval.is_zero() {
            return Err(ConfigError::InvalidDuration("heartbeatInterval"));
        }
        if self.stale_threshold_ok.is_zero() {
            return Err(ConfigError::InvalidDuration("staleThresholdOk"));
        }
        if self.stale_threshold_degraded <= self.stale_threshold_ok {
            return Err(ConfigError::InvalidDuration("staleThresholdDegraded"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ThrottleConfig {
    pub throttle_ms: u64,
    pub max_rate_per_sec: f64,
    pub burst_size: u32,
    pub coalescing_enabled: bool,
    pub keep_latest: bool,
    pub buffer_size: usize,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            throttle_ms: 100,
            max_rate_per_sec: 20.0,
            burst_size: 10,
            coalescing_enabled: true,
            keep_latest: false,
            buffer_size: 32,
        }
    }
}

impl ThrottleConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.burst_size == 0 {
            return Err(ConfigError::InvalidBurstSize);
        }
        if self.max_rate_per_sec < 0.0 {
            return Err(ConfigError::InvalidDuration("maxRatePerSec"));
        }
        if self.buffer_size == 0 {
            return Err(ConfigError::InvalidQueueSize);
        }
        Ok(())
    }
}
