//! Per-module error enums, one per subsystem, following the teacher's
//! convention of a dedicated `thiserror` enum scoped to the component that
//! raises it rather than one crate-wide error type.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StreamKeyError {
    #[error("{0} must not be empty")]
    EmptyField(&'static str),
    #[error("malformed canonical stream key: {0}")]
    MalformedCanonical(String),
    #[error("unknown stream kind: {0}")]
    UnknownKind(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("requestTimeout must be greater than zero")]
    InvalidTimeout,
    #[error("{0} must be greater than zero")]
    InvalidDuration(&'static str),
    #[error("maxQueueSize must be greater than zero")]
    InvalidQueueSize,
    #[error("burstSize must be greater than zero")]
    InvalidBurstSize,
}

#[derive(Debug, Error)]
pub enum RequesterError {
    #[error("queue is full")]
    QueueFull,
    #[error("circuit breaker is open")]
    CircuitOpen,
    #[error("request coalesced into an existing pending request")]
    Coalesced,
    #[error("requester has been stopped")]
    Stopped,
}

#[derive(Debug, Error)]
pub enum RouterError {
    #[error("subscription not found: {0}")]
    SubscriptionNotFound(String),
    #[error("unknown client: {0}")]
    UnknownClient(String),
    #[error("no enabled sources configured for {0}")]
    NoEnabledSources(String),
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("authentication token missing")]
    MissingToken,
    #[error("authentication token invalid or revoked")]
    InvalidToken,
    #[error("tenant mismatch")]
    TenantMismatch,
    #[error("missing required capability: {0:?}")]
    MissingCapability(gateway_protocol::Capability),
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("protocol violation: {0}")]
    BadFilter(String),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Router(#[from] RouterError),
}

impl SessionError {
    /// Wire error code for the `ERR` frame (§6).
    pub fn wire_code(&self) -> &'static str {
        match self {
            SessionError::BadFilter(_) => gateway_protocol::error_codes::BAD_FILTER,
            SessionError::Auth(AuthError::MissingToken) => {
                gateway_protocol::error_codes::AUTH_REQUIRED
            }
            SessionError::Auth(_) => gateway_protocol::error_codes::FORBIDDEN,
            SessionError::Router(RouterError::SubscriptionNotFound(_)) => {
                gateway_protocol::error_codes::NOT_FOUND
            }
            SessionError::Router(_) => gateway_protocol::error_codes::INTERNAL,
        }
    }
}
