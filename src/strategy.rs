//! Strategy: the provider-agnostic upstream collaborator a Requester drives.
//!
//! This spec ships one concrete implementation, `HttpStrategy`, generalizing
//! the teacher's `forwarder::uplink::UplinkSession` connect/retry shape to a
//! single bounded request/response call, plus `ScriptedStrategy` for
//! deterministic unit tests. The real ScaleAQ/Innovex wire shapes are out of
//! scope (§1).

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::request::Request;

#[derive(Debug, Error, Clone)]
pub enum StrategyError {
    #[error("connection error: {0}")]
    Connection(String),
    #[error("upstream returned 5xx: {0}")]
    Server5xx(String),
    #[error("upstream returned 4xx: {0}")]
    Client4xx(String),
    #[error("failed to decode upstream payload: {0}")]
    Decode(String),
}

#[async_trait]
pub trait Strategy: Send + Sync {
    /// Execute a single poll. The caller (Requester) is responsible for
    /// enforcing the `requestTimeout` deadline via `tokio::time::timeout`;
    /// implementations should still honor `request`'s own cancellation if
    /// the underlying transport offers it (e.g. a dropped `reqwest` future
    /// cancels the in-flight HTTP call).
    async fn execute(&self, request: &Request) -> Result<Vec<u8>, StrategyError>;

    fn name(&self) -> &str;

    async fn health_check(&self) -> Result<(), StrategyError>;
}

/// HTTP polling strategy built on `reqwest`. One instance per upstream
/// source; `base_url` is joined with the stream's canonical key to form the
/// request path.
pub struct HttpStrategy {
    name: String,
    base_url: String,
    client: reqwest::Client,
}

impl HttpStrategy {
    pub fn new(name: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Strategy for HttpStrategy {
    async fn execute(&self, request: &Request) -> Result<Vec<u8>, StrategyError> {
        let url = format!(
            "{}/streams/{}?from={}&to={}",
            self.base_url,
            request.stream_key.canonical(),
            request.time_range.from.to_rfc3339(),
            request.time_range.to.to_rfc3339(),
        );
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| StrategyError::Connection(e.to_string()))?;

        let status = response.status();
        if status.is_server_error() {
            return Err(StrategyError::Server5xx(status.to_string()));
        }
        if status.is_client_error() {
            return Err(StrategyError::Client4xx(status.to_string()));
        }

        response
            .bytes()
            .await
            .map(|b| b.to_vec())
            .map_err(|e| StrategyError::Decode(e.to_string()))
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn health_check(&self) -> Result<(), StrategyError> {
        let url = format!("{}/health", self.base_url);
        self.client
            .get(&url)
            .send()
            .await
            .map_err(|e| StrategyError::Connection(e.to_string()))?;
        Ok(())
    }
}

/// In-memory scriptable strategy for deterministic tests: each call to
/// `execute` pops the next scripted outcome from the queue, or returns
/// `Connection("scripted strategy exhausted")` once empty.
pub struct ScriptedStrategy {
    name: String,
    script: Arc<Mutex<VecDeque<ScriptedOutcome>>>,
    calls: Arc<Mutex<Vec<Request>>>,
}

#[derive(Clone)]
pub enum ScriptedOutcome {
    Success(Vec<u8>),
    Fail(StrategyError),
    /// Never resolves within the test's timeout budget — used to exercise
    /// the requestTimeout deadline.
    Hang,
}

impl ScriptedStrategy {
    pub fn new(name: impl Into<String>, script: Vec<ScriptedOutcome>) -> Self {
        Self {
            name: name.into(),
            script: Arc::new(Mutex::new(script.into())),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub async fn call_count(&self) -> usize {
        self.calls.lock().await.len()
    }
}

#[async_trait]
impl Strategy for ScriptedStrategy {
    async fn execute(&self, request: &Request) -> Result<Vec<u8>, StrategyError> {
        self.calls.lock().await.push(request.clone());
        let outcome = self.script.lock().await.pop_front();
        match outcome {
            Some(ScriptedOutcome::Success(payload)) => Ok(payload),
            Some(ScriptedOutcome::Fail(err)) => Err(err),
            Some(ScriptedOutcome::Hang) => std::future::pending().await,
            None => Err(StrategyError::Connection(
                "scripted strategy exhausted".to_owned(),
            )),
        }
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn health_check(&self) -> Result<(), StrategyError> {
        Ok(())
    }
}
