use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use gateway_core::request::{Request, TimeRange};
use gateway_core::StreamKey;
use gateway_protocol::Priority;
use serde::Deserialize;

use crate::http::response::bad_request;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct TriggerPollBody {
    pub time_range: TimeRangeBody,
    #[serde(default)]
    pub priority: Priority,
    pub source: String,
}

#[derive(Debug, Deserialize)]
pub struct TimeRangeBody {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

/// Plays the role of the external Scheduler (§6): an admin operator or a
/// cron-driven caller enqueues a poll for a registered stream.
pub async fn trigger_poll(
    State(state): State<AppState>,
    Path(stream): Path<String>,
    Json(body): Json<TriggerPollBody>,
) -> impl IntoResponse {
    let key = match StreamKey::parse(&stream) {
        Ok(key) => key,
        Err(err) => return bad_request(err.to_string()),
    };

    let Some(requester) = state.gateway.requester_for(&key).await else {
        return crate::http::response::not_found("stream not registered");
    };

    let request = Request::new(
        key,
        TimeRange {
            from: body.time_range.from,
            to: body.time_range.to,
        },
        body.priority,
        body.source,
    );

    match requester.enqueue(request).await {
        Ok(()) => StatusCode::ACCEPTED.into_response(),
        Err(err) => bad_request(err.to_string()),
    }
}
