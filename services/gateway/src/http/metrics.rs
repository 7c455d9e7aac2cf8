use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use gateway_core::StreamKey;

use crate::http::response::not_found;
use crate::state::AppState;

pub async fn get_metrics(State(state): State<AppState>, Path(stream): Path<String>) -> impl IntoResponse {
    let key = match StreamKey::parse(&stream) {
        Ok(key) => key,
        Err(err) => return crate::http::response::bad_request(err.to_string()),
    };

    let Some(requester) = state.gateway.requester_for(&key).await else {
        return not_found("stream not registered");
    };

    let metrics = requester.metrics().await;
    let kpi = state.gateway.tracker().snapshot(&key).await;

    (
        StatusCode::OK,
        Json(serde_json::json!({
            "in_flight": metrics.in_flight,
            "queue_len": metrics.queue_len,
            "total_success": metrics.total_success,
            "total_errors": metrics.total_errors,
            "consecutive_errors": metrics.consecutive_errors,
            "last_latency_ms": metrics.last_latency_ms,
            "circuit_open": metrics.circuit_open,
            "last_success_ts": kpi.last_success_ts,
            "last_error_ts": kpi.last_error_ts,
            "last_error_msg": kpi.last_error_msg,
        })),
    )
        .into_response()
}
