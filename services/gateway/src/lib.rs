pub mod auth;
pub mod db;
pub mod http;
pub mod state;
pub mod ws_client;

pub use state::AppState;

use axum::response::{Html, IntoResponse};
use axum::{http::StatusCode, routing::get, routing::post, Router};

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws/v1/clients", get(ws_client::ws_client_handler))
        .route("/healthz", get(http::health::healthz))
        .route("/readyz", get(http::health::readyz))
        .route("/api/v1/streams/:stream/metrics", get(http::metrics::get_metrics))
        .route("/api/v1/streams/:stream/poll", post(http::poll::trigger_poll))
        .fallback(fallback_404)
        .with_state(state)
}

async fn fallback_404() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, Html("<h1>404 Not Found</h1>"))
}
