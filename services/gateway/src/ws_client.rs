use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use gateway_core::config::ThrottleConfig;
use gateway_protocol::{error_codes, ClientMessage, ServerMessage};
use tracing::{info, warn};

use crate::auth::{extract_bearer, validate_token};
use crate::state::AppState;

pub async fn ws_client_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let token = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(extract_bearer)
        .map(str::to_owned);
    ws.on_upgrade(move |socket| handle_client_socket(socket, state, token))
}

async fn send_err(socket: &mut WebSocket, code: &str, message: &str) {
    let msg = ServerMessage::Err {
        code: code.to_owned(),
        message: message.to_owned(),
    };
    if let Ok(json) = serde_json::to_string(&msg) {
        let _ = socket.send(Message::Text(json.into())).await;
    }
}

async fn handle_client_socket(mut socket: WebSocket, state: AppState, token: Option<String>) {
    let Some(token) = token else {
        send_err(&mut socket, error_codes::AUTH_REQUIRED, "missing Authorization header").await;
        return;
    };
    let Some(claims) = validate_token(&state.pool, &token).await else {
        send_err(&mut socket, error_codes::AUTH_REQUIRED, "unknown or revoked token").await;
        return;
    };

    let router = state.gateway.router().clone();
    let (mut outbound_rx, cancel) = router
        .register_client(
            claims.client_id.clone(),
            claims.tenant_id.clone(),
            claims.scopes,
            ThrottleConfig::default(),
        )
        .await;
    info!(client_id = %claims.client_id, tenant_id = %claims.tenant_id, "client connected");

    loop {
        tokio::select! {
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(message) => {
                                let reply = gateway_core::session::handle_message(&router, &claims.client_id, message).await;
                                if let Ok(json) = serde_json::to_string(&reply) {
                                    if socket.send(Message::Text(json.into())).await.is_err() {
                                        break;
                                    }
                                }
                            }
                            Err(e) => {
                                send_err(&mut socket, error_codes::BAD_FILTER, &format!("invalid JSON: {e}")).await;
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = socket.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!(client_id = %claims.client_id, "client disconnected");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(client_id = %claims.client_id, error = %e, "WS error");
                        break;
                    }
                    Some(Ok(_)) => {}
                }
            }
            outgoing = outbound_rx.recv() => {
                match outgoing {
                    Some(message) => {
                        if let Ok(json) = serde_json::to_string(&message) {
                            if socket.send(Message::Text(json.into())).await.is_err() {
                                break;
                            }
                        }
                    }
                    None => break,
                }
            }
        }
    }

    cancel.cancel();
    router.unregister_client(&claims.client_id).await;
}
