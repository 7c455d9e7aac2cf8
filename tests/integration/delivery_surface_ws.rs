//! End-to-end coverage of the client-facing WebSocket delivery surface: a
//! real TCP/WS round trip through an axum upgrade, `session::handle_message`,
//! and the Router's fan-out (spec §4.5, §6, invariants I3/I7/I8).
//!
//! This drives `gateway_core`'s transport-agnostic API behind a minimal axum
//! handler built for the test, rather than the database-backed `gateway`
//! service binary, so the suite carries no Postgres dependency.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use gateway_core::config::ThrottleConfig;
use gateway_core::request::PollResult;
use gateway_core::router::client::{Scope, ScopeResource};
use gateway_core::session;
use gateway_core::stream_key::StreamKey;
use gateway_core::Router;
use gateway_protocol::{error_codes, Capability, ClientMessage, ServerMessage, StreamKind, SubscriptionFilter};
use gateway_test_utils::MockWsClient;

const TEST_TOKEN: &str = "valid-test-token";
const TEST_CLIENT_ID: &str = "c1";
const TEST_TENANT_ID: &str = "tenant-a";

fn full_scope() -> Scope {
    Scope {
        tenant_id: TEST_TENANT_ID.to_owned(),
        resource: ScopeResource::Any,
        permissions: [Capability::FeedingRead].into_iter().collect(),
        farm_ids: None,
        site_ids: None,
        cage_ids: None,
    }
}

fn key() -> StreamKey {
    StreamKey::new(TEST_TENANT_ID, StreamKind::Feeding, "farm-1", "site-1", None).unwrap()
}

async fn ws_handler(ws: WebSocketUpgrade, State(router): State<Arc<Router>>, uri: axum::http::Uri) -> impl IntoResponse {
    let authorized = uri.query().is_some_and(|q| q.contains(&format!("token={TEST_TOKEN}")));
    ws.on_upgrade(move |socket| handle_socket(socket, router, authorized))
}

async fn handle_socket(mut socket: WebSocket, router: Arc<Router>, authorized: bool) {
    if !authorized {
        let err = ServerMessage::Err {
            code: error_codes::AUTH_REQUIRED.to_owned(),
            message: "missing or invalid token".to_owned(),
        };
        let _ = socket.send(Message::Text(serde_json::to_string(&err).unwrap().into())).await;
        return;
    }

    let (mut outbound_rx, cancel) = router
        .register_client(TEST_CLIENT_ID, TEST_TENANT_ID, vec![full_scope()], ThrottleConfig::default())
        .await;

    loop {
        tokio::select! {
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        let reply = match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(msg) => session::handle_message(&router, TEST_CLIENT_ID, msg).await,
                            Err(e) => ServerMessage::Err {
                                code: error_codes::BAD_FILTER.to_owned(),
                                message: e.to_string(),
                            },
                        };
                        if socket.send(Message::Text(serde_json::to_string(&reply).unwrap().into())).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {}
                }
            }
            outbound = outbound_rx.recv() => {
                match outbound {
                    Some(message) => {
                        if socket.send(Message::Text(serde_json::to_string(&message).unwrap().into())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
        }
    }

    cancel.cancel();
    router.unregister_client(TEST_CLIENT_ID).await;
}

async fn spawn_test_server(router: Arc<Router>) -> String {
    let app = axum::Router::new().route("/ws", get(ws_handler)).with_state(router);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("ws://{addr}/ws")
}

#[tokio::test]
async fn a_subscribed_client_receives_a_routed_data_event_over_the_wire() {
    let router = Router::new();
    let url = spawn_test_server(router.clone()).await;

    let target = format!("{url}?token={TEST_TOKEN}");
    let mut client = MockWsClient::connect(&target).await.unwrap();

    client
        .send_message(&ClientMessage::Sub {
            filter: SubscriptionFilter::default(),
            include_status: false,
        })
        .await
        .unwrap();
    match client.recv_message().await.unwrap() {
        ServerMessage::Ack { subscription_id: Some(_), .. } => {}
        other => panic!("expected Ack with subscription_id, got {other:?}"),
    }

    // Give the router a moment to finish registering the client's drain task
    // before routing — the Ack above already guarantees registration
    // completed, since subscribe() requires a known client_id.
    let result = PollResult::success(key(), "cloud".to_owned(), 7, br#"{"kg":12.5}"#.to_vec());
    router.route_data(&key(), &result).await;

    match client.recv_message().await.unwrap() {
        ServerMessage::Data { kind, .. } => assert_eq!(kind, StreamKind::Feeding),
        other => panic!("expected Data, got {other:?}"),
    }
}

#[tokio::test]
async fn ping_pong_round_trips_over_the_wire() {
    let router = Router::new();
    let url = spawn_test_server(router).await;
    let target = format!("{url}?token={TEST_TOKEN}");
    let mut client = MockWsClient::connect(&target).await.unwrap();

    client.send_message(&ClientMessage::Ping).await.unwrap();
    assert_eq!(client.recv_message().await.unwrap(), ServerMessage::Pong);
}

#[tokio::test]
async fn a_missing_token_is_rejected_with_an_auth_required_error() {
    let router = Router::new();
    let url = spawn_test_server(router).await;
    let mut client = MockWsClient::connect(&url).await.unwrap();

    match client.recv_message().await.unwrap() {
        ServerMessage::Err { code, .. } => assert_eq!(code, error_codes::AUTH_REQUIRED),
        other => panic!("expected Err, got {other:?}"),
    }
}

#[tokio::test]
async fn unsub_of_an_unknown_subscription_returns_a_not_found_error_over_the_wire() {
    let router = Router::new();
    let url = spawn_test_server(router).await;
    let target = format!("{url}?token={TEST_TOKEN}");
    let mut client = MockWsClient::connect(&target).await.unwrap();

    client
        .send_message(&ClientMessage::Unsub { subscription_id: "does-not-exist".to_owned() })
        .await
        .unwrap();
    match client.recv_message().await.unwrap() {
        ServerMessage::Err { code, .. } => assert_eq!(code, error_codes::NOT_FOUND),
        other => panic!("expected Err, got {other:?}"),
    }
}
