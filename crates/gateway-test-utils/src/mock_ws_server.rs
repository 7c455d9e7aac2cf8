// mock_ws_server: A mock WebSocket peer implementing the client-facing
// subscription protocol (SUB/UNSUB/PING), for testing `MockWsClient` and
// other code that only needs a protocol-shaped peer, not a running gateway.

use std::net::SocketAddr;

use futures_util::{SinkExt, StreamExt};
use gateway_protocol::{error_codes, ClientMessage, ServerMessage};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::protocol::Message;

/// A mock WebSocket server for integration testing.
///
/// Binds to port 0 (random) and exposes the actual bound port. Each test
/// can spin up its own isolated server instance.
///
/// `SUB` is acked with a freshly generated `subscription_id`; `UNSUB` is
/// acked unconditionally; `PING` gets `PONG`. Anything else produces an
/// `ERR` frame.
pub struct MockWsServer {
    addr: SocketAddr,
    _task: tokio::task::JoinHandle<()>,
}

impl MockWsServer {
    pub async fn start() -> Result<Self, Box<dyn std::error::Error>> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let task = tokio::spawn(async move {
            Self::accept_loop(listener).await;
        });

        Ok(Self { addr, _task: task })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    async fn accept_loop(listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((stream, _peer)) => {
                    tokio::spawn(async move {
                        let _ = Self::handle_connection(stream).await;
                    });
                }
                Err(_) => break,
            }
        }
    }

    async fn handle_connection(
        stream: tokio::net::TcpStream,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let ws_stream = tokio_tungstenite::accept_async(stream).await?;
        let (mut write, mut read) = ws_stream.split();

        while let Some(msg_result) = read.next().await {
            let msg = msg_result?;

            let text = match msg {
                Message::Text(t) => t,
                Message::Close(_) => break,
                Message::Ping(data) => {
                    write.send(Message::Pong(data)).await?;
                    continue;
                }
                _ => continue,
            };

            let reply = match serde_json::from_str::<ClientMessage>(&text) {
                Ok(ClientMessage::Sub { .. }) => ServerMessage::Ack {
                    correlation: None,
                    subscription_id: Some(uuid::Uuid::new_v4().to_string()),
                },
                Ok(ClientMessage::Unsub { subscription_id }) => ServerMessage::Ack {
                    correlation: None,
                    subscription_id: Some(subscription_id),
                },
                Ok(ClientMessage::Ping) => ServerMessage::Pong,
                Err(e) => ServerMessage::Err {
                    code: error_codes::BAD_FILTER.to_owned(),
                    message: e.to_string(),
                },
            };

            let json = serde_json::to_string(&reply)?;
            write.send(Message::Text(json.into())).await?;
        }

        Ok(())
    }
}
