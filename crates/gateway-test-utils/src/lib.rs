// gateway-test-utils: shared test doubles for the telemetry gateway's
// client-facing WebSocket protocol.

pub mod mock_ws_client;
pub mod mock_ws_server;

pub use mock_ws_client::MockWsClient;
pub use mock_ws_server::MockWsServer;
