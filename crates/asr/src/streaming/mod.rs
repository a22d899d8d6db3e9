pub mod events;
pub mod session;
pub mod ws;

pub use events::{ClientEvent, ServerEvent, SessionParams};
pub use session::{SessionState, StreamingSession, StreamingSessionConfig, TurnDetection};
pub use ws::{TungsteniteTransport, WsConnector};

use async_trait::async_trait;

use crate::error::TransportError;

/// A persistent bidirectional message transport for one realtime session.
///
/// Production sessions run over a WebSocket ([`TungsteniteTransport`]);
/// tests script inbound events through a mock.
#[async_trait]
pub trait RealtimeTransport: Send {
    /// Sends one outbound event. Events must reach the wire in call order.
    async fn send(&mut self, event: ClientEvent) -> Result<(), TransportError>;

    /// Waits for the next inbound event. `None` means the connection closed.
    async fn recv(&mut self) -> Option<ServerEvent>;

    /// Drains one already-buffered inbound event without waiting.
    fn try_recv(&mut self) -> Option<ServerEvent>;

    /// Closes the connection. Idempotent.
    async fn close(&mut self);
}

/// Opens transports for a realtime backend.
#[async_trait]
pub trait RealtimeConnector: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn RealtimeTransport>, TransportError>;
}
