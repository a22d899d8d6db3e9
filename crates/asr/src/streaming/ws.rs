//! WebSocket transport for realtime sessions.

use async_trait::async_trait;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::debug;

use super::events::{ClientEvent, ServerEvent};
use super::{RealtimeConnector, RealtimeTransport};
use crate::error::TransportError;

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// Guard that aborts a spawned task when dropped.
///
/// Dropping a `JoinHandle` detaches (does NOT abort) the task; this wrapper
/// ensures the reader task dies with the transport.
struct AbortOnDrop(tokio::task::JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Realtime transport over a tungstenite WebSocket.
///
/// A spawned reader task parses inbound text frames into [`ServerEvent`]s
/// and feeds them through a channel; malformed frames surface as error
/// events so the session fails instead of hanging.
pub struct TungsteniteTransport {
    sink: WsSink,
    events_rx: mpsc::Receiver<ServerEvent>,
    _reader: AbortOnDrop,
    closed: bool,
}

impl TungsteniteTransport {
    pub async fn connect(url: &str, api_key: &str) -> Result<Self, TransportError> {
        let mut request = url
            .into_client_request()
            .map_err(|e| TransportError::Connect(format!("invalid URL '{url}': {e}")))?;
        if !api_key.is_empty() {
            let value = format!("Bearer {api_key}")
                .parse()
                .map_err(|_| TransportError::Connect("API key is not header-safe".to_string()))?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        let (stream, _) = connect_async(request)
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        debug!(%url, "WebSocket connection opened");

        let (sink, mut source) = stream.split();
        let (events_tx, events_rx) = mpsc::channel(64);

        let reader = tokio::spawn(async move {
            while let Some(message) = source.next().await {
                let message = match message {
                    Ok(m) => m,
                    Err(e) => {
                        debug!("WebSocket read error: {e}");
                        break;
                    }
                };
                match message {
                    Message::Text(text) => {
                        let event = serde_json::from_str::<ServerEvent>(text.as_str())
                            .unwrap_or_else(|e| ServerEvent::Error {
                                message: format!("malformed event: {e}"),
                            });
                        if events_tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            debug!("WebSocket reader finished");
        });

        Ok(Self {
            sink,
            events_rx,
            _reader: AbortOnDrop(reader),
            closed: false,
        })
    }
}

#[async_trait]
impl RealtimeTransport for TungsteniteTransport {
    async fn send(&mut self, event: ClientEvent) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        let json = serde_json::to_string(&event)
            .map_err(|e| TransportError::Send(e.to_string()))?;
        self.sink
            .send(Message::text(json))
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    async fn recv(&mut self) -> Option<ServerEvent> {
        self.events_rx.recv().await
    }

    fn try_recv(&mut self) -> Option<ServerEvent> {
        self.events_rx.try_recv().ok()
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let _ = self.sink.close().await;
    }
}

/// Connector that opens [`TungsteniteTransport`]s against a fixed endpoint.
pub struct WsConnector {
    url: String,
    api_key: String,
}

impl WsConnector {
    pub fn new(url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            api_key: api_key.into(),
        }
    }
}

#[async_trait]
impl RealtimeConnector for WsConnector {
    async fn connect(&self) -> Result<Box<dyn RealtimeTransport>, TransportError> {
        Ok(Box::new(
            TungsteniteTransport::connect(&self.url, &self.api_key).await?,
        ))
    }
}
