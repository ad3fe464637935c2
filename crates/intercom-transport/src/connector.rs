use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::{future, Sink, SinkExt, Stream, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

use intercom_core::ids::ChannelId;

use crate::error::TransportError;

/// Outbound half of a connection. Each item is one whole text message.
pub type TextSink = Pin<Box<dyn Sink<String, Error = TransportError> + Send>>;

/// Inbound half of a connection. Non-text frames are filtered out.
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String, TransportError>> + Send>>;

/// An established, not yet announced, channel connection.
pub struct Connection {
    pub endpoint: String,
    pub sink: TextSink,
    pub stream: TextStream,
}

/// Opens channel-scoped connections.
#[async_trait]
pub trait Connector: Send + Sync {
    fn endpoint(&self, channel_id: &ChannelId) -> String;

    async fn connect(&self, channel_id: &ChannelId) -> Result<Connection, TransportError>;
}

/// WebSocket connector addressing `{base_url}/{channel_id}`.
pub struct WsConnector {
    base_url: String,
}

impl WsConnector {
    pub fn new(base_url: impl Into<String>) -> Result<Self, TransportError> {
        let base_url = base_url.into();
        if !(base_url.starts_with("ws://") || base_url.starts_with("wss://")) {
            return Err(TransportError::InvalidEndpoint {
                endpoint: base_url,
                reason: "scheme must be ws or wss".into(),
            });
        }
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl Connector for WsConnector {
    fn endpoint(&self, channel_id: &ChannelId) -> String {
        format!("{}/{}", self.base_url, channel_id)
    }

    async fn connect(&self, channel_id: &ChannelId) -> Result<Connection, TransportError> {
        let endpoint = self.endpoint(channel_id);
        let (ws, _response) =
            connect_async(endpoint.as_str())
                .await
                .map_err(|e| TransportError::Connect {
                    endpoint: endpoint.clone(),
                    reason: e.to_string(),
                })?;
        debug!(endpoint = %endpoint, "websocket connected");

        let (ws_tx, ws_rx) = ws.split();
        let sink = ws_tx
            .sink_map_err(|e| TransportError::Send(e.to_string()))
            .with(|text: String| future::ready(Ok::<_, TransportError>(Message::Text(text.into()))));
        let stream = ws_rx.filter_map(|msg| {
            future::ready(match msg {
                Ok(Message::Text(text)) => Some(Ok(text.as_str().to_owned())),
                Ok(Message::Close(_)) => Some(Err(TransportError::Closed)),
                Ok(_) => None,
                Err(e) => Some(Err(TransportError::Receive(e.to_string()))),
            })
        });

        Ok(Connection {
            endpoint,
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        })
    }
}

/// Connect with a per-attempt timeout. At most one reconnect is made,
/// whatever `reconnect_attempts` asks for.
pub async fn connect_with_retry(
    connector: &dyn Connector,
    channel_id: &ChannelId,
    connect_timeout: Duration,
    reconnect_attempts: u32,
) -> Result<Connection, TransportError> {
    let attempts = reconnect_attempts.min(1) + 1;
    let mut attempt = 1;
    loop {
        let result = match tokio::time::timeout(connect_timeout, connector.connect(channel_id)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::ConnectTimeout {
                endpoint: connector.endpoint(channel_id),
                timeout_ms: connect_timeout.as_millis() as u64,
            }),
        };
        match result {
            Ok(conn) => return Ok(conn),
            Err(e) if e.is_connect_retryable() && attempt < attempts => {
                warn!(channel_id = %channel_id, attempt, error = %e, "connect failed, retrying once");
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
