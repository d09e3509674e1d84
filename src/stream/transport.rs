use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header::AUTHORIZATION, HeaderValue};
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::error::{Result, TrackerError};
use crate::types::EntityId;

/// Server event names that carry a location payload
pub const SAMPLE_EVENTS: [&str; 2] = ["location_update", "tracking_update"];

/// Client -> server: `{"type": "join", "entityId": "<id>"}`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JoinMessage {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(rename = "entityId")]
    pub entity_id: EntityId,
}

impl JoinMessage {
    pub fn new(entity_id: &EntityId) -> Self {
        JoinMessage {
            kind: "join".to_string(),
            entity_id: entity_id.clone(),
        }
    }
}

/// Server -> client: `{"event": "<name>", "data": {...}}`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ServerEvent {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

impl ServerEvent {
    pub fn new(event: &str, data: Value) -> Self {
        ServerEvent {
            event: event.to_string(),
            data,
        }
    }

    pub fn is_sample(&self) -> bool {
        SAMPLE_EVENTS.contains(&self.event.as_str())
    }
}

/// One open push connection scoped to a single entity
#[async_trait]
pub trait StreamConnection: Send {
    async fn send_join(&mut self, entity_id: &EntityId) -> Result<()>;

    /// Next inbound event. `None` means the peer closed the connection.
    /// `Err(Decode)` is a malformed frame; any other error is a transport
    /// failure.
    async fn next_event(&mut self) -> Option<Result<ServerEvent>>;

    async fn close(&mut self);
}

/// Factory for stream connections
#[async_trait]
pub trait StreamTransport: Send + Sync {
    async fn connect(&self, entity_id: &EntityId) -> Result<Box<dyn StreamConnection>>;
}

/// WebSocket transport speaking JSON text frames
#[derive(Clone, Debug)]
pub struct WsTransport {
    url: String,
    auth_token: Option<String>,
}

impl WsTransport {
    pub fn new(url: impl Into<String>, auth_token: Option<String>) -> Self {
        WsTransport {
            url: url.into(),
            auth_token,
        }
    }

    fn endpoint(&self, entity_id: &EntityId) -> Result<reqwest::Url> {
        let mut url = reqwest::Url::parse(&self.url)
            .map_err(|e| TrackerError::Config(format!("stream url {}: {}", self.url, e)))?;
        url.query_pairs_mut().append_pair("entityId", entity_id.as_str());
        Ok(url)
    }
}

#[async_trait]
impl StreamTransport for WsTransport {
    async fn connect(&self, entity_id: &EntityId) -> Result<Box<dyn StreamConnection>> {
        let url = self.endpoint(entity_id)?;
        let mut request = url.as_str().into_client_request()?;

        if let Some(token) = &self.auth_token {
            let value = HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|e| TrackerError::Config(format!("auth token: {}", e)))?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        let (stream, _response) = connect_async(request).await?;
        log::debug!("[{}] websocket handshake complete", entity_id);
        Ok(Box::new(WsConnection { stream }))
    }
}

struct WsConnection {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl StreamConnection for WsConnection {
    async fn send_join(&mut self, entity_id: &EntityId) -> Result<()> {
        let join = serde_json::to_string(&JoinMessage::new(entity_id))?;
        self.stream.send(Message::Text(join)).await?;
        Ok(())
    }

    async fn next_event(&mut self) -> Option<Result<ServerEvent>> {
        loop {
            let frame = match self.stream.next().await? {
                Ok(frame) => frame,
                Err(e) => return Some(Err(e.into())),
            };

            let text = match frame {
                Message::Text(text) => text,
                Message::Binary(bytes) => match String::from_utf8(bytes) {
                    Ok(text) => text,
                    Err(e) => return Some(Err(TrackerError::Decode(e.to_string()))),
                },
                Message::Close(_) => return None,
                // Pongs are queued by tungstenite itself
                _ => continue,
            };

            return Some(serde_json::from_str(&text).map_err(TrackerError::from));
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.stream.close(None).await {
            log::debug!("websocket close: {}", e);
        }
    }
}
