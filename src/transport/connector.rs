//! Link establishment
//!
//! A [`Connector`] opens one framed text link to an endpoint. The transport
//! owns reconnection; connectors only ever make a single attempt.

use async_trait::async_trait;
use futures_util::{future, Sink, SinkExt, Stream, StreamExt};
use std::pin::Pin;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        self,
        client::IntoClientRequest,
        http::{header::AUTHORIZATION, HeaderValue},
        protocol::Message,
    },
};
use tracing::debug;

use crate::types::{Result, WayguardError};

/// Outbound half of a link
pub type FrameSink = Pin<Box<dyn Sink<String, Error = WayguardError> + Send>>;

/// Inbound half of a link. Ends (or yields an error) when the link drops.
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// An established bidirectional text link
pub struct Link {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

/// Opens links to a tracking endpoint
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Make one connection attempt
    async fn connect(&self, endpoint: &str, auth_token: Option<&str>) -> Result<Link>;
}

/// WebSocket connector over tokio-tungstenite
#[derive(Debug, Clone, Default)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, endpoint: &str, auth_token: Option<&str>) -> Result<Link> {
        let mut request = endpoint
            .into_client_request()
            .map_err(|e| WayguardError::Connect(format!("Invalid endpoint {}: {}", endpoint, e)))?;

        if let Some(token) = auth_token {
            let value = HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|e| WayguardError::Config(format!("Invalid auth token: {}", e)))?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        let (ws, response) = connect_async(request)
            .await
            .map_err(|e| WayguardError::Connect(format!("WebSocket connect failed: {}", e)))?;
        debug!("WebSocket handshake completed with status {}", response.status());

        let (ws_sink, ws_stream) = ws.split();

        let sink = ws_sink
            .with(|frame: String| future::ok::<Message, tungstenite::Error>(Message::Text(frame)))
            .sink_map_err(WayguardError::from);

        let stream = ws_stream.filter_map(|msg| {
            future::ready(match msg {
                Ok(Message::Text(text)) => Some(Ok(text)),
                Ok(Message::Binary(data)) => String::from_utf8(data).ok().map(Ok),
                Ok(Message::Close(frame)) => Some(Err(WayguardError::WebSocket(format!(
                    "closed by peer: {:?}",
                    frame
                )))),
                Ok(_) => None,
                Err(e) => Some(Err(WayguardError::from(e))),
            })
        });

        Ok(Link {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        })
    }
}
