//! Tokio-tungstenite WebSocket transport implementation.
//!
//! Wraps `tokio_tungstenite::connect_async()` and implements the
//! [`Transport`]/[`Connector`] traits. Inbound pings are answered by
//! tungstenite itself on the next read/write, so they surface here only as
//! frames to ignore.

use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use crate::error::TransportError;
use crate::transport::{Connector, Transport, WsMessage};

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// A [`Transport`] backed by tokio-tungstenite.
pub struct TokioTransport {
    ws: WsStream,
}

impl TokioTransport {
    /// Connect to a WebSocket URL and return a `TokioTransport`.
    pub async fn connect(url: &str) -> Result<Self, TransportError> {
        let (ws, _response) = connect_async(url)
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
        Ok(Self { ws })
    }
}

#[async_trait::async_trait]
impl Transport for TokioTransport {
    async fn send(&mut self, message: WsMessage) -> Result<(), TransportError> {
        let frame = match message {
            WsMessage::Text(text) => Message::Text(text.into()),
            WsMessage::Binary(data) => Message::Binary(data.into()),
            WsMessage::Ping(data) => Message::Ping(data.into()),
            WsMessage::Pong(data) => Message::Pong(data.into()),
            WsMessage::Close { code } => Message::Close(code.map(|code| CloseFrame {
                code: code.into(),
                reason: "".into(),
            })),
        };
        self.ws
            .send(frame)
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<WsMessage, TransportError>> {
        loop {
            return match self.ws.next().await {
                Some(Ok(Message::Text(text))) => Some(Ok(WsMessage::Text(text.to_string()))),
                Some(Ok(Message::Binary(data))) => Some(Ok(WsMessage::Binary(data.to_vec()))),
                Some(Ok(Message::Ping(data))) => Some(Ok(WsMessage::Ping(data.to_vec()))),
                Some(Ok(Message::Pong(data))) => Some(Ok(WsMessage::Pong(data.to_vec()))),
                Some(Ok(Message::Close(frame))) => Some(Ok(WsMessage::Close {
                    code: frame.map(|f| u16::from(f.code)),
                })),
                Some(Ok(Message::Frame(_))) => {
                    // Raw frames are not expected; skip.
                    continue;
                }
                Some(Err(e)) => Some(Err(TransportError::Other(e.to_string()))),
                None => None,
            };
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.ws
            .close(None)
            .await
            .map_err(|e| TransportError::Other(e.to_string()))
    }
}

/// Connector that creates [`TokioTransport`] connections.
pub struct TokioConnector;

#[async_trait::async_trait]
impl Connector for TokioConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn Transport>, TransportError> {
        Ok(Box::new(TokioTransport::connect(url).await?))
    }
}
