//! Transport abstraction for the link connection.
//!
//! The connection task is written against the [`Transport`] trait so the
//! socket implementation is an injection point: production code uses the
//! tokio-tungstenite transport (`native-transport` feature), tests inject
//! channel-backed fakes, and embedders can bring their own socket.

use async_trait::async_trait;

use crate::error::TransportError;

/// A WebSocket-shaped frame, decoupled from any particular socket crate.
#[derive(Debug, Clone, PartialEq)]
pub enum WsMessage {
    /// UTF-8 text frame.
    Text(String),
    /// Binary frame.
    Binary(Vec<u8>),
    /// Ping control frame.
    Ping(Vec<u8>),
    /// Pong control frame.
    Pong(Vec<u8>),
    /// Close frame with the peer's close code, if one was supplied.
    Close {
        /// WebSocket close code (1000 = normal, 1001 = going away, ...).
        code: Option<u16>,
    },
}

/// One established connection. The connection task holds exclusive ownership
/// and drops the value when the connection is torn down.
#[async_trait]
pub trait Transport: Send {
    /// Send one frame.
    async fn send(&mut self, message: WsMessage) -> Result<(), TransportError>;

    /// Receive the next frame. `None` means the stream ended without a close
    /// frame (the peer vanished).
    ///
    /// Must be cancel-safe: the connection task polls this inside a select
    /// loop and may drop an unresolved `recv` future without losing frames.
    async fn recv(&mut self) -> Option<Result<WsMessage, TransportError>>;

    /// Close the connection gracefully. Safe to call on an already-closed
    /// transport.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Creates [`Transport`] connections. Injected through the configuration so
/// the connection task can reconnect at will without knowing the socket type.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a new connection to `url`.
    async fn connect(&self, url: &str) -> Result<Box<dyn Transport>, TransportError>;
}
