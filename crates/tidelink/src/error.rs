//! Error types for the link layer.
//!
//! `TransportError` covers the socket boundary; `LinkError` is what callers
//! observe from calls and subscription streams. Both are `Clone` because a
//! single failure (e.g. an unclean close) fans out to every pending request
//! and subscription.

use std::time::Duration;

use thiserror::Error;

use crate::protocol::ErrorShape;

/// Errors from the transport boundary (socket connect/send/recv).
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TransportError {
    /// Establishing the connection failed.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    /// Writing a frame failed.
    #[error("send failed: {0}")]
    SendFailed(String),
    /// The connection closed while the operation was in flight.
    #[error("connection closed")]
    Closed,
    /// Anything else the underlying socket reports.
    #[error("{0}")]
    Other(String),
}

/// Errors observed by callers of the link API.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum LinkError {
    /// The connection attempt completed without an open socket.
    #[error("not connected")]
    NotConnected,
    /// The connection dropped before the request resolved.
    #[error("connection closed")]
    ConnectionClosed,
    /// No result arrived within the request timeout.
    #[error("request timed out after {0:?}")]
    RequestTimeout(Duration),
    /// Reconnection attempts are exhausted; the link is permanently down.
    #[error("reconnect attempts exhausted")]
    ReconnectExhausted,
    /// The server answered with an error payload.
    #[error("server error: {0}")]
    Server(ErrorShape),
    /// A message could not be encoded for the wire.
    #[error("codec error: {0}")]
    Codec(String),
    /// The socket reported a failure.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}
