//! Pluggable wire codec.
//!
//! The protocol does not mandate an encoding; [`JsonCodec`] (JSON text
//! frames) is the default. A custom codec can map the envelopes onto any
//! frame shape (e.g. a binary encoding) by implementing [`Codec`] and
//! setting it on the configuration.
//!
//! Decode failures are protocol-level, not fatal: the connection task logs
//! and drops the frame.

use crate::error::LinkError;
use crate::protocol::{ClientMessage, ServerMessage};
use crate::transport::WsMessage;

/// Encodes outbound envelopes into frames and decodes inbound frames.
///
/// Implementations only ever see data frames (text/binary); control frames
/// are consumed by the connection task.
pub trait Codec: Send + Sync {
    /// Encode a client message into a frame.
    fn encode(&self, message: &ClientMessage) -> Result<WsMessage, LinkError>;

    /// Decode a frame into a server message.
    fn decode(&self, frame: &WsMessage) -> Result<ServerMessage, LinkError>;
}

/// The default codec: one JSON document per text frame.
#[derive(Debug, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode(&self, message: &ClientMessage) -> Result<WsMessage, LinkError> {
        let text = serde_json::to_string(message).map_err(|e| LinkError::Codec(e.to_string()))?;
        Ok(WsMessage::Text(text))
    }

    fn decode(&self, frame: &WsMessage) -> Result<ServerMessage, LinkError> {
        let text = match frame {
            WsMessage::Text(text) => text.as_str(),
            WsMessage::Binary(_) => {
                return Err(LinkError::Codec(
                    "unexpected binary frame for JSON codec".to_string(),
                ));
            }
            other => {
                return Err(LinkError::Codec(format!(
                    "non-data frame reached codec: {other:?}"
                )));
            }
        };
        serde_json::from_str(text).map_err(|e| LinkError::Codec(e.to_string()))
    }
}
