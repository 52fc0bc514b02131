//! Frame struct: one header plus its MsgPack payload.
//!
//! # Example
//!
//! ```
//! use hubwire::protocol::{encode_message, flags, FrameBuffer, Message};
//! use serde_json::json;
//!
//! let msg = Message::request("k1", "numbers/14", vec![json!(1)]);
//! let bytes = encode_message(&msg, flags::TO_HUB).unwrap();
//!
//! let mut buffer = FrameBuffer::new();
//! let frames = buffer.push(&bytes).unwrap();
//! assert_eq!(frames[0].message().unwrap(), msg);
//! ```

use bytes::Bytes;

use super::message::Message;
use super::wire_format::{flags, Header, HEADER_SIZE};
use crate::codec::MsgPackCodec;
use crate::error::{HubError, Result};

/// A complete protocol frame.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Decoded header.
    pub header: Header,
    /// Payload bytes (zero-copy via `bytes::Bytes`).
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame from header and payload.
    pub fn new(header: Header, payload: Bytes) -> Self {
        Self { header, payload }
    }

    /// Get a reference to the payload bytes.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    #[inline]
    pub fn is_response(&self) -> bool {
        flags::has_flag(self.header.flags, flags::IS_RESPONSE)
    }

    /// Decode the payload into a [`Message`].
    ///
    /// The response flag must agree with the decoded shape: a request carries
    /// a path and a response does not.
    pub fn message(&self) -> Result<Message> {
        let message: Message = MsgPackCodec::decode(&self.payload)?;
        if message.is_request() == self.is_response() {
            return Err(HubError::Protocol(format!(
                "frame flags {:#04x} disagree with message shape for key {}",
                self.header.flags, message.key
            )));
        }
        Ok(message)
    }
}

/// Flags for a message travelling in the given direction.
pub fn message_flags(message: &Message, to_hub: bool) -> u8 {
    let mut value = 0;
    if to_hub {
        value |= flags::TO_HUB;
    }
    if !message.is_request() {
        value |= flags::IS_RESPONSE;
    }
    value
}

/// Build a complete frame as a single byte vector.
pub fn build_frame(header: &Header, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());
    buf.extend_from_slice(&header.encode());
    buf.extend_from_slice(payload);
    buf
}

/// Encode a message into header and payload parts.
///
/// `direction` should be `flags::TO_HUB` or `0`; the response flag is derived
/// from the message itself.
pub fn encode_message_parts(message: &Message, direction: u8) -> Result<(Header, Bytes)> {
    let payload = MsgPackCodec::encode(message)?;
    let length = u32::try_from(payload.len()).map_err(|_| {
        HubError::Protocol(format!("payload of {} bytes is too large", payload.len()))
    })?;
    let flags = message_flags(message, flags::has_flag(direction, flags::TO_HUB));
    Ok((Header::new(flags, length), Bytes::from(payload)))
}

/// Encode a message into one contiguous frame.
pub fn encode_message(message: &Message, direction: u8) -> Result<Vec<u8>> {
    let (header, payload) = encode_message_parts(message, direction)?;
    Ok(build_frame(&header, &payload))
}
