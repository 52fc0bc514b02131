//! Protocol module - wire format, framing, and the message type.
//!
//! - 5-byte header encoding/decoding
//! - Frame buffer for accumulating partial reads
//! - [`Message`], the request/response shape shared by every process

mod frame;
mod frame_buffer;
mod message;
mod wire_format;

pub use frame::{
    build_frame, encode_message, encode_message_parts, message_flags, Frame,
};
pub use frame_buffer::FrameBuffer;
pub use message::{Message, MessageKind};
pub use wire_format::{flags, Header, DEFAULT_MAX_PAYLOAD_SIZE, HEADER_SIZE};
