//! Wire format encoding and decoding.
//!
//! Every message on a process pipe is one frame with a 5-byte header:
//! ```text
//! ┌───────┬──────────┐
//! │ Flags │ Length   │
//! │ 1 byte│ 4 bytes  │
//! │       │ uint32 BE│
//! └───────┴──────────┘
//! ```
//!
//! followed by `Length` bytes of MsgPack payload.

use crate::error::{HubError, Result};

/// Header size in bytes (fixed, exactly 5).
pub const HEADER_SIZE: usize = 5;

/// Default maximum payload size (64 MB).
pub const DEFAULT_MAX_PAYLOAD_SIZE: u32 = 64 * 1024 * 1024;

/// Flag constants for the protocol.
pub mod flags {
    /// Direction: child to hub (1) or hub to child (0).
    pub const TO_HUB: u8 = 0b0000_0001;
    /// Message type: response (1) or request (0).
    pub const IS_RESPONSE: u8 = 0b0000_0010;

    /// Reserved bits mask (bits 2-7).
    pub const RESERVED_MASK: u8 = 0b1111_1100;

    /// Check if a specific flag is set.
    #[inline]
    pub fn has_flag(flags: u8, flag: u8) -> bool {
        flags & flag != 0
    }
}

/// Decoded header from wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Flags byte (see `flags` module).
    pub flags: u8,
    /// Payload length in bytes.
    pub payload_length: u32,
}

impl Header {
    /// Create a new header.
    pub fn new(flags: u8, payload_length: u32) -> Self {
        Self {
            flags,
            payload_length,
        }
    }

    /// Encode header to bytes (Big Endian).
    ///
    /// # Example
    ///
    /// ```
    /// use hubwire::protocol::{Header, flags};
    ///
    /// let bytes = Header::new(flags::TO_HUB, 100).encode();
    /// assert_eq!(bytes, [0x01, 0, 0, 0, 100]);
    /// ```
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0] = self.flags;
        buf[1..5].copy_from_slice(&self.payload_length.to_be_bytes());
        buf
    }

    /// Decode header from bytes. Returns `None` if the buffer is too short.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < HEADER_SIZE {
            return None;
        }
        Some(Self {
            flags: buf[0],
            payload_length: u32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]),
        })
    }

    /// Validate the header for protocol compliance.
    pub fn validate(&self, max_payload_size: u32) -> Result<()> {
        if self.payload_length > max_payload_size {
            return Err(HubError::Protocol(format!(
                "Payload size {} exceeds maximum {}",
                self.payload_length, max_payload_size
            )));
        }

        if self.flags & flags::RESERVED_MASK != 0 {
            return Err(HubError::Protocol(
                "Reserved flag bits must be 0".to_string(),
            ));
        }

        Ok(())
    }

    #[inline]
    pub fn is_response(&self) -> bool {
        flags::has_flag(self.flags, flags::IS_RESPONSE)
    }

    #[inline]
    pub fn is_to_hub(&self) -> bool {
        flags::has_flag(self.flags, flags::TO_HUB)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout() {
        let header = Header::new(flags::TO_HUB | flags::IS_RESPONSE, 0x0102_0304);
        assert_eq!(header.encode(), [0x03, 0x01, 0x02, 0x03, 0x04]);
    }

    #[test]
    fn test_decode_short_buffer() {
        assert!(Header::decode(&[0x01, 0x00]).is_none());
    }

    #[test]
    fn test_decode_reads_flags() {
        let header = Header::decode(&[0x02, 0, 0, 1, 0]).unwrap();
        assert!(header.is_response());
        assert!(!header.is_to_hub());
        assert_eq!(header.payload_length, 256);
    }

    #[test]
    fn test_validate_rejects_reserved_bits() {
        let header = Header::new(0b1000_0000, 0);
        let err = header.validate(DEFAULT_MAX_PAYLOAD_SIZE).unwrap_err();
        assert!(err.to_string().contains("Reserved"));
    }

    #[test]
    fn test_validate_rejects_oversize() {
        let header = Header::new(0, 11);
        assert!(header.validate(10).is_err());
        assert!(header.validate(11).is_ok());
    }
}
