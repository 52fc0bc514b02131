//! Transport module - reading messages off a process pipe.
//!
//! The hub talks to each child over the child's stdin/stdout. Children use
//! [`stdio`] to get both ends; the hub gets them from the spawned process.
//! Logs always go to stderr.

mod stdio;

use std::collections::VecDeque;

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::Result;
use crate::protocol::{FrameBuffer, Message};

pub use stdio::{stdio, Stdio};

/// Read buffer size per `read` call.
const READ_CHUNK: usize = 64 * 1024;

/// Pulls whole [`Message`]s out of a byte stream.
pub struct MessageReader<R> {
    reader: R,
    frames: FrameBuffer,
    buf: Vec<u8>,
    ready: VecDeque<Message>,
}

impl<R: AsyncRead + Unpin> MessageReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            frames: FrameBuffer::new(),
            buf: vec![0u8; READ_CHUNK],
            ready: VecDeque::new(),
        }
    }

    /// Next message, or `None` once the peer closed the pipe.
    ///
    /// A frame whose payload does not decode is logged and skipped; a broken
    /// header is an error because the stream can no longer be resynchronised.
    pub async fn next(&mut self) -> Result<Option<Message>> {
        loop {
            if let Some(message) = self.ready.pop_front() {
                return Ok(Some(message));
            }

            let n = self.reader.read(&mut self.buf).await?;
            if n == 0 {
                return Ok(None);
            }

            for frame in self.frames.push(&self.buf[..n])? {
                match frame.message() {
                    Ok(message) => self.ready.push_back(message),
                    Err(e) => tracing::warn!("Dropping undecodable frame: {}", e),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{build_frame, encode_message, flags, Header};
    use serde_json::json;
    use tokio::io::{duplex, AsyncWriteExt};

    #[tokio::test]
    async fn test_reads_messages_in_order() {
        let (mut tx, rx) = duplex(4096);
        let mut reader = MessageReader::new(rx);

        let first = Message::request("a", "x", vec![json!(1)]);
        let second = Message::response("a", None, vec![json!(2)]);
        let mut bytes = encode_message(&first, flags::TO_HUB).unwrap();
        bytes.extend(encode_message(&second, flags::TO_HUB).unwrap());
        tx.write_all(&bytes).await.unwrap();
        drop(tx);

        assert_eq!(reader.next().await.unwrap(), Some(first));
        assert_eq!(reader.next().await.unwrap(), Some(second));
        assert_eq!(reader.next().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_skips_garbage_payload() {
        let (mut tx, rx) = duplex(4096);
        let mut reader = MessageReader::new(rx);

        let good = Message::response("ok", None, vec![]);
        let mut bytes = build_frame(&Header::new(0, 3), b"\xc1\xc1\xc1");
        bytes.extend(encode_message(&good, 0).unwrap());
        tx.write_all(&bytes).await.unwrap();
        drop(tx);

        assert_eq!(reader.next().await.unwrap(), Some(good));
    }
}
