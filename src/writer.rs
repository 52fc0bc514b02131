//! Dedicated writer task for one process pipe.
//!
//! Every pipe (a child's stdout seen from the child, or a child's stdin seen
//! from the hub) has exactly one writer task fed by an mpsc channel. Handlers,
//! the dispatch loop and the supervisor hold cheap [`WriterHandle`] clones.
//!
//! ```text
//! Request::send ─┐
//! forwarding    ─┼─► mpsc::Sender<OutboundFrame> ─► Writer Task ─► Pipe
//! Requester     ─┘
//! ```
//!
//! Frames queued from one sender are written in order, which gives the
//! per-sender ordering guarantee between two processes.

use std::io::IoSlice;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::codec::MsgPackCodec;
use crate::error::{HubError, Result};
use crate::protocol::{encode_message_parts, Header, Message, HEADER_SIZE};

/// Default channel capacity.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Maximum frames to batch in a single write operation.
const MAX_BATCH_SIZE: usize = 64;

/// A frame ready to be written to the pipe.
#[derive(Debug)]
pub struct OutboundFrame {
    pub header: [u8; HEADER_SIZE],
    pub payload: Bytes,
}

impl OutboundFrame {
    #[inline]
    pub fn new(header: &Header, payload: Bytes) -> Self {
        Self {
            header: header.encode(),
            payload,
        }
    }

    /// Total size of this frame (header + payload).
    #[inline]
    pub fn size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }

    /// Decode the payload back into a message.
    pub fn message(&self) -> Result<Message> {
        MsgPackCodec::decode(&self.payload)
    }
}

/// Configuration for the writer task.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Channel capacity for frame queue.
    pub channel_capacity: usize,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

/// Handle for sending messages to one pipe.
#[derive(Clone)]
pub struct WriterHandle {
    tx: mpsc::Sender<OutboundFrame>,
    /// Frames queued but not yet written.
    pending: Arc<AtomicUsize>,
    /// `flags::TO_HUB` for child processes, `0` for the hub.
    direction: u8,
}

impl std::fmt::Debug for WriterHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriterHandle")
            .field("direction", &self.direction)
            .field("pending", &self.pending_count())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl WriterHandle {
    fn new(tx: mpsc::Sender<OutboundFrame>, pending: Arc<AtomicUsize>, direction: u8) -> Self {
        Self {
            tx,
            pending,
            direction,
        }
    }

    /// A handle whose frames land in the returned receiver instead of a pipe.
    pub fn channel(capacity: usize, direction: u8) -> (Self, mpsc::Receiver<OutboundFrame>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx, Arc::new(AtomicUsize::new(0)), direction), rx)
    }

    /// Send a raw frame to the writer task.
    pub async fn send(&self, frame: OutboundFrame) -> Result<()> {
        self.pending.fetch_add(1, Ordering::AcqRel);

        self.tx.send(frame).await.map_err(|_| {
            self.pending.fetch_sub(1, Ordering::Release);
            HubError::ConnectionClosed
        })
    }

    /// Encode and send a message.
    pub async fn send_message(&self, message: &Message) -> Result<()> {
        let (header, payload) = encode_message_parts(message, self.direction)?;
        self.send(OutboundFrame::new(&header, payload)).await
    }

    /// Get current pending frame count.
    #[inline]
    pub fn pending_count(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// The writer task is gone (pipe closed or process dead).
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Spawn the writer task and return a handle for sending frames.
///
/// The returned `JoinHandle` resolves when every handle is dropped or the
/// pipe fails.
pub fn spawn_writer_task<W>(
    writer: W,
    direction: u8,
    config: WriterConfig,
) -> (WriterHandle, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(config.channel_capacity);
    let pending = Arc::new(AtomicUsize::new(0));

    let handle = WriterHandle::new(tx, pending.clone(), direction);
    let task = tokio::spawn(writer_loop(rx, writer, pending));

    (handle, task)
}

/// Start draining a queue created with [`WriterHandle::channel`] into a pipe.
///
/// Lets a handle be given out before the pipe exists.
pub fn attach_writer<W>(
    handle: &WriterHandle,
    rx: mpsc::Receiver<OutboundFrame>,
    writer: W,
) -> JoinHandle<Result<()>>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(writer_loop(rx, writer, handle.pending.clone()))
}

async fn writer_loop<W>(
    mut rx: mpsc::Receiver<OutboundFrame>,
    mut writer: W,
    pending: Arc<AtomicUsize>,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    loop {
        let first = match rx.recv().await {
            Some(f) => f,
            None => return Ok(()),
        };

        // Collect additional ready frames (non-blocking)
        let mut batch = Vec::with_capacity(MAX_BATCH_SIZE);
        batch.push(first);

        while batch.len() < MAX_BATCH_SIZE {
            match rx.try_recv() {
                Ok(frame) => batch.push(frame),
                Err(_) => break,
            }
        }

        let batch_size = batch.len();
        let result = write_batch(&mut writer, &batch).await;
        pending.fetch_sub(batch_size, Ordering::Release);
        result?;
    }
}

/// Write a batch of frames using scatter/gather I/O (write_vectored).
async fn write_batch<W>(writer: &mut W, batch: &[OutboundFrame]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    if batch.is_empty() {
        return Ok(());
    }

    let total_size: usize = batch.iter().map(|f| f.size()).sum();
    let mut total_written = 0;

    while total_written < total_size {
        let slices = build_remaining_slices(batch, total_written);
        let written = writer.write_vectored(&slices).await?;
        if written == 0 {
            return Err(HubError::Io(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "write_vectored returned 0",
            )));
        }
        total_written += written;
    }

    writer.flush().await?;
    Ok(())
}

/// Build IoSlice array for the data not yet written.
fn build_remaining_slices(batch: &[OutboundFrame], skip_bytes: usize) -> Vec<IoSlice<'_>> {
    let mut slices = Vec::with_capacity(batch.len() * 2);
    let mut offset = 0;

    for frame in batch {
        let header_end = offset + HEADER_SIZE;
        if skip_bytes < header_end {
            let start = skip_bytes.saturating_sub(offset);
            slices.push(IoSlice::new(&frame.header[start..]));
        }
        offset = header_end;

        if !frame.payload.is_empty() {
            let payload_end = offset + frame.payload.len();
            if skip_bytes < payload_end {
                let start = skip_bytes.saturating_sub(offset);
                slices.push(IoSlice::new(&frame.payload[start..]));
            }
            offset = payload_end;
        }
    }

    slices
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{flags, FrameBuffer};
    use serde_json::json;
    use std::io::Cursor;
    use tokio::io::{duplex, AsyncReadExt};

    fn frame(payload: &'static [u8]) -> OutboundFrame {
        OutboundFrame::new(&Header::new(0, payload.len() as u32), Bytes::from_static(payload))
    }

    #[tokio::test]
    async fn test_send_message_reaches_pipe() {
        let (client, mut server) = duplex(4096);
        let (handle, _task) = spawn_writer_task(client, flags::TO_HUB, WriterConfig::default());

        let msg = Message::response("pin", None, vec![json!(null), json!("pon")]);
        handle.send_message(&msg).await.unwrap();

        let mut buf = vec![0u8; 256];
        let n = server.read(&mut buf).await.unwrap();

        let mut frames = FrameBuffer::new();
        let parsed = frames.push(&buf[..n]).unwrap();
        assert_eq!(parsed.len(), 1);
        assert!(parsed[0].header.is_to_hub());
        assert_eq!(parsed[0].message().unwrap(), msg);
    }

    #[tokio::test]
    async fn test_channel_handle_captures_frames() {
        let (handle, mut rx) = WriterHandle::channel(4, 0);
        let msg = Message::request("k", "a/b", vec![]);
        handle.send_message(&msg).await.unwrap();

        let frame = rx.recv().await.unwrap();
        assert_eq!(frame.message().unwrap(), msg);
        assert_eq!(handle.pending_count(), 1);
    }

    #[tokio::test]
    async fn test_send_after_close_fails() {
        let (handle, rx) = WriterHandle::channel(4, 0);
        drop(rx);

        assert!(handle.is_closed());
        let result = handle.send(frame(b"x")).await;
        assert!(matches!(result, Err(HubError::ConnectionClosed)));
        assert_eq!(handle.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_attach_writer_drains_early_frames() {
        let (handle, rx) = WriterHandle::channel(4, flags::TO_HUB);
        let msg = Message::request("early", "a", vec![]);
        handle.send_message(&msg).await.unwrap();

        let (client, mut server) = duplex(4096);
        let _task = attach_writer(&handle, rx, client);

        let mut buf = vec![0u8; 256];
        let n = server.read(&mut buf).await.unwrap();
        let parsed = FrameBuffer::new().push(&buf[..n]).unwrap();
        assert_eq!(parsed[0].message().unwrap(), msg);
    }

    #[test]
    fn test_build_remaining_slices_partial_header() {
        let batch = vec![frame(b"hello")];

        let slices = build_remaining_slices(&batch, 2);
        assert_eq!(slices.len(), 2);
        assert_eq!(slices[0].len(), HEADER_SIZE - 2);
        assert_eq!(slices[1].len(), 5);
    }

    #[test]
    fn test_build_remaining_slices_skip_header() {
        let batch = vec![frame(b"hello")];

        let slices = build_remaining_slices(&batch, HEADER_SIZE);
        assert_eq!(slices.len(), 1);
        assert_eq!(slices[0].len(), 5);
    }

    #[tokio::test]
    async fn test_write_batch_multiple() {
        let mut buf = Cursor::new(Vec::new());
        let batch: Vec<_> = (0..5).map(|_| frame(b"abc")).collect();

        write_batch(&mut buf, &batch).await.unwrap();

        assert_eq!(buf.into_inner().len(), 5 * (HEADER_SIZE + 3));
    }

    #[tokio::test]
    async fn test_writer_shutdown_on_channel_close() {
        let (client, _server) = duplex(4096);
        let (handle, task) = spawn_writer_task(client, 0, WriterConfig::default());

        drop(handle);

        assert!(task.await.unwrap().is_ok());
    }
}
