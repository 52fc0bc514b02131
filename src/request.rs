//! The unit of work handed to routers and handlers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::Value;

use crate::codec::ErrorCodec;
use crate::error::{Result, RouteError};
use crate::protocol::Message;
use crate::router::{ParamKey, Params};
use crate::writer::WriterHandle;

/// An inbound request being routed.
///
/// `path` shrinks as mounted routers consume prefixes; `base_path` grows by
/// the same amount, and `original_path` never changes. The first call to
/// [`Request::send`] answers the request; later calls do nothing.
#[derive(Debug)]
pub struct Request {
    key: String,
    channel: Option<u32>,
    origin: Option<u32>,
    pub path: String,
    original_path: String,
    pub base_path: String,
    pub params: Params,
    pub load: Vec<Value>,
    sent: Arc<AtomicBool>,
    reply: WriterHandle,
}

impl Request {
    /// Create a request whose answer is written to `reply`.
    pub fn new(
        key: impl Into<String>,
        path: impl Into<String>,
        load: Vec<Value>,
        reply: WriterHandle,
    ) -> Self {
        let path = path.into();
        Self {
            key: key.into(),
            channel: None,
            origin: None,
            original_path: path.clone(),
            path,
            base_path: String::new(),
            params: Params::new(),
            load,
            sent: Arc::new(AtomicBool::new(false)),
            reply,
        }
    }

    /// Build a request from an inbound request message. Returns `None` for
    /// responses.
    pub fn from_message(message: Message, reply: WriterHandle) -> Option<Self> {
        let path = message.path?;
        let mut req = Self::new(message.key, path, message.load, reply);
        req.channel = message.channel;
        Some(req)
    }

    /// Set the channel of the process this request arrived from (hub only).
    pub fn with_origin(mut self, origin: Option<u32>) -> Self {
        self.origin = origin;
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Return address carried by a hub-forwarded request.
    pub fn channel(&self) -> Option<u32> {
        self.channel
    }

    /// Channel of the process that sent this request to the hub.
    pub fn origin(&self) -> Option<u32> {
        self.origin
    }

    pub fn original_path(&self) -> &str {
        &self.original_path
    }

    /// Shorthand for `params.get(name)`.
    pub fn param(&self, key: impl Into<ParamKey>) -> Option<&str> {
        self.params.get(key)
    }

    pub fn is_sent(&self) -> bool {
        self.sent.load(Ordering::Acquire)
    }

    /// Claim the request without answering it here (it was forwarded).
    /// Returns `false` if it had already been claimed.
    pub fn mark_sent(&self) -> bool {
        !self.sent.swap(true, Ordering::AcqRel)
    }

    /// Answer the request with the given payload values.
    ///
    /// Only the first call writes a message. By convention the first value is
    /// an error slot (`null` on success).
    pub async fn send(&self, load: Vec<Value>) -> Result<()> {
        if !self.mark_sent() {
            tracing::debug!(key = %self.key, "Ignoring repeated send");
            return Ok(());
        }
        let message = Message::response(self.key.clone(), self.channel, load);
        self.reply.send_message(&message).await
    }

    /// Answer the request with an encoded error as the only value.
    pub async fn send_error(&self, err: &RouteError) -> Result<()> {
        self.send(vec![ErrorCodec::encode(err)]).await
    }
}
