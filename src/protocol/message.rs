//! The message exchanged between processes.
//!
//! Requests carry a `path`; responses do not. A response may carry a
//! `channel` while it travels through the hub; the hub strips it before final
//! delivery.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Classification of an inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Request,
    Response,
}

/// A request or response on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Correlation key.
    pub key: String,
    /// Ordered payload values.
    #[serde(default)]
    pub load: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Return address (requests) or forwarding target (responses) for
    /// hub-mediated traffic.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<u32>,
}

impl Message {
    /// A request as issued by its originator.
    pub fn request(key: impl Into<String>, path: impl Into<String>, load: Vec<Value>) -> Self {
        Self {
            key: key.into(),
            load,
            path: Some(path.into()),
            channel: None,
        }
    }

    /// A request forwarded by the hub, carrying the requester's channel.
    pub fn forwarded(
        key: impl Into<String>,
        path: impl Into<String>,
        load: Vec<Value>,
        channel: Option<u32>,
    ) -> Self {
        Self {
            channel,
            ..Self::request(key, path, load)
        }
    }

    pub fn response(key: impl Into<String>, channel: Option<u32>, load: Vec<Value>) -> Self {
        Self {
            key: key.into(),
            load,
            path: None,
            channel,
        }
    }

    /// Requests have a path, everything else is a response.
    pub fn classify(&self) -> MessageKind {
        if self.path.is_some() {
            MessageKind::Request
        } else {
            MessageKind::Response
        }
    }

    #[inline]
    pub fn is_request(&self) -> bool {
        self.classify() == MessageKind::Request
    }

    /// Remove and return the forwarding channel.
    pub fn strip_channel(&mut self) -> Option<u32> {
        self.channel.take()
    }
}
