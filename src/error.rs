//! Error types for hubwire.
//!
//! Two kinds of error live here:
//!
//! - [`HubError`] - failures of the machinery itself (I/O, framing, spawning,
//!   configuration). These are returned to the embedding program.
//! - [`RouteError`] - the error value raised by handlers and carried across
//!   process boundaries inside a response payload (see [`crate::codec::ErrorCodec`]).

use std::any::Any;

use serde_json::{Map, Value};
use thiserror::Error;

use crate::config::ConfigError;

/// Main error type for all hubwire operations.
#[derive(Debug, Error)]
pub enum HubError {
    /// I/O error on a process pipe.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// MsgPack serialization error.
    #[error("MsgPack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    /// MsgPack deserialization error.
    #[error("MsgPack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),

    /// Protocol error (invalid frame, wrong flags, etc.).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Connection closed unexpectedly.
    #[error("Connection closed")]
    ConnectionClosed,

    /// The process environment contract was violated.
    #[error("invalid environment variable {var}: {message}")]
    Env {
        var: &'static str,
        message: String,
    },

    /// Configuration could not be loaded or is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A path template could not be compiled.
    #[error("invalid path template {template:?}: {source}")]
    Pattern {
        template: String,
        #[source]
        source: regex::Error,
    },

    /// The route table is unusable.
    #[error("route table error: {0}")]
    RouteTable(String),

    /// A child process could not be started.
    #[error("failed to spawn process for channel {channel}: {source}")]
    Spawn {
        channel: u32,
        #[source]
        source: std::io::Error,
    },

    /// A child exited while respawn is disabled. The hub cannot continue.
    #[error("worker {worker} on channel {channel} exited and respawn is disabled")]
    WorkerExited {
        worker: u32,
        channel: u32,
        key: Option<String>,
    },
}

/// Result type alias using HubError.
pub type Result<T> = std::result::Result<T, HubError>;

/// An error raised while routing a request.
///
/// Carries a name, a message, optional stack text and arbitrary extra fields
/// (for example `status`). It is the only error shape that travels between
/// processes.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{name}: {message}")]
pub struct RouteError {
    pub name: String,
    pub message: String,
    pub stack: Option<String>,
    pub fields: Map<String, Value>,
}

impl RouteError {
    /// Create an error named `Error`.
    pub fn new(message: impl Into<String>) -> Self {
        Self::named("Error", message)
    }

    /// Create an error with an explicit name.
    pub fn named(name: impl Into<String>, message: impl Into<String>) -> Self {
        let name = name.into();
        let message = message.into();
        let stack = Some(format!("{}: {}", name, message));
        Self {
            name,
            message,
            stack,
            fields: Map::new(),
        }
    }

    /// Attach an extra field.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Set the `status` and `statusCode` fields.
    pub fn with_status(self, status: u16) -> Self {
        self.with_field("status", status).with_field("statusCode", status)
    }

    /// Look up an extra field.
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// The request reached no handler.
    pub fn not_found(path: &str) -> Self {
        Self::new(format!("Cannot find {}", path))
    }

    /// A path parameter could not be percent-decoded.
    pub fn decode_param(raw: &str) -> Self {
        Self::named("URIError", format!("Failed to decode param '{}'", raw)).with_status(400)
    }

    /// A handler panicked.
    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "handler panicked".to_string()
        };
        Self::named("Panic", message)
    }
}

impl From<HubError> for RouteError {
    fn from(err: HubError) -> Self {
        Self::named("HubError", err.to_string())
    }
}
