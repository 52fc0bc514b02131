//! Codec module - payload serialization and error marshaling.
//!
//! - [`MsgPackCodec`] - MessagePack using `rmp-serde` (`to_vec_named`)
//! - [`ErrorCodec`] - [`crate::RouteError`] to a tagged record and back
//!
//! Codecs are marker structs with static methods rather than trait objects.
//!
//! # Example
//!
//! ```
//! use hubwire::codec::{Decoded, ErrorCodec};
//! use hubwire::RouteError;
//!
//! let record = ErrorCodec::encode(&RouteError::new("nope"));
//! assert!(matches!(ErrorCodec::decode(record), Decoded::Error(e) if e.message == "nope"));
//! ```

mod error;
mod msgpack;

pub use error::{Decoded, ErrorCodec, ERROR_TAG};
pub use msgpack::MsgPackCodec;
