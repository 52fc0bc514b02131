//! MsgPack codec using `rmp-serde`.
//!
//! Always encodes with `to_vec_named` so structs become maps with field names.
//! Message payloads are dynamic (`serde_json::Value`), and a map keeps
//! `{key, load, path}` readable by any peer regardless of field order.

use crate::error::Result;

/// MessagePack codec for message payloads.
pub struct MsgPackCodec;

impl MsgPackCodec {
    /// Encode a value to MsgPack bytes (struct-as-map).
    ///
    /// # Errors
    ///
    /// Returns error if the value cannot be serialized.
    #[inline]
    pub fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(value)?)
    }

    /// Decode MsgPack bytes to a value.
    ///
    /// # Errors
    ///
    /// Returns error if the bytes cannot be deserialized to type T.
    #[inline]
    pub fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use serde_json::{json, Value};

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct Envelope {
        key: String,
        load: Vec<Value>,
    }

    #[test]
    fn test_encode_decode_dynamic_load() {
        let original = Envelope {
            key: "pin".to_string(),
            load: vec![json!(null), json!("pon"), json!({"a": [1, 2, 3]}), json!(-7)],
        };

        let encoded = MsgPackCodec::encode(&original).unwrap();
        let decoded: Envelope = MsgPackCodec::decode(&encoded).unwrap();

        assert_eq!(decoded, original);
    }

    #[test]
    fn test_to_vec_named_produces_map_format() {
        let envelope = Envelope {
            key: "k".to_string(),
            load: vec![],
        };

        let encoded = MsgPackCodec::encode(&envelope).unwrap();

        // fixmap with 2 entries, not fixarray
        assert_eq!(encoded[0], 0x82, "Expected fixmap, got {:02X}", encoded[0]);
    }

    #[test]
    fn test_decode_error_on_invalid_data() {
        let invalid = b"not valid msgpack";
        let result: Result<Envelope> = MsgPackCodec::decode(invalid);
        assert!(result.is_err());
    }

    #[test]
    fn test_floats_survive_as_json_numbers() {
        let encoded = MsgPackCodec::encode(&json!(2.5)).unwrap();
        let decoded: Value = MsgPackCodec::decode(&encoded).unwrap();
        assert_eq!(decoded, json!(2.5));
    }
}
