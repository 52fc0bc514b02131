//! Error codec: [`RouteError`] to a tagged JSON record and back.
//!
//! An encoded error is a JSON object carrying `name`, `message`, `stack`, the
//! tag `__error__: true`, and every custom field whose key does not collide
//! with those. Any value without a truthy tag decodes to itself.

use serde_json::{Map, Value};

use crate::error::RouteError;

/// Tag key marking an encoded error record.
pub const ERROR_TAG: &str = "__error__";

const NAME: &str = "name";
const MESSAGE: &str = "message";
const STACK: &str = "stack";

/// Result of decoding one payload value.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    /// The value was a tagged error record.
    Error(RouteError),
    /// Any other value, unchanged.
    Value(Value),
}

impl Decoded {
    pub fn is_error(&self) -> bool {
        matches!(self, Decoded::Error(_))
    }

    /// Turn the decoded value back into a plain payload value.
    pub fn into_value(self) -> Value {
        match self {
            Decoded::Error(err) => ErrorCodec::encode(&err),
            Decoded::Value(v) => v,
        }
    }
}

/// Pure encode/decode pair for transmissible errors.
pub struct ErrorCodec;

impl ErrorCodec {
    /// Project an error into a tagged record.
    pub fn encode(err: &RouteError) -> Value {
        let mut record = Map::new();
        record.insert(NAME.to_string(), Value::String(err.name.clone()));
        record.insert(MESSAGE.to_string(), Value::String(err.message.clone()));
        record.insert(
            STACK.to_string(),
            err.stack.clone().map(Value::String).unwrap_or(Value::Null),
        );
        record.insert(ERROR_TAG.to_string(), Value::Bool(true));

        for (key, value) in &err.fields {
            if !record.contains_key(key) {
                record.insert(key.clone(), value.clone());
            }
        }

        Value::Object(record)
    }

    /// Rebuild an error from a tagged record, or pass the value through.
    pub fn decode(value: Value) -> Decoded {
        let mut record = match value {
            Value::Object(map) if is_truthy(map.get(ERROR_TAG)) => map,
            other => return Decoded::Value(other),
        };

        let name = take_string(&mut record, NAME).unwrap_or_else(|| "Error".to_string());
        let message = take_string(&mut record, MESSAGE).unwrap_or_default();
        let stack = take_string(&mut record, STACK);
        record.remove(ERROR_TAG);

        Decoded::Error(RouteError {
            name,
            message,
            stack,
            fields: record,
        })
    }
}

fn take_string(record: &mut Map<String, Value>, key: &str) -> Option<String> {
    match record.remove(key) {
        Some(Value::String(s)) => Some(s),
        Some(Value::Null) | None => None,
        Some(other) => Some(other.to_string()),
    }
}

fn is_truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Some(Value::String(s)) => !s.is_empty(),
        Some(_) => true,
    }
}
