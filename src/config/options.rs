//! Dotted-path option store.

use serde_json::{Map, Value};

/// Free-form options addressed by dotted paths (`"db.pool.size"`).
///
/// Intermediate objects are created on demand. A `null` or non-object value
/// on the way to a key blocks the write.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Options {
    root: Map<String, Value>,
}

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a value. `null` reads as absent.
    pub fn get(&self, path: &str) -> Option<&Value> {
        let mut keys = path.split('.');
        let first = keys.next()?;
        let mut cur = self.root.get(first)?;
        for key in keys {
            cur = cur.as_object()?.get(key)?;
        }
        if cur.is_null() {
            None
        } else {
            Some(cur)
        }
    }

    pub fn get_str(&self, path: &str) -> Option<&str> {
        self.get(path).and_then(Value::as_str)
    }

    /// Set a value, replacing any existing one.
    pub fn set(&mut self, path: &str, value: impl Into<Value>) -> &mut Self {
        self.write(path, value.into(), true);
        self
    }

    /// Set a value only if none is present.
    pub fn set_default(&mut self, path: &str, value: impl Into<Value>) -> &mut Self {
        self.write(path, value.into(), false);
        self
    }

    pub fn enable(&mut self, path: &str) -> &mut Self {
        self.set(path, true)
    }

    pub fn disable(&mut self, path: &str) -> &mut Self {
        self.set(path, false)
    }

    /// The value at `path` is truthy.
    pub fn enabled(&self, path: &str) -> bool {
        self.get(path).map(truthy).unwrap_or(false)
    }

    pub fn disabled(&self, path: &str) -> bool {
        !self.enabled(path)
    }

    /// Set every top-level key of `values`; keys may themselves be dotted.
    pub fn merge(&mut self, values: &Map<String, Value>, overwrite: bool) -> &mut Self {
        for (path, value) in values {
            self.write(path, value.clone(), overwrite);
        }
        self
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.root
    }

    fn write(&mut self, path: &str, value: Value, overwrite: bool) {
        let (parents, last) = match path.rsplit_once('.') {
            Some((parents, last)) => (Some(parents), last),
            None => (None, path),
        };

        let mut obj = &mut self.root;
        if let Some(parents) = parents {
            for key in parents.split('.') {
                let slot = obj
                    .entry(key.to_string())
                    .or_insert_with(|| Value::Object(Map::new()));
                obj = match slot {
                    Value::Object(map) => map,
                    _ => return,
                };
            }
        }

        let absent = obj.get(last).map(Value::is_null).unwrap_or(true);
        if overwrite || absent {
            obj.insert(last.to_string(), value);
        }
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}
