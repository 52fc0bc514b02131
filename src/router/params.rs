//! Captured path parameters.

use std::collections::BTreeMap;
use std::fmt;

/// Parameter name: a template name (`:num`) or the position of an unnamed
/// capture (`*`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ParamKey {
    Index(usize),
    Name(String),
}

impl fmt::Display for ParamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamKey::Index(i) => write!(f, "{}", i),
            ParamKey::Name(n) => f.write_str(n),
        }
    }
}

impl From<&str> for ParamKey {
    fn from(name: &str) -> Self {
        ParamKey::Name(name.to_string())
    }
}

impl From<usize> for ParamKey {
    fn from(index: usize) -> Self {
        ParamKey::Index(index)
    }
}

/// Decoded parameter values. A key may be present with no value when an
/// optional capture did not participate in the match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params(BTreeMap<ParamKey, Option<String>>);

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    /// Value of a parameter, if present and defined.
    pub fn get(&self, key: impl Into<ParamKey>) -> Option<&str> {
        self.0.get(&key.into()).and_then(|v| v.as_deref())
    }

    pub fn contains(&self, key: &ParamKey) -> bool {
        self.0.contains_key(key)
    }

    pub fn insert(&mut self, key: impl Into<ParamKey>, value: Option<String>) {
        self.0.insert(key.into(), value);
    }

    /// Record a capture: a defined value always wins, an undefined one only
    /// fills an empty slot.
    pub(crate) fn capture(&mut self, key: ParamKey, value: Option<String>) {
        if value.is_some() || !self.0.contains_key(&key) {
            self.0.insert(key, value);
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ParamKey, Option<&str>)> {
        self.0.iter().map(|(k, v)| (k, v.as_deref()))
    }

    /// Number of consecutive indexed entries starting at 0.
    fn indexed_run(&self) -> usize {
        let mut n = 0;
        while self.0.contains_key(&ParamKey::Index(n)) {
            n += 1;
        }
        n
    }

    /// Merge `self` (the child's captures) over `parent`.
    ///
    /// Child values win. When both sides carry positional captures, the
    /// child's are shifted past the parent's so neither set is overwritten.
    pub fn merged_over(mut self, parent: &Params) -> Params {
        let mut out = parent.clone();

        if self.contains(&ParamKey::Index(0)) && parent.contains(&ParamKey::Index(0)) {
            let offset = parent.indexed_run();
            let count = self.indexed_run();
            for i in (0..count).rev() {
                if let Some(value) = self.0.remove(&ParamKey::Index(i)) {
                    self.0.insert(ParamKey::Index(i + offset), value);
                }
            }
        }

        out.0.extend(self.0);
        out
    }
}
