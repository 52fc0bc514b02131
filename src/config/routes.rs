//! The route table: which processes the hub starts and what each one runs.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::connection::Connection;
use crate::error::{HubError, Result};

/// Key of the default route, which receives requests no other key claims.
pub const DEFAULT_ROUTE: &str = "route";
/// Key of the plain worker pool.
pub const WORKER: &str = "worker";
/// Keys that name infrastructure and can never be forwarding targets.
pub const RESERVED: [&str; 3] = [DEFAULT_ROUTE, WORKER, "index"];

/// Wiring code run inside a child process before it starts serving.
pub type SetupFn = dyn Fn(&mut Connection) -> Result<()> + Send + Sync;

/// What a route table key runs.
#[derive(Clone)]
pub enum RouteEntry {
    /// Run in a re-executed copy of the current binary.
    Setup(Arc<SetupFn>),
    /// Launch this executable.
    Program(PathBuf),
    /// Apply option overrides, then run the inner entry.
    Nested {
        options: Map<String, Value>,
        entry: Box<RouteEntry>,
    },
}

impl fmt::Debug for RouteEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouteEntry::Setup(_) => f.write_str("Setup"),
            RouteEntry::Program(path) => f.debug_tuple("Program").field(path).finish(),
            RouteEntry::Nested { options, entry } => f
                .debug_struct("Nested")
                .field("options", options)
                .field("entry", entry)
                .finish(),
        }
    }
}

impl RouteEntry {
    pub fn setup<F>(f: F) -> Self
    where
        F: Fn(&mut Connection) -> Result<()> + Send + Sync + 'static,
    {
        RouteEntry::Setup(Arc::new(f))
    }

    /// The innermost entry, with the option overrides met on the way.
    pub fn resolve(&self) -> (&RouteEntry, Vec<&Map<String, Value>>) {
        let mut overrides = Vec::new();
        let mut cur = self;
        while let RouteEntry::Nested { options, entry } = cur {
            overrides.push(options);
            cur = &**entry;
        }
        (cur, overrides)
    }

    /// Executable to launch, if this entry is not run by the current binary.
    pub fn program(&self) -> Option<&Path> {
        match self.resolve().0 {
            RouteEntry::Program(path) => Some(path),
            _ => None,
        }
    }
}

/// Ordered mapping from key to entry.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    entries: Vec<(String, RouteEntry)>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace an entry. Replacing keeps the original position.
    pub fn insert(&mut self, key: impl Into<String>, entry: RouteEntry) -> &mut Self {
        let key = key.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = entry,
            None => self.entries.push((key, entry)),
        }
        self
    }

    pub fn get(&self, key: &str) -> Option<&RouteEntry> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, e)| e)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn has_default_route(&self) -> bool {
        self.get(DEFAULT_ROUTE).is_some()
    }

    pub fn has_worker(&self) -> bool {
        self.get(WORKER).is_some()
    }

    /// Keys that get their own channel and can be addressed by path, in
    /// table order.
    pub fn forwardable_keys(&self) -> Vec<&str> {
        self.keys().filter(|k| !is_reserved(k)).collect()
    }

    /// Resolve every relative program path against `root`.
    pub fn resolve_programs(&mut self, root: &Path) {
        for (_, entry) in &mut self.entries {
            resolve_program(entry, root);
        }
    }

    /// Build a table from a directory.
    ///
    /// Each subdirectory `<name>` maps to the program `<dir>/<name>/index`;
    /// each file with no extension or an `exe` extension maps to itself under
    /// its stem. Anything else is ignored. Keys come out sorted.
    pub fn scan(dir: &Path) -> Result<Self> {
        let read = std::fs::read_dir(dir).map_err(|e| {
            HubError::RouteTable(format!("cannot read routes dir {}: {}", dir.display(), e))
        })?;

        let mut found: Vec<(String, PathBuf)> = Vec::new();
        for item in read {
            let item = item?;
            let path = item.path();
            let file_type = item.file_type()?;

            if file_type.is_dir() {
                if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                    found.push((name.to_string(), path.join("index")));
                }
                continue;
            }

            let launchable = match path.extension().and_then(|e| e.to_str()) {
                None => true,
                Some(ext) => ext.eq_ignore_ascii_case("exe"),
            };
            if !launchable {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                found.push((stem.to_string(), path.clone()));
            }
        }

        found.sort_by(|a, b| a.0.cmp(&b.0));
        tracing::debug!(dir = %dir.display(), keys = found.len(), "Scanned routes dir");

        let mut table = Self::new();
        for (key, path) in found {
            table.insert(key, RouteEntry::Program(path));
        }
        Ok(table)
    }
}

/// `key` names infrastructure, not a forwarding target.
pub fn is_reserved(key: &str) -> bool {
    RESERVED.contains(&key)
}

/// Resolve `parts` against `root`, the way relative route paths are.
pub fn extend_path<I, P>(root: &Path, parts: I) -> PathBuf
where
    I: IntoIterator<Item = P>,
    P: AsRef<Path>,
{
    let mut out = root.to_path_buf();
    for part in parts {
        // an absolute part replaces everything before it
        out.push(part);
    }
    out
}

fn resolve_program(entry: &mut RouteEntry, root: &Path) {
    match entry {
        RouteEntry::Program(path) if path.is_relative() => {
            *path = extend_path(root, [path.as_path()]);
        }
        RouteEntry::Nested { entry, .. } => resolve_program(entry, root),
        _ => {}
    }
}
