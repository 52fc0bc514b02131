//! Configuration: hub settings, the option store and the route table.

mod options;
mod routes;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

pub use options::Options;
pub use routes::{
    extend_path, is_reserved, RouteEntry, RouteTable, SetupFn, DEFAULT_ROUTE, RESERVED, WORKER,
};

/// Environment name that silences unhandled-error printing.
pub const TEST_ENV: &str = "test";

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation failed: {0}")]
    Invalid(String),
}

/// Settings shared by the hub and every child it starts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HubConfig {
    /// Base directory for relative program paths.
    pub module_root: PathBuf,
    /// Environment name; `"test"` silences unhandled-error printing.
    pub env: String,
    /// Directory to scan for the route table.
    pub routes_dir: Option<PathBuf>,
    /// Replace crashed children instead of shutting the hub down.
    pub respawn: bool,
    /// Plain worker count; defaults to the host's parallelism.
    pub count: Option<usize>,
    pub case_sensitive: bool,
    pub strict: bool,
    pub merge_params: bool,
    /// Free-form values seeded into every process's option store.
    pub vars: Map<String, Value>,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            module_root: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            env: std::env::var("HUBWIRE_ENV").unwrap_or_else(|_| "development".to_string()),
            routes_dir: None,
            respawn: false,
            count: None,
            case_sensitive: true,
            strict: false,
            merge_params: true,
            vars: Map::new(),
        }
    }
}

impl HubConfig {
    /// Load and validate configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: HubConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.count == Some(0) {
            return Err(ConfigError::Invalid("count must be at least 1".into()));
        }
        if self.env.is_empty() {
            return Err(ConfigError::Invalid("env must not be empty".into()));
        }
        if let Some(key) = self.vars.keys().find(|k| k.is_empty() || k.split('.').any(str::is_empty)) {
            return Err(ConfigError::Invalid(format!("invalid option key {:?}", key)));
        }
        Ok(())
    }

    /// Number of plain workers to start.
    pub fn worker_count(&self) -> usize {
        self.count.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
    }

    pub fn is_test(&self) -> bool {
        self.env == TEST_ENV
    }

    /// The routes directory, resolved against the module root.
    pub fn routes_path(&self) -> Option<PathBuf> {
        self.routes_dir
            .as_ref()
            .map(|dir| extend_path(&self.module_root, [dir]))
    }

    /// Seed an option store: free-form vars first, then the typed settings.
    pub fn to_options(&self) -> Options {
        let mut options = Options::new();
        options.merge(&self.vars, true);
        options
            .set("module_root", self.module_root.to_string_lossy().into_owned())
            .set("env", self.env.clone())
            .set("respawn", self.respawn)
            .set("case_sensitive", self.case_sensitive)
            .set("strict", self.strict)
            .set("merge_params", self.merge_params);
        options
    }
}
