//! Application entry point.
//!
//! The same binary runs as hub, route or worker. Build an [`App`] the same
//! way in every role and call [`App::run`]; the environment decides which
//! role this process plays.
//!
//! ```ignore
//! #[tokio::main]
//! async fn main() -> hubwire::Result<()> {
//!     hubwire::App::new()
//!         .worker(|conn| {
//!             let requester = conn.requester();
//!             tokio::spawn(async move {
//!                 let reply = requester.request("priv1/path", vec![]).await;
//!                 tracing::info!(?reply, "priv1 answered");
//!             });
//!             Ok(())
//!         })
//!         .entry("priv1", RouteEntry::setup(|conn| {
//!             conn.add("path", |req| Box::pin(async move {
//!                 let _ = req.send(vec![Value::Null, "pon".into()]).await;
//!                 Next::Halt
//!             }))?;
//!             Ok(())
//!         }))
//!         .run()
//!         .await
//! }
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::Value;

use crate::config::{HubConfig, RouteEntry, RouteTable, DEFAULT_ROUTE, WORKER};
use crate::connection::{Connection, Role};
use crate::error::Result;
use crate::hub::{Hub, Launcher, ProcessLauncher};
use crate::logging::{self, LogConfig};

/// Builder for a hub topology.
#[derive(Debug, Default)]
pub struct App {
    config: HubConfig,
    table: RouteTable,
    log: Option<LogConfig>,
}

impl App {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the configuration. Keeps options set earlier with [`App::set`].
    pub fn config(mut self, config: HubConfig) -> Self {
        let vars = std::mem::take(&mut self.config.vars);
        self.config = config;
        for (key, value) in vars {
            self.config.vars.entry(key).or_insert(value);
        }
        self
    }

    /// Seed an option into every process's store.
    pub fn set(mut self, path: &str, value: impl Into<Value>) -> Self {
        self.config.vars.insert(path.to_string(), value.into());
        self
    }

    pub fn logging(mut self, log: LogConfig) -> Self {
        self.log = Some(log);
        self
    }

    /// Setup for the default route.
    pub fn route<F>(self, f: F) -> Self
    where
        F: Fn(&mut Connection) -> Result<()> + Send + Sync + 'static,
    {
        self.entry(DEFAULT_ROUTE, RouteEntry::setup(f))
    }

    /// Setup for the plain workers.
    pub fn worker<F>(self, f: F) -> Self
    where
        F: Fn(&mut Connection) -> Result<()> + Send + Sync + 'static,
    {
        self.entry(WORKER, RouteEntry::setup(f))
    }

    pub fn entry(mut self, key: &str, entry: RouteEntry) -> Self {
        self.table.insert(key, entry);
        self
    }

    /// Run `key` as a separate executable.
    pub fn program(self, key: &str, path: impl Into<PathBuf>) -> Self {
        self.entry(key, RouteEntry::Program(path.into()))
    }

    /// Scan a directory for route programs. Explicit entries win over
    /// scanned ones.
    pub fn routes_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.routes_dir = Some(dir.into());
        self
    }

    /// The effective route table.
    pub fn route_table(&self) -> Result<RouteTable> {
        let mut table = match self.config.routes_path() {
            Some(dir) => RouteTable::scan(&dir)?,
            None => RouteTable::new(),
        };
        for key in self.table.keys() {
            if let Some(entry) = self.table.get(key) {
                table.insert(key, entry.clone());
            }
        }
        Ok(table)
    }

    /// Enter this process's role and run until it ends.
    pub async fn run(self) -> Result<()> {
        self.run_with(Arc::new(ProcessLauncher::new())).await
    }

    /// Like [`App::run`], with a custom launcher for the hub.
    pub async fn run_with(self, launcher: Arc<dyn Launcher>) -> Result<()> {
        logging::init(self.log.clone().unwrap_or_default().with_env_overrides());

        let table = self.route_table()?;
        match Role::from_env()? {
            Role::Hub => Hub::start(self.config, table, launcher)?.run().await,
            role => {
                let mut conn = Connection::new(role, &self.config);
                conn.install(&table)?;
                conn.serve_stdio().await
            }
        }
    }
}
