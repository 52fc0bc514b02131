//! The per-process side of a hub topology.
//!
//! Every child process (a named route or a plain worker) owns one
//! [`Connection`]: an option store, an optional [`Router`] for inbound
//! requests, and a [`Requester`] for outbound ones. The hub has its own
//! connection-like state in [`crate::hub`].

mod incoming;
mod requester;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;

use crate::config::{HubConfig, Options, RouteTable, WORKER};
use crate::error::{HubError, Result, RouteError};
use crate::protocol::flags;
use crate::request::Request;
use crate::router::{BoxFuture, Next, Route, Router, RouterOptions};
use crate::writer::{OutboundFrame, WriterConfig, WriterHandle};

pub use incoming::finish;
pub use requester::{PendingTable, Reply, Requester};

/// Channel number of a child process (integer).
pub const ENV_CHANNEL: &str = "HUBWIRE_CHANNEL";
/// Route key of a named route process.
pub const ENV_ROUTE_KEY: &str = "HUBWIRE_ROUTE_KEY";
/// Environment name handed from the hub to its children.
pub const ENV_NAME: &str = "HUBWIRE_ENV";

/// What this process is within the topology.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Role {
    /// The supervising process.
    Hub,
    /// A named, addressable process.
    Route { channel: u32, key: String },
    /// A plain pool worker.
    Worker { channel: u32 },
}

impl Role {
    /// Determine the role from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_vars(
            std::env::var(ENV_CHANNEL).ok(),
            std::env::var(ENV_ROUTE_KEY).ok(),
        )
    }

    pub fn from_vars(channel: Option<String>, key: Option<String>) -> Result<Self> {
        let channel = match channel {
            None => return Ok(Role::Hub),
            Some(raw) => raw.trim().parse::<u32>().map_err(|e| HubError::Env {
                var: ENV_CHANNEL,
                message: format!("{:?} is not a channel number: {}", raw, e),
            })?,
        };

        Ok(match key {
            Some(key) if !key.is_empty() => Role::Route { channel, key },
            _ => Role::Worker { channel },
        })
    }

    pub fn channel(&self) -> Option<u32> {
        match self {
            Role::Hub => None,
            Role::Route { channel, .. } | Role::Worker { channel } => Some(*channel),
        }
    }

    /// The route table key this process runs.
    pub fn key(&self) -> Option<&str> {
        match self {
            Role::Hub => None,
            Role::Route { key, .. } => Some(key),
            Role::Worker { .. } => Some(WORKER),
        }
    }
}

/// A child process's connection to the hub.
///
/// Setup code wires the router through the builder methods; once
/// [`Connection::serve`] runs, the router is frozen.
pub struct Connection {
    role: Role,
    options: Options,
    router: Option<Router>,
    requester: Requester,
    outbound: Option<mpsc::Receiver<OutboundFrame>>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("role", &self.role)
            .field("router", &self.router)
            .finish()
    }
}

impl Connection {
    /// A connection for `role`, seeded from `config`.
    pub fn new(role: Role, config: &HubConfig) -> Self {
        let (writer, outbound) =
            WriterHandle::channel(WriterConfig::default().channel_capacity, flags::TO_HUB);
        Self {
            role,
            options: config.to_options(),
            router: None,
            requester: Requester::new(writer),
            outbound: Some(outbound),
        }
    }

    pub fn role(&self) -> &Role {
        &self.role
    }

    pub fn channel(&self) -> Option<u32> {
        self.role.channel()
    }

    pub fn key(&self) -> Option<&str> {
        self.role.key()
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn options_mut(&mut self) -> &mut Options {
        &mut self.options
    }

    /// Shorthand for `options_mut().set(..)`, chainable.
    pub fn set(&mut self, path: &str, value: impl Into<serde_json::Value>) -> &mut Self {
        self.options.set(path, value);
        self
    }

    pub fn env(&self) -> &str {
        self.options.get_str("env").unwrap_or("development")
    }

    /// Resolve `parts` against the module root.
    pub fn extend_path<I, P>(&self, parts: I) -> std::path::PathBuf
    where
        I: IntoIterator<Item = P>,
        P: AsRef<std::path::Path>,
    {
        let root = self.options.get_str("module_root").unwrap_or(".");
        crate::config::extend_path(std::path::Path::new(root), parts)
    }

    /// A handle for sending requests; clone it into handlers and tasks.
    pub fn requester(&self) -> Requester {
        self.requester.clone()
    }

    /// Router options as currently configured.
    pub fn router_options(&self) -> RouterOptions {
        RouterOptions {
            case_sensitive: self.options.enabled("case_sensitive"),
            strict: self.options.enabled("strict"),
            merge_params: self.options.enabled("merge_params"),
        }
    }

    /// The router, created on first use from the current options.
    pub fn router(&mut self) -> &mut Router {
        let options = self.router_options();
        self.router.get_or_insert_with(|| Router::new(options))
    }

    pub fn use_fn<F>(&mut self, path: &str, f: F) -> Result<&mut Self>
    where
        F: for<'a> Fn(&'a mut Request) -> BoxFuture<'a, Next> + Send + Sync + 'static,
    {
        tracing::debug!(path, "Using path");
        self.router().use_fn(path, f)?;
        Ok(self)
    }

    pub fn use_error<F>(&mut self, path: &str, f: F) -> Result<&mut Self>
    where
        F: for<'a> Fn(RouteError, &'a mut Request) -> BoxFuture<'a, Next> + Send + Sync + 'static,
    {
        self.router().use_error(path, f)?;
        Ok(self)
    }

    pub fn use_router(&mut self, path: &str, router: Router) -> Result<&mut Self> {
        self.router().use_router(path, router)?;
        Ok(self)
    }

    pub fn route(&mut self, path: &str) -> Result<&mut Route> {
        self.router().route(path)
    }

    pub fn add<F>(&mut self, path: &str, f: F) -> Result<&mut Self>
    where
        F: for<'a> Fn(&'a mut Request) -> BoxFuture<'a, Next> + Send + Sync + 'static,
    {
        tracing::debug!(path, "Adding path");
        self.router().add(path, f)?;
        Ok(self)
    }

    pub fn param<F>(&mut self, name: &str, f: F) -> &mut Self
    where
        F: for<'a> Fn(&'a mut Request, String) -> BoxFuture<'a, Next> + Send + Sync + 'static,
    {
        tracing::debug!(name, "Adding param");
        self.router().param(name, f);
        self
    }

    /// A fresh router using this connection's options, for mounting.
    pub fn new_router(&self) -> Router {
        Router::new(self.router_options())
    }

    /// Apply this process's route table entry: option overrides first, then
    /// its setup function. Entries that name a program belong to another
    /// binary and are an error here.
    pub fn install(&mut self, table: &RouteTable) -> Result<()> {
        let key = match self.key() {
            Some(key) => key.to_string(),
            None => return Err(HubError::RouteTable("the hub has no route entry".into())),
        };
        let entry = table
            .get(&key)
            .ok_or_else(|| HubError::RouteTable(format!("no entry for key {:?}", key)))?;

        let (inner, overrides) = entry.resolve();
        for options in overrides {
            self.options.merge(options, true);
        }

        match inner {
            crate::config::RouteEntry::Setup(setup) => {
                tracing::debug!(key = %key, "Running setup");
                setup(self)
            }
            other => Err(HubError::RouteTable(format!(
                "entry {:?} is not runnable in this binary: {:?}",
                key, other
            ))),
        }
    }

    /// Serve requests from the hub until it closes the pipe.
    pub async fn serve<R, W>(mut self, reader: R, writer: W) -> Result<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let outbound = self.outbound.take().ok_or(HubError::ConnectionClosed)?;
        let _writer_task = crate::writer::attach_writer(self.requester.writer(), outbound, writer);

        let env = self.env().to_string();
        let result = incoming::serve(
            self.role.clone(),
            self.router.take(),
            self.requester.clone(),
            env,
            reader,
        )
        .await;

        // callers still waiting on the hub will never hear back
        self.requester.close();
        result
    }

    /// Serve over this process's stdin/stdout.
    pub async fn serve_stdio(self) -> Result<()> {
        let io = crate::transport::stdio();
        self.serve(io.reader, io.writer).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RouteEntry;

    #[test]
    fn test_role_from_vars() {
        assert_eq!(Role::from_vars(None, None).unwrap(), Role::Hub);
        assert_eq!(
            Role::from_vars(Some("3".into()), None).unwrap(),
            Role::Worker { channel: 3 }
        );
        assert_eq!(
            Role::from_vars(Some("1".into()), Some("priv1".into())).unwrap(),
            Role::Route {
                channel: 1,
                key: "priv1".into()
            }
        );
        assert!(matches!(
            Role::from_vars(Some("one".into()), None),
            Err(HubError::Env { var: ENV_CHANNEL, .. })
        ));
    }

    #[test]
    fn test_worker_role_uses_worker_key() {
        let role = Role::Worker { channel: 5 };
        assert_eq!(role.key(), Some("worker"));
        assert_eq!(role.channel(), Some(5));
    }

    #[test]
    fn test_install_applies_nested_options() {
        let mut table = RouteTable::new();
        table.insert(
            "priv1",
            RouteEntry::Nested {
                options: serde_json::json!({"strict": true}).as_object().unwrap().clone(),
                entry: Box::new(RouteEntry::setup(|conn| {
                    conn.set("installed", true);
                    Ok(())
                })),
            },
        );

        let role = Role::Route {
            channel: 1,
            key: "priv1".into(),
        };
        let mut conn = Connection::new(role, &HubConfig::default());
        conn.install(&table).unwrap();

        assert!(conn.options().enabled("installed"));
        assert!(conn.router_options().strict);
    }

    #[test]
    fn test_install_missing_entry_fails() {
        let mut conn = Connection::new(Role::Worker { channel: 2 }, &HubConfig::default());
        let err = conn.install(&RouteTable::new()).unwrap_err();
        assert!(matches!(err, HubError::RouteTable(_)));
    }

    #[test]
    fn test_router_created_lazily_from_options() {
        let mut config = HubConfig::default();
        config.case_sensitive = false;
        let mut conn = Connection::new(Role::Worker { channel: 2 }, &config);

        assert!(!conn.router().options().case_sensitive);
        conn.add("a", |_req| Box::pin(async move { Next::Halt })).unwrap();
        assert_eq!(conn.router().len(), 1);
    }
}
