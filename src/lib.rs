//! # hubwire
//!
//! A process hub with a path-based middleware router.
//!
//! One binary runs in three roles. The **hub** starts child processes from a
//! route table and brokers requests between them; **routes** are named
//! children addressable by path (`priv1/...`); **workers** are a plain pool
//! that issue requests. Inside every child, a [`Router`] dispatches inbound
//! requests through ordered middleware, much like an HTTP router, but over
//! the child's stdin/stdout.
//!
//! ## Architecture
//!
//! - **Framing**: `[flags u8][len u32 BE]` + MsgPack payload per message
//! - **Routing**: [`Router`] / [`Route`] / [`Layer`] with `:name` and `*` patterns
//! - **Supervision**: [`hub::Supervisor`] spawns, watches and respawns children
//! - **Errors**: [`RouteError`] crosses processes through [`codec::ErrorCodec`]
//!
//! ## Example
//!
//! ```ignore
//! use hubwire::{App, Next, RouteEntry};
//! use serde_json::Value;
//!
//! #[tokio::main]
//! async fn main() -> hubwire::Result<()> {
//!     App::new()
//!         .entry("numbers", RouteEntry::setup(|conn| {
//!             conn.add("double/:num", |req| Box::pin(async move {
//!                 let n: i64 = req.param("num").and_then(|s| s.parse().ok()).unwrap_or(0);
//!                 let _ = req.send(vec![Value::Null, (n * 2).into()]).await;
//!                 Next::Halt
//!             }))?;
//!             Ok(())
//!         }))
//!         .worker(|conn| {
//!             let requester = conn.requester();
//!             tokio::spawn(async move {
//!                 let reply = requester.request("numbers/double/21", vec![]).await;
//!                 tracing::info!(?reply, "doubled");
//!             });
//!             Ok(())
//!         })
//!         .run()
//!         .await
//! }
//! ```

pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod hub;
pub mod logging;
pub mod protocol;
pub mod request;
pub mod router;
pub mod transport;
pub mod writer;

mod app;

pub use app::App;
pub use config::{HubConfig, Options, RouteEntry, RouteTable};
pub use connection::{Connection, Reply, Requester, Role};
pub use error::{HubError, Result, RouteError};
pub use hub::{ChannelTable, Hub, Launcher, ProcessLauncher};
pub use request::Request;
pub use router::{Completion, Layer, Next, Route, Router, RouterOptions};
