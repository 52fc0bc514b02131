//! The hub: supervises children and brokers requests between them.
//!
//! ```text
//!   worker ──request "priv1/path"──► hub router ":key/*"
//!                                      │ key known?  ──► priv1's channel (path "path")
//!                                      │ default?    ──► route's channel (full path)
//!                                      └ otherwise   ──► "Cannot find priv1/path"
//!   priv1 ──response {channel}────► hub ──strip channel──► worker
//! ```

mod channels;
mod supervisor;

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};

use crate::config::{HubConfig, RouteTable, DEFAULT_ROUTE};
use crate::connection::finish;
use crate::error::{HubError, Result};
use crate::protocol::{Message, MessageKind};
use crate::request::Request;
use crate::router::{Next, Router, RouterOptions};

pub use channels::ChannelTable;
pub use supervisor::{HubEvent, LaunchSpec, Launcher, ProcessLauncher, Spawned, Supervisor};

/// Capacity of the hub's event queue.
const EVENT_CAPACITY: usize = 1024;

/// Where keys live. Fixed once the hub has started.
#[derive(Debug)]
struct Routing {
    keys: HashMap<String, u32>,
    default: Option<u32>,
    case_sensitive: bool,
}

impl Routing {
    fn normalize(&self, key: &str) -> String {
        if self.case_sensitive {
            key.to_string()
        } else {
            key.to_lowercase()
        }
    }

    fn channel_for(&self, key: &str) -> Option<u32> {
        self.keys.get(&self.normalize(key)).copied()
    }

    /// Bind `key` to `channel`. Fails if another key already normalizes to
    /// the same name.
    fn insert(&mut self, key: &str, channel: u32) -> Result<()> {
        let normalized = self.normalize(key);
        if self.keys.contains_key(&normalized) {
            return Err(HubError::RouteTable(format!(
                "route key {:?} collides with another key when case is ignored",
                key
            )));
        }
        self.keys.insert(normalized, channel);
        Ok(())
    }
}

/// A cheap handle for inspecting a running hub.
#[derive(Debug, Clone)]
pub struct HubHandle {
    supervisor: Arc<RwLock<Supervisor>>,
}

impl HubHandle {
    /// A copy of the current channel table.
    pub async fn channels(&self) -> ChannelTable {
        self.supervisor.read().await.channels().clone()
    }

    pub async fn worker_on(&self, channel: u32) -> Option<u32> {
        self.supervisor.read().await.channels().worker_on(channel)
    }
}

/// The supervising process.
pub struct Hub {
    config: HubConfig,
    supervisor: Arc<RwLock<Supervisor>>,
    events: mpsc::Receiver<HubEvent>,
    router: Arc<Router>,
}

impl std::fmt::Debug for Hub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hub")
            .field("config", &self.config)
            .field("router", &self.router)
            .finish()
    }
}

impl Hub {
    /// Build the hub router and start every child in the table.
    ///
    /// Channels: the default route on 0, forwardable keys on 1..=n in table
    /// order, then the worker pool.
    pub fn start(config: HubConfig, mut table: RouteTable, launcher: Arc<dyn Launcher>) -> Result<Self> {
        config.validate()?;
        table.resolve_programs(&config.module_root);
        tracing::debug!("Starting hub");

        let (tx, events) = mpsc::channel(EVENT_CAPACITY);
        let mut supervisor = Supervisor::new(launcher, tx, config.env.clone());

        let mut routing = Routing {
            keys: HashMap::new(),
            default: None,
            case_sensitive: config.case_sensitive,
        };

        let program_of = |key: &str| table.get(key).and_then(|e| e.program()).map(|p| p.to_path_buf());

        // keys take channels 1..=n whether or not a default route exists
        let keys = table.forwardable_keys();
        for (channel, key) in (1..).zip(keys.iter()) {
            routing.insert(key, channel)?;
        }

        let mut counter = 0;
        if table.has_default_route() {
            tracing::debug!("Dispatching default route");
            supervisor.spawn_route(DEFAULT_ROUTE, counter, program_of(DEFAULT_ROUTE))?;
            routing.default = Some(counter);
        }

        tracing::debug!("Dispatching {} special route(s)", keys.len());
        for key in keys {
            counter += 1;
            supervisor.spawn_route(key, counter, program_of(key))?;
        }

        if table.has_worker() {
            let count = config.worker_count();
            tracing::debug!("Dispatching {} normal worker(s)", count);
            for _ in 0..count {
                counter += 1;
                supervisor.spawn_worker(counter, program_of(crate::config::WORKER))?;
            }
        }

        let supervisor = Arc::new(RwLock::new(supervisor));
        let router = hub_router(&config, Arc::new(routing), supervisor.clone())?;

        tracing::debug!("Started hub");
        Ok(Self {
            config,
            supervisor,
            events,
            router: Arc::new(router),
        })
    }

    pub fn handle(&self) -> HubHandle {
        HubHandle {
            supervisor: self.supervisor.clone(),
        }
    }

    /// Process child events until a fatal exit.
    ///
    /// Returns [`crate::HubError::WorkerExited`] when a child dies and
    /// respawn is disabled.
    pub async fn run(mut self) -> Result<()> {
        while let Some(event) = self.events.recv().await {
            match event {
                HubEvent::Inbound { worker, message } => self.on_message(worker, message).await,
                HubEvent::Exited { worker, status } => {
                    self.supervisor
                        .write()
                        .await
                        .handle_exit(worker, status, self.config.respawn)?;
                }
            }
        }
        Ok(())
    }

    async fn on_message(&self, worker: u32, mut message: Message) {
        let (origin, writer) = {
            let sup = self.supervisor.read().await;
            match (sup.channel_of(worker), sup.writer_of(worker)) {
                (Some(channel), Some(writer)) => (channel, writer),
                _ => {
                    tracing::warn!(worker, key = %message.key, "Dropping message from replaced worker");
                    return;
                }
            }
        };

        match message.classify() {
            MessageKind::Request => {
                let mut req = match Request::from_message(message, writer) {
                    Some(req) => req.with_origin(Some(origin)),
                    None => return,
                };
                tracing::debug!(key = req.key(), channel = origin, "Hub got a request");

                // handled in line so forwarding keeps each sender's order
                let completion = self.router.handle(&mut req).await;
                finish(&req, completion, &self.config.env).await;
            }
            MessageKind::Response => match message.strip_channel() {
                Some(channel) => {
                    let target = self.supervisor.read().await.writer_on(channel);
                    tracing::debug!(key = %message.key, channel, "Forwarding response");
                    let sent = match target {
                        Some(target) => target.send_message(&message).await.is_ok(),
                        None => false,
                    };
                    if !sent {
                        tracing::warn!(key = %message.key, channel, "Lost response, channel has no live worker");
                    }
                }
                None => tracing::warn!(key = %message.key, "Lost response without a channel"),
            },
        }
    }
}

/// The hub's own router: a single `:key/*` route that forwards by key, then
/// a catch-all that hands anything else to the default route.
fn hub_router(
    config: &HubConfig,
    routing: Arc<Routing>,
    supervisor: Arc<RwLock<Supervisor>>,
) -> Result<Router> {
    let mut router = Router::new(RouterOptions {
        case_sensitive: config.case_sensitive,
        strict: false,
        merge_params: config.merge_params,
    });

    let check_routing = routing.clone();
    let check_supervisor = supervisor.clone();
    let default_routing = routing.clone();
    let default_supervisor = supervisor.clone();
    let fallback_routing = routing;
    let fallback_supervisor = supervisor;

    router
        .route(":key/*")?
        .handle(move |req| {
            let routing = check_routing.clone();
            let supervisor = check_supervisor.clone();
            Box::pin(async move { check_for_key(&routing, &supervisor, req).await })
        })
        .handle(move |req| {
            let routing = default_routing.clone();
            let supervisor = default_supervisor.clone();
            Box::pin(async move { send_to_default(&routing, &supervisor, req).await })
        });

    router.use_fn("/", move |req| {
        let routing = fallback_routing.clone();
        let supervisor = fallback_supervisor.clone();
        Box::pin(async move { send_to_default(&routing, &supervisor, req).await })
    })?;

    Ok(router)
}

async fn check_for_key(routing: &Routing, supervisor: &RwLock<Supervisor>, req: &mut Request) -> Next {
    let key = match req.param("key") {
        Some(key) => key.to_string(),
        None => return Next::Continue,
    };
    let channel = match routing.channel_for(&key) {
        Some(channel) => channel,
        None => return Next::Continue,
    };

    let rest = req.param(0).unwrap_or_default().to_string();
    forward(supervisor, req, channel, rest, &key).await;
    Next::Halt
}

async fn send_to_default(routing: &Routing, supervisor: &RwLock<Supervisor>, req: &mut Request) -> Next {
    match routing.default {
        Some(channel) => {
            let path = req.original_path().to_string();
            forward(supervisor, req, channel, path, DEFAULT_ROUTE).await;
            Next::Halt
        }
        None => Next::Continue,
    }
}

/// Claim the request and pass it to `channel`, with the requester's channel
/// as return address. A dead target drops the request.
async fn forward(
    supervisor: &RwLock<Supervisor>,
    req: &mut Request,
    channel: u32,
    path: String,
    key: &str,
) {
    if !req.mark_sent() {
        return;
    }
    tracing::debug!(key = req.key(), channel, target = key, "Forwarding request");

    let load = std::mem::take(&mut req.load);
    let message = Message::forwarded(req.key().to_string(), path, load, req.origin());
    let target = supervisor.read().await.writer_on(channel);
    let delivered = match target {
        Some(target) => target.send_message(&message).await.is_ok(),
        None => false,
    };
    if !delivered {
        tracing::warn!(key = req.key(), channel, "Dropping request, channel has no live worker");
    }
}
