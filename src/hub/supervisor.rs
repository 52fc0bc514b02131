//! Child process lifecycle: spawn, watch, respawn.
//!
//! Each child gets three tasks: a writer on its stdin, a reader on its stdout
//! that turns frames into [`HubEvent::Inbound`], and an exit watcher that
//! reports [`HubEvent::Exited`]. All bookkeeping happens in the hub loop,
//! one event at a time.

use std::collections::HashMap;
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;

use super::channels::ChannelTable;
use crate::connection::{ENV_CHANNEL, ENV_NAME, ENV_ROUTE_KEY};
use crate::error::{HubError, Result};
use crate::protocol::Message;
use crate::router::BoxFuture;
use crate::transport::MessageReader;
use crate::writer::{spawn_writer_task, WriterConfig, WriterHandle};

/// What to start on a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub channel: u32,
    /// Route key; `None` for plain workers.
    pub key: Option<String>,
    /// Executable to run; `None` re-executes the current binary.
    pub program: Option<PathBuf>,
    /// Environment name passed down to the child.
    pub env: String,
}

/// A started child: its pipes and a future resolving to its exit code.
pub struct Spawned {
    pub pid: Option<u32>,
    pub stdin: Box<dyn AsyncWrite + Send + Unpin>,
    pub stdout: Box<dyn AsyncRead + Send + Unpin>,
    pub exit: BoxFuture<'static, Option<i32>>,
}

/// Starts child processes. Must be called from within a tokio runtime.
pub trait Launcher: Send + Sync {
    fn launch(&self, spec: &LaunchSpec) -> Result<Spawned>;
}

/// Launches real OS processes.
///
/// Children without a program re-execute the current binary with the hub's
/// arguments; they find their role through the environment.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    args: Vec<OsString>,
}

impl Default for ProcessLauncher {
    fn default() -> Self {
        Self {
            args: std::env::args_os().skip(1).collect(),
        }
    }
}

impl ProcessLauncher {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Launcher for ProcessLauncher {
    fn launch(&self, spec: &LaunchSpec) -> Result<Spawned> {
        let channel = spec.channel;
        let spawn_err = |source: std::io::Error| HubError::Spawn { channel, source };

        let mut cmd = match &spec.program {
            Some(program) => tokio::process::Command::new(program),
            None => {
                let exe = std::env::current_exe().map_err(spawn_err)?;
                let mut cmd = tokio::process::Command::new(exe);
                cmd.args(&self.args);
                cmd
            }
        };

        cmd.env(ENV_CHANNEL, channel.to_string())
            .env(ENV_NAME, &spec.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        match &spec.key {
            Some(key) => cmd.env(ENV_ROUTE_KEY, key),
            None => cmd.env_remove(ENV_ROUTE_KEY),
        };

        let mut child = cmd.spawn().map_err(spawn_err)?;
        let missing = || spawn_err(std::io::Error::other("child pipe was not captured"));
        let stdin = child.stdin.take().ok_or_else(missing)?;
        let stdout = child.stdout.take().ok_or_else(missing)?;

        Ok(Spawned {
            pid: child.id(),
            stdin: Box::new(stdin),
            stdout: Box::new(stdout),
            exit: Box::pin(async move {
                match child.wait().await {
                    Ok(status) => status.code(),
                    Err(e) => {
                        tracing::warn!("Failed to wait for child: {}", e);
                        None
                    }
                }
            }),
        })
    }
}

/// Something happened to a child.
#[derive(Debug)]
pub enum HubEvent {
    Inbound { worker: u32, message: Message },
    Exited { worker: u32, status: Option<i32> },
}

struct WorkerEntry {
    spec: LaunchSpec,
    writer: WriterHandle,
    pid: Option<u32>,
}

/// Owns every child process and the channel table.
pub struct Supervisor {
    launcher: Arc<dyn Launcher>,
    events: mpsc::Sender<HubEvent>,
    channels: ChannelTable,
    workers: HashMap<u32, WorkerEntry>,
    next_id: u32,
    env: String,
    writer_config: WriterConfig,
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("channels", &self.channels)
            .field("next_id", &self.next_id)
            .finish()
    }
}

impl Supervisor {
    pub fn new(launcher: Arc<dyn Launcher>, events: mpsc::Sender<HubEvent>, env: String) -> Self {
        Self {
            launcher,
            events,
            channels: ChannelTable::new(),
            workers: HashMap::new(),
            next_id: 1,
            env,
            writer_config: WriterConfig::default(),
        }
    }

    pub fn channels(&self) -> &ChannelTable {
        &self.channels
    }

    pub fn channel_of(&self, worker: u32) -> Option<u32> {
        self.channels.channel_of(worker)
    }

    /// Writer of the live worker with this id.
    pub fn writer_of(&self, worker: u32) -> Option<WriterHandle> {
        self.workers.get(&worker).map(|w| w.writer.clone())
    }

    /// Writer of the worker currently serving `channel`.
    pub fn writer_on(&self, channel: u32) -> Option<WriterHandle> {
        self.channels
            .worker_on(channel)
            .and_then(|worker| self.writer_of(worker))
    }

    pub fn pid_of(&self, worker: u32) -> Option<u32> {
        self.workers.get(&worker).and_then(|w| w.pid)
    }

    /// Start a named route process on `channel`.
    pub fn spawn_route(&mut self, key: &str, channel: u32, program: Option<PathBuf>) -> Result<u32> {
        self.spawn(LaunchSpec {
            channel,
            key: Some(key.to_string()),
            program,
            env: self.env.clone(),
        })
    }

    /// Start a plain worker on `channel`.
    pub fn spawn_worker(&mut self, channel: u32, program: Option<PathBuf>) -> Result<u32> {
        self.spawn(LaunchSpec {
            channel,
            key: None,
            program,
            env: self.env.clone(),
        })
    }

    /// Start a child and bind it to its channel, replacing whatever was
    /// there. Worker ids are never reused.
    pub fn spawn(&mut self, spec: LaunchSpec) -> Result<u32> {
        let Spawned {
            pid,
            stdin,
            stdout,
            exit,
        } = self.launcher.launch(&spec)?;

        let worker = self.next_id;
        self.next_id += 1;

        let (writer, _writer_task) = spawn_writer_task(stdin, 0, self.writer_config.clone());

        let events = self.events.clone();
        tokio::spawn(async move {
            let mut reader = MessageReader::new(stdout);
            loop {
                match reader.next().await {
                    Ok(Some(message)) => {
                        if events.send(HubEvent::Inbound { worker, message }).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!(worker, "Stopped reading from worker: {}", e);
                        break;
                    }
                }
            }
        });

        let events = self.events.clone();
        tokio::spawn(async move {
            let status = exit.await;
            let _ = events.send(HubEvent::Exited { worker, status }).await;
        });

        if let Some(old) = self.channels.bind(spec.channel, worker) {
            self.workers.remove(&old);
        }
        tracing::info!(
            worker,
            channel = spec.channel,
            key = spec.key.as_deref().unwrap_or("worker"),
            pid = ?pid,
            "Spawned child"
        );
        self.workers.insert(worker, WorkerEntry { spec, writer, pid });

        Ok(worker)
    }

    /// React to a child's exit.
    ///
    /// Exits of replaced workers are ignored. Otherwise the child is
    /// replaced on the same channel when `respawn` is set; when it is not,
    /// the exit is fatal for the hub.
    pub fn handle_exit(&mut self, worker: u32, status: Option<i32>, respawn: bool) -> Result<()> {
        let channel = match self.channels.channel_of(worker) {
            Some(channel) => channel,
            None => {
                tracing::debug!(worker, "Ignoring exit of replaced worker");
                return Ok(());
            }
        };
        let spec = match self.workers.get(&worker) {
            Some(entry) => entry.spec.clone(),
            None => return Ok(()),
        };
        let who = spec.key.clone().unwrap_or_else(|| "worker".to_string());

        if !respawn {
            tracing::error!(worker, channel, key = %who, status = ?status, "Child died");
            self.channels.unbind_worker(worker);
            self.workers.remove(&worker);
            return Err(HubError::WorkerExited {
                worker,
                channel,
                key: spec.key,
            });
        }

        tracing::error!(worker, channel, key = %who, status = ?status, "Child died, respawning");
        match self.spawn(spec) {
            Ok(_) => Ok(()),
            Err(e) => {
                self.channels.unbind_worker(worker);
                self.workers.remove(&worker);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tokio::io::duplex;
    use tokio::sync::oneshot;

    /// Children that do nothing until told to exit.
    #[derive(Default)]
    struct IdleLauncher {
        kills: Mutex<Vec<oneshot::Sender<()>>>,
        specs: Mutex<Vec<LaunchSpec>>,
    }

    impl Launcher for IdleLauncher {
        fn launch(&self, spec: &LaunchSpec) -> Result<Spawned> {
            let (stdin, _child_in) = duplex(64);
            let (_child_out, stdout) = duplex(64);
            let (kill, killed) = oneshot::channel();
            self.kills.lock().unwrap().push(kill);
            self.specs.lock().unwrap().push(spec.clone());
            Ok(Spawned {
                pid: None,
                stdin: Box::new(stdin),
                stdout: Box::new(stdout),
                exit: Box::pin(async move {
                    let _ = killed.await;
                    Some(1)
                }),
            })
        }
    }

    fn supervisor() -> (Supervisor, Arc<IdleLauncher>, mpsc::Receiver<HubEvent>) {
        let launcher = Arc::new(IdleLauncher::default());
        let (tx, rx) = mpsc::channel(16);
        let sup = Supervisor::new(launcher.clone(), tx, "test".into());
        (sup, launcher, rx)
    }

    async fn next_exit(rx: &mut mpsc::Receiver<HubEvent>) -> (u32, Option<i32>) {
        loop {
            if let Some(HubEvent::Exited { worker, status }) = rx.recv().await {
                return (worker, status);
            }
        }
    }

    #[tokio::test]
    async fn test_spawn_binds_channels() {
        let (mut sup, launcher, _rx) = supervisor();
        let a = sup.spawn_route("priv1", 1, None).unwrap();
        let b = sup.spawn_worker(2, None).unwrap();

        assert_ne!(a, b);
        assert_eq!(sup.channel_of(a), Some(1));
        assert!(sup.writer_on(2).is_some());
        assert!(sup.writer_on(3).is_none());

        let specs = launcher.specs.lock().unwrap();
        assert_eq!(specs[0].key.as_deref(), Some("priv1"));
        assert_eq!(specs[1].key, None);
    }

    #[tokio::test]
    async fn test_respawn_replaces_worker() {
        let (mut sup, launcher, mut rx) = supervisor();
        let first = sup.spawn_route("priv1", 1, None).unwrap();

        let mut current = first;
        for round in 0..3 {
            let kill = launcher.kills.lock().unwrap().remove(0);
            let _ = kill.send(());
            let (worker, status) = next_exit(&mut rx).await;
            assert_eq!(worker, current);
            assert_eq!(status, Some(1));

            sup.handle_exit(worker, status, true).unwrap();

            let now = sup.channels().worker_on(1).unwrap();
            assert_ne!(now, current, "round {}", round);
            assert_eq!(sup.channels().len(), 1);
            assert!(sup.channels().is_consistent());
            assert!(sup.writer_of(current).is_none());
            current = now;
        }

        let specs = launcher.specs.lock().unwrap();
        assert!(specs.iter().all(|s| s.channel == 1 && s.key.as_deref() == Some("priv1")));
    }

    #[tokio::test]
    async fn test_exit_without_respawn_is_fatal() {
        let (mut sup, launcher, mut rx) = supervisor();
        let worker = sup.spawn_worker(4, None).unwrap();

        let kill = launcher.kills.lock().unwrap().remove(0);
        let _ = kill.send(());
        let (exited, status) = next_exit(&mut rx).await;

        let err = sup.handle_exit(exited, status, false).unwrap_err();
        assert!(matches!(
            err,
            HubError::WorkerExited { worker: w, channel: 4, key: None } if w == worker
        ));
        assert!(sup.channels().is_empty());
    }

    #[tokio::test]
    async fn test_stale_exit_ignored() {
        let (mut sup, _launcher, _rx) = supervisor();
        let old = sup.spawn_worker(2, None).unwrap();
        let new = sup.spawn_worker(2, None).unwrap();

        sup.handle_exit(old, None, false).unwrap();
        assert_eq!(sup.channels().worker_on(2), Some(new));
    }
}
