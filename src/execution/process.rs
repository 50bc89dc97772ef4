//! # Process strategy, worker broker and the host's process pool.
//!
//! Process services run in a worker process: the configured [`WorkerCommand`] (by default
//! the current executable) re-entering through
//! [`run_worker_if_requested`](crate::run_worker_if_requested).
//!
//! ```text
//! host                                           worker process
//! ────                                           ──────────────
//! ProcessPool::bind   (broker on 127.0.0.1:0)
//! spawn_worker ── spawn(env: broker, token, id) ─► run_worker_if_requested
//!      accept  ◄────────── hello {token, id} ──── connect
//!      Link::open                                 │
//! start ─────── bootstrap {manifest, wait} ─────► Link::open, ServiceRunner
//!      ◄════════ frames (supervisor ⇄ service) ══►
//! ProcessTask::join ◄──────── exit status ─────── exit
//! ```
//!
//! ## Rules
//! - A connection presenting the wrong token or service id is dropped and the host keeps
//!   waiting until `connect_timeout`.
//! - Workers are killed when their handle is dropped (grace exceeded, launch failure).
//! - A worker whose connection ends without a final `stopped` (exit, kill, OOM) is reported
//!   `stopped` to its supervisor by the link; it is not restarted.
//! - The broker is closed only when the pool is released after drain.

use std::{
    collections::HashMap,
    io::{BufRead, BufReader},
    net::{SocketAddr, TcpStream},
    process::Stdio,
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::{
    net::TcpListener,
    process::{Child, Command},
    sync::{OwnedSemaphorePermit, Semaphore},
    time::Instant,
};
use tracing::{debug, warn};

use crate::config::{HostConfig, WorkerCommand};
use crate::error::{RuntimeError, TaskError};
use crate::messaging::{Channel, Content, LINK_SENDER, Link, Message, QueueKind};
use crate::services::{Manifest, ServiceDescriptor, ServiceId};

use super::{ExecutionStrategy, Executors, Launch, ServiceTask, worker};

/// Lines exchanged before a link carries frames.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum Handshake {
    /// Worker → host, first line on the connection.
    Hello { token: String, service_id: ServiceId },
    /// Host → worker, what to run.
    Bootstrap { manifest: Manifest, receive_timeout_ms: u64 },
}

impl Handshake {
    pub(crate) fn to_json_line(&self) -> Result<String, serde_json::Error> {
        let json = serde_json::to_string(self)?;
        Ok(format!("{json}\n"))
    }

    pub(crate) fn from_json_line(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line.trim())
    }
}

/// A worker that said hello but has not been bootstrapped yet.
struct PendingWorker {
    child: Child,
    link: Arc<Link>,
    permit: OwnedSemaphorePermit,
}

/// Fixed-size pool of worker processes plus the broker they connect back to.
pub(crate) struct ProcessPool {
    capacity: usize,
    permits: Arc<Semaphore>,
    broker: TcpListener,
    addr: SocketAddr,
    token: String,
    command: WorkerCommand,
    connect_timeout: Duration,
    receive_timeout: Duration,
    pending: HashMap<ServiceId, PendingWorker>,
}

impl ProcessPool {
    pub(crate) async fn bind(capacity: usize, cfg: &HostConfig) -> Result<Self, RuntimeError> {
        let broker = TcpListener::bind(("127.0.0.1", 0)).await?;
        let addr = broker.local_addr()?;
        debug!(%addr, capacity, "worker broker listening");
        Ok(Self {
            capacity,
            permits: Arc::new(Semaphore::new(capacity)),
            broker,
            addr,
            token: uuid::Uuid::new_v4().to_string(),
            command: cfg.worker.clone(),
            connect_timeout: cfg.connect_timeout,
            receive_timeout: cfg.receive_timeout_clamped(),
            pending: HashMap::new(),
        })
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    pub(crate) fn in_use(&self) -> usize {
        self.capacity.saturating_sub(self.permits.available_permits())
    }

    /// Launches the worker of `descriptor` and waits for its hello.
    pub(crate) async fn spawn_worker(&mut self, descriptor: &ServiceDescriptor) -> Result<Arc<Link>, RuntimeError> {
        let permit = Arc::clone(&self.permits)
            .try_acquire_owned()
            .map_err(|_| RuntimeError::PoolExhausted {
                pool: "process",
                capacity: self.capacity,
            })?;

        let id = descriptor.id().clone();
        let mut cmd = Command::new(self.command.program()?);
        cmd.args(&self.command.args)
            .env(worker::ENV_BROKER, self.addr.to_string())
            .env(worker::ENV_TOKEN, &self.token)
            .env(worker::ENV_SERVICE, id.as_str())
            .stdin(Stdio::null())
            .kill_on_drop(true);
        if let Some(dir) = descriptor.root_directory() {
            cmd.current_dir(dir);
        }
        let mut child = cmd.spawn()?;
        debug!(service_id = %id, pid = child.id(), "worker process spawned");

        let reader = match self.accept(&id).await {
            Ok(r) => r,
            Err(e) => {
                let _ = child.start_kill();
                return Err(e);
            }
        };
        // A worker that vanishes without saying `stopped` is reported stopped locally.
        let link = Link::open(
            reader,
            id.to_string(),
            self.receive_timeout,
            Some((QueueKind::ServiceToSupervisor, Message::new(LINK_SENDER, Content::Stopped))),
        )?;
        self.pending.insert(
            id,
            PendingWorker {
                child,
                link: Arc::clone(&link),
                permit,
            },
        );
        Ok(link)
    }

    async fn accept(&self, id: &ServiceId) -> Result<BufReader<TcpStream>, RuntimeError> {
        let deadline = Instant::now() + self.connect_timeout;
        loop {
            let (stream, peer) = tokio::time::timeout_at(deadline, self.broker.accept())
                .await
                .map_err(|_| handshake_error(id, "worker did not connect in time"))??;

            let stream = stream.into_std()?;
            stream.set_nonblocking(false)?;
            stream.set_read_timeout(Some(deadline.saturating_duration_since(Instant::now()).max(Duration::from_millis(1))))?;

            let token = self.token.clone();
            let expected = id.clone();
            let verdict = tokio::task::spawn_blocking(move || read_hello(stream, &token, &expected))
                .await
                .map_err(|e| handshake_error(id, &e.to_string()))?;
            match verdict {
                Ok(reader) => {
                    reader.get_ref().set_read_timeout(None)?;
                    return Ok(reader);
                }
                Err(reason) => warn!(service_id = %id, %peer, %reason, "rejected worker connection"),
            }
        }
    }

    /// Sends the bootstrap line to a pending worker and hands out its task.
    pub(crate) fn start(&mut self, descriptor: &ServiceDescriptor) -> Result<ProcessTask, RuntimeError> {
        let id = descriptor.id();
        let pending = self
            .pending
            .remove(id)
            .ok_or_else(|| handshake_error(id, "no pending worker"))?;
        let bootstrap = Handshake::Bootstrap {
            manifest: descriptor.manifest().clone(),
            receive_timeout_ms: self.receive_timeout.as_millis().min(u128::from(u64::MAX)) as u64,
        };
        let line = bootstrap
            .to_json_line()
            .map_err(|e| handshake_error(id, &e.to_string()))?;
        pending
            .link
            .write_line(&line)
            .map_err(|e| handshake_error(id, &e.to_string()))?;
        Ok(ProcessTask {
            child: pending.child,
            link: pending.link,
            _permit: pending.permit,
        })
    }

    /// Closes the broker; any worker that never got bootstrapped is killed.
    pub(crate) fn close(self) {
        for (id, mut pending) in self.pending {
            warn!(service_id = %id, "killing worker that was never started");
            let _ = pending.child.start_kill();
            pending.link.close();
        }
        if self.capacity > 0 && self.permits.available_permits() < self.capacity {
            warn!(
                in_use = self.capacity - self.permits.available_permits(),
                "process pool released with live workers"
            );
        }
        self.permits.close();
        drop(self.broker);
    }
}

fn read_hello(stream: TcpStream, token: &str, expected: &ServiceId) -> Result<BufReader<TcpStream>, String> {
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    match reader.read_line(&mut line) {
        Ok(0) => return Err("connection closed before hello".to_string()),
        Ok(_) => {}
        Err(e) => return Err(format!("reading hello: {e}")),
    }
    match Handshake::from_json_line(&line) {
        Ok(Handshake::Hello { token: t, service_id }) if t == token && &service_id == expected => Ok(reader),
        Ok(Handshake::Hello { service_id, .. }) => Err(format!("unexpected hello from {service_id}")),
        Ok(other) => Err(format!("unexpected handshake {other:?}")),
        Err(e) => Err(format!("malformed hello: {e}")),
    }
}

fn handshake_error(id: &ServiceId, reason: &str) -> RuntimeError {
    RuntimeError::WorkerHandshake {
        service: id.to_string(),
        reason: reason.to_string(),
    }
}

/// Handle on one worker process.
pub(crate) struct ProcessTask {
    child: Child,
    link: Arc<Link>,
    _permit: OwnedSemaphorePermit,
}

impl ProcessTask {
    /// Waits for the worker to exit. Dropping the future kills the worker.
    pub(crate) async fn join(mut self) -> Result<(), TaskError> {
        let status = self.child.wait().await;
        let link = Arc::clone(&self.link);
        let _ = tokio::task::spawn_blocking(move || link.close()).await;
        match status {
            Ok(s) if s.success() => Ok(()),
            Ok(s) => Err(TaskError::Exited { code: s.code() }),
            Err(e) => Err(TaskError::Lost { reason: e.to_string() }),
        }
    }
}

/// `process-sync` / `process-async`; the worker picks its driver from the manifest.
pub(crate) struct ProcessStrategy;

#[async_trait]
impl ExecutionStrategy for ProcessStrategy {
    async fn open_channel(
        &self,
        executors: &mut Executors,
        descriptor: &ServiceDescriptor,
        cfg: &HostConfig,
    ) -> Result<Channel, RuntimeError> {
        let link = executors.processes()?.spawn_worker(descriptor).await?;
        Ok(Channel::linked(&link, cfg.receive_timeout_clamped()))
    }

    async fn start(&self, executors: &mut Executors, launch: Launch) -> Result<ServiceTask, RuntimeError> {
        let task = executors.processes()?.start(&launch.descriptor)?;
        Ok(ServiceTask::Process(task))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::ExecutionMode;
    use crate::services::StateBlob;

    #[test]
    fn test_handshake_lines() {
        let hello = Handshake::Hello {
            token: "t".into(),
            service_id: ServiceId::from("svc"),
        };
        let line = hello.to_json_line().unwrap();
        assert_eq!(line, "{\"type\":\"hello\",\"token\":\"t\",\"service_id\":\"svc\"}\n");

        let boot = Handshake::Bootstrap {
            manifest: Manifest {
                id: ServiceId::from("svc"),
                name: "svc".into(),
                type_id: "echo".into(),
                mode: ExecutionMode::ProcessAsync,
                state: StateBlob::unit(),
                routes: Vec::new(),
            },
            receive_timeout_ms: 250,
        };
        match Handshake::from_json_line(&boot.to_json_line().unwrap()).unwrap() {
            Handshake::Bootstrap {
                manifest,
                receive_timeout_ms,
            } => {
                assert_eq!(manifest.mode, ExecutionMode::ProcessAsync);
                assert_eq!(receive_timeout_ms, 250);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_hello_with_wrong_token_is_rejected() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let mut client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, _) = listener.accept().unwrap();
        let line = Handshake::Hello {
            token: "wrong".into(),
            service_id: ServiceId::from("svc"),
        }
        .to_json_line()
        .unwrap();
        std::io::Write::write_all(&mut client, line.as_bytes()).unwrap();

        let err = read_hello(server, "right", &ServiceId::from("svc")).err().unwrap();
        assert!(err.contains("unexpected hello"));
    }

    #[tokio::test]
    async fn test_worker_that_never_connects_times_out() {
        let cfg = HostConfig {
            connect_timeout: Duration::from_millis(200),
            worker: WorkerCommand::new("sleep", ["5"]),
            ..HostConfig::default()
        };
        let mut pool = ProcessPool::bind(1, &cfg).await.unwrap();
        let descriptor = ServiceDescriptor::builder("echo")
            .mode(ExecutionMode::ProcessSync)
            .build()
            .unwrap();
        let err = pool.spawn_worker(&descriptor).await.err().unwrap();
        assert_eq!(err.as_label(), "runtime_worker_handshake");
        pool.close();
    }
}
