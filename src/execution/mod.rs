//! # Execution strategies: where a service body runs.
//!
//! Five [`ExecutionMode`]s map onto three strategies behind one trait:
//!
//! ```text
//! ExecutionMode      Strategy                          Service task
//! ─────────────────  ────────────────────────────────  ──────────────────────────────
//! inline-async   ──► Inline                          ─► tokio task on the host scheduler
//! thread-sync    ──► Thread { private_scheduler: no } ─► pool thread, blocking body
//! thread-async   ──► Thread { private_scheduler: yes }─► pool thread + current-thread runtime
//! process-sync   ──► Process                          ─► worker process, blocking body
//! process-async  ──► Process                          ─► worker process + current-thread runtime
//! ```
//!
//! ## Launch sequence (per service, driven by the host)
//! 1. `open_channel`: in-memory queues; for process modes spawn the worker and accept its link
//! 2. host starts the supervisor on its own scheduler
//! 3. `start`: hand the service wrapper to the execution context
//!
//! Pools ([`Executors`]) are sized once from the mode counts before the first launch.

mod inline;
mod process;
mod thread;
pub(crate) mod worker;

use std::{fmt, str::FromStr, sync::Arc};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::task::{AbortHandle, JoinHandle};
use tracing::warn;

use crate::config::HostConfig;
use crate::error::{RuntimeError, TaskError};
use crate::messaging::Channel;
use crate::services::{Registry, ServiceDescriptor};

pub(crate) use inline::InlineStrategy;
pub(crate) use process::{ProcessPool, ProcessStrategy, ProcessTask};
pub(crate) use thread::{ThreadPool, ThreadStrategy, ThreadTask};

/// Concurrency domain a service body runs in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutionMode {
    /// Task on the host's own scheduler.
    InlineAsync,
    /// Dedicated thread running a blocking body.
    ThreadSync,
    /// Dedicated thread running a private single-threaded scheduler.
    ThreadAsync,
    /// Dedicated worker process running a blocking body.
    ProcessSync,
    /// Dedicated worker process running a private single-threaded scheduler.
    ProcessAsync,
}

impl ExecutionMode {
    /// All modes, in declaration order.
    pub const ALL: [ExecutionMode; 5] = [
        ExecutionMode::InlineAsync,
        ExecutionMode::ThreadSync,
        ExecutionMode::ThreadAsync,
        ExecutionMode::ProcessSync,
        ExecutionMode::ProcessAsync,
    ];

    /// Stable kebab-case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionMode::InlineAsync => "inline-async",
            ExecutionMode::ThreadSync => "thread-sync",
            ExecutionMode::ThreadAsync => "thread-async",
            ExecutionMode::ProcessSync => "process-sync",
            ExecutionMode::ProcessAsync => "process-async",
        }
    }

    /// Runs on a pool thread.
    pub fn is_thread(&self) -> bool {
        matches!(self, ExecutionMode::ThreadSync | ExecutionMode::ThreadAsync)
    }

    /// Runs in a worker process.
    pub fn is_process(&self) -> bool {
        matches!(self, ExecutionMode::ProcessSync | ExecutionMode::ProcessAsync)
    }

    /// Uses the async service body.
    pub fn is_async(&self) -> bool {
        matches!(
            self,
            ExecutionMode::InlineAsync | ExecutionMode::ThreadAsync | ExecutionMode::ProcessAsync
        )
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionMode {
    type Err = RuntimeError;

    /// Parses a mode name.
    ///
    /// Accepts the kebab-case names (`"thread-async"`) and the descriptive aliases
    /// `main_event_loop_async`, `separate_thread`, `separate_thread_async`,
    /// `separate_process`, `separate_process_async`. Case and `_`/`-` are not significant.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('_', "-");
        match normalized.as_str() {
            "inline-async" | "main-event-loop-async" => Ok(ExecutionMode::InlineAsync),
            "thread-sync" | "separate-thread" => Ok(ExecutionMode::ThreadSync),
            "thread-async" | "separate-thread-async" => Ok(ExecutionMode::ThreadAsync),
            "process-sync" | "separate-process" => Ok(ExecutionMode::ProcessSync),
            "process-async" | "separate-process-async" => Ok(ExecutionMode::ProcessAsync),
            _ => Err(RuntimeError::InvalidExecutionMode { value: s.to_string() }),
        }
    }
}

/// Everything a strategy needs to start one service.
pub(crate) struct Launch {
    pub descriptor: Arc<ServiceDescriptor>,
    pub registry: Arc<Registry>,
    pub channel: Channel,
}

/// Places a service body into its concurrency domain.
#[async_trait]
pub(crate) trait ExecutionStrategy: Send + Sync {
    /// Builds the channel of a service about to be launched.
    async fn open_channel(
        &self,
        executors: &mut Executors,
        descriptor: &ServiceDescriptor,
        cfg: &HostConfig,
    ) -> Result<Channel, RuntimeError> {
        let _ = (executors, descriptor);
        Ok(Channel::in_memory(cfg.receive_timeout_clamped()))
    }

    /// Starts the service wrapper; the returned task is joined during drain.
    async fn start(&self, executors: &mut Executors, launch: Launch) -> Result<ServiceTask, RuntimeError>;
}

/// Closed set of strategies, selected by mode.
pub(crate) enum Strategy {
    Inline(InlineStrategy),
    Thread(ThreadStrategy),
    Process(ProcessStrategy),
}

impl Strategy {
    pub(crate) fn for_mode(mode: ExecutionMode) -> Self {
        match mode {
            ExecutionMode::InlineAsync => Strategy::Inline(InlineStrategy),
            ExecutionMode::ThreadSync => Strategy::Thread(ThreadStrategy {
                private_scheduler: false,
            }),
            ExecutionMode::ThreadAsync => Strategy::Thread(ThreadStrategy {
                private_scheduler: true,
            }),
            ExecutionMode::ProcessSync | ExecutionMode::ProcessAsync => Strategy::Process(ProcessStrategy),
        }
    }

    fn inner(&self) -> &dyn ExecutionStrategy {
        match self {
            Strategy::Inline(s) => s,
            Strategy::Thread(s) => s,
            Strategy::Process(s) => s,
        }
    }
}

#[async_trait]
impl ExecutionStrategy for Strategy {
    async fn open_channel(
        &self,
        executors: &mut Executors,
        descriptor: &ServiceDescriptor,
        cfg: &HostConfig,
    ) -> Result<Channel, RuntimeError> {
        self.inner().open_channel(executors, descriptor, cfg).await
    }

    async fn start(&self, executors: &mut Executors, launch: Launch) -> Result<ServiceTask, RuntimeError> {
        self.inner().start(executors, launch).await
    }
}

/// Handle on a running service body.
pub(crate) enum ServiceTask {
    Inline(JoinHandle<()>),
    Thread(ThreadTask),
    Process(ProcessTask),
}

impl ServiceTask {
    /// Waits for the body to finish.
    pub(crate) async fn join(self) -> Result<(), TaskError> {
        match self {
            ServiceTask::Inline(h) => h.await.map_err(join_error),
            ServiceTask::Thread(t) => t.join().await,
            ServiceTask::Process(p) => p.join().await,
        }
    }

    /// Abort handle for tasks living on the host scheduler.
    ///
    /// Thread tasks cannot be aborted; process tasks are killed when their join future is
    /// dropped.
    pub(crate) fn abort_handle(&self) -> Option<AbortHandle> {
        match self {
            ServiceTask::Inline(h) => Some(h.abort_handle()),
            _ => None,
        }
    }
}

/// Maps a tokio join error onto the drain outcome.
pub(crate) fn join_error(e: tokio::task::JoinError) -> TaskError {
    if e.is_cancelled() {
        TaskError::Canceled
    } else {
        match e.try_into_panic() {
            Ok(payload) => TaskError::Panicked {
                reason: crate::error::panic_reason(payload),
            },
            Err(e) => TaskError::Lost { reason: e.to_string() },
        }
    }
}

/// Thread and process pools of one host run.
pub(crate) struct Executors {
    threads: Option<ThreadPool>,
    processes: Option<ProcessPool>,
}

impl Executors {
    /// Sizes the pools exactly to the number of services requesting each kind.
    pub(crate) async fn sized_for<'a, I>(descriptors: I, cfg: &HostConfig) -> Result<Self, RuntimeError>
    where
        I: IntoIterator<Item = &'a ServiceDescriptor>,
    {
        let (mut threads, mut processes) = (0, 0);
        for d in descriptors {
            if d.mode().is_thread() {
                threads += 1;
            } else if d.mode().is_process() {
                processes += 1;
            }
        }
        let threads = (threads > 0).then(|| ThreadPool::new(threads));
        let processes = match processes {
            0 => None,
            n => Some(ProcessPool::bind(n, cfg).await?),
        };
        Ok(Self { threads, processes })
    }

    pub(crate) fn threads(&self) -> Result<&ThreadPool, RuntimeError> {
        self.threads.as_ref().ok_or(RuntimeError::PoolExhausted {
            pool: "thread",
            capacity: 0,
        })
    }

    pub(crate) fn processes(&mut self) -> Result<&mut ProcessPool, RuntimeError> {
        self.processes.as_mut().ok_or(RuntimeError::PoolExhausted {
            pool: "process",
            capacity: 0,
        })
    }

    /// Capacity of the thread pool (0 when absent).
    pub(crate) fn thread_capacity(&self) -> usize {
        self.threads.as_ref().map_or(0, ThreadPool::capacity)
    }

    /// Capacity of the process pool (0 when absent).
    pub(crate) fn process_capacity(&self) -> usize {
        self.processes.as_ref().map_or(0, ProcessPool::capacity)
    }

    /// Workers still holding a permit.
    pub(crate) fn in_use(&self) -> usize {
        self.threads.as_ref().map_or(0, ThreadPool::in_use) + self.processes.as_ref().map_or(0, ProcessPool::in_use)
    }

    /// Closes both pools and the worker broker.
    pub(crate) fn release(self) {
        if let Some(pool) = self.threads {
            if pool.in_use() > 0 {
                warn!(in_use = pool.in_use(), "thread pool released with detached workers");
            }
            pool.close();
        }
        if let Some(pool) = self.processes {
            pool.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_mode_names_and_aliases() {
        for mode in ExecutionMode::ALL {
            assert_eq!(mode.as_str().parse::<ExecutionMode>().unwrap(), mode);
        }
        assert_eq!(
            "separate_process_async".parse::<ExecutionMode>().unwrap(),
            ExecutionMode::ProcessAsync
        );
        assert_eq!(
            "MAIN_EVENT_LOOP_ASYNC".parse::<ExecutionMode>().unwrap(),
            ExecutionMode::InlineAsync
        );
        assert_eq!(
            "separate_thread".parse::<ExecutionMode>().unwrap(),
            ExecutionMode::ThreadSync
        );
        let err = "fiber".parse::<ExecutionMode>().unwrap_err();
        assert_eq!(err.as_label(), "runtime_invalid_execution_mode");
    }

    #[test]
    fn test_mode_classification() {
        assert!(ExecutionMode::ThreadAsync.is_thread() && ExecutionMode::ThreadAsync.is_async());
        assert!(ExecutionMode::ProcessSync.is_process() && !ExecutionMode::ProcessSync.is_async());
        assert!(!ExecutionMode::InlineAsync.is_thread() && !ExecutionMode::InlineAsync.is_process());
        assert_eq!(
            serde_json::to_string(&ExecutionMode::ThreadAsync).unwrap(),
            "\"thread-async\""
        );
    }

    #[tokio::test]
    async fn test_pools_sized_from_mode_counts() {
        let descriptors: Vec<ServiceDescriptor> = [
            ExecutionMode::InlineAsync,
            ExecutionMode::ThreadSync,
            ExecutionMode::ThreadAsync,
            ExecutionMode::ThreadSync,
        ]
        .into_iter()
        .map(|m| ServiceDescriptor::builder("svc").mode(m).build().unwrap())
        .collect();

        let executors = Executors::sized_for(&descriptors, &HostConfig::default())
            .await
            .unwrap();
        assert_eq!(executors.thread_capacity(), 3);
        assert_eq!(executors.process_capacity(), 0);
        assert_eq!(executors.in_use(), 0);
        executors.release();
    }

    #[tokio::test]
    async fn test_join_error_mapping() {
        let h = tokio::spawn(async {
            tokio::time::sleep(std::time::Duration::from_secs(60)).await;
        });
        h.abort();
        assert!(join_error(h.await.unwrap_err()).is_cancellation());

        let h = tokio::spawn(async { panic!("inline boom") });
        match join_error(h.await.unwrap_err()) {
            TaskError::Panicked { reason } => assert_eq!(reason, "inline boom"),
            other => panic!("unexpected {other:?}"),
        }
    }
}
