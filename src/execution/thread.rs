//! # Thread strategy and the host's thread pool.
//!
//! Each thread service gets one OS thread out of a [`ThreadPool`] sized exactly to the
//! number of thread services. A `thread-async` service additionally builds a private
//! current-thread runtime on that thread and runs the async wrapper on it:
//!
//! ```text
//! host scheduler                       pool thread "<id>-svc" / "<id>-svc-rt"
//! ───────────────                      ───────────────────────────────────────
//! ThreadPool::spawn ──(permit)──────►  thread-sync:  runner.run_blocking()
//!                                      thread-async: runtime.block_on(runner.run_async())
//! ThreadTask::join  ◄──(oneshot)─────  result (Ok / panic message)
//! ```

use std::{panic::AssertUnwindSafe, sync::Arc, thread::JoinHandle};

use async_trait::async_trait;
use tokio::sync::{Semaphore, oneshot};

use crate::error::{RuntimeError, TaskError, panic_reason};
use crate::services::ServiceRunner;

use super::{ExecutionStrategy, Executors, Launch, ServiceTask};

/// Fixed-size pool of service threads.
pub(crate) struct ThreadPool {
    capacity: usize,
    permits: Arc<Semaphore>,
}

impl ThreadPool {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            capacity,
            permits: Arc::new(Semaphore::new(capacity)),
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    /// Threads currently holding a permit.
    pub(crate) fn in_use(&self) -> usize {
        self.capacity.saturating_sub(self.permits.available_permits())
    }

    /// Spawns a named thread holding one permit for its whole life.
    pub(crate) fn spawn<F>(&self, name: String, body: F) -> Result<ThreadTask, RuntimeError>
    where
        F: FnOnce() + Send + 'static,
    {
        let permit = Arc::clone(&self.permits)
            .try_acquire_owned()
            .map_err(|_| RuntimeError::PoolExhausted {
                pool: "thread",
                capacity: self.capacity,
            })?;
        let (done_tx, done_rx) = oneshot::channel();
        let handle = std::thread::Builder::new().name(name).spawn(move || {
            let _permit = permit;
            let result = std::panic::catch_unwind(AssertUnwindSafe(body)).map_err(panic_reason);
            let _ = done_tx.send(result);
        })?;
        Ok(ThreadTask {
            done: done_rx,
            handle: Some(handle),
        })
    }

    /// Refuses further spawns.
    pub(crate) fn close(&self) {
        self.permits.close();
    }
}

/// Handle on one pool thread.
pub(crate) struct ThreadTask {
    done: oneshot::Receiver<Result<(), String>>,
    handle: Option<JoinHandle<()>>,
}

impl ThreadTask {
    pub(crate) async fn join(mut self) -> Result<(), TaskError> {
        let result = match (&mut self.done).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(reason)) => Err(TaskError::Panicked { reason }),
            Err(_) => Err(TaskError::Lost {
                reason: "thread ended without reporting".to_string(),
            }),
        };
        // The thread has sent its result, so the join returns right away.
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        result
    }
}

/// `thread-sync` / `thread-async`.
pub(crate) struct ThreadStrategy {
    pub private_scheduler: bool,
}

#[async_trait]
impl ExecutionStrategy for ThreadStrategy {
    async fn start(&self, executors: &mut Executors, launch: Launch) -> Result<ServiceTask, RuntimeError> {
        let id = launch.descriptor.id().to_string();
        let runner = ServiceRunner::new(
            Arc::new(launch.descriptor.manifest().clone()),
            launch.registry,
            launch.channel.service_endpoints(),
        );
        let short = id.get(..8).unwrap_or(&id);

        let task = if self.private_scheduler {
            executors.threads()?.spawn(format!("{short}-svc-rt"), move || {
                match tokio::runtime::Builder::new_current_thread().enable_all().build() {
                    Ok(rt) => rt.block_on(runner.run_async()),
                    Err(e) => runner.abandon(&format!("failed to build service runtime: {e}")),
                }
            })?
        } else {
            executors
                .threads()?
                .spawn(format!("{short}-svc"), move || runner.run_blocking())?
        };
        Ok(ServiceTask::Thread(task))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_pool_is_sized_exactly() {
        let pool = ThreadPool::new(1);
        let (tx, rx) = std::sync::mpsc::channel::<()>();
        let first = pool
            .spawn("t1".into(), move || {
                let _ = rx.recv_timeout(Duration::from_secs(5));
            })
            .unwrap();
        assert_eq!(pool.in_use(), 1);

        let second = pool.spawn("t2".into(), || {});
        assert!(matches!(second, Err(RuntimeError::PoolExhausted { capacity: 1, .. })));

        tx.send(()).unwrap();
        first.join().await.unwrap();
        assert_eq!(pool.in_use(), 0);
        pool.close();
    }

    #[tokio::test]
    async fn test_panicking_thread_reports_reason() {
        let pool = ThreadPool::new(1);
        let task = pool.spawn("boom".into(), || panic!("thread boom")).unwrap();
        match task.join().await {
            Err(TaskError::Panicked { reason }) => assert_eq!(reason, "thread boom"),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(pool.in_use(), 0);
    }
}
