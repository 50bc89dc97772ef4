//! # Service contract.
//!
//! A [`Service`] is user code run under supervision. It implements the body matching the
//! execution mode it is deployed with: [`Service::run`] for `thread-sync` / `process-sync`,
//! [`Service::run_async`] for `inline-async` / `thread-async` / `process-async`.
//!
//! ## Outcome of a body
//! ```text
//! Ok(())            → `stopped` (service finished or honored a stop request)
//! Err(ServiceError) → `crashed` (supervisor restarts it with backoff)
//! panic             → `crashed` (caught by the wrapper)
//! ```
//!
//! Bodies observe stop requests cooperatively through the [`ServiceContext`].

use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::ServiceError;
use crate::execution::ExecutionMode;

use super::descriptor::{Manifest, Route, ServiceId};

/// Poll interval of [`ServiceContext::wait_for_stop`].
const STOP_POLL: Duration = Duration::from_millis(10);

/// User code run under supervision.
///
/// A fresh instance is rehydrated through the [`Registry`](crate::Registry) for every start.
#[async_trait]
pub trait Service: Send + 'static {
    /// Blocking body, used by the `thread-sync` and `process-sync` modes.
    fn run(&mut self, ctx: &ServiceContext) -> Result<(), ServiceError> {
        let _ = ctx;
        Err(ServiceError::Unsupported { body: "blocking" })
    }

    /// Async body, used by the `inline-async`, `thread-async` and `process-async` modes.
    async fn run_async(&mut self, ctx: &ServiceContext) -> Result<(), ServiceError> {
        let _ = ctx;
        Err(ServiceError::Unsupported { body: "async" })
    }
}

/// What a running service knows about itself and how it learns it should stop.
#[derive(Clone, Debug)]
pub struct ServiceContext {
    id: ServiceId,
    name: String,
    mode: ExecutionMode,
    routes: Vec<Route>,
    stop: CancellationToken,
}

impl ServiceContext {
    pub(crate) fn new(manifest: &Manifest, stop: CancellationToken) -> Self {
        Self {
            id: manifest.id.clone(),
            name: manifest.name.clone(),
            mode: manifest.mode,
            routes: manifest.routes.clone(),
            stop,
        }
    }

    /// Service id.
    pub fn id(&self) -> &ServiceId {
        &self.id
    }

    /// Human-readable name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Execution mode the body runs under.
    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    /// Route metadata attached to the descriptor.
    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    /// True once the supervisor asked the service to stop.
    pub fn is_stop_requested(&self) -> bool {
        self.stop.is_cancelled()
    }

    /// Completes when the supervisor asks the service to stop.
    pub async fn stopped(&self) {
        self.stop.cancelled().await
    }

    /// Blocks up to `timeout` waiting for a stop request; returns whether one arrived.
    ///
    /// Blocking bodies use this as their interruptible sleep.
    pub fn wait_for_stop(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.stop.is_cancelled() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            std::thread::sleep(STOP_POLL.min(deadline - now));
        }
    }

    /// Token cancelled on stop, for use in `select!`.
    pub fn stop_token(&self) -> CancellationToken {
        self.stop.clone()
    }
}
