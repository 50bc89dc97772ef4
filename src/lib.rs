//! # hostvisor
//!
//! **Hostvisor** is a local, OTP-style supervision runtime for Rust.
//!
//! A [`Host`] launches long-running services, pairs each with a supervisor that restarts
//! it per its [`RestartPolicy`], and shuts everything down gracefully on request or on
//! SIGINT/SIGTERM. Services run in one of five [`ExecutionMode`]s: on the host's own
//! scheduler, on a dedicated thread (blocking or with a private scheduler), or in a worker
//! process (blocking or with a private scheduler). All coordination between the host, a
//! supervisor and its service goes through messages on a four-queue [`Channel`].
//!
//! ## Architecture
//! ### Overview
//! ```text
//!  ServiceDescriptor   ServiceDescriptor   ServiceDescriptor
//!  (inline-async)      (thread-sync)       (process-async)
//!        │                   │                   │
//!        ▼                   ▼                   ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  Host (current-thread scheduler)                                  │
//! │  - Bus (broadcast events) ──► SubscriberSet ──► LogWriter, ...    │
//! │  - Registry (type id → factory)                                   │
//! │  - Executors (thread pool, process pool + worker broker)          │
//! │  - Supervisor per service (same scheduler)                        │
//! └──────┬──────────────────────┬──────────────────────┬──────────────┘
//!        │ Channel              │ Channel              │ Channel (over Link)
//!        │ host→sup  sup→host   │                      │
//!        │ sup→svc   svc→sup    │                      │
//!        ▼                      ▼                      ▼
//!  ServiceRunner           ServiceRunner          worker process
//!  (tokio task)            (pool thread)          run_worker_if_requested
//!                                                   └─► ServiceRunner
//!                                                       (private scheduler)
//! ```
//!
//! ### Lifecycle
//! ```text
//! service:     rehydrate ─► `started` ─► body ─┬─ Ok / stop ─► `stopped`
//!                                              └─ Err/panic ─► `crashed` ─► wait `start`|`stop`
//! supervisor:  `crashed` ─► sleep(backoff + jitter) ─► `start`
//!              `started` ─► reset backoff (exponential / linear)
//! host stop:   `stop` ─► supervisors ─► `stop` ─► services ─► `stopped` ─► drain within grace
//! ```
//!
//! ## Features
//! | Area              | Description                                                  | Key types / traits                                  |
//! |-------------------|--------------------------------------------------------------|-----------------------------------------------------|
//! | **Host**          | Launch, supervise and drain services.                        | [`Host`], [`HostBuilder`], [`StopHandle`]           |
//! | **Services**      | User code and how it is rebuilt in any execution context.    | [`Service`], [`ServiceDescriptor`], [`Registry`]    |
//! | **Policies**      | Restart delays: immediate, fixed, exponential, linear, custom.| [`RestartPolicy`], [`RestartStrategy`]             |
//! | **Messaging**     | Closed lifecycle vocabulary over four queues.                | [`Channel`], [`Queue`], [`Message`], [`Content`]    |
//! | **Subscriber API**| Hook into runtime events (logging, metrics, alerts).         | [`Subscribe`], [`LogWriter`]                        |
//! | **Errors**        | Typed errors for the runtime, services and supervisors.      | [`RuntimeError`], [`ServiceError`]                  |
//! | **Configuration** | Centralize runtime settings.                                 | [`HostConfig`], [`WorkerCommand`]                   |
//!
//! ## Example
//! ```rust,no_run
//! use std::time::Duration;
//! use async_trait::async_trait;
//! use hostvisor::{
//!     ExecutionMode, Host, HostConfig, Registry, RestartPolicy, RestartStrategy, Service,
//!     ServiceContext, ServiceDescriptor, ServiceError,
//! };
//!
//! struct Ticker { every_ms: u64 }
//!
//! #[async_trait]
//! impl Service for Ticker {
//!     async fn run_async(&mut self, ctx: &ServiceContext) -> Result<(), ServiceError> {
//!         while !ctx.is_stop_requested() {
//!             tokio::time::sleep(Duration::from_millis(self.every_ms)).await;
//!         }
//!         Ok(())
//!     }
//! }
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let registry = Registry::new().with("ticker", |every_ms: u64| Ok(Ticker { every_ms }));
//!     // Process-mode services re-enter here inside their worker.
//!     if let Some(outcome) = hostvisor::run_worker_if_requested(&registry) {
//!         return Ok(outcome?);
//!     }
//!
//!     let ticker = ServiceDescriptor::builder("ticker")
//!         .mode(ExecutionMode::ThreadAsync)
//!         .restart(RestartPolicy::new(RestartStrategy::ExponentialBackoff))
//!         .state(&250u64)
//!         .build()?;
//!
//!     let host = Host::builder(HostConfig::default())
//!         .registry(registry)
//!         .service(ticker)
//!         .build()?;
//!     host.run()?; // until SIGINT / SIGTERM
//!     Ok(())
//! }
//! ```
mod config;
mod core;
mod error;
mod events;
mod execution;
mod messaging;
mod policies;
mod services;
mod subscribers;

// ---- Public re-exports ----

pub use config::{HostConfig, WorkerCommand};
pub use crate::core::{Host, HostBuilder, StopHandle};
pub use error::{PolicyError, RuntimeError, ServiceError, SupervisorError, TaskError};
pub use events::{Bus, Event, EventKind};
pub use execution::ExecutionMode;
pub use execution::worker::{ENV_BROKER, ENV_SERVICE, ENV_TOKEN, run_worker_if_requested};
pub use messaging::{Channel, Content, MemoryQueue, Message, Queue, QueueRef};
pub use policies::{CustomBackoff, RestartPolicy, RestartStrategy};
pub use services::{DescriptorBuilder, Registry, Route, Service, ServiceContext, ServiceDescriptor, ServiceId, StateBlob};
pub use subscribers::{LogWriter, Subscribe, SubscriberSet};
