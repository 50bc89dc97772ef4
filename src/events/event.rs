//! # Runtime events emitted by the host and its supervisors.
//!
//! The [`EventKind`] enum classifies event types across four categories:
//! - **Subscriber events**: fan-out problems (overflow, panic)
//! - **Shutdown events**: drain flow of the host
//! - **Service events**: lifecycle acknowledgments and restarts of one service
//! - **Supervisor events**: termination and escalation of one supervisor
//!
//! The [`Event`] struct carries additional metadata such as timestamps, service id,
//! execution mode, reasons, and restart delays.
//!
//! ## Ordering guarantees
//! Each event has a globally unique sequence number (`seq`) that increases monotonically.
//! Use `seq` to restore the exact order when events are delivered out of order.
//!
//! ## Example
//! ```rust
//! use std::time::Duration;
//! use hostvisor::{Event, EventKind};
//!
//! let ev = Event::new(EventKind::RestartScheduled)
//!     .with_service("billing")
//!     .with_delay(Duration::from_secs(4))
//!     .with_attempt(3);
//!
//! assert_eq!(ev.kind, EventKind::RestartScheduled);
//! assert_eq!(ev.service.as_deref(), Some("billing"));
//! assert_eq!(ev.delay_ms, Some(4_000));
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{Duration, SystemTime};

use crate::execution::ExecutionMode;

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of runtime events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    // === Subscriber events ===
    /// Subscriber panicked during event processing.
    ///
    /// Sets:
    /// - `service`: subscriber name
    /// - `reason`: panic info/message
    SubscriberPanicked,

    /// Subscriber dropped an event (queue full or worker closed).
    ///
    /// Sets:
    /// - `service`: subscriber name
    /// - `reason`: reason string (e.g., "full", "closed")
    SubscriberOverflow,

    // === Shutdown events ===
    /// Host-wide stop requested (signal or `request_stop`).
    ShutdownRequested,

    /// All supervisors and services stopped within the grace period.
    AllStoppedWithin,

    /// Grace period exceeded; some tasks did not stop in time.
    ///
    /// Sets:
    /// - `reason`: labels of the stuck tasks
    GraceExceeded,

    /// A supervisor or service task ended with something other than a clean exit.
    ///
    /// Sets:
    /// - `service`: task label
    /// - `reason`: failure message
    TaskFailed,

    // === Service events ===
    /// Service was handed to its execution strategy.
    ///
    /// Sets:
    /// - `service`: service id
    /// - `mode`: execution mode
    ServiceLaunched,

    /// Supervisor observed `started`.
    ///
    /// Sets:
    /// - `service`: service id
    /// - `mode`: execution mode
    ServiceStarted,

    /// Supervisor observed `stopped`.
    ///
    /// Sets:
    /// - `service`: service id
    /// - `mode`: execution mode
    ServiceStopped,

    /// Supervisor observed `crashed`.
    ///
    /// Sets:
    /// - `service`: service id
    /// - `mode`: execution mode
    ServiceCrashed,

    /// Restart of a crashed service scheduled.
    ///
    /// Sets:
    /// - `service`: service id
    /// - `mode`: execution mode
    /// - `delay_ms`: backoff + jitter (ms)
    /// - `attempt`: retry attempt count after this restart
    RestartScheduled,

    /// `start` sent to a crashed service after its delay.
    ///
    /// Sets:
    /// - `service`: service id
    /// - `mode`: execution mode
    /// - `attempt`: retry attempt count
    RestartIssued,

    /// A message outside the lifecycle vocabulary was dropped.
    ///
    /// Sets:
    /// - `service`: service id
    /// - `reason`: the unrecognized content
    MessageDropped,

    // === Supervisor events ===
    /// Supervisor finished after a graceful stop.
    ///
    /// Sets:
    /// - `service`: service id
    SupervisorStopped,

    /// Supervisor loop failed.
    ///
    /// Sets:
    /// - `service`: service id
    /// - `reason`: failure message
    SupervisorFailed,

    /// Host restarted a failed supervisor.
    ///
    /// Sets:
    /// - `service`: service id
    /// - `attempt`: failures counted in the current period
    SupervisorRestarted,
}

/// Runtime event with optional metadata.
///
/// - `seq`: monotonic global sequence for ordering
/// - `at`: wall-clock timestamp (for logs)
/// - other optional fields are set depending on the [`EventKind`]
#[derive(Clone, Debug)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,

    /// Service id (or subscriber/task label), if applicable.
    pub service: Option<Arc<str>>,
    /// Execution mode of the service, if applicable.
    pub mode: Option<ExecutionMode>,
    /// Restart delay in milliseconds (compact).
    pub delay_ms: Option<u32>,
    /// Retry attempt count.
    pub attempt: Option<u32>,
    /// Human-readable reason (errors, overflow details, etc.).
    pub reason: Option<Arc<str>>,
}

impl Event {
    /// Creates a new event of the given kind with current timestamp and next sequence number.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            service: None,
            mode: None,
            delay_ms: None,
            attempt: None,
            reason: None,
        }
    }

    /// Attaches a human-readable reason.
    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Attaches a service id.
    #[inline]
    pub fn with_service(mut self, service: impl Into<Arc<str>>) -> Self {
        self.service = Some(service.into());
        self
    }

    /// Attaches an execution mode.
    #[inline]
    pub fn with_mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = Some(mode);
        self
    }

    /// Attaches a restart delay (stored as milliseconds).
    #[inline]
    pub fn with_delay(mut self, d: Duration) -> Self {
        let ms = d.as_millis().min(u128::from(u32::MAX)) as u32;
        self.delay_ms = Some(ms);
        self
    }

    /// Attaches an attempt count.
    #[inline]
    pub fn with_attempt(mut self, n: u32) -> Self {
        self.attempt = Some(n);
        self
    }

    /// Creates a subscriber overflow event.
    #[inline]
    pub fn subscriber_overflow(subscriber: &'static str, reason: &'static str) -> Self {
        Event::new(EventKind::SubscriberOverflow)
            .with_service(subscriber)
            .with_reason(format!("subscriber={subscriber} reason={reason}"))
    }

    /// Creates a subscriber panic event.
    #[inline]
    pub fn subscriber_panicked(subscriber: &'static str, info: String) -> Self {
        Event::new(EventKind::SubscriberPanicked)
            .with_service(subscriber)
            .with_reason(info)
    }

    /// True for events produced by the fan-out itself.
    #[inline]
    pub fn is_subscriber_event(&self) -> bool {
        matches!(
            self.kind,
            EventKind::SubscriberOverflow | EventKind::SubscriberPanicked
        )
    }
}
