//! # LogWriter: renders events through `tracing`.
//!
//! A minimal subscriber that turns every [`Event`] into one structured log line.
//! Install any `tracing` subscriber (for example `tracing-subscriber`'s `fmt`) to see them.
//!
//! ## Example output (fmt layer)
//! ```text
//! INFO  service launched service=3f2a… mode=thread-sync
//! WARN  service crashed service=3f2a… mode=thread-sync
//! INFO  restart scheduled service=3f2a… delay_ms=1734 attempt=1
//! INFO  shutdown requested
//! INFO  all stopped within grace
//! ```

use async_trait::async_trait;
use tracing::{error, info, warn};

use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;

/// Event writer subscriber.
#[derive(Default)]
pub struct LogWriter;

impl LogWriter {
    /// Construct a new [`LogWriter`].
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        let service = e.service.as_deref().unwrap_or("-");
        let mode = e.mode.map(|m| m.as_str()).unwrap_or("-");
        let reason = e.reason.as_deref().unwrap_or("-");
        match e.kind {
            EventKind::ShutdownRequested => info!(seq = e.seq, "shutdown requested"),
            EventKind::AllStoppedWithin => info!(seq = e.seq, "all stopped within grace"),
            EventKind::GraceExceeded => error!(seq = e.seq, stuck = reason, "grace exceeded"),
            EventKind::TaskFailed => warn!(seq = e.seq, task = service, reason, "task failed during drain"),
            EventKind::ServiceLaunched => info!(seq = e.seq, service, mode, "service launched"),
            EventKind::ServiceStarted => info!(seq = e.seq, service, mode, "service started"),
            EventKind::ServiceStopped => info!(seq = e.seq, service, mode, "service stopped"),
            EventKind::ServiceCrashed => warn!(seq = e.seq, service, mode, "service crashed"),
            EventKind::RestartScheduled => info!(
                seq = e.seq,
                service,
                mode,
                delay_ms = e.delay_ms,
                attempt = e.attempt,
                "restart scheduled"
            ),
            EventKind::RestartIssued => info!(seq = e.seq, service, mode, attempt = e.attempt, "restart issued"),
            EventKind::MessageDropped => warn!(seq = e.seq, service, content = reason, "message dropped"),
            EventKind::SupervisorStopped => info!(seq = e.seq, service, "supervisor stopped"),
            EventKind::SupervisorFailed => error!(seq = e.seq, service, reason, "supervisor failed"),
            EventKind::SupervisorRestarted => {
                warn!(seq = e.seq, service, failures = e.attempt, "supervisor restarted")
            }
            EventKind::SubscriberOverflow => warn!(seq = e.seq, subscriber = service, reason, "subscriber overflow"),
            EventKind::SubscriberPanicked => error!(seq = e.seq, subscriber = service, reason, "subscriber panicked"),
        }
    }

    fn name(&self) -> &'static str {
        "LogWriter"
    }
}
