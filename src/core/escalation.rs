//! # Restart intensity of failed supervisors.
//!
//! The host tolerates up to `intensity` supervisor restarts within a sliding `period`.
//! One more failure inside the window escalates: the host stops every service and
//! [`Host::run`](crate::Host::run) returns
//! [`RuntimeError::SupervisorEscalation`](crate::RuntimeError::SupervisorEscalation).

use std::{collections::VecDeque, time::Duration};

use tokio::time::Instant;
use tracing::debug;

/// What the host does with a failed supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Verdict {
    /// Restart it; carries the failures counted in the current period.
    Restart(usize),
    /// Intensity exceeded; shut the host down.
    Escalate,
}

/// Sliding window of recent supervisor restarts, shared by all supervisors of a host.
pub(crate) struct Intensity {
    limit: usize,
    period: Duration,
    history: VecDeque<Instant>,
}

impl Intensity {
    pub(crate) fn new(limit: usize, period: Duration) -> Self {
        Self {
            limit,
            period,
            history: VecDeque::with_capacity(limit),
        }
    }

    /// Records a supervisor failure and decides what to do about it.
    pub(crate) fn evaluate(&mut self) -> Verdict {
        if self.limit == 0 {
            debug!("supervisor restart intensity is zero; escalating");
            return Verdict::Escalate;
        }

        let now = Instant::now();
        if self.history.len() == self.limit {
            if let Some(oldest) = self.history.front() {
                if now.saturating_duration_since(*oldest) < self.period {
                    debug!(limit = self.limit, period = ?self.period, "supervisor restart intensity exceeded");
                    return Verdict::Escalate;
                }
            }
            self.history.pop_front();
        }
        self.history.push_back(now);
        Verdict::Restart(self.history.len())
    }
}
