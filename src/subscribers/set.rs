//! # Subscriber fan-out for host events.
//!
//! The host's subscriber listener reads the [`Bus`] and hands every event to
//! [`SubscriberSet::emit`]. Each subscriber owns a lane: a bounded queue drained by its own
//! delivery task, so a subscriber that is slow to process `RestartScheduled` or
//! `ServiceCrashed` bursts never holds up the supervisors publishing them.
//!
//! ```text
//!  Bus ─► Host::subscriber_listener ─► emit(ev)
//!                                        ├─► lane "log"     ─► deliver ─► LogWriter
//!                                        └─► lane "metrics" ─► deliver ─► user subscriber
//!                                              │ full/closed      │ panic
//!                                              ▼                  ▼
//!                                   SubscriberOverflow    SubscriberPanicked  (back on the Bus)
//! ```
//!
//! ## Rules
//! - Events reach one subscriber in publish order; lanes are not ordered against each other.
//! - A full lane drops the event for that subscriber only and counts the drop.
//! - Overflow and panic reports about subscriber events are never re-published, so a
//!   stuck subscriber cannot feed itself.
//! - Panics are caught with `AssertUnwindSafe`; a subscriber holding a lock when it panics
//!   may leave its own state poisoned.

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use futures::FutureExt;
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, warn};

use crate::error::panic_reason;
use crate::events::{Bus, Event};
use crate::subscribers::Subscribe;

/// Sending end of one subscriber's queue.
struct Lane {
    name: &'static str,
    tx: mpsc::Sender<Arc<Event>>,
    dropped: AtomicU64,
}

impl Lane {
    /// Queues `event`; returns why it was dropped, if it was.
    fn offer(&self, event: &Arc<Event>) -> Option<&'static str> {
        let reason = match self.tx.try_send(Arc::clone(event)) {
            Ok(()) => return None,
            Err(mpsc::error::TrySendError::Full(_)) => "full",
            Err(mpsc::error::TrySendError::Closed(_)) => "closed",
        };
        self.dropped.fetch_add(1, Ordering::Relaxed);
        Some(reason)
    }
}

/// Delivers events to the host's subscribers without blocking the publisher.
pub struct SubscriberSet {
    lanes: Vec<Lane>,
    workers: Vec<JoinHandle<()>>,
    bus: Bus,
}

impl SubscriberSet {
    /// Opens one lane per subscriber and spawns its delivery task.
    ///
    /// Must be called from inside a tokio runtime.
    #[must_use]
    pub fn new(subs: Vec<Arc<dyn Subscribe>>, bus: Bus) -> Self {
        let (lanes, workers) = subs
            .into_iter()
            .map(|sub| {
                let (tx, rx) = mpsc::channel(sub.queue_capacity().max(1));
                let lane = Lane {
                    name: sub.name(),
                    tx,
                    dropped: AtomicU64::new(0),
                };
                (lane, tokio::spawn(deliver(sub, rx, bus.clone())))
            })
            .unzip();
        Self { lanes, workers, bus }
    }

    /// Queues `event` on every lane.
    pub fn emit(&self, event: &Event) {
        let event = Arc::new(event.clone());
        let report = !event.is_subscriber_event();
        for lane in &self.lanes {
            if let Some(reason) = lane.offer(&event) {
                warn!(subscriber = lane.name, reason, kind = ?event.kind, "subscriber dropped event");
                if report {
                    self.bus.publish(Event::subscriber_overflow(lane.name, reason));
                }
            }
        }
    }

    /// Events dropped so far for the named subscriber.
    pub fn dropped(&self, name: &str) -> u64 {
        self.lanes
            .iter()
            .filter(|lane| lane.name == name)
            .map(|lane| lane.dropped.load(Ordering::Relaxed))
            .sum()
    }

    /// Closes every lane and waits for the queued events to be delivered.
    pub async fn shutdown(self) {
        for lane in &self.lanes {
            let dropped = lane.dropped.load(Ordering::Relaxed);
            if dropped > 0 {
                warn!(subscriber = lane.name, dropped, "subscriber missed events during the run");
            }
        }
        drop(self.lanes);
        for worker in self.workers {
            let _ = worker.await;
        }
        debug!("subscribers drained");
    }

    /// True if there are no subscribers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lanes.is_empty()
    }

    /// Number of subscribers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lanes.len()
    }
}

/// Feeds one subscriber until its lane closes.
async fn deliver(sub: Arc<dyn Subscribe>, mut rx: mpsc::Receiver<Arc<Event>>, bus: Bus) {
    while let Some(ev) = rx.recv().await {
        let Err(panic) = std::panic::AssertUnwindSafe(sub.on_event(&ev)).catch_unwind().await else {
            continue;
        };
        let reason = panic_reason(panic);
        warn!(subscriber = sub.name(), %reason, kind = ?ev.kind, "subscriber panicked");
        if !ev.is_subscriber_event() {
            bus.publish(Event::subscriber_panicked(sub.name(), reason));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tokio::sync::Notify;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<EventKind>>,
    }

    #[async_trait]
    impl Subscribe for Recorder {
        async fn on_event(&self, ev: &Event) {
            self.seen.lock().unwrap().push(ev.kind);
        }
        fn name(&self) -> &'static str {
            "recorder"
        }
    }

    struct Panicker;

    #[async_trait]
    impl Subscribe for Panicker {
        async fn on_event(&self, _ev: &Event) {
            panic!("subscriber bug");
        }
        fn name(&self) -> &'static str {
            "panicker"
        }
    }

    /// Holds its first event until released; one slot of queue.
    #[derive(Default)]
    struct Stalled {
        release: Notify,
    }

    #[async_trait]
    impl Subscribe for Stalled {
        async fn on_event(&self, _ev: &Event) {
            self.release.notified().await;
        }
        fn name(&self) -> &'static str {
            "stalled"
        }
        fn queue_capacity(&self) -> usize {
            1
        }
    }

    #[tokio::test]
    async fn test_panicking_subscriber_is_isolated() {
        let bus = Bus::new(16);
        let mut rx = bus.subscribe();
        let recorder = Arc::new(Recorder::default());
        let set = SubscriberSet::new(vec![recorder.clone(), Arc::new(Panicker)], bus.clone());
        assert_eq!(set.len(), 2);

        set.emit(&Event::new(EventKind::ServiceStarted));
        set.emit(&Event::new(EventKind::ServiceStopped));

        let reported = rx.recv().await.unwrap();
        assert_eq!(reported.kind, EventKind::SubscriberPanicked);
        assert_eq!(reported.service.as_deref(), Some("panicker"));

        set.shutdown().await;
        assert_eq!(
            *recorder.seen.lock().unwrap(),
            vec![EventKind::ServiceStarted, EventKind::ServiceStopped]
        );
    }

    #[tokio::test]
    async fn test_full_lane_drops_for_that_subscriber_only() {
        let bus = Bus::new(16);
        let mut rx = bus.subscribe();
        let stalled = Arc::new(Stalled::default());
        let recorder = Arc::new(Recorder::default());
        let set = SubscriberSet::new(vec![stalled.clone(), recorder.clone()], bus.clone());

        // First event is picked up and parks the worker; the second fills the one slot.
        set.emit(&Event::new(EventKind::ServiceCrashed));
        for _ in 0..3 {
            tokio::task::yield_now().await;
        }
        set.emit(&Event::new(EventKind::RestartScheduled));
        set.emit(&Event::new(EventKind::RestartIssued));

        assert_eq!(set.dropped("stalled"), 1);
        assert_eq!(set.dropped("recorder"), 0);
        let overflow = rx.recv().await.unwrap();
        assert_eq!(overflow.kind, EventKind::SubscriberOverflow);
        assert_eq!(overflow.service.as_deref(), Some("stalled"));

        // Overflow reports are not re-reported when they overflow in turn.
        set.emit(&overflow);
        assert_eq!(set.dropped("stalled"), 2);
        assert!(rx.try_recv().is_err());

        stalled.release.notify_one();
        stalled.release.notify_one();
        set.shutdown().await;
        assert_eq!(recorder.seen.lock().unwrap().len(), 4);
    }
}
