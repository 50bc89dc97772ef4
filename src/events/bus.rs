//! # Event bus.
//!
//! [`Bus`] wraps a [`tokio::sync::broadcast`] channel. The host, every supervisor and the
//! subscriber workers publish into it; the host's subscriber listener is its main reader
//! and fans events out to the [`SubscriberSet`](crate::SubscriberSet).
//!
//! ```text
//!   Host          ──┐
//!   Supervisor 1  ──┼──► Bus ──► Host::subscriber_listener ──► SubscriberSet
//!   Supervisor N  ──┤
//!   SubscriberSet ──┘  (overflow / panic reports)
//! ```
//!
//! Publishing never blocks. One ring buffer of `bus_capacity` events is shared by all
//! receivers; a receiver that falls behind sees `RecvError::Lagged(n)` and skips `n` events.
//! Events published while nobody listens are lost.

use tokio::sync::broadcast;

use super::event::Event;

/// Cloneable publishing end of the runtime's event stream.
#[derive(Clone, Debug)]
pub struct Bus {
    tx: broadcast::Sender<Event>,
}

impl Bus {
    /// Bus keeping up to `capacity` undelivered events (at least 1).
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel::<Event>(capacity.max(1));
        Self { tx }
    }

    /// Publishes to every current receiver; a no-op when there are none.
    pub fn publish(&self, ev: Event) {
        let _ = self.tx.send(ev);
    }

    /// New receiver of every event published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Number of live receivers.
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;

    #[tokio::test]
    async fn test_subscribers_see_events_after_subscribe() {
        let bus = Bus::new(0);
        bus.publish(Event::new(EventKind::ShutdownRequested));

        let mut rx = bus.subscribe();
        bus.publish(Event::new(EventKind::AllStoppedWithin));
        let ev = rx.recv().await.unwrap();
        assert_eq!(ev.kind, EventKind::AllStoppedWithin);
        assert_eq!(bus.receiver_count(), 1);
        drop(rx);
        assert_eq!(bus.receiver_count(), 0);
    }
}
