//! # Queue abstraction shared by every transport.
//!
//! A [`Queue`] is a single-consumer FIFO of [`Message`]s with a blocking and an async face:
//!
//! ```text
//!                 send / send_async                     receive / receive_async
//!   producer ───────────────────────────► [ queue ] ──────────────────────────────► consumer
//!                 (never blocks the                      (bounded wait, `None`
//!                  owning scheduler)                      on timeout)
//! ```
//!
//! Two implementations exist: [`MemoryQueue`] for inline and thread services, and
//! `LinkQueue` for queues whose other end lives in a worker process.
//!
//! ## Rules
//! - Blocking variants are only called from thread-sync / process-sync service bodies.
//! - Send failures are logged and the message is dropped; they never surface as errors.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc};
use tracing::warn;

use super::message::Message;

/// Polling interval of the blocking receive.
const BLOCKING_POLL: Duration = Duration::from_millis(10);

/// Directional message queue.
#[async_trait]
pub trait Queue: Send + Sync + 'static {
    /// Enqueues a message from a blocking context.
    fn send(&self, message: Message);

    /// Waits up to the queue's bounded wait for a message, blocking the calling thread.
    fn receive(&self) -> Option<Message>;

    /// Enqueues a message without blocking the calling task's scheduler.
    async fn send_async(&self, message: Message);

    /// Waits up to the queue's bounded wait for a message, suspending only the calling task.
    async fn receive_async(&self) -> Option<Message>;
}

/// Shared handle to a queue.
pub type QueueRef = Arc<dyn Queue>;

/// In-process queue over an unbounded tokio channel.
///
/// Both ends live in the same struct so the queue never disconnects while referenced.
pub struct MemoryQueue {
    tx: mpsc::UnboundedSender<Message>,
    rx: Mutex<mpsc::UnboundedReceiver<Message>>,
    wait: Duration,
}

impl MemoryQueue {
    /// Creates an empty queue whose receives wait at most `wait`.
    pub fn new(wait: Duration) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(rx),
            wait,
        }
    }

    /// Creates an empty queue behind a [`QueueRef`].
    pub fn shared(wait: Duration) -> QueueRef {
        Arc::new(Self::new(wait))
    }

    fn push(&self, message: Message) {
        if let Err(e) = self.tx.send(message) {
            warn!(content = %e.0.content, "queue closed; message dropped");
        }
    }
}

#[async_trait]
impl Queue for MemoryQueue {
    fn send(&self, message: Message) {
        self.push(message);
    }

    fn receive(&self) -> Option<Message> {
        let deadline = Instant::now() + self.wait;
        loop {
            if let Ok(mut rx) = self.rx.try_lock() {
                match rx.try_recv() {
                    Ok(m) => return Some(m),
                    Err(mpsc::error::TryRecvError::Disconnected) => return None,
                    Err(mpsc::error::TryRecvError::Empty) => {}
                }
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            std::thread::sleep(BLOCKING_POLL.min(deadline - now));
        }
    }

    async fn send_async(&self, message: Message) {
        self.push(message);
    }

    async fn receive_async(&self) -> Option<Message> {
        let mut rx = self.rx.lock().await;
        tokio::time::timeout(self.wait, rx.recv()).await.ok().flatten()
    }
}
