//! # Cross-process transport for a worker's queues.
//!
//! A [`Link`] is one loopback TCP connection between the host and a worker process. Both
//! service-facing queues of the worker's channel are multiplexed over it as JSON lines:
//!
//! ```text
//!   host process                                          worker process
//!   ┌─────────────────────────┐      {"queue":..,         ┌─────────────────────────┐
//!   │ LinkQueue(sup→svc).send ├──────"message":..}\n ────►│ reader ─► inbox[sup→svc]│
//!   │ inbox[svc→sup] ◄─ reader│◄────────────────────────  ┤ LinkQueue(svc→sup).send │
//!   └─────────────────────────┘                           └─────────────────────────┘
//! ```
//!
//! ## Rules
//! - A dedicated reader thread routes every inbound frame to the inbox of its queue.
//! - Malformed lines are logged and skipped; the reader keeps going.
//! - Write failures (broken pipe, closed peer) are logged and the message is dropped.
//! - `send_async` offloads the socket write with `spawn_blocking`.
//! - On EOF the optional local notice is delivered, unless the peer's last frame on that
//!   queue already carried the same content (a clean goodbye).

use std::{
    collections::HashMap,
    io::{self, BufRead, BufReader, Write},
    net::{Shutdown, TcpStream},
    sync::{Arc, Mutex, PoisonError},
    thread::JoinHandle,
    time::Duration,
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{
    message::Message,
    queue::{MemoryQueue, Queue, QueueRef},
};

/// Sender label on messages a link delivers locally when its peer goes away.
pub(crate) const LINK_SENDER: &str = "link";

/// Identifies one of the four queues of a channel on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum QueueKind {
    /// Host → supervisor.
    HostToSupervisor,
    /// Supervisor → host.
    SupervisorToHost,
    /// Supervisor → service.
    SupervisorToService,
    /// Service → supervisor.
    ServiceToSupervisor,
}

impl QueueKind {
    const ALL: [QueueKind; 4] = [
        QueueKind::HostToSupervisor,
        QueueKind::SupervisorToHost,
        QueueKind::SupervisorToService,
        QueueKind::ServiceToSupervisor,
    ];
}

/// One message on the wire, tagged with its queue.
#[derive(Debug, Serialize, Deserialize)]
struct Frame {
    queue: QueueKind,
    message: Message,
}

impl Frame {
    fn to_json_line(&self) -> Result<String, serde_json::Error> {
        let json = serde_json::to_string(self)?;
        Ok(format!("{json}\n"))
    }

    fn from_json_line(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line.trim())
    }
}

/// Duplex connection carrying queue frames to and from one worker process.
pub(crate) struct Link {
    peer: String,
    writer: Mutex<TcpStream>,
    inboxes: Arc<HashMap<QueueKind, Arc<MemoryQueue>>>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl Link {
    /// Takes over a connected stream and starts routing inbound frames.
    ///
    /// `reader` may already hold buffered bytes (the handshake is read through it); they are
    /// processed before anything else. When the peer goes away, `on_eof` (if any) is
    /// delivered to the local inbox of its queue, unless the last frame the peer sent on
    /// that queue already had the same content.
    pub(crate) fn open(
        reader: BufReader<TcpStream>,
        peer: impl Into<String>,
        wait: Duration,
        on_eof: Option<(QueueKind, Message)>,
    ) -> io::Result<Arc<Self>> {
        let peer = peer.into();
        let writer = reader.get_ref().try_clone()?;
        let inboxes: Arc<HashMap<_, _>> = Arc::new(
            QueueKind::ALL
                .iter()
                .map(|kind| (*kind, Arc::new(MemoryQueue::new(wait))))
                .collect(),
        );

        let routes = Arc::clone(&inboxes);
        let label = peer.clone();
        let handle = std::thread::Builder::new()
            .name(format!("{}-link", short(&peer)))
            .spawn(move || read_frames(reader, routes, label, on_eof))?;

        Ok(Arc::new(Self {
            peer,
            writer: Mutex::new(writer),
            inboxes,
            reader: Mutex::new(Some(handle)),
        }))
    }

    /// Queue view of this link for the given direction.
    pub(crate) fn queue(self: &Arc<Self>, kind: QueueKind) -> QueueRef {
        Arc::new(LinkQueue {
            link: Arc::clone(self),
            kind,
        })
    }

    /// Writes one raw line (handshake or frame) and flushes.
    pub(crate) fn write_line(&self, line: &str) -> io::Result<()> {
        let mut w = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        w.write_all(line.as_bytes())?;
        w.flush()
    }

    fn send_frame(&self, queue: QueueKind, message: Message) {
        let line = match (Frame { queue, message }).to_json_line() {
            Ok(line) => line,
            Err(e) => {
                warn!(peer = %self.peer, ?queue, error = %e, "failed to encode frame; message dropped");
                return;
            }
        };
        if let Err(e) = self.write_line(&line) {
            warn!(peer = %self.peer, ?queue, error = %e, "link write failed; message dropped");
        }
    }

    /// Shuts the connection down and joins the reader thread.
    pub(crate) fn close(&self) {
        self.shutdown();
        let handle = self.reader.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(h) = handle {
            if h.join().is_err() {
                warn!(peer = %self.peer, "link reader panicked");
            }
        }
    }

    fn shutdown(&self) {
        let w = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let _ = w.shutdown(Shutdown::Both);
    }
}

impl Drop for Link {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn read_frames(
    mut reader: BufReader<TcpStream>,
    inboxes: Arc<HashMap<QueueKind, Arc<MemoryQueue>>>,
    peer: String,
    on_eof: Option<(QueueKind, Message)>,
) {
    let eof_queue = on_eof.as_ref().map(|(queue, _)| *queue);
    let mut last_on_eof_queue = None;
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line) {
            Ok(0) => {
                debug!(%peer, "link closed by peer");
                break;
            }
            Ok(_) if line.trim().is_empty() => {}
            Ok(_) => match Frame::from_json_line(&line) {
                Ok(frame) => {
                    if Some(frame.queue) == eof_queue {
                        last_on_eof_queue = Some(frame.message.content.clone());
                    }
                    if let Some(inbox) = inboxes.get(&frame.queue) {
                        inbox.send(frame.message);
                    }
                }
                Err(e) => warn!(%peer, error = %e, "malformed frame dropped"),
            },
            Err(e) => {
                debug!(%peer, error = %e, "link read ended");
                break;
            }
        }
    }
    if let Some((queue, message)) = on_eof {
        if last_on_eof_queue.as_ref() == Some(&message.content) {
            debug!(%peer, ?queue, "peer said goodbye before closing");
            return;
        }
        if let Some(inbox) = inboxes.get(&queue) {
            inbox.send(message);
        }
    }
}

fn short(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}

/// One direction of a [`Link`] seen as a [`Queue`].
///
/// Sending writes a frame tagged with this direction; receiving reads frames of this
/// direction that the peer sent.
pub(crate) struct LinkQueue {
    link: Arc<Link>,
    kind: QueueKind,
}

impl LinkQueue {
    fn inbox(&self) -> &MemoryQueue {
        &self.link.inboxes[&self.kind]
    }
}

#[async_trait]
impl Queue for LinkQueue {
    fn send(&self, message: Message) {
        self.link.send_frame(self.kind, message);
    }

    fn receive(&self) -> Option<Message> {
        self.inbox().receive()
    }

    async fn send_async(&self, message: Message) {
        let link = Arc::clone(&self.link);
        let kind = self.kind;
        if let Err(e) = tokio::task::spawn_blocking(move || link.send_frame(kind, message)).await {
            warn!(peer = %self.link.peer, queue = ?self.kind, error = %e, "link writer task failed; message dropped");
        }
    }

    async fn receive_async(&self) -> Option<Message> {
        self.inbox().receive_async().await
    }
}
