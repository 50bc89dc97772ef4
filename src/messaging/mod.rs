//! Message passing between host, supervisors and services.
//!
//! ## Contents
//! - [`Message`] / [`Content`] the closed lifecycle vocabulary
//! - [`Queue`] / [`QueueRef`] one directional queue (blocking + async faces)
//! - [`MemoryQueue`] in-process transport
//! - `Link` / `LinkQueue` cross-process transport (JSON lines over loopback TCP), crate-internal
//! - [`Channel`] the four queues of one service

mod channel;
mod link;
mod message;
mod queue;

pub use channel::Channel;
pub(crate) use channel::ServiceEndpoints;
pub(crate) use link::{LINK_SENDER, Link, QueueKind};
pub use message::{Content, Message};
pub use queue::{MemoryQueue, Queue, QueueRef};
