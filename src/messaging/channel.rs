//! # Channel: the four queues of one supervised service.
//!
//! ```text
//!           host_to_supervisor              supervisor_to_service
//!   Host ───────────────────────► Supervisor ─────────────────────────► Service
//!        ◄───────────────────────            ◄─────────────────────────
//!           supervisor_to_host              service_to_supervisor
//! ```
//!
//! Host and supervisor always share a process, so their two queues are in-memory. The
//! service-facing pair is in-memory for inline and thread services and rides a [`Link`]
//! for process services.

use std::{sync::Arc, time::Duration};

use super::{
    link::{Link, QueueKind},
    queue::{MemoryQueue, QueueRef},
};

/// Bundle of the four directional queues of one service.
#[derive(Clone)]
pub struct Channel {
    /// Host → supervisor (`stop`).
    pub host_to_supervisor: QueueRef,
    /// Supervisor → host (`stopped`, `crashed`).
    pub supervisor_to_host: QueueRef,
    /// Supervisor → service (`start`, `stop`).
    pub supervisor_to_service: QueueRef,
    /// Service → supervisor (`started`, `stopped`, `crashed`).
    pub service_to_supervisor: QueueRef,
}

impl Channel {
    /// All four queues in memory.
    pub fn in_memory(wait: Duration) -> Self {
        Self {
            host_to_supervisor: MemoryQueue::shared(wait),
            supervisor_to_host: MemoryQueue::shared(wait),
            supervisor_to_service: MemoryQueue::shared(wait),
            service_to_supervisor: MemoryQueue::shared(wait),
        }
    }

    /// Host-side channel of a worker process: the service-facing pair rides `link`.
    pub(crate) fn linked(link: &Arc<Link>, wait: Duration) -> Self {
        Self {
            host_to_supervisor: MemoryQueue::shared(wait),
            supervisor_to_host: MemoryQueue::shared(wait),
            supervisor_to_service: link.queue(QueueKind::SupervisorToService),
            service_to_supervisor: link.queue(QueueKind::ServiceToSupervisor),
        }
    }

    /// The two queues a service wrapper works with.
    pub(crate) fn service_endpoints(&self) -> ServiceEndpoints {
        ServiceEndpoints {
            inbox: Arc::clone(&self.supervisor_to_service),
            outbox: Arc::clone(&self.service_to_supervisor),
        }
    }
}

/// Service-side view of a channel.
#[derive(Clone)]
pub(crate) struct ServiceEndpoints {
    /// Messages from the supervisor.
    pub(crate) inbox: QueueRef,
    /// Messages to the supervisor.
    pub(crate) outbox: QueueRef,
}

impl ServiceEndpoints {
    /// Worker-side endpoints over a link.
    pub(crate) fn over_link(link: &Arc<Link>) -> Self {
        Self {
            inbox: link.queue(QueueKind::SupervisorToService),
            outbox: link.queue(QueueKind::ServiceToSupervisor),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::{Content, Message};

    #[tokio::test]
    async fn test_endpoints_share_queues_with_channel() {
        let ch = Channel::in_memory(Duration::from_millis(100));
        let ep = ch.service_endpoints();

        ch.supervisor_to_service
            .send_async(Message::new("sup", Content::Start))
            .await;
        assert_eq!(ep.inbox.receive_async().await.unwrap().content, Content::Start);

        ep.outbox
            .send_async(Message::new("svc", Content::Started))
            .await;
        assert_eq!(
            ch.service_to_supervisor.receive_async().await.unwrap().content,
            Content::Started
        );
    }
}
