//! # Service wrapper: the handshake between a service and its supervisor.
//!
//! [`ServiceRunner`] runs inside the service's execution context (host scheduler, worker
//! thread, or worker process) and speaks the lifecycle protocol on the service's behalf.
//!
//! ```text
//!            ┌──────────── listener (drains supervisor→service) ────────────┐
//!            │   stop  → cancel stop token, Control::Stop                   │
//!            │   start → Control::Start                                     │
//!            │   other → logged, dropped                                    │
//!            └──────────────────────────────────────────────────────────────┘
//! loop {
//!   ├─► registry.reconstruct(state, type_id)     (error → crashed)
//!   ├─► send `started`
//!   ├─► body(ctx)   (panics caught)
//!   │     ├─ Ok / stop requested ─► send `stopped`, exit
//!   │     └─ Err / panic         ─► send `crashed`
//!   │                                 └─ wait for Control:
//!   │                                      ├─ Start ─► loop
//!   │                                      └─ Stop  ─► send `stopped`, exit
//! }
//! ```
//!
//! Both a blocking driver (`thread-sync`, `process-sync`) and an async driver (the three
//! async modes) are provided; they share the same protocol.

use std::{panic::AssertUnwindSafe, sync::Arc};

use futures::FutureExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::error::{ServiceError, panic_reason};
use crate::messaging::{Content, Message, QueueRef, ServiceEndpoints};

use super::{
    descriptor::Manifest,
    registry::Registry,
    service::{Service, ServiceContext},
};

/// Control decisions forwarded from the listener to the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Control {
    Start,
    Stop,
}

/// How one run of the body ended.
enum Outcome {
    Exited,
    Crashed(String),
}

/// Drives one service through the lifecycle protocol.
pub(crate) struct ServiceRunner {
    manifest: Arc<Manifest>,
    registry: Arc<Registry>,
    endpoints: ServiceEndpoints,
}

impl ServiceRunner {
    pub(crate) fn new(manifest: Arc<Manifest>, registry: Arc<Registry>, endpoints: ServiceEndpoints) -> Self {
        Self {
            manifest,
            registry,
            endpoints,
        }
    }

    fn message(&self, content: Content) -> Message {
        Message::new(self.manifest.id.as_str(), content)
    }

    fn report(&self, content: Content) {
        self.endpoints.outbox.send(self.message(content));
    }

    async fn report_async(&self, content: Content) {
        self.endpoints.outbox.send_async(self.message(content)).await;
    }

    fn rehydrate(&self) -> Result<Box<dyn Service>, ServiceError> {
        self.registry
            .reconstruct(&self.manifest.state, &self.manifest.type_id)
    }

    /// Reports a crash without running anything; used when the execution context itself
    /// could not be set up.
    pub(crate) fn abandon(&self, reason: &str) {
        error!(service_id = %self.manifest.id, mode = %self.manifest.mode, reason, "service could not be started");
        self.report(Content::Crashed);
    }

    /// Async driver. Returns once the service reported `stopped`.
    pub(crate) async fn run_async(self) {
        let stop = CancellationToken::new();
        let done = CancellationToken::new();
        let (ctl_tx, mut ctl_rx) = mpsc::unbounded_channel();
        let listener = tokio::spawn(listen_async(
            Arc::clone(&self.endpoints.inbox),
            ctl_tx,
            stop.clone(),
            done.clone(),
            Arc::clone(&self.manifest),
        ));

        loop {
            while ctl_rx.try_recv().is_ok() {}
            let outcome = self.attempt_async(&stop).await;
            if let Outcome::Crashed(reason) = &outcome {
                warn!(service_id = %self.manifest.id, mode = %self.manifest.mode, %reason, "service crashed");
            }
            if stop.is_cancelled() || matches!(outcome, Outcome::Exited) {
                self.report_async(Content::Stopped).await;
                break;
            }
            self.report_async(Content::Crashed).await;
            match ctl_rx.recv().await {
                Some(Control::Start) => continue,
                Some(Control::Stop) => {
                    self.report_async(Content::Stopped).await;
                    break;
                }
                None => break,
            }
        }

        done.cancel();
        if let Err(e) = listener.await {
            warn!(service_id = %self.manifest.id, error = %e, "service listener failed");
        }
    }

    async fn attempt_async(&self, stop: &CancellationToken) -> Outcome {
        let mut service = match self.rehydrate() {
            Ok(s) => s,
            Err(e) => return Outcome::Crashed(e.to_string()),
        };
        self.report_async(Content::Started).await;
        let ctx = ServiceContext::new(&self.manifest, stop.clone());
        match AssertUnwindSafe(service.run_async(&ctx)).catch_unwind().await {
            Ok(Ok(())) => Outcome::Exited,
            Ok(Err(e)) => Outcome::Crashed(e.to_string()),
            Err(panic) => Outcome::Crashed(panic_reason(panic)),
        }
    }

    /// Blocking driver. Must not be called from inside an async runtime.
    pub(crate) fn run_blocking(self) {
        let stop = CancellationToken::new();
        let done = CancellationToken::new();
        let (ctl_tx, mut ctl_rx) = mpsc::unbounded_channel();

        let listener = {
            let inbox = Arc::clone(&self.endpoints.inbox);
            let (stop, done, manifest) = (stop.clone(), done.clone(), Arc::clone(&self.manifest));
            std::thread::Builder::new()
                .name(format!("{}-svc-listener", short(manifest.id.as_str())))
                .spawn(move || listen_blocking(inbox, ctl_tx, stop, done, manifest))
        };
        let listener = match listener {
            Ok(h) => h,
            Err(e) => {
                self.abandon(&format!("failed to spawn listener thread: {e}"));
                return;
            }
        };

        loop {
            while ctl_rx.try_recv().is_ok() {}
            let outcome = self.attempt_blocking(&stop);
            if let Outcome::Crashed(reason) = &outcome {
                warn!(service_id = %self.manifest.id, mode = %self.manifest.mode, %reason, "service crashed");
            }
            if stop.is_cancelled() || matches!(outcome, Outcome::Exited) {
                self.report(Content::Stopped);
                break;
            }
            self.report(Content::Crashed);
            match ctl_rx.blocking_recv() {
                Some(Control::Start) => continue,
                Some(Control::Stop) => {
                    self.report(Content::Stopped);
                    break;
                }
                None => break,
            }
        }

        done.cancel();
        if listener.join().is_err() {
            warn!(service_id = %self.manifest.id, "service listener panicked");
        }
    }

    fn attempt_blocking(&self, stop: &CancellationToken) -> Outcome {
        let mut service = match self.rehydrate() {
            Ok(s) => s,
            Err(e) => return Outcome::Crashed(e.to_string()),
        };
        self.report(Content::Started);
        let ctx = ServiceContext::new(&self.manifest, stop.clone());
        match std::panic::catch_unwind(AssertUnwindSafe(|| service.run(&ctx))) {
            Ok(Ok(())) => Outcome::Exited,
            Ok(Err(e)) => Outcome::Crashed(e.to_string()),
            Err(panic) => Outcome::Crashed(panic_reason(panic)),
        }
    }
}

/// Applies one inbound message; returns false once the driver is gone.
fn dispatch(
    msg: Message,
    ctl: &mpsc::UnboundedSender<Control>,
    stop: &CancellationToken,
    manifest: &Manifest,
) -> bool {
    let control = match msg.content {
        Content::Stop => {
            stop.cancel();
            Control::Stop
        }
        Content::Start => Control::Start,
        other => {
            warn!(service_id = %manifest.id, mode = %manifest.mode, content = %other, sender = %msg.sender, "unexpected message for service; dropped");
            return true;
        }
    };
    debug!(service_id = %manifest.id, ?control, "control received");
    ctl.send(control).is_ok()
}

async fn listen_async(
    inbox: QueueRef,
    ctl: mpsc::UnboundedSender<Control>,
    stop: CancellationToken,
    done: CancellationToken,
    manifest: Arc<Manifest>,
) {
    loop {
        tokio::select! {
            _ = done.cancelled() => break,
            msg = inbox.receive_async() => {
                if let Some(msg) = msg {
                    if !dispatch(msg, &ctl, &stop, &manifest) {
                        break;
                    }
                }
            }
        }
    }
}

fn listen_blocking(
    inbox: QueueRef,
    ctl: mpsc::UnboundedSender<Control>,
    stop: CancellationToken,
    done: CancellationToken,
    manifest: Arc<Manifest>,
) {
    while !done.is_cancelled() {
        if let Some(msg) = inbox.receive() {
            if !dispatch(msg, &ctl, &stop, &manifest) {
                break;
            }
        }
    }
}

fn short(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}
