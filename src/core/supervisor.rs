//! # Supervisor: restarts one service and relays the host's stop.
//!
//! Every service gets exactly one [`Supervisor`], always scheduled on the host's runtime.
//! It watches three independent flags (`starting`, `stopped`, `crashed`; not a strict
//! state machine) fed by two listeners, and a supervision loop acts on them.
//!
//! ```text
//!  host→supervisor ──► host-listener ───── `stop` ──► local stop token
//!
//!  service→supervisor ──► service-listener
//!                           ├─ started → clear starting/stopped/crashed, acknowledge
//!                           ├─ stopped → set stopped (from the link: worker lost, ServiceCrashed)
//!                           ├─ crashed → set crashed
//!                           └─ other   → MessageDropped
//!
//!  supervision loop (every tick until stop):
//!    ├─ acknowledged? → policy.reset()
//!    └─ crashed?      → delay = backoff + jitter ─► sleep (cut short by stop)
//!                       clear crashed ─► send `start` ─► set starting
//!  on stop:
//!    send `stop` ─► wait for `stopped` ─► report `stopped` to the host
//! ```
//!
//! ## Rules
//! - The restart policy is touched only by the supervision loop.
//! - A panic or an invalid custom delay fails only this supervisor; it reports `crashed`
//!   to the host, which decides whether to restart it.
//! - Unrecognized content is never fatal.

use std::{
    panic::AssertUnwindSafe,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use futures::FutureExt;
use tokio::{sync::Notify, time};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{SupervisorError, panic_reason};
use crate::events::{Bus, Event, EventKind};
use crate::execution::ExecutionMode;
use crate::messaging::{Channel, Content, LINK_SENDER, Message, QueueRef};
use crate::policies::RestartPolicy;
use crate::services::ServiceDescriptor;

/// Sender label used on supervisor-originated messages.
const SENDER: &str = "supervisor";

/// Lifecycle flags shared by the listeners and the supervision loop.
#[derive(Default)]
struct Flags {
    starting: AtomicBool,
    stopped: AtomicBool,
    crashed: AtomicBool,
    /// `started` seen since the loop last looked.
    acknowledged: AtomicBool,
    changed: Notify,
}

impl Flags {
    fn set(&self, flag: &AtomicBool, value: bool) {
        flag.store(value, Ordering::SeqCst);
        self.changed.notify_waiters();
    }

    fn get(flag: &AtomicBool) -> bool {
        flag.load(Ordering::SeqCst)
    }
}

/// Supervises one service on the host's scheduler.
pub(crate) struct Supervisor {
    descriptor: Arc<ServiceDescriptor>,
    channel: Channel,
    bus: Bus,
    tick: Duration,
    flags: Flags,
}

impl Supervisor {
    pub(crate) fn new(descriptor: Arc<ServiceDescriptor>, channel: Channel, bus: Bus, tick: Duration) -> Self {
        Self {
            descriptor,
            channel,
            bus,
            tick,
            flags: Flags::default(),
        }
    }

    /// Marks the service as crashed before the loop starts.
    ///
    /// Used when a failed supervisor is replaced: its service is most likely parked in
    /// `crashed`, waiting for a `start` nobody would send otherwise.
    pub(crate) fn resuming(self) -> Self {
        self.flags.crashed.store(true, Ordering::SeqCst);
        self
    }

    fn service_id(&self) -> &str {
        self.descriptor.id().as_str()
    }

    fn mode(&self) -> ExecutionMode {
        self.descriptor.mode()
    }

    fn event(&self, kind: EventKind) -> Event {
        Event::new(kind)
            .with_service(self.service_id())
            .with_mode(self.mode())
    }

    /// Runs until the host asks to stop (or the loop fails), then reports the outcome on
    /// supervisor→host.
    pub(crate) async fn run(self) -> Result<(), SupervisorError> {
        let mut policy = self.descriptor.restart().fresh();
        let stop = CancellationToken::new();
        let done = CancellationToken::new();

        let result = {
            let host_listener = self.host_listener(&stop, &done);
            let service_listener = self.service_listener(&done);
            let supervision = async {
                let res = AssertUnwindSafe(supervise(
                    &mut policy,
                    &self.flags,
                    &self.descriptor,
                    &self.channel,
                    &self.bus,
                    self.tick,
                    &stop,
                ))
                .catch_unwind()
                .await;
                done.cancel();
                match res {
                    Ok(r) => r,
                    Err(panic) => Err(SupervisorError::Panicked {
                        reason: panic_reason(panic),
                    }),
                }
            };
            let ((), (), result) = tokio::join!(host_listener, service_listener, supervision);
            result
        };

        match &result {
            Ok(()) => {
                info!(service_id = %self.service_id(), mode = %self.mode(), "supervisor stopped");
                self.bus.publish(self.event(EventKind::SupervisorStopped));
                self.report(Content::Stopped).await;
            }
            Err(e) => {
                error!(service_id = %self.service_id(), mode = %self.mode(), error = %e, "supervisor failed");
                self.bus
                    .publish(self.event(EventKind::SupervisorFailed).with_reason(e.to_string()));
                self.report(Content::Crashed).await;
            }
        }
        result
    }

    async fn report(&self, content: Content) {
        self.channel
            .supervisor_to_host
            .send_async(Message::new(SENDER, content))
            .await;
    }

    /// Drains host→supervisor; `stop` cancels the local stop token.
    async fn host_listener(&self, stop: &CancellationToken, done: &CancellationToken) {
        let queue = &self.channel.host_to_supervisor;
        while !stop.is_cancelled() {
            let Some(msg) = next(queue, done).await else {
                if done.is_cancelled() {
                    return;
                }
                continue;
            };
            match msg.content {
                Content::Stop => {
                    debug!(service_id = %self.service_id(), sender = %msg.sender, "stop requested");
                    stop.cancel();
                }
                other => self.drop_message(&msg.sender, &other, "host"),
            }
        }
    }

    /// Drains service→supervisor into the flags until the loop is done.
    async fn service_listener(&self, done: &CancellationToken) {
        let queue = &self.channel.service_to_supervisor;
        loop {
            match next(queue, done).await {
                Some(msg) => self.on_service_message(msg),
                None if done.is_cancelled() => return,
                None => {}
            }
        }
    }

    fn on_service_message(&self, msg: Message) {
        let f = &self.flags;
        match msg.content {
            Content::Started => {
                f.starting.store(false, Ordering::SeqCst);
                f.stopped.store(false, Ordering::SeqCst);
                f.crashed.store(false, Ordering::SeqCst);
                f.set(&f.acknowledged, true);
                debug!(service_id = %self.service_id(), mode = %self.mode(), "service started");
                self.bus.publish(self.event(EventKind::ServiceStarted));
            }
            Content::Stopped if msg.sender == LINK_SENDER => {
                f.set(&f.stopped, true);
                warn!(service_id = %self.service_id(), mode = %self.mode(), "worker connection lost; service treated as stopped");
                self.bus.publish(
                    self.event(EventKind::ServiceCrashed)
                        .with_reason("worker connection lost"),
                );
            }
            Content::Stopped => {
                f.set(&f.stopped, true);
                debug!(service_id = %self.service_id(), mode = %self.mode(), "service stopped");
                self.bus.publish(self.event(EventKind::ServiceStopped));
            }
            Content::Crashed => {
                f.set(&f.crashed, true);
                warn!(service_id = %self.service_id(), mode = %self.mode(), "service crashed");
                self.bus.publish(self.event(EventKind::ServiceCrashed));
            }
            other => self.drop_message(&msg.sender, &other, "service"),
        }
    }

    fn drop_message(&self, sender: &str, content: &Content, from: &str) {
        warn!(
            service_id = %self.service_id(),
            sender,
            content = %content,
            from,
            "dropping message outside the lifecycle vocabulary"
        );
        self.bus
            .publish(self.event(EventKind::MessageDropped).with_reason(content.to_string()));
    }
}

/// Receives one message, giving up when `done` fires or the queue's wait elapses.
async fn next(queue: &QueueRef, done: &CancellationToken) -> Option<Message> {
    tokio::select! {
        biased;
        _ = done.cancelled() => None,
        msg = queue.receive_async() => msg,
    }
}

/// The supervision loop proper.
async fn supervise(
    policy: &mut RestartPolicy,
    flags: &Flags,
    descriptor: &ServiceDescriptor,
    channel: &Channel,
    bus: &Bus,
    tick: Duration,
    stop: &CancellationToken,
) -> Result<(), SupervisorError> {
    let id = descriptor.id().as_str();
    let mode = descriptor.mode();

    while !stop.is_cancelled() {
        if flags.acknowledged.swap(false, Ordering::SeqCst) {
            policy.reset();
        }

        if Flags::get(&flags.crashed) {
            let delay = policy.backoff()? + policy.jitter();
            let attempt = policy.retry_attempts();
            info!(service_id = %id, %mode, delay_ms = delay.as_millis() as u64, attempt, "restart scheduled");
            bus.publish(
                Event::new(EventKind::RestartScheduled)
                    .with_service(id)
                    .with_mode(mode)
                    .with_delay(delay)
                    .with_attempt(attempt),
            );

            tokio::select! {
                _ = time::sleep(delay) => {}
                _ = stop.cancelled() => break,
            }

            flags.set(&flags.crashed, false);
            channel
                .supervisor_to_service
                .send_async(Message::new(SENDER, Content::Start))
                .await;
            flags.set(&flags.starting, true);
            bus.publish(
                Event::new(EventKind::RestartIssued)
                    .with_service(id)
                    .with_mode(mode)
                    .with_attempt(attempt),
            );
            continue;
        }

        tokio::select! {
            _ = time::sleep(tick) => {}
            _ = stop.cancelled() => {}
        }
    }

    debug!(service_id = %id, %mode, "stopping service");
    channel
        .supervisor_to_service
        .send_async(Message::new(SENDER, Content::Stop))
        .await;
    loop {
        let changed = flags.changed.notified();
        if Flags::get(&flags.stopped) {
            return Ok(());
        }
        tokio::select! {
            _ = changed => {}
            _ = time::sleep(tick) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU32;

    use super::*;
    use crate::policies::RestartStrategy;

    fn descriptor(policy: RestartPolicy) -> Arc<ServiceDescriptor> {
        Arc::new(
            ServiceDescriptor::builder("svc")
                .id("svc-1")
                .mode(ExecutionMode::InlineAsync)
                .restart(policy)
                .build()
                .unwrap(),
        )
    }

    fn spawn(policy: RestartPolicy) -> (Channel, Bus, tokio::task::JoinHandle<Result<(), SupervisorError>>) {
        let channel = Channel::in_memory(Duration::from_secs(1));
        let bus = Bus::new(64);
        let sup = Supervisor::new(descriptor(policy), channel.clone(), bus.clone(), Duration::from_secs(1));
        (channel, bus, tokio::spawn(sup.run()))
    }

    async fn expect(queue: &QueueRef, want: Content) -> Message {
        loop {
            if let Some(msg) = queue.receive_async().await {
                assert_eq!(msg.content, want, "unexpected message {msg:?}");
                return msg;
            }
        }
    }

    async fn stop(channel: &Channel, handle: tokio::task::JoinHandle<Result<(), SupervisorError>>) {
        channel.host_to_supervisor.send(Message::new("host", Content::Stop));
        expect(&channel.supervisor_to_service, Content::Stop).await;
        channel.service_to_supervisor.send(Message::new("svc-1", Content::Stopped));
        handle.await.unwrap().unwrap();
        expect(&channel.supervisor_to_host, Content::Stopped).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_fixed_backoff_restart_after_crash() {
        let policy = RestartPolicy::new(RestartStrategy::FixedBackoff).with_fixed_backoff(Duration::from_secs(5));
        let (channel, bus, handle) = spawn(policy);
        let mut events = bus.subscribe();

        channel.service_to_supervisor.send(Message::new("svc-1", Content::Crashed));
        let t0 = time::Instant::now();
        let start = expect(&channel.supervisor_to_service, Content::Start).await;
        let waited = t0.elapsed();
        assert_eq!(start.sender, SENDER);
        assert!(waited >= Duration::from_secs(5), "restarted too early: {waited:?}");
        assert!(waited <= Duration::from_secs(7), "restarted too late: {waited:?}");

        let mut kinds = Vec::new();
        while let Ok(ev) = events.try_recv() {
            kinds.push(ev.kind);
        }
        assert!(kinds.contains(&EventKind::ServiceCrashed));
        assert!(kinds.contains(&EventKind::RestartScheduled));
        assert!(kinds.contains(&EventKind::RestartIssued));

        stop(&channel, handle).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_unrecognized_content_is_dropped() {
        let (channel, bus, handle) = spawn(RestartPolicy::default());
        let mut events = bus.subscribe();

        channel.service_to_supervisor.send(Message::new("svc-1", "reload"));
        channel.host_to_supervisor.send(Message::new("host", "ping"));
        // The listeners keep going: a crash after the noise is still acted on.
        channel.service_to_supervisor.send(Message::new("svc-1", Content::Crashed));
        expect(&channel.supervisor_to_service, Content::Start).await;

        let mut dropped = Vec::new();
        while let Ok(ev) = events.try_recv() {
            if ev.kind == EventKind::MessageDropped {
                dropped.push(ev.reason.as_deref().unwrap_or_default().to_string());
            }
        }
        dropped.sort();
        assert_eq!(dropped, vec!["ping".to_string(), "reload".to_string()]);

        stop(&channel, handle).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_started_resets_backoff() {
        let calls = Arc::new(AtomicU32::new(0));
        let seen = Arc::clone(&calls);
        // Custom delays expose the attempt counter the loop passes in.
        let policy = RestartPolicy::custom(move |attempt| {
            seen.store(attempt, Ordering::SeqCst);
            0.0
        });
        let (channel, _bus, handle) = spawn(policy);

        for _ in 0..3 {
            channel.service_to_supervisor.send(Message::new("svc-1", Content::Crashed));
            expect(&channel.supervisor_to_service, Content::Start).await;
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        // Custom strategies keep their count across `started`.
        channel.service_to_supervisor.send(Message::new("svc-1", Content::Started));
        channel.service_to_supervisor.send(Message::new("svc-1", Content::Crashed));
        expect(&channel.supervisor_to_service, Content::Start).await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        stop(&channel, handle).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_exponential_backoff_grows_then_resets_on_started() {
        let policy = RestartPolicy::new(RestartStrategy::ExponentialBackoff).with_max_jitter(Duration::ZERO);
        let (channel, _bus, handle) = spawn(policy);

        let mut waits = Vec::new();
        for _ in 0..3 {
            channel.service_to_supervisor.send(Message::new("svc-1", Content::Crashed));
            let t0 = time::Instant::now();
            expect(&channel.supervisor_to_service, Content::Start).await;
            waits.push(t0.elapsed());
        }
        assert!(waits[0] >= Duration::from_secs(1) && waits[0] < Duration::from_secs(3));
        assert!(waits[1] >= Duration::from_secs(2) && waits[1] < Duration::from_secs(4));
        assert!(waits[2] >= Duration::from_secs(4) && waits[2] < Duration::from_secs(6));

        channel.service_to_supervisor.send(Message::new("svc-1", Content::Started));
        time::sleep(Duration::from_secs(2)).await;
        channel.service_to_supervisor.send(Message::new("svc-1", Content::Crashed));
        let t0 = time::Instant::now();
        expect(&channel.supervisor_to_service, Content::Start).await;
        let after_reset = t0.elapsed();
        assert!(after_reset < Duration::from_secs(3), "backoff not reset: {after_reset:?}");

        stop(&channel, handle).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_waits_for_stopped() {
        let (channel, _bus, handle) = spawn(RestartPolicy::default());
        channel.host_to_supervisor.send(Message::new("host", Content::Stop));
        expect(&channel.supervisor_to_service, Content::Stop).await;

        time::sleep(Duration::from_secs(30)).await;
        assert!(!handle.is_finished());

        channel.service_to_supervisor.send(Message::new("svc-1", Content::Stopped));
        handle.await.unwrap().unwrap();
        expect(&channel.supervisor_to_host, Content::Stopped).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_lost_worker_counts_as_stopped() {
        let (channel, bus, handle) = spawn(RestartPolicy::default());
        let mut events = bus.subscribe();

        channel
            .service_to_supervisor
            .send(Message::new(LINK_SENDER, Content::Stopped));
        time::sleep(Duration::from_secs(3)).await;

        // Nothing restarts a service whose worker is gone, and stop does not wait on it.
        channel.host_to_supervisor.send(Message::new("host", Content::Stop));
        expect(&channel.supervisor_to_service, Content::Stop).await;
        handle.await.unwrap().unwrap();
        expect(&channel.supervisor_to_host, Content::Stopped).await;

        let mut kinds = Vec::new();
        while let Ok(ev) = events.try_recv() {
            if ev.kind == EventKind::ServiceCrashed {
                assert_eq!(ev.reason.as_deref(), Some("worker connection lost"));
            }
            kinds.push(ev.kind);
        }
        assert!(kinds.contains(&EventKind::ServiceCrashed));
        assert!(!kinds.contains(&EventKind::RestartScheduled));
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_custom_delay_fails_supervisor() {
        let (channel, bus, handle) = spawn(RestartPolicy::custom(|_| -1.0));
        let mut events = bus.subscribe();
        channel.service_to_supervisor.send(Message::new("svc-1", Content::Crashed));

        let err = handle.await.unwrap().unwrap_err();
        assert_eq!(err.as_label(), "supervisor_backoff");
        expect(&channel.supervisor_to_host, Content::Crashed).await;

        let mut failed = false;
        while let Ok(ev) = events.try_recv() {
            failed |= ev.kind == EventKind::SupervisorFailed;
        }
        assert!(failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resuming_supervisor_restarts_parked_service() {
        let channel = Channel::in_memory(Duration::from_secs(1));
        let sup = Supervisor::new(
            descriptor(RestartPolicy::new(RestartStrategy::Immediate)),
            channel.clone(),
            Bus::new(16),
            Duration::from_secs(1),
        )
        .resuming();
        let handle = tokio::spawn(sup.run());
        expect(&channel.supervisor_to_service, Content::Start).await;
        stop(&channel, handle).await;
    }
}
