//! # Host: launches every service with its supervisor and drains them on stop.
//!
//! The [`Host`] owns the event bus, the subscriber fan-out, the service registry and the
//! thread/process pools of a run. Its own scheduler (a current-thread tokio runtime when
//! started through [`Host::run`]) also schedules every supervisor.
//!
//! ## High-level architecture
//! ```text
//! run():
//!   Executors::sized_for(descriptors)         (pools sized once, exactly)
//!   for each descriptor:
//!       Strategy::for_mode(mode)
//!         ├─► open_channel()                  (process modes: spawn worker, accept link)
//!         ├─► spawn Supervisor::run()         (host scheduler)
//!         ├─► start()                         (service wrapper in its execution context)
//!         └─► report listener on supervisor→host
//!
//!   loop every tick until stop:
//!       supervisor reported `crashed` ─► Intensity::evaluate()
//!                                          ├─ Restart  → new Supervisor (resuming)
//!                                          └─ Escalate → request_stop, SupervisorEscalation
//!
//! drain:
//!   `stop` on every host→supervisor queue
//!   JoinSet{ supervisors, services } within grace
//!       ├─ Ok      → AllStoppedWithin
//!       └─ timeout → abort / kill / detach, GraceExceeded
//!   release pools and worker broker
//! ```
//!
//! ## Rules
//! - `request_stop` is idempotent and safe to call from any thread or signal listener.
//! - Cancellation during drain is a normal outcome; any other task failure is logged and
//!   the drain of the rest continues.
//! - Pools are released only after every task is accounted for.

use std::{
    collections::BTreeSet,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

use tokio::{
    sync::{broadcast, mpsc},
    task::{JoinHandle, JoinSet},
    time,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::HostConfig;
use crate::core::{
    builder::HostBuilder,
    escalation::{Intensity, Verdict},
    shutdown::SignalListener,
    supervisor::Supervisor,
};
use crate::error::{RuntimeError, SupervisorError, TaskError};
use crate::events::{Bus, Event, EventKind};
use crate::execution::{ExecutionStrategy, Executors, Launch, ServiceTask, Strategy, join_error};
use crate::messaging::{Channel, Content, Message, QueueRef};
use crate::services::{Registry, ServiceDescriptor};
use crate::subscribers::{Subscribe, SubscriberSet};

/// Sender label used on host-originated messages.
const SENDER: &str = "host";

/// Cloneable, idempotent trigger of a host-wide stop.
#[derive(Clone, Debug)]
pub struct StopHandle {
    requested: Arc<AtomicBool>,
    token: CancellationToken,
    bus: Bus,
}

impl StopHandle {
    fn new(bus: Bus) -> Self {
        Self {
            requested: Arc::new(AtomicBool::new(false)),
            token: CancellationToken::new(),
            bus,
        }
    }

    /// Asks the host to stop. Every call after the first is a no-op.
    pub fn request_stop(&self) {
        if self.requested.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("host stop requested");
        self.bus.publish(Event::new(EventKind::ShutdownRequested));
        self.token.cancel();
    }

    /// True once a stop was requested.
    pub fn is_stop_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    async fn stopped(&self) {
        self.token.cancelled().await
    }
}

/// One launched service.
struct Deployed {
    index: usize,
    descriptor: Arc<ServiceDescriptor>,
    channel: Channel,
    supervisor: JoinHandle<Result<(), SupervisorError>>,
    reports: JoinHandle<()>,
    task: ServiceTask,
}

/// Local supervision host.
pub struct Host {
    cfg: HostConfig,
    registry: Arc<Registry>,
    subscribers: Vec<Arc<dyn Subscribe>>,
    services: Vec<Arc<ServiceDescriptor>>,
    bus: Bus,
    stop: StopHandle,
    ran: AtomicBool,
    released_in_use: AtomicUsize,
}

impl Host {
    /// Starts building a host with the given configuration.
    pub fn builder(cfg: HostConfig) -> HostBuilder {
        HostBuilder::new(cfg)
    }

    pub(crate) fn new(cfg: HostConfig, registry: Registry, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        let bus = Bus::new(cfg.bus_capacity_clamped());
        Self {
            cfg,
            registry: Arc::new(registry),
            subscribers,
            services: Vec::new(),
            stop: StopHandle::new(bus.clone()),
            bus,
            ran: AtomicBool::new(false),
            released_in_use: AtomicUsize::new(0),
        }
    }

    /// Registers a service to launch on [`run`](Self::run).
    ///
    /// Fails on a duplicate service id, a type identifier the registry does not know, or
    /// when the host has already run.
    pub fn add(&mut self, descriptor: ServiceDescriptor) -> Result<(), RuntimeError> {
        if self.ran.load(Ordering::SeqCst) {
            return Err(RuntimeError::AlreadyRunning);
        }
        if self.services.iter().any(|d| d.id() == descriptor.id()) {
            return Err(RuntimeError::DuplicateService {
                id: descriptor.id().to_string(),
            });
        }
        if !self.registry.contains(descriptor.type_id()) {
            return Err(RuntimeError::UnknownServiceType {
                type_id: descriptor.type_id().to_string(),
            });
        }
        debug!(service_id = %descriptor.id(), mode = %descriptor.mode(), "service added");
        self.services.push(Arc::new(descriptor));
        Ok(())
    }

    /// Number of registered services.
    pub fn len(&self) -> usize {
        self.services.len()
    }

    /// True if no service is registered.
    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    /// Configuration of this host.
    pub fn config(&self) -> &HostConfig {
        &self.cfg
    }

    /// Receiver of every runtime event published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.bus.subscribe()
    }

    /// Handle that stops this host from anywhere.
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Asks the host to stop. Idempotent.
    pub fn request_stop(&self) {
        self.stop.request_stop();
    }

    /// Runs the host on its own current-thread runtime until stopped.
    ///
    /// Blocks the calling thread; must not be called from inside an async runtime.
    pub fn run(&self) -> Result<(), RuntimeError> {
        let rt = tokio::runtime::Builder::new_current_thread().enable_all().build()?;
        rt.block_on(self.run_async())
    }

    /// Runs the host on the current runtime until stopped.
    pub async fn run_async(&self) -> Result<(), RuntimeError> {
        if self.ran.swap(true, Ordering::SeqCst) {
            return Err(RuntimeError::AlreadyRunning);
        }

        let subs = Arc::new(SubscriberSet::new(self.subscribers.clone(), self.bus.clone()));
        let fanout_done = CancellationToken::new();
        let fanout = self.subscriber_listener(&subs, fanout_done.clone());
        let signals = self.cfg.handle_signals.then(|| self.signal_listener());

        info!(services = self.services.len(), "host starting");
        let result = self.serve().await;
        match &result {
            Ok(()) => info!("host stopped"),
            Err(e) => error!(error = %e, label = e.as_label(), "host stopped with error"),
        }

        if let Some(h) = signals {
            h.abort();
        }
        fanout_done.cancel();
        let _ = fanout.await;
        match Arc::try_unwrap(subs) {
            Ok(set) => set.shutdown().await,
            Err(_) => warn!("subscriber set still shared at shutdown"),
        }
        result
    }

    /// Workers that still held a pool permit when the last run released its pools.
    ///
    /// Nonzero only after a grace overrun left thread workers detached.
    pub fn detached_workers(&self) -> usize {
        self.released_in_use.load(Ordering::SeqCst)
    }

    /// Subscribes to the bus and forwards events to the subscriber set until `done`.
    fn subscriber_listener(&self, set: &Arc<SubscriberSet>, done: CancellationToken) -> JoinHandle<()> {
        let mut rx = self.bus.subscribe();
        let set = Arc::clone(set);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    ev = rx.recv() => match ev {
                        Ok(ev) => set.emit(&ev),
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(skipped, "subscriber listener lagged behind the bus");
                        }
                        Err(broadcast::error::RecvError::Closed) => return,
                    },
                    _ = done.cancelled() => break,
                }
            }
            while let Ok(ev) = rx.try_recv() {
                set.emit(&ev);
            }
        })
    }

    /// Turns every termination signal into `request_stop`.
    fn signal_listener(&self) -> JoinHandle<()> {
        let stop = self.stop.clone();
        tokio::spawn(async move {
            let mut signals = match SignalListener::install() {
                Ok(s) => s,
                Err(e) => {
                    warn!(error = %e, "cannot listen for termination signals");
                    return;
                }
            };
            loop {
                let signal = signals.next().await;
                if stop.is_stop_requested() {
                    debug!(%signal, "already stopping; signal ignored");
                } else {
                    info!(%signal, "termination signal received");
                    stop.request_stop();
                }
            }
        })
    }

    async fn serve(&self) -> Result<(), RuntimeError> {
        let mut executors = Executors::sized_for(self.services.iter().map(|d| &**d), &self.cfg).await?;
        debug!(
            threads = executors.thread_capacity(),
            processes = executors.process_capacity(),
            "pools sized"
        );

        let (failures_tx, mut failures_rx) = mpsc::unbounded_channel();
        let mut fleet = Vec::with_capacity(self.services.len());
        let mut launch_error = None;
        for (index, descriptor) in self.services.iter().enumerate() {
            match self.launch(index, descriptor, &mut executors, &failures_tx).await {
                Ok(deployed) => fleet.push(deployed),
                Err(e) => {
                    error!(service_id = %descriptor.id(), mode = %descriptor.mode(), error = %e, "launch failed");
                    launch_error = Some(e);
                    break;
                }
            }
        }

        let outcome = match launch_error {
            Some(e) => {
                self.stop.request_stop();
                Err(e)
            }
            None => self.watch(&mut fleet, &mut failures_rx, &failures_tx).await,
        };
        let drained = self.drain(fleet).await;

        self.released_in_use.store(executors.in_use(), Ordering::SeqCst);
        executors.release();
        outcome.and(drained)
    }

    async fn launch(
        &self,
        index: usize,
        descriptor: &Arc<ServiceDescriptor>,
        executors: &mut Executors,
        failures: &mpsc::UnboundedSender<usize>,
    ) -> Result<Deployed, RuntimeError> {
        let strategy = Strategy::for_mode(descriptor.mode());
        let channel = strategy.open_channel(executors, descriptor, &self.cfg).await?;

        let supervisor = tokio::spawn(self.supervisor(descriptor, &channel).run());
        let launch = Launch {
            descriptor: Arc::clone(descriptor),
            registry: Arc::clone(&self.registry),
            channel: channel.clone(),
        };
        let task = match strategy.start(executors, launch).await {
            Ok(task) => task,
            Err(e) => {
                supervisor.abort();
                return Err(e);
            }
        };

        info!(service_id = %descriptor.id(), mode = %descriptor.mode(), "service launched");
        self.bus.publish(
            Event::new(EventKind::ServiceLaunched)
                .with_service(descriptor.id().as_str())
                .with_mode(descriptor.mode()),
        );
        let reports = report_listener(index, Arc::clone(&channel.supervisor_to_host), failures.clone());
        Ok(Deployed {
            index,
            descriptor: Arc::clone(descriptor),
            channel,
            supervisor,
            reports,
            task,
        })
    }

    fn supervisor(&self, descriptor: &Arc<ServiceDescriptor>, channel: &Channel) -> Supervisor {
        Supervisor::new(
            Arc::clone(descriptor),
            channel.clone(),
            self.bus.clone(),
            self.cfg.tick_clamped(),
        )
    }

    /// Ticks until stop, replacing failed supervisors within the restart intensity.
    async fn watch(
        &self,
        fleet: &mut [Deployed],
        failures: &mut mpsc::UnboundedReceiver<usize>,
        failures_tx: &mpsc::UnboundedSender<usize>,
    ) -> Result<(), RuntimeError> {
        let mut intensity = Intensity::new(self.cfg.supervisor_intensity, self.cfg.supervisor_period);
        let tick = self.cfg.tick_clamped();

        loop {
            tokio::select! {
                _ = self.stop.stopped() => return Ok(()),
                Some(index) = failures.recv() => {
                    let Some(deployed) = fleet.iter_mut().find(|d| d.index == index) else {
                        continue;
                    };
                    let id = deployed.descriptor.id().to_string();
                    match intensity.evaluate() {
                        Verdict::Restart(failures_in_period) => {
                            let replacement = tokio::spawn(
                                self.supervisor(&deployed.descriptor, &deployed.channel)
                                    .resuming()
                                    .run(),
                            );
                            let failed = std::mem::replace(&mut deployed.supervisor, replacement);
                            // The failed supervisor already reported; it is finishing.
                            let _ = failed.await;
                            deployed.reports = report_listener(
                                index,
                                Arc::clone(&deployed.channel.supervisor_to_host),
                                failures_tx.clone(),
                            );
                            warn!(service_id = %id, failures = failures_in_period, "supervisor restarted");
                            self.bus.publish(
                                Event::new(EventKind::SupervisorRestarted)
                                    .with_service(id)
                                    .with_attempt(u32::try_from(failures_in_period).unwrap_or(u32::MAX)),
                            );
                        }
                        Verdict::Escalate => {
                            error!(service_id = %id, "supervisor restart intensity exceeded; stopping host");
                            self.stop.request_stop();
                            return Err(RuntimeError::SupervisorEscalation {
                                service: id,
                                failures: self.cfg.supervisor_intensity.saturating_add(1),
                            });
                        }
                    }
                }
                _ = time::sleep(tick) => {}
            }
        }
    }

    /// Broadcasts `stop` and waits for every supervisor and service within the grace period.
    async fn drain(&self, fleet: Vec<Deployed>) -> Result<(), RuntimeError> {
        for deployed in &fleet {
            deployed
                .channel
                .host_to_supervisor
                .send_async(Message::new(SENDER, Content::Stop))
                .await;
            if deployed.supervisor.is_finished() {
                // Nobody else will tell this service to stop.
                deployed
                    .channel
                    .supervisor_to_service
                    .send_async(Message::new(SENDER, Content::Stop))
                    .await;
            }
        }

        let mut set: JoinSet<(String, Result<(), TaskError>)> = JoinSet::new();
        let mut pending = BTreeSet::new();
        let mut aborts = Vec::new();
        let mut reports = Vec::new();
        for deployed in fleet {
            let id = deployed.descriptor.id().to_string();
            reports.push(deployed.reports);

            let label = format!("{id}/supervisor");
            pending.insert(label.clone());
            aborts.push(deployed.supervisor.abort_handle());
            let supervisor = deployed.supervisor;
            set.spawn(async move {
                let outcome = match supervisor.await {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(e)) => Err(TaskError::Lost { reason: e.to_string() }),
                    Err(e) => Err(join_error(e)),
                };
                (label, outcome)
            });

            let label = format!("{id}/service");
            pending.insert(label.clone());
            if let Some(abort) = deployed.task.abort_handle() {
                aborts.push(abort);
            }
            let task = deployed.task;
            set.spawn(async move { (label, task.join().await) });
        }

        let grace = self.cfg.grace;
        let all_done = async {
            while let Some(joined) = set.join_next().await {
                match joined {
                    Ok((label, outcome)) => {
                        pending.remove(&label);
                        self.settle(&label, outcome);
                    }
                    Err(e) => warn!(error = %e, "drain task failed"),
                }
            }
        };
        let timed = time::timeout(grace, all_done).await;

        for h in reports {
            h.abort();
        }
        match timed {
            Ok(()) => {
                info!("all services stopped within grace");
                self.bus.publish(Event::new(EventKind::AllStoppedWithin));
                Ok(())
            }
            Err(_) => {
                let stuck: Vec<String> = pending.into_iter().collect();
                error!(?grace, ?stuck, "grace exceeded; forcing termination");
                self.bus
                    .publish(Event::new(EventKind::GraceExceeded).with_reason(stuck.join(", ")));
                set.abort_all();
                for abort in aborts {
                    abort.abort();
                }
                while set.join_next().await.is_some() {}
                Err(RuntimeError::GraceExceeded { grace, stuck })
            }
        }
    }

    fn settle(&self, label: &str, outcome: Result<(), TaskError>) {
        match outcome {
            Ok(()) => debug!(task = label, "task finished"),
            Err(e) if e.is_cancellation() => debug!(task = label, "task cancelled"),
            Err(e) => {
                warn!(task = label, error = %e, label = e.as_label(), "task failed during drain");
                self.bus.publish(
                    Event::new(EventKind::TaskFailed)
                        .with_service(label)
                        .with_reason(e.to_string()),
                );
            }
        }
    }
}

/// Forwards a supervisor's `crashed` report to the host; ends on its `stopped`.
fn report_listener(index: usize, queue: QueueRef, failures: mpsc::UnboundedSender<usize>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let Some(msg) = queue.receive_async().await else {
                continue;
            };
            match msg.content {
                Content::Crashed => {
                    let _ = failures.send(index);
                    return;
                }
                Content::Stopped => return,
                other => warn!(sender = %msg.sender, content = %other, "dropping unexpected supervisor report"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use std::{sync::Mutex, time::Duration};

    use async_trait::async_trait;

    use super::*;
    use crate::error::ServiceError;
    use crate::execution::ExecutionMode;
    use crate::policies::RestartPolicy;
    use crate::services::{Service, ServiceContext};

    struct Idle;

    #[async_trait]
    impl Service for Idle {
        fn run(&mut self, ctx: &ServiceContext) -> Result<(), ServiceError> {
            while !ctx.wait_for_stop(Duration::from_millis(50)) {}
            Ok(())
        }

        async fn run_async(&mut self, ctx: &ServiceContext) -> Result<(), ServiceError> {
            ctx.stopped().await;
            Ok(())
        }
    }

    struct Broken;

    #[async_trait]
    impl Service for Broken {
        async fn run_async(&mut self, _ctx: &ServiceContext) -> Result<(), ServiceError> {
            Err(ServiceError::fail("always"))
        }
    }

    /// Takes a while to wind down once asked to stop.
    struct Lingering;

    #[async_trait]
    impl Service for Lingering {
        async fn run_async(&mut self, ctx: &ServiceContext) -> Result<(), ServiceError> {
            ctx.stopped().await;
            time::sleep(Duration::from_millis(500)).await;
            Ok(())
        }
    }

    fn registry() -> Registry {
        Registry::new()
            .with("idle", |(): ()| Ok(Idle))
            .with("broken", |(): ()| Ok(Broken))
            .with("lingering", |(): ()| Ok(Lingering))
    }

    fn cfg() -> HostConfig {
        HostConfig {
            tick: Duration::from_millis(20),
            receive_timeout: Duration::from_millis(50),
            grace: Duration::from_secs(10),
            handle_signals: false,
            ..HostConfig::default()
        }
    }

    fn idle(id: &str, mode: ExecutionMode) -> ServiceDescriptor {
        ServiceDescriptor::builder("idle").id(id).mode(mode).build().unwrap()
    }

    fn drain_kinds(rx: &mut broadcast::Receiver<Event>) -> Vec<EventKind> {
        let mut kinds = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            kinds.push(ev.kind);
        }
        kinds
    }

    #[tokio::test]
    async fn test_three_modes_run_and_stop() {
        let host = Host::builder(cfg())
            .registry(registry())
            .service(idle("inline", ExecutionMode::InlineAsync))
            .service(idle("thread", ExecutionMode::ThreadSync))
            .service(idle("thread-rt", ExecutionMode::ThreadAsync))
            .build()
            .unwrap();
        let mut events = host.subscribe();

        let stop = host.stop_handle();
        tokio::spawn(async move {
            time::sleep(Duration::from_millis(300)).await;
            stop.request_stop();
        });
        host.run_async().await.unwrap();

        assert_eq!(host.detached_workers(), 0);
        let kinds = drain_kinds(&mut events);
        let count = |k: EventKind| kinds.iter().filter(|x| **x == k).count();
        assert_eq!(count(EventKind::ServiceLaunched), 3);
        assert_eq!(count(EventKind::ServiceStarted), 3);
        assert_eq!(count(EventKind::ServiceStopped), 3);
        assert_eq!(count(EventKind::SupervisorStopped), 3);
        assert_eq!(count(EventKind::AllStoppedWithin), 1);
        assert_eq!(count(EventKind::TaskFailed), 0);
    }

    #[test]
    fn test_blocking_run_from_plain_thread() {
        let host = Host::builder(cfg())
            .registry(registry())
            .service(idle("inline", ExecutionMode::InlineAsync))
            .service(idle("thread", ExecutionMode::ThreadSync))
            .build()
            .unwrap();

        let stop = host.stop_handle();
        let stopper = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(200));
            stop.request_stop();
        });
        host.run().unwrap();
        stopper.join().unwrap();
        assert_eq!(host.detached_workers(), 0);
    }

    #[tokio::test]
    async fn test_request_stop_is_idempotent() {
        let host = Host::builder(cfg()).registry(registry()).build().unwrap();
        let mut events = host.subscribe();
        let handle = host.stop_handle();

        host.request_stop();
        handle.request_stop();
        host.request_stop();
        assert!(handle.is_stop_requested());

        host.run_async().await.unwrap();
        let requested = drain_kinds(&mut events)
            .into_iter()
            .filter(|k| *k == EventKind::ShutdownRequested)
            .count();
        assert_eq!(requested, 1);
    }

    #[test]
    fn test_add_rejects_duplicates_and_unknown_types() {
        let mut host = Host::builder(cfg()).registry(registry()).build().unwrap();
        host.add(idle("a", ExecutionMode::InlineAsync)).unwrap();

        let err = host.add(idle("a", ExecutionMode::ThreadSync)).unwrap_err();
        assert_eq!(err.as_label(), "runtime_duplicate_service");

        let unknown = ServiceDescriptor::builder("ghost")
            .mode(ExecutionMode::InlineAsync)
            .build()
            .unwrap();
        let err = host.add(unknown).unwrap_err();
        assert_eq!(err.as_label(), "runtime_unknown_service_type");
        assert_eq!(host.len(), 1);
    }

    #[tokio::test]
    async fn test_second_run_is_rejected() {
        let host = Host::builder(cfg()).registry(registry()).build().unwrap();
        host.request_stop();
        host.run_async().await.unwrap();
        let err = host.run_async().await.unwrap_err();
        assert_eq!(err.as_label(), "runtime_already_running");
    }

    #[tokio::test]
    async fn test_failing_supervisor_escalates() {
        let mut cfg = cfg();
        cfg.supervisor_intensity = 1;
        let broken = ServiceDescriptor::builder("broken")
            .id("broken")
            .mode(ExecutionMode::InlineAsync)
            .restart(RestartPolicy::custom(|_| f64::NAN))
            .build()
            .unwrap();
        let host = Host::builder(cfg)
            .registry(registry())
            .service(broken)
            .service(idle("bystander", ExecutionMode::ThreadAsync))
            .build()
            .unwrap();
        let mut events = host.subscribe();

        let err = time::timeout(Duration::from_secs(10), host.run_async())
            .await
            .unwrap()
            .unwrap_err();
        match err {
            RuntimeError::SupervisorEscalation { service, failures } => {
                assert_eq!(service, "broken");
                assert_eq!(failures, 2);
            }
            other => panic!("unexpected {other:?}"),
        }
        let kinds = drain_kinds(&mut events);
        assert!(kinds.contains(&EventKind::SupervisorRestarted));
        assert!(kinds.contains(&EventKind::AllStoppedWithin));
        assert_eq!(host.detached_workers(), 0);
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<EventKind>>);

    #[async_trait]
    impl Subscribe for Recorder {
        async fn on_event(&self, ev: &Event) {
            self.0.lock().unwrap().push(ev.kind);
        }

        fn name(&self) -> &'static str {
            "recorder"
        }
    }

    #[tokio::test]
    async fn test_subscribers_see_the_drain() {
        let recorder = Arc::new(Recorder::default());
        let host = Host::builder(cfg())
            .registry(registry())
            .with_subscribers(vec![recorder.clone() as Arc<dyn Subscribe>])
            .service(idle("inline", ExecutionMode::InlineAsync))
            .build()
            .unwrap();
        let stop = host.stop_handle();
        tokio::spawn(async move {
            time::sleep(Duration::from_millis(100)).await;
            stop.request_stop();
        });
        host.run_async().await.unwrap();

        let seen = recorder.0.lock().unwrap().clone();
        assert!(seen.contains(&EventKind::ShutdownRequested));
        assert!(seen.contains(&EventKind::AllStoppedWithin));
    }

    #[cfg(unix)]
    async fn wait_for(rx: &mut broadcast::Receiver<Event>, kind: EventKind) {
        loop {
            match rx.recv().await {
                Ok(ev) if ev.kind == kind => return,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => panic!("bus closed before {kind:?}"),
            }
        }
    }

    #[cfg(unix)]
    fn raise_sigterm() {
        let status = std::process::Command::new("kill")
            .args(["-TERM", &std::process::id().to_string()])
            .status()
            .unwrap();
        assert!(status.success());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_sigterm_requests_stop_once() {
        use tokio::signal::unix::{SignalKind, signal};

        // Keeps SIGTERM from killing the test process whatever the timing.
        let _guard = signal(SignalKind::terminate()).unwrap();

        let host = Host::builder(HostConfig {
            handle_signals: true,
            ..cfg()
        })
        .registry(registry())
        .service(
            ServiceDescriptor::builder("lingering")
                .id("lingering")
                .mode(ExecutionMode::InlineAsync)
                .build()
                .unwrap(),
        )
        .build()
        .unwrap();
        let mut events = host.subscribe();
        let mut progress = host.subscribe();

        let signals = async {
            wait_for(&mut progress, EventKind::ServiceStarted).await;
            time::sleep(Duration::from_millis(100)).await;
            raise_sigterm();
            wait_for(&mut progress, EventKind::ShutdownRequested).await;
            // The service is still winding down: this one lands mid-drain.
            raise_sigterm();
        };
        let (result, ()) = time::timeout(Duration::from_secs(10), async { tokio::join!(host.run_async(), signals) })
            .await
            .unwrap();
        result.unwrap();
        assert!(host.stop_handle().is_stop_requested());

        let kinds = drain_kinds(&mut events);
        let count = |k: EventKind| kinds.iter().filter(|x| **x == k).count();
        assert_eq!(count(EventKind::ShutdownRequested), 1);
        assert_eq!(count(EventKind::AllStoppedWithin), 1);
        assert_eq!(count(EventKind::GraceExceeded), 0);
    }
}
