//! # Example: five_modes
//!
//! Runs one service in each execution mode under a single [`Host`]. Every service ticks,
//! and crashes on its third tick to show the supervisor restarting it with exponential
//! backoff. The process-mode services run in worker processes: this very binary,
//! re-entered through [`run_worker_if_requested`].
//!
//! ## Flow
//! ```text
//! main()
//!   ├─► run_worker_if_requested()   (Some → this is a worker; run its service, exit)
//!   ├─► Host::builder(cfg).registry(..).with_subscribers([LogWriter])
//!   ├─► .service(inline-async) .service(thread-sync) ... .service(process-async)
//!   └─► host.run()
//!         ├─► ServiceLaunched ×5, ServiceStarted ×5
//!         ├─► ServiceCrashed → RestartScheduled{delay≈1s} → RestartIssued → ServiceStarted
//!         └─► Ctrl-C / SIGTERM (or the 10s timer) → drain → AllStoppedWithin
//! ```
//!
//! ## Run
//! ```bash
//! RUST_LOG=info cargo run --example five_modes
//! ```

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use hostvisor::{
    ExecutionMode, Host, HostConfig, LogWriter, Registry, RestartPolicy, RestartStrategy, Service, ServiceContext,
    ServiceDescriptor, ServiceError, Subscribe, run_worker_if_requested,
};
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;

#[derive(Serialize, Deserialize)]
struct TickerState {
    every_ms: u64,
    crash_at: u32,
}

struct Ticker {
    state: TickerState,
    ticks: u32,
}

impl Ticker {
    fn tick(&mut self, ctx: &ServiceContext) -> Result<(), ServiceError> {
        self.ticks += 1;
        println!("[{}] tick {} ({})", ctx.name(), self.ticks, ctx.mode());
        if self.ticks == self.state.crash_at {
            return Err(ServiceError::fail(format!("{} crashed on tick {}", ctx.name(), self.ticks)));
        }
        Ok(())
    }
}

#[async_trait]
impl Service for Ticker {
    fn run(&mut self, ctx: &ServiceContext) -> Result<(), ServiceError> {
        while !ctx.wait_for_stop(Duration::from_millis(self.state.every_ms)) {
            self.tick(ctx)?;
        }
        Ok(())
    }

    async fn run_async(&mut self, ctx: &ServiceContext) -> Result<(), ServiceError> {
        loop {
            tokio::select! {
                _ = ctx.stopped() => return Ok(()),
                _ = tokio::time::sleep(Duration::from_millis(self.state.every_ms)) => self.tick(ctx)?,
            }
        }
    }
}

fn registry() -> Registry {
    Registry::new().with("ticker", |state: TickerState| Ok(Ticker { state, ticks: 0 }))
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // 1. Worker processes stop here.
    let registry = registry();
    if let Some(outcome) = run_worker_if_requested(&registry) {
        return Ok(outcome?);
    }

    // 2. Configure runtime (short tick, 5s grace period)
    let cfg = HostConfig {
        tick: Duration::from_millis(200),
        grace: Duration::from_secs(5),
        ..HostConfig::default()
    };
    let subs: Vec<Arc<dyn Subscribe>> = vec![Arc::new(LogWriter::new())];

    // 3. One ticker per execution mode
    let mut builder = Host::builder(cfg).registry(registry).with_subscribers(subs);
    for mode in ExecutionMode::ALL {
        builder = builder.service(
            ServiceDescriptor::builder("ticker")
                .name(format!("ticker-{mode}"))
                .mode(mode)
                .restart(RestartPolicy::new(RestartStrategy::ExponentialBackoff).with_max_backoff(Duration::from_secs(8)))
                .state(&TickerState {
                    every_ms: 500,
                    crash_at: 3,
                })
                .build()?,
        );
    }
    let host = builder.build()?;

    // 4. Stop after 10s unless a signal comes first
    let stop = host.stop_handle();
    std::thread::spawn(move || {
        std::thread::sleep(Duration::from_secs(10));
        stop.request_stop();
    });

    host.run()?;
    println!("all services stopped");
    Ok(())
}
