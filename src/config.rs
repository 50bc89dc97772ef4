//! # Host runtime configuration.
//!
//! Provides [`HostConfig`] centralized settings for the host, its supervisors and the
//! queues they read from.
//!
//! ## Sentinel values
//! - `grace = 0s` → do not wait during drain (abort immediately)
//! - `supervisor_intensity = 0` → a single supervisor failure stops the host
//! - `worker.program = None` → worker processes re-execute the current binary

use std::{ffi::OsString, path::PathBuf, time::Duration};

/// Global configuration for a [`Host`](crate::Host).
///
/// ## Field semantics
/// - `tick`: Host main-loop and supervision-loop polling interval
/// - `receive_timeout`: Bounded wait of every queue `receive` call
/// - `grace`: Maximum wait for supervisors and services to finish during drain
/// - `bus_capacity`: Event bus ring buffer size (min 1; clamped by Bus)
/// - `handle_signals`: Whether `run` installs the SIGINT/SIGTERM listener
/// - `connect_timeout`: How long a freshly spawned worker process has to connect back
/// - `supervisor_intensity` / `supervisor_period`: escalation limit for failing supervisors
/// - `worker`: command line used to launch worker processes
///
/// ## Notes
/// All fields are public for flexibility. Prefer using helper accessors to avoid
/// sprinkling sentinel checks (`0`) across the codebase.
#[derive(Clone, Debug)]
pub struct HostConfig {
    /// Polling interval of the host main loop and of every supervision loop.
    ///
    /// Bounds the latency of stop propagation and crash detection.
    pub tick: Duration,

    /// Bounded wait used by `Queue::receive` / `Queue::receive_async` (at least 1ms).
    pub receive_timeout: Duration,

    /// Maximum time to wait for graceful drain before force-terminating.
    ///
    /// When the host stops:
    /// - `stop` is sent on every host→supervisor queue
    /// - Host waits up to `grace` for supervisors and services to exit
    /// - If the wait times out, returns `RuntimeError::GraceExceeded`
    pub grace: Duration,

    /// Capacity of the event bus broadcast channel ring buffer.
    pub bus_capacity: usize,

    /// Map SIGINT/SIGTERM (Ctrl-C elsewhere) to `request_stop()` while running.
    pub handle_signals: bool,

    /// Time a worker process has to connect back and say hello.
    pub connect_timeout: Duration,

    /// Number of supervisor restarts tolerated within `supervisor_period`.
    pub supervisor_intensity: usize,

    /// Sliding window for `supervisor_intensity`.
    pub supervisor_period: Duration,

    /// Command used to launch process-mode workers.
    pub worker: WorkerCommand,
}

impl HostConfig {
    /// Returns a bus capacity clamped to a minimum of 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }

    /// Returns the tick clamped to at least one millisecond.
    ///
    /// A zero tick would turn every polling loop into a busy loop.
    #[inline]
    pub fn tick_clamped(&self) -> Duration {
        self.tick.max(Duration::from_millis(1))
    }

    /// Returns the queue receive wait clamped to at least one millisecond.
    ///
    /// Listeners loop on `receive`; a zero wait would make them spin.
    #[inline]
    pub fn receive_timeout_clamped(&self) -> Duration {
        self.receive_timeout.max(Duration::from_millis(1))
    }
}

impl Default for HostConfig {
    /// Default configuration:
    ///
    /// - `tick = 1s`
    /// - `receive_timeout = 1s`
    /// - `grace = 60s`
    /// - `bus_capacity = 1024`
    /// - `handle_signals = true`
    /// - `connect_timeout = 10s`
    /// - `supervisor_intensity = 3` over `supervisor_period = 60s`
    /// - `worker = WorkerCommand::default()` (current executable, no arguments)
    fn default() -> Self {
        Self {
            tick: Duration::from_secs(1),
            receive_timeout: Duration::from_secs(1),
            grace: Duration::from_secs(60),
            bus_capacity: 1024,
            handle_signals: true,
            connect_timeout: Duration::from_secs(10),
            supervisor_intensity: 3,
            supervisor_period: Duration::from_secs(60),
            worker: WorkerCommand::default(),
        }
    }
}

/// Command line of a worker process.
///
/// Workers are launched with the host's environment plus the broker variables, and must
/// call [`run_worker_if_requested`](crate::run_worker_if_requested) early in `main`.
#[derive(Clone, Debug, Default)]
pub struct WorkerCommand {
    /// Program to execute; `None` means the current executable.
    pub program: Option<PathBuf>,
    /// Extra arguments passed to the program.
    pub args: Vec<OsString>,
}

impl WorkerCommand {
    /// Worker command running `program` with `args`.
    pub fn new<I, S>(program: impl Into<PathBuf>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        Self {
            program: Some(program.into()),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Current executable with the given arguments.
    pub fn current_exe_with<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        Self {
            program: None,
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Resolves the program path.
    pub fn program(&self) -> std::io::Result<PathBuf> {
        match &self.program {
            Some(p) => Ok(p.clone()),
            None => std::env::current_exe(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = HostConfig::default();
        assert_eq!(cfg.tick, Duration::from_secs(1));
        assert_eq!(cfg.receive_timeout, Duration::from_secs(1));
        assert_eq!(cfg.grace, Duration::from_secs(60));
        assert!(cfg.handle_signals);
        assert!(cfg.worker.program.is_none());
    }

    #[test]
    fn test_clamps() {
        let cfg = HostConfig {
            bus_capacity: 0,
            tick: Duration::ZERO,
            receive_timeout: Duration::ZERO,
            ..HostConfig::default()
        };
        assert_eq!(cfg.bus_capacity_clamped(), 1);
        assert_eq!(cfg.tick_clamped(), Duration::from_millis(1));
        assert_eq!(cfg.receive_timeout_clamped(), Duration::from_millis(1));
    }

    #[test]
    fn test_worker_command_resolution() {
        let cmd = WorkerCommand::new("/bin/worker", ["--flag"]);
        assert_eq!(cmd.program().unwrap(), PathBuf::from("/bin/worker"));
        assert_eq!(cmd.args, vec![OsString::from("--flag")]);

        let own = WorkerCommand::current_exe_with(["x"]);
        assert_eq!(own.program().unwrap(), std::env::current_exe().unwrap());
    }
}
