//! Error types used by the hostvisor runtime, its supervisors and services.
//!
//! This module defines the error enums surfaced by the crate:
//!
//! - [`RuntimeError`] errors raised by the host itself (build, scheduling, drain).
//! - [`ServiceError`] errors raised by a service body or by its rehydration.
//! - [`SupervisorError`] failures that end one supervisor and escalate to the host.
//! - [`PolicyError`] invalid delays produced by a restart policy.
//! - [`TaskError`] the drain-time outcome of one supervisor or service task.
//!
//! All types provide `as_label` for logs/metrics.

use std::time::Duration;
use thiserror::Error;

/// # Errors produced by the hostvisor runtime.
///
/// Build-time problems (invalid modes, duplicate services) are returned synchronously
/// from the builder or [`Host::add`](crate::Host::add); the remaining variants come out of
/// [`Host::run`](crate::Host::run).
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Execution mode string did not name one of the five modes.
    #[error("invalid execution mode: {value:?}")]
    InvalidExecutionMode {
        /// The rejected input.
        value: String,
    },

    /// Restart strategy string did not name a known strategy.
    #[error("invalid restart strategy: {value:?}")]
    InvalidRestartStrategy {
        /// The rejected input.
        value: String,
    },

    /// Descriptor is missing a required field or carries unserializable state.
    #[error("invalid service descriptor: {reason}")]
    InvalidDescriptor {
        /// What is wrong with it.
        reason: String,
    },

    /// A service with the same id was already added.
    #[error("service {id:?} already registered with this host")]
    DuplicateService {
        /// The conflicting id.
        id: String,
    },

    /// The descriptor's type identifier has no factory in the registry.
    #[error("no factory registered for service type {type_id:?}")]
    UnknownServiceType {
        /// The unknown type identifier.
        type_id: String,
    },

    /// `run` was called on a host that is already running (or ran).
    #[error("host is already running")]
    AlreadyRunning,

    /// Every permit of a worker pool is in use.
    #[error("{pool} pool exhausted (capacity {capacity})")]
    PoolExhausted {
        /// `"thread"` or `"process"`.
        pool: &'static str,
        /// Number of workers the pool was sized for.
        capacity: usize,
    },

    /// A worker process failed to connect back or to complete its handshake.
    #[error("worker handshake failed for service {service:?}: {reason}")]
    WorkerHandshake {
        /// Service id the worker was launched for.
        service: String,
        /// Failure description.
        reason: String,
    },

    /// Underlying I/O failure (runtime creation, thread/process spawn, sockets).
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Shutdown grace period was exceeded; some tasks remained stuck and had to be force-terminated.
    #[error("shutdown timeout {grace:?} exceeded; stuck: {stuck:?}; forcing termination")]
    GraceExceeded {
        /// The configured grace duration.
        grace: Duration,
        /// Labels of the tasks that did not shut down in time.
        stuck: Vec<String>,
    },

    /// A supervisor failed more often than the configured restart intensity allows.
    #[error("supervisor for service {service:?} failed {failures} times within its restart period")]
    SupervisorEscalation {
        /// Service whose supervisor kept failing.
        service: String,
        /// Failures counted inside the period.
        failures: usize,
    },
}

impl RuntimeError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use hostvisor::RuntimeError;
    /// use std::time::Duration;
    ///
    /// let err = RuntimeError::GraceExceeded { grace: Duration::from_secs(5), stuck: vec![] };
    /// assert_eq!(err.as_label(), "runtime_grace_exceeded");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            RuntimeError::InvalidExecutionMode { .. } => "runtime_invalid_execution_mode",
            RuntimeError::InvalidRestartStrategy { .. } => "runtime_invalid_restart_strategy",
            RuntimeError::InvalidDescriptor { .. } => "runtime_invalid_descriptor",
            RuntimeError::DuplicateService { .. } => "runtime_duplicate_service",
            RuntimeError::UnknownServiceType { .. } => "runtime_unknown_service_type",
            RuntimeError::AlreadyRunning => "runtime_already_running",
            RuntimeError::PoolExhausted { .. } => "runtime_pool_exhausted",
            RuntimeError::WorkerHandshake { .. } => "runtime_worker_handshake",
            RuntimeError::Io(_) => "runtime_io",
            RuntimeError::GraceExceeded { .. } => "runtime_grace_exceeded",
            RuntimeError::SupervisorEscalation { .. } => "runtime_supervisor_escalation",
        }
    }
}

/// # Errors produced by services.
///
/// Returned from [`Service::run`](crate::Service::run) / [`Service::run_async`](crate::Service::run_async)
/// (any error counts as a crash) and from [`Registry`](crate::Registry) operations.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ServiceError {
    /// Service body failed; the supervisor will restart it.
    #[error("service failed: {reason}")]
    Fail {
        /// Failure description.
        reason: String,
    },

    /// The body for this execution mode is not implemented by the service.
    #[error("service does not implement the {body} body")]
    Unsupported {
        /// `"blocking"` or `"async"`.
        body: &'static str,
    },

    /// No factory is registered under this type identifier.
    #[error("unknown service type {type_id:?}")]
    UnknownType {
        /// The unknown type identifier.
        type_id: String,
    },

    /// Constructor state could not be serialized or deserialized.
    #[error("service state error: {reason}")]
    State {
        /// Serializer message.
        reason: String,
    },
}

impl ServiceError {
    /// Convenience constructor for [`ServiceError::Fail`].
    pub fn fail(reason: impl Into<String>) -> Self {
        ServiceError::Fail {
            reason: reason.into(),
        }
    }

    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            ServiceError::Fail { .. } => "service_failed",
            ServiceError::Unsupported { .. } => "service_unsupported",
            ServiceError::UnknownType { .. } => "service_unknown_type",
            ServiceError::State { .. } => "service_state",
        }
    }
}

impl From<serde_json::Error> for ServiceError {
    fn from(e: serde_json::Error) -> Self {
        ServiceError::State {
            reason: e.to_string(),
        }
    }
}

/// # Invalid output of a restart policy.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PolicyError {
    /// The custom backoff function produced a delay that is negative, NaN, infinite or too large.
    #[error("custom backoff returned an invalid delay of {seconds} seconds (attempt {attempt})")]
    InvalidDelay {
        /// Value returned by the function.
        seconds: f64,
        /// Retry attempt it was called with.
        attempt: u32,
    },
}

/// # Failures that end a supervisor.
///
/// A supervisor that returns one of these reports `crashed` to the host, which applies its
/// escalation policy.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum SupervisorError {
    /// The restart policy could not produce a delay.
    #[error("restart policy failed: {0}")]
    Backoff(#[from] PolicyError),

    /// The supervision loop panicked.
    #[error("supervision loop panicked: {reason}")]
    Panicked {
        /// Panic payload, when it was a string.
        reason: String,
    },
}

impl SupervisorError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            SupervisorError::Backoff(_) => "supervisor_backoff",
            SupervisorError::Panicked { .. } => "supervisor_panicked",
        }
    }
}

/// # Outcome of a task that did not finish cleanly during drain.
///
/// Cancellation is treated as a normal outcome by the host; every other variant is logged.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum TaskError {
    /// Task was cancelled (aborted).
    #[error("task cancelled")]
    Canceled,

    /// Task panicked.
    #[error("task panicked: {reason}")]
    Panicked {
        /// Panic payload, when it was a string.
        reason: String,
    },

    /// Worker process exited with a non-success status.
    #[error("worker exited with status {code:?}")]
    Exited {
        /// Exit code, `None` when killed by a signal.
        code: Option<i32>,
    },

    /// Task ended without reporting a result.
    #[error("task lost: {reason}")]
    Lost {
        /// What happened.
        reason: String,
    },
}

impl TaskError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            TaskError::Canceled => "task_canceled",
            TaskError::Panicked { .. } => "task_panicked",
            TaskError::Exited { .. } => "task_exited",
            TaskError::Lost { .. } => "task_lost",
        }
    }

    /// True for outcomes the drain tolerates silently.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, TaskError::Canceled)
    }
}

/// Extracts a readable message out of a panic payload.
pub(crate) fn panic_reason(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labels_are_stable() {
        let err = RuntimeError::DuplicateService { id: "a".into() };
        assert_eq!(err.as_label(), "runtime_duplicate_service");
        assert_eq!(ServiceError::fail("x").as_label(), "service_failed");
        assert_eq!(TaskError::Canceled.as_label(), "task_canceled");
    }

    #[test]
    fn test_panic_reason_extracts_strings() {
        assert_eq!(panic_reason(Box::new("boom")), "boom");
        assert_eq!(panic_reason(Box::new(String::from("bang"))), "bang");
        assert_eq!(panic_reason(Box::new(7_u8)), "non-string panic payload");
    }

    #[test]
    fn test_serde_error_maps_to_state() {
        let err: ServiceError = serde_json::from_str::<u32>("nope").unwrap_err().into();
        assert_eq!(err.as_label(), "service_state");
    }
}
