//! # Worker-process entry point.
//!
//! A binary that hosts process-mode services calls [`run_worker_if_requested`] first thing
//! in `main`. In a normal launch it returns `None` and the binary continues; in a worker
//! launch (the host sets the environment below) it runs the one service it was spawned
//! for and returns its outcome.
//!
//! ```rust,ignore
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let registry = my_registry();
//!     if let Some(outcome) = hostvisor::run_worker_if_requested(&registry) {
//!         return Ok(outcome?);
//!     }
//!     // ... build and run the host ...
//! }
//! ```

use std::{
    env,
    io::{BufRead, BufReader, Write},
    net::TcpStream,
    sync::Arc,
    time::Duration,
};

use tracing::{debug, info};

use crate::error::RuntimeError;
use crate::messaging::{Content, LINK_SENDER, Link, Message, QueueKind, ServiceEndpoints};
use crate::services::{Registry, ServiceId, ServiceRunner};

use super::{ExecutionMode, process::Handshake};

/// Broker address (`host:port`) the worker connects back to.
pub const ENV_BROKER: &str = "HOSTVISOR_BROKER";
/// Per-run token the worker presents in its hello.
pub const ENV_TOKEN: &str = "HOSTVISOR_TOKEN";
/// Id of the service the worker was spawned for.
pub const ENV_SERVICE: &str = "HOSTVISOR_SERVICE";

/// Runs the requested service when this process was launched as a worker.
///
/// Returns `None` when the worker environment is absent. Otherwise blocks until the service
/// reported `stopped` (or the host went away) and returns `Some` with the outcome of the
/// handshake. Must be called outside of any async runtime.
pub fn run_worker_if_requested(registry: &Registry) -> Option<Result<(), RuntimeError>> {
    let broker = env::var(ENV_BROKER).ok()?;
    let token = env::var(ENV_TOKEN).unwrap_or_default();
    let service_id = ServiceId::from(env::var(ENV_SERVICE).unwrap_or_default());
    Some(run_worker(&broker, token, service_id, registry))
}

fn run_worker(broker: &str, token: String, service_id: ServiceId, registry: &Registry) -> Result<(), RuntimeError> {
    let fail = |reason: String| RuntimeError::WorkerHandshake {
        service: service_id.to_string(),
        reason,
    };

    let mut stream = TcpStream::connect(broker)?;
    let hello = Handshake::Hello {
        token,
        service_id: service_id.clone(),
    }
    .to_json_line()
    .map_err(|e| fail(e.to_string()))?;
    stream.write_all(hello.as_bytes())?;
    stream.flush()?;

    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    if reader.read_line(&mut line)? == 0 {
        return Err(fail("host closed the connection before bootstrap".to_string()));
    }
    let (manifest, wait) = match Handshake::from_json_line(&line).map_err(|e| fail(e.to_string()))? {
        Handshake::Bootstrap {
            manifest,
            receive_timeout_ms,
        } => (manifest, Duration::from_millis(receive_timeout_ms)),
        other => return Err(fail(format!("expected bootstrap, got {other:?}"))),
    };
    if manifest.id != service_id {
        return Err(fail(format!("bootstrap is for {}", manifest.id)));
    }
    if !manifest.mode.is_process() {
        return Err(RuntimeError::InvalidExecutionMode {
            value: manifest.mode.to_string(),
        });
    }
    info!(service_id = %manifest.id, mode = %manifest.mode, "worker bootstrapped");

    let link = Link::open(
        reader,
        service_id.to_string(),
        wait,
        Some((QueueKind::SupervisorToService, Message::new(LINK_SENDER, Content::Stop))),
    )?;
    let mode = manifest.mode;
    let runner = ServiceRunner::new(
        Arc::new(manifest),
        Arc::new(registry.clone()),
        ServiceEndpoints::over_link(&link),
    );

    match mode {
        ExecutionMode::ProcessAsync => {
            let rt = tokio::runtime::Builder::new_current_thread().enable_all().build()?;
            rt.block_on(runner.run_async());
        }
        _ => runner.run_blocking(),
    }

    link.close();
    debug!(service_id = %service_id, "worker finished");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_worker_environment() {
        if env::var_os(ENV_BROKER).is_none() {
            assert!(run_worker_if_requested(&Registry::default()).is_none());
        }
    }

    #[test]
    fn test_worker_rejects_mismatched_bootstrap() {
        use crate::services::{Manifest, StateBlob};

        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let host = std::thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut hello = String::new();
            reader.read_line(&mut hello).unwrap();
            let boot = Handshake::Bootstrap {
                manifest: Manifest {
                    id: ServiceId::from("someone-else"),
                    name: "x".into(),
                    type_id: "x".into(),
                    mode: ExecutionMode::ProcessSync,
                    state: StateBlob::unit(),
                    routes: Vec::new(),
                },
                receive_timeout_ms: 10,
            };
            let mut stream = stream;
            stream.write_all(boot.to_json_line().unwrap().as_bytes()).unwrap();
            hello
        });

        let err = run_worker(&addr, "tok".into(), ServiceId::from("svc"), &Registry::default()).unwrap_err();
        assert_eq!(err.as_label(), "runtime_worker_handshake");
        let hello = host.join().unwrap();
        assert!(hello.contains("\"service_id\":\"svc\""));
    }
}
