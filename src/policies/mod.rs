//! Restart policies.
//!
//! This module groups the knobs that control **how long** a supervisor waits before it
//! restarts a crashed service.
//!
//! ## Contents
//! - [`RestartStrategy`] which delay curve to follow (immediate / fixed / exponential / linear / custom)
//! - [`RestartPolicy`]   the stateful calculator owned by one supervisor
//! - [`CustomBackoff`]   user function of the attempt count
//!
//! ## Quick wiring
//! ```text
//! ServiceDescriptor { restart: RestartPolicy, .. }
//!      └─► core::supervisor::Supervisor uses:
//!           - backoff() + jitter() before sending `start`
//!           - reset() when the service acknowledges with `started`
//! ```

mod jitter;
mod restart;

pub use restart::{CustomBackoff, RestartPolicy, RestartStrategy};
