//! Runtime core: the host, its supervisors and shutdown.
//!
//! The public API of this module is [`Host`] (with [`HostBuilder`] and [`StopHandle`]).
//!
//! Internal modules:
//! - [`host`]: launches services, watches supervisors, drains on stop;
//! - [`supervisor`]: restarts one service per its restart policy;
//! - [`escalation`]: restart intensity of failed supervisors;
//! - [`shutdown`]: cross-platform termination signal handling;
//! - [`builder`]: host construction.

mod builder;
mod escalation;
mod host;
mod shutdown;
mod supervisor;

pub use builder::HostBuilder;
pub use host::{Host, StopHandle};
