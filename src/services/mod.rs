//! Services: user code, its description, and how it is rebuilt in any execution context.
//!
//! ## Contents
//! - [`Service`] / [`ServiceContext`] the user-facing contract
//! - [`ServiceDescriptor`] / [`DescriptorBuilder`] immutable description of one service
//! - [`Registry`] type identifier → factory, with `serialize_state` / `reconstruct`
//! - `ServiceRunner` (internal) the lifecycle handshake run next to the service

mod descriptor;
mod registry;
mod runner;
mod service;

pub use descriptor::{DescriptorBuilder, Route, ServiceDescriptor, ServiceId, StateBlob};
pub use registry::Registry;
pub use service::{Service, ServiceContext};

pub(crate) use descriptor::Manifest;
pub(crate) use runner::ServiceRunner;
