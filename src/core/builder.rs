use std::sync::Arc;

use crate::{
    config::HostConfig,
    error::RuntimeError,
    services::{Registry, ServiceDescriptor},
    subscribers::Subscribe,
};
use super::host::Host;

/// Builder for constructing a [`Host`] with its registry, subscribers and services.
pub struct HostBuilder {
    cfg: HostConfig,
    registry: Registry,
    subscribers: Vec<Arc<dyn Subscribe>>,
    services: Vec<ServiceDescriptor>,
}

impl HostBuilder {
    /// Creates a new builder with the given configuration.
    pub fn new(cfg: HostConfig) -> Self {
        Self {
            cfg,
            registry: Registry::default(),
            subscribers: Vec::new(),
            services: Vec::new(),
        }
    }

    /// Sets the registry used to rebuild inline and thread services.
    ///
    /// Worker processes rebuild services from the registry handed to
    /// [`run_worker_if_requested`](crate::run_worker_if_requested) instead.
    pub fn registry(mut self, registry: Registry) -> Self {
        self.registry = registry;
        self
    }

    /// Sets event subscribers for observability.
    ///
    /// Subscribers receive runtime events (launches, acknowledgments, restarts, drain)
    /// through dedicated workers with bounded queues.
    pub fn with_subscribers(mut self, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        self.subscribers = subscribers;
        self
    }

    /// Queues a service; validated by [`build`](Self::build).
    pub fn service(mut self, descriptor: ServiceDescriptor) -> Self {
        self.services.push(descriptor);
        self
    }

    /// Builds the host, rejecting duplicate ids and unregistered type identifiers.
    ///
    /// Nothing is spawned here; the event fan-out and the pools start with
    /// [`Host::run`].
    pub fn build(self) -> Result<Host, RuntimeError> {
        let mut host = Host::new(self.cfg, self.registry, self.subscribers);
        for descriptor in self.services {
            host.add(descriptor)?;
        }
        Ok(host)
    }
}
