//! Inline strategy: the service wrapper is a task on the host's own scheduler.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::RuntimeError;
use crate::services::ServiceRunner;

use super::{ExecutionStrategy, Executors, Launch, ServiceTask};

/// `inline-async`: shares the host scheduler, suspends only at await points.
pub(crate) struct InlineStrategy;

#[async_trait]
impl ExecutionStrategy for InlineStrategy {
    async fn start(&self, _executors: &mut Executors, launch: Launch) -> Result<ServiceTask, RuntimeError> {
        let runner = ServiceRunner::new(
            Arc::new(launch.descriptor.manifest().clone()),
            launch.registry,
            launch.channel.service_endpoints(),
        );
        Ok(ServiceTask::Inline(tokio::spawn(runner.run_async())))
    }
}
