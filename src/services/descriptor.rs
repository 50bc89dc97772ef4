//! # Service descriptors.
//!
//! A [`ServiceDescriptor`] is everything the host needs to run one service: identity,
//! execution mode, restart policy, the serialized constructor state and route metadata.
//! It is immutable once built by a [`DescriptorBuilder`].
//!
//! The part that crosses into worker processes is the [`Manifest`]; the restart policy and
//! the working directory stay with the host.

use std::{fmt, path::PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::RuntimeError;
use crate::execution::ExecutionMode;
use crate::policies::RestartPolicy;

use super::registry::Registry;

/// Unique id of a service (UUID v4 unless given explicitly).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServiceId(String);

impl ServiceId {
    /// Random id.
    pub fn random() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Borrowed form.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ServiceId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ServiceId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque serialized constructor state.
///
/// Produced by [`Registry::serialize_state`] and consumed by [`Registry::reconstruct`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StateBlob(String);

impl StateBlob {
    /// State of a service without constructor arguments.
    pub fn unit() -> Self {
        Self("null".to_string())
    }

    pub(crate) fn from_json(json: String) -> Self {
        Self(json)
    }

    /// Serialized form.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Route metadata. Opaque to the runtime; handed to the service through its context.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    /// e.g. `"http"`.
    pub protocol: String,
    /// e.g. `"/api/v1"`.
    pub path: String,
    /// Listening port.
    pub port: u16,
}

impl Route {
    /// Creates a route.
    pub fn new(protocol: impl Into<String>, path: impl Into<String>, port: u16) -> Self {
        Self {
            protocol: protocol.into(),
            path: path.into(),
            port,
        }
    }
}

/// Portable part of a descriptor: what a service wrapper needs to rehydrate and run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub(crate) struct Manifest {
    pub id: ServiceId,
    pub name: String,
    pub type_id: String,
    pub mode: ExecutionMode,
    pub state: StateBlob,
    pub routes: Vec<Route>,
}

/// Immutable description of one supervised service.
#[derive(Clone, Debug)]
pub struct ServiceDescriptor {
    manifest: Manifest,
    restart: RestartPolicy,
    root_directory: Option<PathBuf>,
}

impl ServiceDescriptor {
    /// Starts a builder for a service of the given registered type.
    pub fn builder(type_id: impl Into<String>) -> DescriptorBuilder {
        DescriptorBuilder::new(type_id)
    }

    /// Unique id.
    pub fn id(&self) -> &ServiceId {
        &self.manifest.id
    }

    /// Human-readable name.
    pub fn name(&self) -> &str {
        &self.manifest.name
    }

    /// Registry key used to rehydrate the service.
    pub fn type_id(&self) -> &str {
        &self.manifest.type_id
    }

    /// Execution mode.
    pub fn mode(&self) -> ExecutionMode {
        self.manifest.mode
    }

    /// Serialized constructor state.
    pub fn state(&self) -> &StateBlob {
        &self.manifest.state
    }

    /// Route metadata.
    pub fn routes(&self) -> &[Route] {
        &self.manifest.routes
    }

    /// Restart policy template; each supervisor works on a fresh copy.
    pub fn restart(&self) -> &RestartPolicy {
        &self.restart
    }

    /// Working directory of worker processes.
    pub fn root_directory(&self) -> Option<&PathBuf> {
        self.root_directory.as_ref()
    }

    pub(crate) fn manifest(&self) -> &Manifest {
        &self.manifest
    }
}

/// Builder for [`ServiceDescriptor`].
///
/// The execution mode is required; everything else has a default:
/// - `id`: random UUID v4
/// - `name`: the type identifier
/// - `restart`: [`RestartPolicy::default`] (exponential backoff)
/// - `state`: unit (`null`)
pub struct DescriptorBuilder {
    type_id: String,
    id: Option<ServiceId>,
    name: Option<String>,
    mode: Option<ExecutionMode>,
    restart: RestartPolicy,
    state: Result<StateBlob, String>,
    routes: Vec<Route>,
    root_directory: Option<PathBuf>,
}

impl DescriptorBuilder {
    fn new(type_id: impl Into<String>) -> Self {
        Self {
            type_id: type_id.into(),
            id: None,
            name: None,
            mode: None,
            restart: RestartPolicy::default(),
            state: Ok(StateBlob::unit()),
            routes: Vec::new(),
            root_directory: None,
        }
    }

    /// Sets an explicit id.
    pub fn id(mut self, id: impl Into<ServiceId>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Sets the human-readable name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the execution mode.
    pub fn mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = Some(mode);
        self
    }

    /// Sets the restart policy.
    pub fn restart(mut self, policy: RestartPolicy) -> Self {
        self.restart = policy;
        self
    }

    /// Serializes the constructor state; failures surface from [`build`](Self::build).
    pub fn state<T: Serialize + ?Sized>(mut self, state: &T) -> Self {
        self.state = Registry::serialize_state(state).map_err(|e| e.to_string());
        self
    }

    /// Sets an already serialized state.
    pub fn state_blob(mut self, blob: StateBlob) -> Self {
        self.state = Ok(blob);
        self
    }

    /// Adds a route.
    pub fn route(mut self, protocol: impl Into<String>, path: impl Into<String>, port: u16) -> Self {
        self.routes.push(Route::new(protocol, path, port));
        self
    }

    /// Sets the working directory of worker processes.
    pub fn root_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.root_directory = Some(dir.into());
        self
    }

    /// Validates and builds the descriptor.
    pub fn build(self) -> Result<ServiceDescriptor, RuntimeError> {
        let mode = self.mode.ok_or_else(|| RuntimeError::InvalidDescriptor {
            reason: format!("service type {:?} has no execution mode", self.type_id),
        })?;
        if self.type_id.trim().is_empty() {
            return Err(RuntimeError::InvalidDescriptor {
                reason: "empty type identifier".to_string(),
            });
        }
        let state = self
            .state
            .map_err(|reason| RuntimeError::InvalidDescriptor { reason })?;

        Ok(ServiceDescriptor {
            manifest: Manifest {
                id: self.id.unwrap_or_else(ServiceId::random),
                name: self.name.unwrap_or_else(|| self.type_id.clone()),
                type_id: self.type_id,
                mode,
                state,
                routes: self.routes,
            },
            restart: self.restart,
            root_directory: self.root_directory,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policies::RestartStrategy;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let d = ServiceDescriptor::builder("echo")
            .mode(ExecutionMode::InlineAsync)
            .build()
            .unwrap();
        assert_eq!(d.name(), "echo");
        assert_eq!(d.state(), &StateBlob::unit());
        assert!(uuid::Uuid::parse_str(d.id().as_str()).is_ok());
        assert!(matches!(d.restart().strategy, RestartStrategy::ExponentialBackoff));
        assert!(d.root_directory().is_none());
    }

    #[test]
    fn test_missing_mode_is_rejected() {
        let err = ServiceDescriptor::builder("echo").build().unwrap_err();
        assert_eq!(err.as_label(), "runtime_invalid_descriptor");
    }

    #[test]
    fn test_unserializable_state_is_rejected() {
        let mut bad = HashMap::new();
        bad.insert((1, 2), "tuple keys are not valid json object keys");
        let err = ServiceDescriptor::builder("echo")
            .mode(ExecutionMode::ThreadSync)
            .state(&bad)
            .build()
            .unwrap_err();
        assert!(matches!(err, RuntimeError::InvalidDescriptor { .. }));
    }

    #[test]
    fn test_full_descriptor() {
        let d = ServiceDescriptor::builder("api")
            .id("api-1")
            .name("public api")
            .mode(ExecutionMode::ProcessAsync)
            .restart(RestartPolicy::new(RestartStrategy::LinearBackoff))
            .state(&("greeting", 3))
            .route("http", "/v1", 8080)
            .root_directory("/srv/api")
            .build()
            .unwrap();
        assert_eq!(d.id().as_str(), "api-1");
        assert_eq!(d.state().as_str(), r#"["greeting",3]"#);
        assert_eq!(d.routes(), &[Route::new("http", "/v1", 8080)]);
        assert_eq!(d.manifest().mode, ExecutionMode::ProcessAsync);
    }
}
