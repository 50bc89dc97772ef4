//! # Service registry: serialize / reconstruct by type identifier.
//!
//! The registry maps a type identifier to a typed factory. The host serializes a
//! service's constructor state once (into the descriptor); every service start, in
//! whichever thread or process it happens, rebuilds the service from that state:
//!
//! ```text
//! host:    Registry::serialize_state(&Config { .. })  ─►  StateBlob  ─►  descriptor
//! worker:  registry.reconstruct(&blob, "billing")     ─►  factory(Config)  ─►  Box<dyn Service>
//! ```
//!
//! There is no global instance. The host carries an `Arc<Registry>` into inline and
//! thread services; worker processes build their own registry in `main` and hand it to
//! [`run_worker_if_requested`](crate::run_worker_if_requested).

use std::{collections::HashMap, fmt, sync::Arc};

use serde::{Serialize, de::DeserializeOwned};

use crate::error::ServiceError;

use super::{descriptor::StateBlob, service::Service};

type Factory = Arc<dyn Fn(&StateBlob) -> Result<Box<dyn Service>, ServiceError> + Send + Sync>;

/// Type identifier → factory map.
#[derive(Clone, Default)]
pub struct Registry {
    factories: HashMap<String, Factory>,
}

impl Registry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a factory building `S` from its deserialized state `T`.
    ///
    /// Registering the same type identifier twice replaces the earlier factory.
    pub fn register<T, S, F>(&mut self, type_id: impl Into<String>, factory: F) -> &mut Self
    where
        T: DeserializeOwned + 'static,
        S: Service,
        F: Fn(T) -> Result<S, ServiceError> + Send + Sync + 'static,
    {
        let f: Factory = Arc::new(move |blob: &StateBlob| {
            let state: T = serde_json::from_str(blob.as_str())?;
            let service = factory(state)?;
            Ok(Box::new(service) as Box<dyn Service>)
        });
        self.factories.insert(type_id.into(), f);
        self
    }

    /// By-value form of [`register`](Self::register) for chaining.
    pub fn with<T, S, F>(mut self, type_id: impl Into<String>, factory: F) -> Self
    where
        T: DeserializeOwned + 'static,
        S: Service,
        F: Fn(T) -> Result<S, ServiceError> + Send + Sync + 'static,
    {
        self.register(type_id, factory);
        self
    }

    /// Serializes constructor state into an opaque blob.
    pub fn serialize_state<T: Serialize + ?Sized>(state: &T) -> Result<StateBlob, ServiceError> {
        Ok(StateBlob::from_json(serde_json::to_string(state)?))
    }

    /// Builds a fresh service instance of `type_id` from `blob`.
    pub fn reconstruct(&self, blob: &StateBlob, type_id: &str) -> Result<Box<dyn Service>, ServiceError> {
        let factory = self.factories.get(type_id).ok_or_else(|| ServiceError::UnknownType {
            type_id: type_id.to_string(),
        })?;
        factory(blob)
    }

    /// True if a factory is registered under `type_id`.
    pub fn contains(&self, type_id: &str) -> bool {
        self.factories.contains_key(type_id)
    }

    /// Number of registered types.
    pub fn len(&self) -> usize {
        self.factories.len()
    }

    /// True if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut types: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        types.sort_unstable();
        f.debug_struct("Registry").field("types", &types).finish()
    }
}
