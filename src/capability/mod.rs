//! Capability boundary.
//!
//! Provides the `Capability` trait implemented by the components that do the
//! actual work, and a `CapabilityCatalog` mapping capability instance ids to
//! those components.

pub mod builtin;

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use crate::model::Parameters;
use crate::types::{CapabilityId, CapabilityKind};

pub use builtin::{EchoCapability, FailCapability, SleepCapability};

/// Outcome of one capability activation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Activation {
    pub success: bool,
    pub message: String,
}

impl Activation {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

/// A component that performs one kind of work.
///
/// Failures are reported through `Activation::success == false`, never by
/// returning an error.
#[async_trait]
pub trait Capability: Send + Sync {
    /// Returns the kind of work this capability performs.
    fn kind(&self) -> &CapabilityKind;

    /// Activates the capability with the given parameters.
    async fn activate(&self, params: &Parameters) -> Activation;
}

/// Registry of capability instances, keyed by instance identity.
#[derive(Clone, Default)]
pub struct CapabilityCatalog {
    capabilities: HashMap<CapabilityId, Arc<dyn Capability>>,
}

impl CapabilityCatalog {
    /// Create a new empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Catalog with one instance of each built-in capability, registered
    /// under its kind name.
    pub fn with_builtins() -> Self {
        Self::new()
            .register("echo", Arc::new(EchoCapability::new()))
            .register("sleep", Arc::new(SleepCapability::new()))
            .register("fail", Arc::new(FailCapability::new()))
    }

    /// Register a capability instance.
    pub fn register(mut self, id: impl Into<CapabilityId>, capability: Arc<dyn Capability>) -> Self {
        self.capabilities.insert(id.into(), capability);
        self
    }

    /// Register a capability from a type that implements `Capability`.
    pub fn register_capability<T: Capability + 'static>(
        self,
        id: impl Into<CapabilityId>,
        capability: T,
    ) -> Self {
        self.register(id, Arc::new(capability))
    }

    pub fn get(&self, id: &CapabilityId) -> Option<Arc<dyn Capability>> {
        self.capabilities.get(id).cloned()
    }

    pub fn contains(&self, id: &CapabilityId) -> bool {
        self.capabilities.contains_key(id)
    }

    /// List all registered capability ids.
    pub fn ids(&self) -> Vec<CapabilityId> {
        self.capabilities.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.capabilities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.capabilities.is_empty()
    }
}

impl std::fmt::Debug for CapabilityCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityCatalog")
            .field("ids", &self.capabilities.keys().collect::<Vec<_>>())
            .finish()
    }
}
