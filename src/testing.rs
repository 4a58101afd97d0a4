//! Capabilities used only by tests.

#![cfg(test)]

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Semaphore;

use crate::capability::{Activation, Capability};
use crate::model::Parameters;
use crate::types::CapabilityKind;

/// Blocks each activation until a permit is added to its semaphore.
pub(crate) struct GateCapability {
    kind: CapabilityKind,
    permits: Arc<Semaphore>,
    succeed: bool,
}

impl GateCapability {
    pub(crate) fn new() -> (Self, Arc<Semaphore>) {
        Self::with_outcome(true)
    }

    pub(crate) fn with_outcome(succeed: bool) -> (Self, Arc<Semaphore>) {
        let permits = Arc::new(Semaphore::new(0));
        (
            Self {
                kind: CapabilityKind::new("gate"),
                permits: permits.clone(),
                succeed,
            },
            permits,
        )
    }
}

#[async_trait]
impl Capability for GateCapability {
    fn kind(&self) -> &CapabilityKind {
        &self.kind
    }

    async fn activate(&self, _params: &Parameters) -> Activation {
        match self.permits.acquire().await {
            Ok(permit) => permit.forget(),
            Err(_) => return Activation::failure("gate closed"),
        }
        if self.succeed {
            Activation::success("gate opened")
        } else {
            Activation::failure("gate opened")
        }
    }
}

/// Panics on every activation.
pub(crate) struct PanicCapability {
    kind: CapabilityKind,
}

impl PanicCapability {
    pub(crate) fn new() -> Self {
        Self {
            kind: CapabilityKind::new("panic"),
        }
    }
}

#[async_trait]
impl Capability for PanicCapability {
    fn kind(&self) -> &CapabilityKind {
        &self.kind
    }

    async fn activate(&self, _params: &Parameters) -> Activation {
        panic!("capability exploded");
    }
}
