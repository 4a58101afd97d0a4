//! Built-in capabilities used by the command line runner and tests.

use async_trait::async_trait;
use std::time::Duration;

use super::{Activation, Capability};
use crate::model::Parameters;
use crate::types::CapabilityKind;

/// Succeeds immediately, echoing the `message` parameter.
pub struct EchoCapability {
    kind: CapabilityKind,
}

impl EchoCapability {
    pub fn new() -> Self {
        Self {
            kind: CapabilityKind::new("echo"),
        }
    }
}

impl Default for EchoCapability {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Capability for EchoCapability {
    fn kind(&self) -> &CapabilityKind {
        &self.kind
    }

    async fn activate(&self, params: &Parameters) -> Activation {
        let message = params
            .get("message")
            .and_then(|v| v.as_str())
            .unwrap_or("ok");
        Activation::success(message)
    }
}

/// Waits for `millis` milliseconds (default 0), then succeeds.
pub struct SleepCapability {
    kind: CapabilityKind,
}

impl SleepCapability {
    pub fn new() -> Self {
        Self {
            kind: CapabilityKind::new("sleep"),
        }
    }
}

impl Default for SleepCapability {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Capability for SleepCapability {
    fn kind(&self) -> &CapabilityKind {
        &self.kind
    }

    async fn activate(&self, params: &Parameters) -> Activation {
        let millis = match params.get("millis") {
            None => 0,
            Some(value) => match value.as_u64() {
                Some(millis) => millis,
                None => return Activation::failure(format!("invalid millis parameter: {}", value)),
            },
        };
        tokio::time::sleep(Duration::from_millis(millis)).await;
        Activation::success(format!("slept {}ms", millis))
    }
}

/// Always reports failure with the `reason` parameter.
pub struct FailCapability {
    kind: CapabilityKind,
}

impl FailCapability {
    pub fn new() -> Self {
        Self {
            kind: CapabilityKind::new("fail"),
        }
    }
}

impl Default for FailCapability {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Capability for FailCapability {
    fn kind(&self) -> &CapabilityKind {
        &self.kind
    }

    async fn activate(&self, params: &Parameters) -> Activation {
        let reason = params
            .get("reason")
            .and_then(|v| v.as_str())
            .unwrap_or("failed");
        Activation::failure(reason)
    }
}
