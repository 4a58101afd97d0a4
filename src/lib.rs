// Data model
mod error;
mod model;
mod types;

// Actors
pub mod capability;
mod executor;
mod orchestrator;

// Application edge
pub mod config;
pub mod plan_file;

#[cfg(test)]
mod testing;

// Re-export key types
pub use capability::{Activation, Capability, CapabilityCatalog};
pub use config::{BatchSelection, OrchestratorConfig, TimingPolicy};
pub use error::{ExecutorError, OrchestratorError, OrchestratorResult, PlanValidationError};
pub use executor::{Completion, CompletionListener, ExecutorHandle, ExecutorStatus};
pub use model::{Parameters, Plan, PlanBuilder, WorkItem};
pub use orchestrator::{OrchestratorHandle, PlanEvent, PlanState, PlanStatus, validate_plan};
pub use types::{CapabilityId, CapabilityKind, ExecutorId, ListenerId, PlanId, WorkItemId};

/// Convenience function to start an orchestrator over the built-in capabilities.
pub fn spawn_with_builtins(config: OrchestratorConfig) -> OrchestratorHandle {
    OrchestratorHandle::spawn(CapabilityCatalog::with_builtins(), config)
}
