//! Error types for plan submission, executor messaging and configuration.

use thiserror::Error;

use crate::types::{CapabilityId, PlanId, WorkItemId};

/// Reasons a plan is rejected at submission time.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanValidationError {
    #[error("first item {item_id} has batch index {found}, batches must start at 0")]
    FirstBatchNotZero { item_id: WorkItemId, found: u32 },

    #[error("item {item_id} has batch index {found} after batch {previous}; indices must be contiguous and ascending")]
    NonContiguousBatch {
        item_id: WorkItemId,
        previous: u32,
        found: u32,
    },

    #[error("item {item_id} with batch index {found} would be dispatched together with batch {expected}")]
    MixedBatch {
        item_id: WorkItemId,
        expected: u32,
        found: u32,
    },

    #[error("item {item_id} has a deadline before its earliest start")]
    DeadlineBeforeStart { item_id: WorkItemId },

    #[error("duplicate item id {0} within plan")]
    DuplicateItemId(WorkItemId),

    #[error("item {item_id} belongs to plan {found}, not {expected}")]
    ForeignItem {
        item_id: WorkItemId,
        expected: PlanId,
        found: PlanId,
    },
}

/// Errors surfaced by the orchestrator handle.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("invalid plan: {0}")]
    InvalidPlan(#[from] PlanValidationError),

    #[error("plan {0} is already registered")]
    DuplicatePlan(PlanId),

    #[error("plan not found: {0}")]
    PlanNotFound(PlanId),

    #[error("no capability registered for id {0}")]
    UnknownCapability(CapabilityId),

    #[error("executor error: {0}")]
    Executor(#[from] ExecutorError),

    #[error("orchestrator is no longer running")]
    Stopped,
}

/// Errors surfaced by an executor handle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutorError {
    #[error("executor for capability {0} is no longer running")]
    Stopped(CapabilityId),
}

/// Result type for orchestrator operations.
pub type OrchestratorResult<T> = Result<T, OrchestratorError>;
