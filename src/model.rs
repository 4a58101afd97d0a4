//! Work items and plans.
//!
//! A [`Plan`] is an ordered sequence of [`WorkItem`]s plus the progress state
//! the orchestrator mutates while driving it: a cursor pointing at the next
//! item to consider and a counter of items still pending in the current batch.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;

use crate::error::PlanValidationError;
use crate::types::{CapabilityId, PlanId, WorkItemId};

/// Key/value parameters handed to a capability on activation.
pub type Parameters = serde_json::Map<String, Value>;

/// One schedulable unit of work bound to a capability instance.
#[derive(Debug, Clone)]
pub struct WorkItem {
    pub id: WorkItemId,
    pub plan_id: PlanId,
    pub capability: CapabilityId,
    pub batch: u32,
    /// Shared and immutable once the item is constructed.
    pub params: Arc<Parameters>,
    pub earliest_start: Option<DateTime<Utc>>,
    pub deadline: Option<DateTime<Utc>>,
}

impl WorkItem {
    pub fn new(
        plan_id: PlanId,
        id: impl Into<WorkItemId>,
        capability: impl Into<CapabilityId>,
        batch: u32,
    ) -> Self {
        Self {
            id: id.into(),
            plan_id,
            capability: capability.into(),
            batch,
            params: Arc::new(Parameters::new()),
            earliest_start: None,
            deadline: None,
        }
    }

    /// Replace the parameter map.
    pub fn with_params(mut self, params: Parameters) -> Self {
        self.params = Arc::new(params);
        self
    }

    /// Add a single parameter.
    pub fn with_param(mut self, key: impl Into<String>, value: Value) -> Self {
        Arc::make_mut(&mut self.params).insert(key.into(), value);
        self
    }

    pub fn not_before(mut self, earliest_start: DateTime<Utc>) -> Self {
        self.earliest_start = Some(earliest_start);
        self
    }

    pub fn due_by(mut self, deadline: DateTime<Utc>) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// An ordered sequence of work items for one logical run.
#[derive(Debug, Clone)]
pub struct Plan {
    id: PlanId,
    items: Vec<WorkItem>,
    cursor: usize,
    pending: usize,
}

impl Plan {
    /// Create a plan in its initial state (cursor and pending counter at zero).
    pub fn new(id: PlanId, items: Vec<WorkItem>) -> Self {
        Self {
            id,
            items,
            cursor: 0,
            pending: 0,
        }
    }

    pub fn builder() -> PlanBuilder {
        PlanBuilder::new()
    }

    pub fn id(&self) -> PlanId {
        self.id
    }

    pub fn items(&self) -> &[WorkItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Index of the next item to consider for batching.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Items dispatched in the current batch that have not reported back yet.
    pub fn pending(&self) -> usize {
        self.pending
    }

    pub fn is_complete(&self) -> bool {
        self.cursor >= self.items.len() && self.pending == 0
    }

    /// Check the structural rules a plan must satisfy before dispatch.
    ///
    /// Batch indices must start at 0 and form contiguous ascending runs
    /// (each index equals the previous one or the previous one plus one).
    pub fn validate(&self) -> Result<(), PlanValidationError> {
        let mut seen = HashSet::with_capacity(self.items.len());
        let mut previous: Option<u32> = None;

        for item in &self.items {
            if item.plan_id != self.id {
                return Err(PlanValidationError::ForeignItem {
                    item_id: item.id,
                    expected: self.id,
                    found: item.plan_id,
                });
            }

            if !seen.insert(item.id) {
                return Err(PlanValidationError::DuplicateItemId(item.id));
            }

            if let (Some(start), Some(deadline)) = (item.earliest_start, item.deadline) {
                if deadline < start {
                    return Err(PlanValidationError::DeadlineBeforeStart { item_id: item.id });
                }
            }

            match previous {
                None if item.batch != 0 => {
                    return Err(PlanValidationError::FirstBatchNotZero {
                        item_id: item.id,
                        found: item.batch,
                    });
                }
                Some(prev) if item.batch != prev && item.batch != prev + 1 => {
                    return Err(PlanValidationError::NonContiguousBatch {
                        item_id: item.id,
                        previous: prev,
                        found: item.batch,
                    });
                }
                _ => {}
            }
            previous = Some(item.batch);
        }

        Ok(())
    }

    pub(crate) fn item_at_cursor(&self) -> Option<&WorkItem> {
        self.items.get(self.cursor)
    }

    pub(crate) fn advance_cursor(&mut self) {
        if self.cursor < self.items.len() {
            self.cursor += 1;
        }
    }

    pub(crate) fn set_pending(&mut self, pending: usize) {
        self.pending = pending;
    }

    /// Record one completion; the counter never goes below zero.
    pub(crate) fn complete_one(&mut self) -> usize {
        self.pending = self.pending.saturating_sub(1);
        self.pending
    }
}

/// Assembles a plan, stamping its id into every item.
#[derive(Debug)]
pub struct PlanBuilder {
    id: PlanId,
    items: Vec<WorkItem>,
}

impl PlanBuilder {
    pub fn new() -> Self {
        Self::with_id(PlanId::new())
    }

    pub fn with_id(id: PlanId) -> Self {
        Self {
            id,
            items: Vec::new(),
        }
    }

    pub fn id(&self) -> PlanId {
        self.id
    }

    /// Append an item with no parameters.
    pub fn item(self, id: u64, capability: impl Into<CapabilityId>, batch: u32) -> Self {
        let item = WorkItem::new(self.id, id, capability, batch);
        self.push(item)
    }

    /// Append a fully configured item. Its plan id is overwritten with this plan's id.
    pub fn push(mut self, mut item: WorkItem) -> Self {
        item.plan_id = self.id;
        self.items.push(item);
        self
    }

    pub fn build(self) -> Plan {
        Plan::new(self.id, self.items)
    }
}

impl Default for PlanBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn plan_with_batches(batches: &[u32]) -> Plan {
        batches
            .iter()
            .enumerate()
            .fold(Plan::builder(), |builder, (i, batch)| {
                builder.item(i as u64, "echo-1", *batch)
            })
            .build()
    }

    #[test]
    fn test_builder_stamps_plan_id() {
        let foreign = PlanId::new();
        let builder = Plan::builder();
        let id = builder.id();
        let plan = builder
            .push(WorkItem::new(foreign, 1, "echo-1", 0))
            .item(2, "echo-1", 0)
            .build();

        assert_eq!(plan.id(), id);
        assert!(plan.items().iter().all(|item| item.plan_id == id));
        assert_eq!(plan.cursor(), 0);
        assert_eq!(plan.pending(), 0);
    }

    #[test]
    fn test_valid_contiguous_batches() {
        assert!(plan_with_batches(&[0, 0, 1, 1, 1, 2]).validate().is_ok());
        assert!(plan_with_batches(&[0, 1, 2]).validate().is_ok());
        assert!(plan_with_batches(&[]).validate().is_ok());
    }

    #[test]
    fn test_first_batch_must_be_zero() {
        let err = plan_with_batches(&[1, 1]).validate().unwrap_err();
        assert_eq!(
            err,
            PlanValidationError::FirstBatchNotZero {
                item_id: WorkItemId(0),
                found: 1
            }
        );
    }

    #[test]
    fn test_gap_in_batches_rejected() {
        let err = plan_with_batches(&[0, 2]).validate().unwrap_err();
        assert!(matches!(err, PlanValidationError::NonContiguousBatch { found: 2, .. }));
    }

    #[test]
    fn test_descending_batches_rejected() {
        let err = plan_with_batches(&[0, 1, 0]).validate().unwrap_err();
        assert!(matches!(
            err,
            PlanValidationError::NonContiguousBatch {
                previous: 1,
                found: 0,
                ..
            }
        ));
    }

    #[test]
    fn test_duplicate_item_id_rejected() {
        let plan = Plan::builder()
            .item(1, "echo-1", 0)
            .item(1, "echo-1", 0)
            .build();
        assert_eq!(
            plan.validate().unwrap_err(),
            PlanValidationError::DuplicateItemId(WorkItemId(1))
        );
    }

    #[test]
    fn test_deadline_before_start_rejected() {
        let now = Utc::now();
        let builder = Plan::builder();
        let id = builder.id();
        let plan = builder
            .push(
                WorkItem::new(id, 1, "echo-1", 0)
                    .not_before(now)
                    .due_by(now - Duration::seconds(5)),
            )
            .build();
        assert_eq!(
            plan.validate().unwrap_err(),
            PlanValidationError::DeadlineBeforeStart { item_id: WorkItemId(1) }
        );
    }

    #[test]
    fn test_foreign_item_rejected() {
        let plan = Plan::new(
            PlanId::new(),
            vec![WorkItem::new(PlanId::new(), 1, "echo-1", 0)],
        );
        assert!(matches!(
            plan.validate().unwrap_err(),
            PlanValidationError::ForeignItem { .. }
        ));
    }

    #[test]
    fn test_params_are_shared_not_copied() {
        let item = WorkItem::new(PlanId::new(), 1, "echo-1", 0)
            .with_param("message", json!("hello"));
        let copy = item.clone();
        assert!(Arc::ptr_eq(&item.params, &copy.params));
        assert_eq!(copy.params.get("message"), Some(&json!("hello")));
    }

    #[test]
    fn test_pending_counter_saturates_at_zero() {
        let mut plan = plan_with_batches(&[0]);
        plan.set_pending(1);
        assert_eq!(plan.complete_one(), 0);
        assert_eq!(plan.complete_one(), 0);
    }

    #[test]
    fn test_cursor_never_passes_end() {
        let mut plan = plan_with_batches(&[0]);
        plan.advance_cursor();
        plan.advance_cursor();
        assert_eq!(plan.cursor(), 1);
        assert!(plan.is_complete());
    }
}
