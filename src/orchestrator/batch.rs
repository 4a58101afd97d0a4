//! Batch segmentation.
//!
//! Given a plan's items and its cursor, decide which items form the next
//! batch. Both selection rules only ever look forward from the cursor, so the
//! cursor never moves backwards.

use std::ops::Range;

use crate::config::BatchSelection;
use crate::error::PlanValidationError;
use crate::model::{Plan, WorkItem};

/// The next batch as a range of item positions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct BatchRange {
    pub range: Range<usize>,
    /// Set when the rule matched nothing and the item at the cursor was
    /// taken on its own.
    pub fallback: bool,
}

/// Compute the next batch starting at `cursor`. `None` once the cursor is past the end.
pub(crate) fn next_batch_range(
    items: &[WorkItem],
    cursor: usize,
    rule: BatchSelection,
) -> Option<BatchRange> {
    if cursor >= items.len() {
        return None;
    }

    let mut end = cursor;
    match rule {
        BatchSelection::PositionCoupled => {
            while end < items.len() && items[end].batch as usize == end {
                end += 1;
            }
        }
        BatchSelection::ContiguousRun => {
            let batch = items[cursor].batch;
            while end < items.len() && items[end].batch == batch {
                end += 1;
            }
        }
    }

    if end == cursor {
        return Some(BatchRange {
            range: cursor..cursor + 1,
            fallback: true,
        });
    }

    Some(BatchRange {
        range: cursor..end,
        fallback: false,
    })
}

/// Selected items of the next batch, cloned out of the plan.
#[derive(Debug)]
pub(crate) struct Selection {
    pub items: Vec<WorkItem>,
    pub fallback: bool,
}

/// Advance the plan's cursor past the next batch and set its pending counter.
pub(crate) fn select_next_batch(plan: &mut Plan, rule: BatchSelection) -> Option<Selection> {
    let next = next_batch_range(plan.items(), plan.cursor(), rule)?;
    let items = plan.items()[next.range.clone()].to_vec();

    for _ in next.range {
        plan.advance_cursor();
    }
    plan.set_pending(items.len());

    Some(Selection {
        items,
        fallback: next.fallback,
    })
}

/// Reject plans for which `rule` would put items with different batch
/// indices into the same dispatch.
pub(crate) fn check_rule(plan: &Plan, rule: BatchSelection) -> Result<(), PlanValidationError> {
    let items = plan.items();
    let mut cursor = 0;

    while let Some(next) = next_batch_range(items, cursor, rule) {
        let head = &items[next.range.start];
        if let Some(stray) = items[next.range.clone()]
            .iter()
            .find(|item| item.batch != head.batch)
        {
            return Err(PlanValidationError::MixedBatch {
                item_id: stray.id,
                expected: head.batch,
                found: stray.batch,
            });
        }
        cursor = next.range.end;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::WorkItemId;

    fn plan(batches: &[u32]) -> Plan {
        batches
            .iter()
            .enumerate()
            .fold(Plan::builder(), |builder, (i, batch)| {
                builder.item(i as u64, "echo", *batch)
            })
            .build()
    }

    fn segments(batches: &[u32], rule: BatchSelection) -> Vec<(Range<usize>, bool)> {
        let p = plan(batches);
        let mut cursor = 0;
        let mut out = Vec::new();
        while let Some(next) = next_batch_range(p.items(), cursor, rule) {
            cursor = next.range.end;
            out.push((next.range, next.fallback));
        }
        out
    }

    #[test]
    fn test_contiguous_run_groups_shared_indices() {
        assert_eq!(
            segments(&[0, 0, 1, 2, 2, 2], BatchSelection::ContiguousRun),
            vec![(0..2, false), (2..3, false), (3..6, false)]
        );
    }

    #[test]
    fn test_position_coupled_follows_cursor_position() {
        // Index 0 matches position 0; the second index-0 item sits at position 1,
        // so nothing matches and the fallback takes it alone.
        assert_eq!(
            segments(&[0, 0, 1], BatchSelection::PositionCoupled),
            vec![(0..1, false), (1..2, true), (2..3, true)]
        );
    }

    #[test]
    fn test_position_coupled_merges_ascending_singletons() {
        assert_eq!(
            segments(&[0, 1, 2], BatchSelection::PositionCoupled),
            vec![(0..3, false)]
        );
    }

    #[test]
    fn test_empty_plan_has_no_batch() {
        assert!(next_batch_range(&[], 0, BatchSelection::ContiguousRun).is_none());
        assert!(next_batch_range(&[], 0, BatchSelection::PositionCoupled).is_none());
    }

    #[test]
    fn test_select_advances_cursor_and_sets_pending() {
        let mut p = plan(&[0, 0, 1]);

        let first = select_next_batch(&mut p, BatchSelection::ContiguousRun).unwrap();
        assert_eq!(first.items.len(), 2);
        assert!(!first.fallback);
        assert_eq!(p.cursor(), 2);
        assert_eq!(p.pending(), 2);

        let second = select_next_batch(&mut p, BatchSelection::ContiguousRun).unwrap();
        assert_eq!(second.items[0].id, WorkItemId(2));
        assert_eq!(p.cursor(), 3);
        assert_eq!(p.pending(), 1);

        assert!(select_next_batch(&mut p, BatchSelection::ContiguousRun).is_none());
        assert_eq!(p.cursor(), 3);
    }

    #[test]
    fn test_fallback_counts_as_pending() {
        let mut p = plan(&[0, 0]);
        select_next_batch(&mut p, BatchSelection::PositionCoupled).unwrap();
        let fallback = select_next_batch(&mut p, BatchSelection::PositionCoupled).unwrap();
        assert!(fallback.fallback);
        assert_eq!(p.pending(), 1);
        assert_eq!(p.cursor(), 2);
    }

    #[test]
    fn test_check_rule_rejects_mixed_position_coupled_batch() {
        let err = check_rule(&plan(&[0, 1]), BatchSelection::PositionCoupled).unwrap_err();
        assert_eq!(
            err,
            PlanValidationError::MixedBatch {
                item_id: WorkItemId(1),
                expected: 0,
                found: 1
            }
        );
        assert!(check_rule(&plan(&[0, 1]), BatchSelection::ContiguousRun).is_ok());
    }

    #[test]
    fn test_check_rule_accepts_sequential_position_coupled_plan() {
        assert!(check_rule(&plan(&[0, 0, 1]), BatchSelection::PositionCoupled).is_ok());
        assert!(check_rule(&plan(&[0, 0, 1, 1]), BatchSelection::PositionCoupled).is_ok());
    }
}
