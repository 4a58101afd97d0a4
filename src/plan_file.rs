//! JSON plan files for the command line runner.
//!
//! ```json
//! {
//!   "items": [
//!     { "id": 1, "capability": "echo", "batch": 0, "params": { "message": "hi" } },
//!     { "id": 2, "capability": "sleep", "batch": 1, "params": { "millis": 250 } }
//!   ]
//! }
//! ```

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::{fs, path::Path};
use uuid::Uuid;

use crate::config::expand_value;
use crate::model::{Parameters, Plan, PlanBuilder, WorkItem};
use crate::types::PlanId;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlanFile {
    /// Fixed plan id; a fresh one is generated when absent.
    #[serde(default)]
    pub id: Option<Uuid>,
    pub items: Vec<ItemFile>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ItemFile {
    pub id: u64,
    pub capability: String,
    pub batch: u32,
    #[serde(default)]
    pub params: Parameters,
    #[serde(default)]
    pub earliest_start: Option<DateTime<Utc>>,
    #[serde(default)]
    pub deadline: Option<DateTime<Utc>>,
}

impl PlanFile {
    pub fn into_plan(self) -> Plan {
        let builder = match self.id {
            Some(id) => PlanBuilder::with_id(PlanId::from(id)),
            None => PlanBuilder::new(),
        };
        let plan_id = builder.id();

        self.items
            .into_iter()
            .fold(builder, |builder, item| {
                let mut work = WorkItem::new(plan_id, item.id, item.capability, item.batch)
                    .with_params(item.params);
                work.earliest_start = item.earliest_start;
                work.deadline = item.deadline;
                builder.push(work)
            })
            .build()
    }
}

/// Read a plan file, expanding `${VAR}` references in its string values.
pub fn load_plan(path: &Path) -> anyhow::Result<Plan> {
    let raw = fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Failed to read plan file {}: {}", path.display(), e))?;
    let value: Value = serde_json::from_str(&raw)?;
    let file: PlanFile = serde_json::from_value(expand_value(value))?;
    Ok(file.into_plan())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CapabilityId, WorkItemId};
    use serde_json::json;
    use std::io::Write;

    #[test]
    fn test_into_plan() {
        let id = Uuid::new_v4();
        let file: PlanFile = serde_json::from_value(json!({
            "id": id,
            "items": [
                { "id": 1, "capability": "echo", "batch": 0, "params": { "message": "hi" } },
                { "id": 2, "capability": "sleep", "batch": 1,
                  "earliest_start": "2026-01-01T00:00:00Z", "deadline": "2026-01-01T00:01:00Z" }
            ]
        }))
        .unwrap();

        let plan = file.into_plan();
        assert_eq!(plan.id(), PlanId::from(id));
        assert_eq!(plan.len(), 2);
        assert!(plan.validate().is_ok());

        let second = &plan.items()[1];
        assert_eq!(second.id, WorkItemId(2));
        assert_eq!(second.capability, CapabilityId::new("sleep"));
        assert!(second.deadline > second.earliest_start);
        assert_eq!(plan.items()[0].params.get("message"), Some(&json!("hi")));
    }

    #[test]
    fn test_unknown_fields_rejected() {
        let result: Result<PlanFile, _> = serde_json::from_value(json!({
            "items": [{ "id": 1, "capability": "echo", "batch": 0, "priority": 3 }]
        }));
        assert!(result.is_err());
    }

    #[test]
    fn test_load_plan_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{ "items": [ {{ "id": 7, "capability": "echo", "batch": 0 }} ] }}"#
        )
        .unwrap();

        let plan = load_plan(file.path()).unwrap();
        assert_eq!(plan.items()[0].id, WorkItemId(7));
        assert!(plan.items()[0].params.is_empty());
    }

    #[test]
    fn test_load_missing_plan_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_plan(&dir.path().join("missing.json")).is_err());
    }
}
