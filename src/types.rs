//! NewType wrappers for strong typing throughout the orchestrator.
//!
//! These types prevent accidental mixing of semantically different values
//! (e.g., passing a capability kind where a capability instance id is expected).

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Macro to generate a string NewType wrapper with standard trait implementations.
macro_rules! newtype_string {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new instance.
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Get the inner value as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume and return the inner String.
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::borrow::Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }
    };
}

/// Macro to generate a UUID NewType wrapper for runtime-assigned identities.
macro_rules! newtype_uuid {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Generate a fresh random identifier.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Get the underlying UUID.
            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

newtype_string!(
    /// Identity of one physical capability instance (e.g., "mailer-eu-1").
    ///
    /// Executors are resolved by this key, so two instances that happen to
    /// share a `CapabilityKind` never collapse onto the same executor.
    CapabilityId
);

newtype_string!(
    /// Kind of work a capability performs (e.g., "echo", "sleep").
    ///
    /// Informational only; several capability instances may share a kind.
    CapabilityKind
);

newtype_uuid!(
    /// Globally unique identifier of a submitted plan.
    PlanId
);

newtype_uuid!(
    /// Identity of a completion listener inside an executor's subscriber set.
    ListenerId
);

newtype_uuid!(
    /// Identity of a spawned executor actor.
    ExecutorId
);

/// Identifier of a work item, unique only within its plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkItemId(pub u64);

impl From<u64> for WorkItemId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for WorkItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capability_id_creation() {
        let id = CapabilityId::new("mailer-eu-1");
        assert_eq!(id.as_str(), "mailer-eu-1");
        assert_eq!(id.to_string(), "mailer-eu-1");
    }

    #[test]
    fn test_capability_id_from_string() {
        let id: CapabilityId = "echo-1".into();
        assert_eq!(id.as_str(), "echo-1");

        let id: CapabilityId = String::from("echo-2").into();
        assert_eq!(id.into_inner(), "echo-2");
    }

    #[test]
    fn test_capability_id_serde() {
        let id = CapabilityId::new("echo-1");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"echo-1\"");

        let parsed: CapabilityId = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn test_plan_ids_are_unique() {
        assert_ne!(PlanId::new(), PlanId::new());
    }

    #[test]
    fn test_plan_id_serde_is_transparent() {
        let uuid = Uuid::new_v4();
        let id = PlanId::from(uuid);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", uuid));
    }

    #[test]
    fn test_work_item_id_display() {
        assert_eq!(WorkItemId(7).to_string(), "7");
        assert_eq!(WorkItemId::from(3), WorkItemId(3));
    }
}
