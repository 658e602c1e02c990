use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Generates an opaque id with the given typed prefix, e.g. `run_3e9f...`.
pub fn new_opaque_id(prefix: &str) -> String {
    format!("{prefix}_{}", Uuid::new_v4().simple())
}

macro_rules! typed_id {
    ($name:ident, $prefix:literal) => {
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn generate() -> Self {
                Self(new_opaque_id($prefix))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

typed_id!(RunId, "run");
typed_id!(StepId, "step");
typed_id!(TaskId, "task");
typed_id!(SessionId, "sess");
typed_id!(AgentId, "agent");
typed_id!(ProjectId, "proj");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_carry_their_prefix() {
        let run_id = RunId::generate();
        assert!(run_id.as_str().starts_with("run_"));
        let task_id = TaskId::generate();
        assert!(task_id.as_str().starts_with("task_"));
    }
}
