use serde::{Deserialize, Serialize};

use crate::ids::ProjectId;
use crate::task::StatusSemantics;
use crate::webhook::AgentAssignment;

/// A project's webhook-routing configuration: which repository it's
/// linked to, its kanban status vocabulary, and the agent-event
/// assignments the webhook router matches inbound events against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub name: String,
    #[serde(default)]
    pub repository_full_name: Option<String>,
    #[serde(default)]
    pub status_semantics: StatusSemantics,
    #[serde(default)]
    pub agent_assignments: Vec<AgentAssignment>,
    pub created_at: i64,
}
