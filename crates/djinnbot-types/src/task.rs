use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{AgentId, ProjectId, RunId, TaskId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Low,
    Normal,
    High,
    Urgent,
}

/// Classifies a project-defined status string into the semantic buckets
/// the run dispatcher and webhook router need to reason about without
/// hard-coding a fixed status vocabulary (projects define their own
/// kanban columns and status names).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusClass {
    Initial,
    Claimable,
    InProgress,
    Blocked,
    TerminalDone,
    TerminalFail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnRef {
    pub column_id: String,
    pub name: String,
    pub position: i64,
    /// Status strings that, when a task holds them, place it in this column.
    pub task_statuses: Vec<String>,
}

/// A project's status vocabulary: which status strings exist, which
/// column each lives in, and how each classifies.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StatusSemantics {
    pub columns: Vec<ColumnRef>,
    pub classification: HashMap<String, StatusClass>,
}

impl StatusSemantics {
    pub fn classify(&self, status: &str) -> Option<StatusClass> {
        self.classification.get(status).copied()
    }

    pub fn is_terminal_done(&self, status: &str) -> bool {
        matches!(self.classify(status), Some(StatusClass::TerminalDone))
    }

    /// The first status string classified as `TerminalDone`, used by the
    /// webhook router's PR-merge auto-completion.
    pub fn done_status(&self) -> Option<&str> {
        self.classification
            .iter()
            .find(|(_, class)| matches!(class, StatusClass::TerminalDone))
            .map(|(status, _)| status.as_str())
    }

    /// The first status string classified as `TerminalFail`, used by the
    /// dispatcher's task-run bridging on RUN_FAILED.
    pub fn fail_status(&self) -> Option<&str> {
        self.classification
            .iter()
            .find(|(_, class)| matches!(class, StatusClass::TerminalFail))
            .map(|(status, _)| status.as_str())
    }

    /// The first status string classified as `Initial`, the backlog
    /// target for the agentic-planning status reflow.
    pub fn initial_status(&self) -> Option<&str> {
        self.classification
            .iter()
            .find(|(_, class)| matches!(class, StatusClass::Initial))
            .map(|(status, _)| status.as_str())
    }

    /// The column containing a given status, if any.
    pub fn column_for_status<'a>(&'a self, status: &str) -> Option<&'a ColumnRef> {
        self.columns
            .iter()
            .find(|col| col.task_statuses.iter().any(|s| s == status))
    }

    /// The first column in project position order, used when creating a
    /// task from a webhook assignment with auto-respond disabled.
    pub fn first_column(&self) -> Option<&ColumnRef> {
        self.columns.iter().min_by_key(|c| c.position)
    }

    /// Status strings classified as `Blocked`, used by the agentic-planning
    /// status reflow (dependency wiring moves these to backlog/claimable).
    pub fn blocked_statuses(&self) -> HashSet<&str> {
        self.classification
            .iter()
            .filter(|(_, class)| matches!(class, StatusClass::Blocked))
            .map(|(status, _)| status.as_str())
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TaskMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pr_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pr_number: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_branch: Option<String>,
    #[serde(default)]
    pub transition_notes: Vec<TransitionNote>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionNote {
    pub from: String,
    pub to: String,
    pub note: String,
    pub timestamp: i64,
    pub source: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub project_id: ProjectId,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub status: String,
    #[serde(default)]
    pub priority: TaskPriority,
    #[serde(default)]
    pub assigned_agent: Option<AgentId>,
    #[serde(default)]
    pub run_id: Option<RunId>,
    #[serde(default)]
    pub parent_task_id: Option<TaskId>,
    #[serde(default)]
    pub depends_on: Vec<TaskId>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub column_id: String,
    #[serde(default)]
    pub column_position: i64,
    #[serde(default)]
    pub metadata: TaskMetadata,
    pub created_at: i64,
    pub updated_at: i64,
    #[serde(default)]
    pub completed_at: Option<i64>,
}

impl Default for TaskPriority {
    fn default() -> Self {
        Self::Normal
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentAssignmentFilters {
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub file_patterns: Vec<String>,
    #[serde(default)]
    pub authors: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn semantics() -> StatusSemantics {
        let mut classification = HashMap::new();
        classification.insert("backlog".to_string(), StatusClass::Initial);
        classification.insert("in_progress".to_string(), StatusClass::InProgress);
        classification.insert("review".to_string(), StatusClass::InProgress);
        classification.insert("done".to_string(), StatusClass::TerminalDone);
        classification.insert("blocked".to_string(), StatusClass::Blocked);
        StatusSemantics {
            columns: vec![
                ColumnRef {
                    column_id: "col_backlog".into(),
                    name: "Backlog".into(),
                    position: 0,
                    task_statuses: vec!["backlog".into(), "blocked".into()],
                },
                ColumnRef {
                    column_id: "col_done".into(),
                    name: "Done".into(),
                    position: 2,
                    task_statuses: vec!["done".into()],
                },
            ],
            classification,
        }
    }

    #[test]
    fn done_status_resolves_the_terminal_done_status_string() {
        assert_eq!(semantics().done_status(), Some("done"));
    }

    #[test]
    fn column_for_status_finds_the_owning_column() {
        let semantics = semantics();
        let column = semantics.column_for_status("done").expect("column");
        assert_eq!(column.column_id, "col_done");
    }

    #[test]
    fn first_column_picks_lowest_position() {
        assert_eq!(semantics().first_column().unwrap().column_id, "col_backlog");
    }
}
