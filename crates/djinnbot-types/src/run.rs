use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{AgentId, ProjectId, RunId, StepId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    /// A run is finalized once it leaves the pending/running/paused loop.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// True if `next` is a legal transition from `self` per the run state
    /// machine: pending -> running -> (completed|failed|cancelled), with
    /// paused <-> running as the only reversible edge.
    pub fn can_transition_to(self, next: RunStatus) -> bool {
        use RunStatus::*;
        match (self, next) {
            (a, b) if a == b => true,
            (Pending, Running) | (Pending, Cancelled) => true,
            (Running, Paused) | (Paused, Running) => true,
            (Running, Completed) | (Running, Failed) | (Running, Cancelled) => true,
            (Paused, Cancelled) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: RunId,
    pub pipeline_id: String,
    #[serde(default)]
    pub project_id: Option<ProjectId>,
    pub task_description: String,
    pub status: RunStatus,
    #[serde(default)]
    pub current_step_id: Option<StepId>,
    #[serde(default)]
    pub outputs: HashMap<String, Value>,
    /// Opaque carry-forward payload set at creation time (e.g. which task
    /// or planning session spawned this run). The dispatcher reads well
    /// known keys out of it (`task_id`, `planning_run`) but never assumes
    /// it is exhaustively typed.
    #[serde(default)]
    pub human_context: Value,
    #[serde(default)]
    pub model_override: Option<String>,
    #[serde(default)]
    pub task_branch: Option<String>,
    #[serde(default = "default_workspace_type")]
    pub workspace_type: String,
    pub created_at: i64,
    pub updated_at: i64,
    #[serde(default)]
    pub completed_at: Option<i64>,
    /// Compare-and-set guard for the reconciler's planning-run import
    /// step: flips to true exactly once, the first time a `Completed`
    /// planning run's tasks are imported, so replaying the same
    /// `RUN_COMPLETE` entry from an earlier cursor can't duplicate them.
    #[serde(default)]
    pub tasks_imported: bool,
}

fn default_workspace_type() -> String {
    "worktree".to_string()
}

impl Run {
    pub fn new(
        pipeline_id: impl Into<String>,
        project_id: Option<ProjectId>,
        task_description: impl Into<String>,
        human_context: Value,
        model_override: Option<String>,
        workspace_type: Option<String>,
    ) -> Self {
        let now = crate::now_ms();
        Self {
            id: RunId::generate(),
            pipeline_id: pipeline_id.into(),
            project_id,
            task_description: task_description.into(),
            status: RunStatus::Pending,
            current_step_id: None,
            outputs: HashMap::new(),
            human_context,
            model_override,
            task_branch: None,
            workspace_type: workspace_type.unwrap_or_else(default_workspace_type),
            created_at: now,
            updated_at: now,
            completed_at: None,
            tasks_imported: false,
        }
    }

    /// The task id this run was dispatched on behalf of, if any — used by
    /// the run/task bridging reconciliation in the dispatcher.
    pub fn linked_task_id(&self) -> Option<TaskIdRef<'_>> {
        self.human_context
            .get("task_id")
            .and_then(Value::as_str)
            .map(TaskIdRef)
    }

    pub fn is_planning_run(&self) -> bool {
        self.human_context
            .get("planning_run")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    pub fn is_agentic_planning_run(&self) -> bool {
        self.human_context
            .get("agentic_planning")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

/// Borrowed view of a task id embedded in `human_context`, to avoid forcing
/// a `TaskId` allocation on every read of a run that has no linked task.
pub struct TaskIdRef<'a>(pub &'a str);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl StepStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub id: StepId,
    pub run_id: RunId,
    pub step_logical_id: String,
    pub agent_id: AgentId,
    pub status: StepStatus,
    #[serde(default)]
    pub inputs: HashMap<String, Value>,
    #[serde(default)]
    pub outputs: HashMap<String, Value>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default)]
    pub session_id: Option<crate::ids::SessionId>,
    #[serde(default)]
    pub started_at: Option<i64>,
    #[serde(default)]
    pub completed_at: Option<i64>,
}

fn default_max_retries() -> u32 {
    3
}

impl Step {
    /// The composite `{run_id}_{step_logical_id}` id used as the step's
    /// primary key in the store.
    pub fn composite_id(run_id: &RunId, step_logical_id: &str) -> StepId {
        StepId(format!("{run_id}_{step_logical_id}"))
    }

    pub fn new(run_id: RunId, step_logical_id: impl Into<String>, agent_id: AgentId) -> Self {
        let step_logical_id = step_logical_id.into();
        let id = Self::composite_id(&run_id, &step_logical_id);
        Self {
            id,
            run_id,
            step_logical_id,
            agent_id,
            status: StepStatus::Pending,
            inputs: HashMap::new(),
            outputs: HashMap::new(),
            error: None,
            retry_count: 0,
            max_retries: default_max_retries(),
            session_id: None,
            started_at: None,
            completed_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_status_allows_pause_resume_roundtrip() {
        assert!(RunStatus::Running.can_transition_to(RunStatus::Paused));
        assert!(RunStatus::Paused.can_transition_to(RunStatus::Running));
    }

    #[test]
    fn run_status_rejects_resurrecting_a_terminal_run() {
        assert!(!RunStatus::Completed.can_transition_to(RunStatus::Running));
        assert!(!RunStatus::Failed.can_transition_to(RunStatus::Pending));
    }

    #[test]
    fn step_composite_id_joins_run_and_logical_id() {
        let run_id = RunId("run_abc".to_string());
        let id = Step::composite_id(&run_id, "analyze");
        assert_eq!(id.as_str(), "run_abc_analyze");
    }
}
