use std::collections::HashMap;

use djinnbot_bus::{keys, Bus};
use djinnbot_store::{Store, StoreError};
use djinnbot_types::{
    PlanningEvent, ProjectId, Run, RunEvent, RunId, RunStatus, StepId, StepStatus, Task, TaskId,
    TaskMetadata, TaskPriority, TransitionNote,
};
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::error::DispatchError;

const READ_COUNT: usize = 64;
const BLOCK_MS: usize = 5_000;

/// Consumes `events:global` from a persisted cursor, one entry at a time,
/// advancing the cursor only after an entry is handled (successfully or
/// permanently-failed). A transient failure stops the batch short without
/// advancing past it, so the next call redelivers the same entry.
pub struct Reconciler {
    store: Store,
    bus: Bus,
}

impl Reconciler {
    pub fn new(store: Store, bus: Bus) -> Self {
        Self { store, bus }
    }

    /// One poll cycle: reads up to `READ_COUNT` new entries (blocking up
    /// to `BLOCK_MS` if none are immediately available) and reconciles
    /// each. Returns the number of entries advanced past.
    pub async fn run_once(&self) -> Result<usize, DispatchError> {
        let cursor = self
            .bus
            .get(keys::DISPATCHER_CURSOR)
            .await?
            .unwrap_or_else(|| "0".to_string());

        let entries = self
            .bus
            .xread_blocking(keys::EVENTS_GLOBAL, &cursor, READ_COUNT, BLOCK_MS)
            .await?;

        let mut advanced = 0;
        for entry in entries {
            let Some(payload) = entry.fields.get("data") else {
                self.advance_cursor(&entry.id).await?;
                advanced += 1;
                continue;
            };
            let Ok(event) = serde_json::from_str::<RunEvent>(payload) else {
                // Not every events:global entry is a RunEvent (lifecycle,
                // task, and planning events share the stream) — skip and
                // advance past it rather than treating it as a failure.
                self.advance_cursor(&entry.id).await?;
                advanced += 1;
                continue;
            };

            match self.handle(event).await {
                Ok(()) => {
                    self.advance_cursor(&entry.id).await?;
                    advanced += 1;
                }
                Err(DispatchError::Store(StoreError::NotFound)) => {
                    warn!(stream_id = %entry.id, "reconciler: referenced row missing, dead-lettering");
                    self.advance_cursor(&entry.id).await?;
                    advanced += 1;
                }
                Err(err) => {
                    warn!(stream_id = %entry.id, error = %err, "reconciler: transient failure, stopping batch");
                    break;
                }
            }
        }
        Ok(advanced)
    }

    async fn advance_cursor(&self, stream_id: &str) -> Result<(), DispatchError> {
        self.bus.set(keys::DISPATCHER_CURSOR, stream_id).await?;
        Ok(())
    }

    async fn handle(&self, event: RunEvent) -> Result<(), DispatchError> {
        match event {
            RunEvent::StepStarted { run_id, step_id, at, .. } => {
                self.on_step_started(run_id, step_id, at).await
            }
            RunEvent::StepCompleted { step_id, outputs, at, .. } => {
                self.store
                    .update_step_status(step_id, StepStatus::Completed, None, Some(outputs), at)
                    .await?;
                Ok(())
            }
            RunEvent::StepFailed { step_id, error, at, .. } => {
                self.store
                    .update_step_status(step_id, StepStatus::Failed, Some(error), None, at)
                    .await?;
                Ok(())
            }
            RunEvent::Completed { run_id, outputs, at } => {
                self.on_run_finished(run_id, RunStatus::Completed, outputs, at).await
            }
            RunEvent::Failed { run_id, at, .. } => {
                self.on_run_finished(run_id, RunStatus::Failed, HashMap::new(), at).await
            }
            RunEvent::Cancelled { .. } | RunEvent::Created { .. } | RunEvent::StatusChanged { .. } => {
                Ok(())
            }
        }
    }

    async fn on_step_started(
        &self,
        run_id: RunId,
        step_id: StepId,
        at: i64,
    ) -> Result<(), DispatchError> {
        self.store
            .update_step_status(step_id, StepStatus::Running, None, None, at)
            .await?;
        let run = self.store.get_run(run_id.clone()).await?;
        if run.status == RunStatus::Pending {
            self.store
                .update_run_status(run_id, RunStatus::Running, None, at)
                .await?;
        }
        Ok(())
    }

    /// §4.3: finalizes the run, then (if a task or planning run is
    /// linked) bridges the outcome onto the task model.
    async fn on_run_finished(
        &self,
        run_id: RunId,
        status: RunStatus,
        outputs: HashMap<String, Value>,
        at: i64,
    ) -> Result<(), DispatchError> {
        let run = self.store.get_run(run_id.clone()).await?;
        self.store
            .finalize_run(run_id, status, outputs, at)
            .await?;

        if let Some(task_ref) = run.linked_task_id() {
            self.bridge_task(&run, TaskId::from(task_ref.0), status, at).await?;
        }

        if status == RunStatus::Completed {
            if run.is_agentic_planning_run() {
                self.reflow_agentic_planning(&run, at).await?;
            } else if run.is_planning_run() {
                self.import_planned_tasks(&run, at).await?;
            }
        }
        Ok(())
    }

    async fn bridge_task(
        &self,
        run: &Run,
        task_id: TaskId,
        run_status: RunStatus,
        at: i64,
    ) -> Result<(), DispatchError> {
        let task = self.store.get_task(task_id.clone()).await?;
        let project = self.store.get_project(task.project_id.clone()).await?;

        let target = match run_status {
            RunStatus::Completed => project.status_semantics.done_status(),
            RunStatus::Failed => project.status_semantics.fail_status(),
            _ => None,
        };
        let Some(target_status) = target else {
            warn!(project_id = %project.id, run_id = %run.id, "project has no matching terminal status for run outcome, skipping task bridge");
            return Ok(());
        };
        if task.status == target_status {
            return Ok(());
        }
        let column_id = project
            .status_semantics
            .column_for_status(target_status)
            .map(|c| c.column_id.clone())
            .unwrap_or_else(|| task.column_id.clone());

        let note = TransitionNote {
            from: task.status.clone(),
            to: target_status.to_string(),
            note: format!("run {} {:?}", run.id, run_status),
            timestamp: at,
            source: "dispatcher_task_run_bridge".into(),
        };
        let completed_at = project.status_semantics.is_terminal_done(target_status).then_some(at);
        self.store
            .transition_task_status(task_id, target_status.to_string(), column_id, note, completed_at, at)
            .await?;
        Ok(())
    }

    /// The agentic-planning variant: tasks were already created via tool
    /// calls during the run, so only the status reflow runs — any task
    /// still sitting in a Blocked status moves to the project's initial
    /// (backlog) status now that dependency wiring has settled.
    async fn reflow_agentic_planning(&self, run: &Run, at: i64) -> Result<(), DispatchError> {
        let Some(project_id) = run.project_id.clone() else {
            return Ok(());
        };
        let project = self.store.get_project(project_id.clone()).await?;
        let Some(initial_status) = project.status_semantics.initial_status() else {
            return Ok(());
        };
        let Some(initial_column) = project.status_semantics.column_for_status(initial_status) else {
            return Ok(());
        };
        let blocked = project.status_semantics.blocked_statuses();

        let tasks = self.store.list_tasks_for_project(project_id).await?;
        for task in tasks {
            if !blocked.contains(task.status.as_str()) {
                continue;
            }
            let note = TransitionNote {
                from: task.status.clone(),
                to: initial_status.to_string(),
                note: format!("reflowed after planning run {}", run.id),
                timestamp: at,
                source: "dispatcher_planning_reflow".into(),
            };
            self.store
                .transition_task_status(
                    task.id,
                    initial_status.to_string(),
                    initial_column.column_id.clone(),
                    note,
                    None,
                    at,
                )
                .await?;
        }
        Ok(())
    }

    /// The plain planning variant: bulk-imports the tasks (and subtasks)
    /// the run's structured output describes, then announces completion.
    /// Guarded by `mark_tasks_imported` so rerunning from an earlier
    /// cursor (§4.3: reconciliation writes are "safe to rerun from any
    /// cursor") can't import the same planning run's tasks twice.
    async fn import_planned_tasks(&self, run: &Run, at: i64) -> Result<(), DispatchError> {
        if !self.store.mark_tasks_imported(run.id.clone()).await? {
            info!(run_id = %run.id, "planning run tasks already imported, skipping");
            return Ok(());
        }
        let Some(project_id) = run.project_id.clone() else {
            return Ok(());
        };
        let Some(raw_tasks) = run.outputs.get("tasks") else {
            return Ok(());
        };
        let Ok(planned) = serde_json::from_value::<Vec<PlannedTask>>(raw_tasks.clone()) else {
            warn!(run_id = %run.id, "planning run outputs.tasks did not match the expected shape");
            return Ok(());
        };

        let project = self.store.get_project(project_id.clone()).await?;
        let Some(column) = project.status_semantics.first_column() else {
            warn!(project_id = %project.id, "project has no columns, cannot import planned tasks");
            return Ok(());
        };
        let status = column.task_statuses.first().cloned().unwrap_or_default();

        let mut imported = Vec::new();
        for planned_task in &planned {
            imported.extend(planned_task.flatten_into_tasks(
                project_id.clone(),
                column.column_id.clone(),
                status.clone(),
                None,
                at,
            ));
        }
        let imported_count = imported.len();
        self.store.insert_tasks(imported).await?;

        let payload = serde_json::to_string(&PlanningEvent::Completed {
            run_id: run.id.clone(),
            project_id,
            imported_task_count: imported_count,
            at,
        })
        .map_err(StoreError::Json)?;
        self.bus
            .xadd(keys::EVENTS_GLOBAL, &[("data", payload.as_str())], None)
            .await?;
        info!(run_id = %run.id, imported_count, "planning run imported tasks");
        Ok(())
    }
}

/// Shape expected under a planning run's `outputs.tasks` — a generated
/// task plus any subtasks it carries, nested arbitrarily deep.
#[derive(Debug, Clone, Deserialize)]
struct PlannedTask {
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    priority: Option<TaskPriority>,
    #[serde(default)]
    subtasks: Vec<PlannedTask>,
}

impl PlannedTask {
    fn flatten_into_tasks(
        &self,
        project_id: ProjectId,
        column_id: String,
        status: String,
        parent_task_id: Option<TaskId>,
        at: i64,
    ) -> Vec<Task> {
        let id = TaskId::generate();
        let mut out = vec![Task {
            id: id.clone(),
            project_id: project_id.clone(),
            title: self.title.clone(),
            description: self.description.clone(),
            status: status.clone(),
            priority: self.priority.unwrap_or(TaskPriority::Normal),
            assigned_agent: None,
            run_id: None,
            parent_task_id,
            depends_on: vec![],
            tags: vec![],
            column_id: column_id.clone(),
            column_position: 0,
            metadata: TaskMetadata {
                source: Some("planning_run".into()),
                ..Default::default()
            },
            created_at: at,
            updated_at: at,
            completed_at: None,
        }];
        for subtask in &self.subtasks {
            out.extend(subtask.flatten_into_tasks(
                project_id.clone(),
                column_id.clone(),
                status.clone(),
                Some(id.clone()),
                at,
            ));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use djinnbot_types::{AgentId, Project, Step};

    async fn test_bus() -> Option<Bus> {
        match std::env::var("DJINNBOT_TEST_REDIS_URL") {
            Ok(url) => Bus::connect(&url).await.ok(),
            Err(_) => None,
        }
    }

    #[tokio::test]
    async fn step_started_transitions_a_pending_run_to_running() {
        let Some(bus) = test_bus().await else {
            return;
        };
        // Use a unique cursor key per test run by draining first.
        let store = Store::open_in_memory().unwrap();
        let run = Run::new("code-review", None, "task", serde_json::json!({}), None, None);
        let run_id = run.id.clone();
        store.insert_run(run).await.unwrap();
        let step = Step::new(run_id.clone(), "analyze", AgentId::from("reviewer"));
        let step_id = step.id.clone();
        store.upsert_step(step).await.unwrap();

        let reconciler = Reconciler::new(store.clone(), bus.clone());
        reconciler
            .on_step_started(run_id.clone(), step_id.clone(), 1_000)
            .await
            .unwrap();

        let run = store.get_run(run_id).await.unwrap();
        assert_eq!(run.status, RunStatus::Running);
        let step = store.get_step(step_id).await.unwrap();
        assert_eq!(step.status, StepStatus::Running);
    }

    #[tokio::test]
    async fn run_completed_bridges_a_linked_task_to_done() {
        let Some(bus) = test_bus().await else {
            return;
        };
        let store = Store::open_in_memory().unwrap();

        let mut classification = std::collections::HashMap::new();
        classification.insert("backlog".to_string(), djinnbot_types::task::StatusClass::Initial);
        classification.insert("done".to_string(), djinnbot_types::task::StatusClass::TerminalDone);
        let status_semantics = djinnbot_types::StatusSemantics {
            columns: vec![
                djinnbot_types::ColumnRef {
                    column_id: "col_backlog".into(),
                    name: "Backlog".into(),
                    position: 0,
                    task_statuses: vec!["backlog".into()],
                },
                djinnbot_types::ColumnRef {
                    column_id: "col_done".into(),
                    name: "Done".into(),
                    position: 1,
                    task_statuses: vec!["done".into()],
                },
            ],
            classification,
        };
        let project = Project {
            id: ProjectId::generate(),
            name: "Widgets".into(),
            repository_full_name: None,
            status_semantics,
            agent_assignments: vec![],
            created_at: 0,
        };
        let project_id = project.id.clone();
        store.insert_project(project).await.unwrap();

        let task = Task {
            id: TaskId::generate(),
            project_id: project_id.clone(),
            title: "Ship it".into(),
            description: String::new(),
            status: "backlog".into(),
            priority: TaskPriority::Normal,
            assigned_agent: None,
            run_id: None,
            parent_task_id: None,
            depends_on: vec![],
            tags: vec![],
            column_id: "col_backlog".into(),
            column_position: 0,
            metadata: TaskMetadata::default(),
            created_at: 0,
            updated_at: 0,
            completed_at: None,
        };
        let task_id = task.id.clone();
        store.insert_task(task).await.unwrap();

        let run = Run::new(
            "code-review",
            Some(project_id),
            "task",
            serde_json::json!({"task_id": task_id.as_str()}),
            None,
            None,
        );
        store.insert_run(run.clone()).await.unwrap();

        let reconciler = Reconciler::new(store.clone(), bus);
        reconciler
            .on_run_finished(run.id.clone(), RunStatus::Completed, HashMap::new(), 2_000)
            .await
            .unwrap();

        let task = store.get_task(task_id).await.unwrap();
        assert_eq!(task.status, "done");
        assert_eq!(task.completed_at, Some(2_000));
    }
}
