use djinnbot_types::{Run, RunId, RunStatus};
use rusqlite::{params, OptionalExtension};

use crate::{Store, StoreError, StoreResult};

impl Store {
    pub async fn insert_run(&self, run: Run) -> StoreResult<Run> {
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO runs (id, pipeline_id, project_id, task_description, status,
                    current_step_id, outputs, human_context, model_override, task_branch,
                    workspace_type, created_at, updated_at, completed_at, tasks_imported)
                 VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15)",
                params![
                    run.id.as_str(),
                    run.pipeline_id,
                    run.project_id.as_ref().map(|p| p.as_str()),
                    run.task_description,
                    status_str(run.status),
                    run.current_step_id.as_ref().map(|s| s.as_str()),
                    serde_json::to_string(&run.outputs)?,
                    serde_json::to_string(&run.human_context)?,
                    run.model_override,
                    run.task_branch,
                    run.workspace_type,
                    run.created_at,
                    run.updated_at,
                    run.completed_at,
                    run.tasks_imported,
                ],
            )?;
            Ok(run)
        })
        .await
    }

    /// Cascades to the run's steps explicitly rather than relying solely
    /// on the schema's `ON DELETE CASCADE`, since `open_in_memory` (used
    /// by tests) never enables the `foreign_keys` pragma.
    pub async fn delete_run(&self, id: RunId) -> StoreResult<()> {
        self.with_conn(move |conn| {
            conn.execute("DELETE FROM steps WHERE run_id = ?1", params![id.as_str()])?;
            let changed = conn.execute("DELETE FROM runs WHERE id = ?1", params![id.as_str()])?;
            if changed == 0 {
                return Err(StoreError::NotFound);
            }
            Ok(())
        })
        .await
    }

    pub async fn get_run(&self, id: RunId) -> StoreResult<Run> {
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT id, pipeline_id, project_id, task_description, status, current_step_id,
                    outputs, human_context, model_override, task_branch, workspace_type,
                    created_at, updated_at, completed_at, tasks_imported FROM runs WHERE id = ?1",
                params![id.as_str()],
                row_to_run,
            )
            .optional()?
            .ok_or(StoreError::NotFound)
        })
        .await
    }

    /// Applies a status transition plus whatever incidental fields go with
    /// it (current step, completion timestamp), but never lets a caller
    /// move `updated_at` backwards — the last-writer-wins policy from §5.
    pub async fn update_run_status(
        &self,
        id: RunId,
        status: RunStatus,
        completed_at: Option<i64>,
        now_ms: i64,
    ) -> StoreResult<()> {
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "UPDATE runs SET status = ?1, completed_at = ?2, updated_at = ?3
                 WHERE id = ?4 AND updated_at <= ?3",
                params![status_str(status), completed_at, now_ms, id.as_str()],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound);
            }
            Ok(())
        })
        .await
    }

    /// Flips `tasks_imported` from false to true and reports whether this
    /// call was the one that did it. A planning-run `RUN_COMPLETE` entry
    /// redelivered from an earlier cursor sees `false` back and skips the
    /// import instead of duplicating every task a second time.
    pub async fn mark_tasks_imported(&self, id: RunId) -> StoreResult<bool> {
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "UPDATE runs SET tasks_imported = 1 WHERE id = ?1 AND tasks_imported = 0",
                params![id.as_str()],
            )?;
            Ok(changed > 0)
        })
        .await
    }

    pub async fn set_run_current_step(
        &self,
        id: RunId,
        step_id: Option<String>,
        now_ms: i64,
    ) -> StoreResult<()> {
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "UPDATE runs SET current_step_id = ?1, updated_at = ?2 WHERE id = ?3",
                params![step_id, now_ms, id.as_str()],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound);
            }
            Ok(())
        })
        .await
    }

    /// Commits a run's final outputs and terminal status in a single
    /// write, per the resolved open question in §9: one write path, no
    /// split between an outputs table and inline JSON.
    pub async fn finalize_run(
        &self,
        id: RunId,
        status: RunStatus,
        outputs: std::collections::HashMap<String, serde_json::Value>,
        now_ms: i64,
    ) -> StoreResult<()> {
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "UPDATE runs SET status = ?1, outputs = ?2, completed_at = ?3, updated_at = ?3
                 WHERE id = ?4",
                params![
                    status_str(status),
                    serde_json::to_string(&outputs)?,
                    now_ms,
                    id.as_str(),
                ],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound);
            }
            Ok(())
        })
        .await
    }
}

fn status_str(status: RunStatus) -> &'static str {
    match status {
        RunStatus::Pending => "pending",
        RunStatus::Running => "running",
        RunStatus::Paused => "paused",
        RunStatus::Completed => "completed",
        RunStatus::Failed => "failed",
        RunStatus::Cancelled => "cancelled",
    }
}

fn parse_status(s: &str) -> StoreResult<RunStatus> {
    Ok(match s {
        "pending" => RunStatus::Pending,
        "running" => RunStatus::Running,
        "paused" => RunStatus::Paused,
        "completed" => RunStatus::Completed,
        "failed" => RunStatus::Failed,
        "cancelled" => RunStatus::Cancelled,
        other => {
            return Err(StoreError::Conflict(format!("unknown run status '{other}'")))
        }
    })
}

fn row_to_run(row: &rusqlite::Row<'_>) -> rusqlite::Result<Run> {
    let outputs_json: String = row.get(6)?;
    let human_context_json: String = row.get(7)?;
    let status_text: String = row.get(4)?;
    Ok(Run {
        id: row.get::<_, String>(0)?.into(),
        pipeline_id: row.get(1)?,
        project_id: row.get::<_, Option<String>>(2)?.map(Into::into),
        task_description: row.get(3)?,
        status: parse_status(&status_text).unwrap_or(RunStatus::Failed),
        current_step_id: row.get::<_, Option<String>>(5)?.map(Into::into),
        outputs: serde_json::from_str(&outputs_json).unwrap_or_default(),
        human_context: serde_json::from_str(&human_context_json).unwrap_or(serde_json::Value::Null),
        model_override: row.get(8)?,
        task_branch: row.get(9)?,
        workspace_type: row.get(10)?,
        created_at: row.get(11)?,
        updated_at: row.get(12)?,
        completed_at: row.get(13)?,
        tasks_imported: row.get(14)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use djinnbot_types::Run;

    #[tokio::test]
    async fn insert_and_get_round_trips_a_run() {
        let store = Store::open_in_memory().unwrap();
        let run = Run::new("code-review", None, "Review PR #42", serde_json::json!({}), None, None);
        let id = run.id.clone();
        store.insert_run(run).await.unwrap();
        let loaded = store.get_run(id).await.unwrap();
        assert_eq!(loaded.status, RunStatus::Pending);
        assert_eq!(loaded.pipeline_id, "code-review");
    }

    #[tokio::test]
    async fn update_run_status_does_not_move_updated_at_backwards() {
        let store = Store::open_in_memory().unwrap();
        let run = Run::new("code-review", None, "task", serde_json::json!({}), None, None);
        let id = run.id.clone();
        let created_at = run.created_at;
        store.insert_run(run).await.unwrap();

        store
            .update_run_status(id.clone(), RunStatus::Running, None, created_at + 1000)
            .await
            .unwrap();
        let stale_result = store
            .update_run_status(id.clone(), RunStatus::Failed, None, created_at - 5000)
            .await;
        assert!(stale_result.is_err());

        let loaded = store.get_run(id).await.unwrap();
        assert_eq!(loaded.status, RunStatus::Running);
    }

    #[tokio::test]
    async fn finalize_run_commits_outputs_and_status_together() {
        let store = Store::open_in_memory().unwrap();
        let run = Run::new("code-review", None, "task", serde_json::json!({}), None, None);
        let id = run.id.clone();
        store.insert_run(run).await.unwrap();

        let mut outputs = std::collections::HashMap::new();
        outputs.insert("score".to_string(), serde_json::json!("8/10"));
        store
            .finalize_run(id.clone(), RunStatus::Completed, outputs, 999)
            .await
            .unwrap();

        let loaded = store.get_run(id).await.unwrap();
        assert_eq!(loaded.status, RunStatus::Completed);
        assert_eq!(loaded.completed_at, Some(999));
        assert_eq!(loaded.outputs.get("score").unwrap(), "8/10");
    }

    #[tokio::test]
    async fn delete_run_cascades_to_its_steps() {
        use djinnbot_types::{AgentId, Step};

        let store = Store::open_in_memory().unwrap();
        let run = Run::new("code-review", None, "task", serde_json::json!({}), None, None);
        let id = run.id.clone();
        store.insert_run(run).await.unwrap();
        store
            .upsert_step(Step::new(id.clone(), "analyze", AgentId::from("reviewer")))
            .await
            .unwrap();

        store.delete_run(id.clone()).await.unwrap();

        assert!(store.get_run(id.clone()).await.is_err());
        assert!(store.list_steps_for_run(id).await.unwrap().is_empty());
    }
}
