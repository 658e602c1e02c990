use djinnbot_types::{RunId, Step, StepId, StepStatus};
use rusqlite::{params, OptionalExtension};

use crate::{Store, StoreError, StoreResult};

impl Store {
    pub async fn upsert_step(&self, step: Step) -> StoreResult<()> {
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO steps (id, run_id, step_logical_id, agent_id, status, inputs,
                    outputs, error, retry_count, max_retries, session_id, started_at, completed_at)
                 VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13)
                 ON CONFLICT(id) DO UPDATE SET
                    status = excluded.status,
                    inputs = excluded.inputs,
                    outputs = excluded.outputs,
                    error = excluded.error,
                    retry_count = excluded.retry_count,
                    session_id = excluded.session_id,
                    started_at = excluded.started_at,
                    completed_at = excluded.completed_at",
                params![
                    step.id.as_str(),
                    step.run_id.as_str(),
                    step.step_logical_id,
                    step.agent_id.as_str(),
                    status_str(step.status),
                    serde_json::to_string(&step.inputs)?,
                    serde_json::to_string(&step.outputs)?,
                    step.error,
                    step.retry_count,
                    step.max_retries,
                    step.session_id.as_ref().map(|s| s.as_str()),
                    step.started_at,
                    step.completed_at,
                ],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn get_step(&self, id: StepId) -> StoreResult<Step> {
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT id, run_id, step_logical_id, agent_id, status, inputs, outputs, error,
                    retry_count, max_retries, session_id, started_at, completed_at
                 FROM steps WHERE id = ?1",
                params![id.as_str()],
                row_to_step,
            )
            .optional()?
            .ok_or(StoreError::NotFound)
        })
        .await
    }

    pub async fn list_steps_for_run(&self, run_id: RunId) -> StoreResult<Vec<Step>> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, run_id, step_logical_id, agent_id, status, inputs, outputs, error,
                    retry_count, max_retries, session_id, started_at, completed_at
                 FROM steps WHERE run_id = ?1 ORDER BY rowid",
            )?;
            let rows = stmt
                .query_map(params![run_id.as_str()], row_to_step)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }

    /// Transitions a step to `status`, setting `error`/`completed_at` as
    /// appropriate. Idempotent: applying the same terminal status twice is
    /// a no-op success, matching the reconciler's compare-and-set writes.
    pub async fn update_step_status(
        &self,
        id: StepId,
        status: StepStatus,
        error: Option<String>,
        outputs: Option<std::collections::HashMap<String, serde_json::Value>>,
        at_ms: i64,
    ) -> StoreResult<()> {
        self.with_conn(move |conn| {
            let completed_at = if status.is_terminal() { Some(at_ms) } else { None };
            let started_at = if matches!(status, StepStatus::Running) {
                Some(at_ms)
            } else {
                None
            };
            let changed = if let Some(outputs) = outputs {
                conn.execute(
                    "UPDATE steps SET status = ?1, error = ?2,
                        completed_at = COALESCE(?3, completed_at),
                        started_at = COALESCE(?4, started_at),
                        outputs = ?5
                     WHERE id = ?6",
                    params![
                        status_str(status),
                        error,
                        completed_at,
                        started_at,
                        serde_json::to_string(&outputs)?,
                        id.as_str(),
                    ],
                )?
            } else {
                conn.execute(
                    "UPDATE steps SET status = ?1, error = ?2,
                        completed_at = COALESCE(?3, completed_at),
                        started_at = COALESCE(?4, started_at)
                     WHERE id = ?5",
                    params![status_str(status), error, completed_at, started_at, id.as_str()],
                )?
            };
            if changed == 0 {
                return Err(StoreError::NotFound);
            }
            Ok(())
        })
        .await
    }
}

fn status_str(status: StepStatus) -> &'static str {
    match status {
        StepStatus::Pending => "pending",
        StepStatus::Running => "running",
        StepStatus::Completed => "completed",
        StepStatus::Failed => "failed",
    }
}

fn parse_status(s: &str) -> StepStatus {
    match s {
        "running" => StepStatus::Running,
        "completed" => StepStatus::Completed,
        "failed" => StepStatus::Failed,
        _ => StepStatus::Pending,
    }
}

fn row_to_step(row: &rusqlite::Row<'_>) -> rusqlite::Result<Step> {
    let inputs_json: String = row.get(5)?;
    let outputs_json: String = row.get(6)?;
    let status_text: String = row.get(4)?;
    Ok(Step {
        id: row.get::<_, String>(0)?.into(),
        run_id: row.get::<_, String>(1)?.into(),
        step_logical_id: row.get(2)?,
        agent_id: row.get::<_, String>(3)?.into(),
        status: parse_status(&status_text),
        inputs: serde_json::from_str(&inputs_json).unwrap_or_default(),
        outputs: serde_json::from_str(&outputs_json).unwrap_or_default(),
        error: row.get(7)?,
        retry_count: row.get(8)?,
        max_retries: row.get(9)?,
        session_id: row.get::<_, Option<String>>(10)?.map(Into::into),
        started_at: row.get(11)?,
        completed_at: row.get(12)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use djinnbot_types::AgentId;

    #[tokio::test]
    async fn upsert_step_is_an_insert_then_update() {
        let store = Store::open_in_memory().unwrap();
        let run_id = RunId::from("run_1");
        let step = Step::new(run_id.clone(), "analyze", AgentId::from("reviewer"));
        let id = step.id.clone();
        store.upsert_step(step).await.unwrap();

        store
            .update_step_status(id.clone(), StepStatus::Running, None, None, 1_000)
            .await
            .unwrap();
        let loaded = store.get_step(id.clone()).await.unwrap();
        assert_eq!(loaded.status, StepStatus::Running);
        assert_eq!(loaded.started_at, Some(1_000));

        let mut outputs = std::collections::HashMap::new();
        outputs.insert("score".to_string(), serde_json::json!("8/10"));
        store
            .update_step_status(id.clone(), StepStatus::Completed, None, Some(outputs), 2_000)
            .await
            .unwrap();
        let loaded = store.get_step(id).await.unwrap();
        assert_eq!(loaded.status, StepStatus::Completed);
        assert_eq!(loaded.completed_at, Some(2_000));
        assert_eq!(loaded.outputs.get("score").unwrap(), "8/10");
    }

    #[tokio::test]
    async fn list_steps_for_run_preserves_insertion_order() {
        let store = Store::open_in_memory().unwrap();
        let run_id = RunId::from("run_1");
        store
            .upsert_step(Step::new(run_id.clone(), "analyze", AgentId::from("reviewer")))
            .await
            .unwrap();
        store
            .upsert_step(Step::new(run_id.clone(), "summarize", AgentId::from("writer")))
            .await
            .unwrap();

        let steps = store.list_steps_for_run(run_id).await.unwrap();
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].step_logical_id, "analyze");
        assert_eq!(steps[1].step_logical_id, "summarize");
    }
}
