use djinnbot_types::{ProjectId, Task, TaskId, TaskMetadata, TaskPriority, TransitionNote};
use rusqlite::{params, OptionalExtension};

use crate::{Store, StoreError, StoreResult};

impl Store {
    pub async fn insert_task(&self, task: Task) -> StoreResult<Task> {
        self.with_conn(move |conn| {
            insert_task_row(conn, &task)?;
            Ok(task)
        })
        .await
    }

    pub async fn insert_tasks(&self, tasks: Vec<Task>) -> StoreResult<()> {
        self.with_conn(move |conn| {
            for task in &tasks {
                insert_task_row(conn, task)?;
            }
            Ok(())
        })
        .await
    }

    pub async fn get_task(&self, id: TaskId) -> StoreResult<Task> {
        self.with_conn(move |conn| {
            conn.query_row(&select_task_sql("WHERE id = ?1"), params![id.as_str()], row_to_task)
                .optional()?
                .ok_or(StoreError::NotFound)
        })
        .await
    }

    pub async fn list_tasks_for_project(&self, project_id: ProjectId) -> StoreResult<Vec<Task>> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&select_task_sql("WHERE project_id = ?1 ORDER BY column_position"))?;
            let rows = stmt
                .query_map(params![project_id.as_str()], row_to_task)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }

    pub async fn find_task_by_pr_metadata(
        &self,
        project_id: ProjectId,
        pr_number: i64,
    ) -> StoreResult<Option<Task>> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&select_task_sql(
                "WHERE project_id = ?1 AND json_extract(metadata, '$.pr_number') = ?2",
            ))?;
            let task = stmt
                .query_map(params![project_id.as_str(), pr_number], row_to_task)?
                .next()
                .transpose()?;
            Ok(task)
        })
        .await
    }

    pub async fn find_task_by_branch(
        &self,
        project_id: ProjectId,
        branch: String,
    ) -> StoreResult<Option<Task>> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&select_task_sql(
                "WHERE project_id = ?1 AND json_extract(metadata, '$.git_branch') = ?2",
            ))?;
            let task = stmt
                .query_map(params![project_id.as_str(), branch], row_to_task)?
                .next()
                .transpose()?;
            Ok(task)
        })
        .await
    }

    /// Transitions a task to `status`, placing it in `column_id`, and
    /// appending one transition note. `completed_at` is set iff the new
    /// status is already known to be `terminal-done` by the caller
    /// (callers consult `StatusSemantics` before calling this).
    pub async fn transition_task_status(
        &self,
        id: TaskId,
        status: String,
        column_id: String,
        note: TransitionNote,
        completed_at: Option<i64>,
        now_ms: i64,
    ) -> StoreResult<()> {
        self.with_conn(move |conn| {
            let metadata_json: String = conn
                .query_row("SELECT metadata FROM tasks WHERE id = ?1", params![id.as_str()], |r| {
                    r.get(0)
                })
                .optional()?
                .ok_or(StoreError::NotFound)?;
            let mut metadata: TaskMetadata = serde_json::from_str(&metadata_json)?;
            metadata.transition_notes.push(note);

            let changed = conn.execute(
                "UPDATE tasks SET status = ?1, column_id = ?2, metadata = ?3,
                    completed_at = ?4, updated_at = ?5 WHERE id = ?6",
                params![
                    status,
                    column_id,
                    serde_json::to_string(&metadata)?,
                    completed_at,
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

fn insert_task_row(conn: &rusqlite::Connection, task: &Task) -> StoreResult<()> {
    conn.execute(
        "INSERT INTO tasks (id, project_id, title, description, status, priority,
            assigned_agent, run_id, parent_task_id, depends_on, tags, column_id,
            column_position, metadata, created_at, updated_at, completed_at)
         VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17)",
        params![
            task.id.as_str(),
            task.project_id.as_str(),
            task.title,
            task.description,
            task.status,
            priority_str(task.priority),
            task.assigned_agent.as_ref().map(|a| a.as_str()),
            task.run_id.as_ref().map(|r| r.as_str()),
            task.parent_task_id.as_ref().map(|p| p.as_str()),
            serde_json::to_string(&task.depends_on)?,
            serde_json::to_string(&task.tags)?,
            task.column_id,
            task.column_position,
            serde_json::to_string(&task.metadata)?,
            task.created_at,
            task.updated_at,
            task.completed_at,
        ],
    )?;
    Ok(())
}

fn select_task_sql(filter: &str) -> String {
    format!(
        "SELECT id, project_id, title, description, status, priority, assigned_agent, run_id,
            parent_task_id, depends_on, tags, column_id, column_position, metadata,
            created_at, updated_at, completed_at FROM tasks {filter}"
    )
}

fn priority_str(priority: TaskPriority) -> &'static str {
    match priority {
        TaskPriority::Low => "low",
        TaskPriority::Normal => "normal",
        TaskPriority::High => "high",
        TaskPriority::Urgent => "urgent",
    }
}

fn parse_priority(s: &str) -> TaskPriority {
    match s {
        "low" => TaskPriority::Low,
        "high" => TaskPriority::High,
        "urgent" => TaskPriority::Urgent,
        _ => TaskPriority::Normal,
    }
}

fn row_to_task(row: &rusqlite::Row<'_>) -> rusqlite::Result<Task> {
    let priority_text: String = row.get(5)?;
    let depends_on_json: String = row.get(9)?;
    let tags_json: String = row.get(10)?;
    let metadata_json: String = row.get(13)?;
    Ok(Task {
        id: row.get::<_, String>(0)?.into(),
        project_id: row.get::<_, String>(1)?.into(),
        title: row.get(2)?,
        description: row.get(3)?,
        status: row.get(4)?,
        priority: parse_priority(&priority_text),
        assigned_agent: row.get::<_, Option<String>>(6)?.map(Into::into),
        run_id: row.get::<_, Option<String>>(7)?.map(Into::into),
        parent_task_id: row.get::<_, Option<String>>(8)?.map(Into::into),
        depends_on: serde_json::from_str(&depends_on_json).unwrap_or_default(),
        tags: serde_json::from_str(&tags_json).unwrap_or_default(),
        column_id: row.get(11)?,
        column_position: row.get(12)?,
        metadata: serde_json::from_str(&metadata_json).unwrap_or_default(),
        created_at: row.get(14)?,
        updated_at: row.get(15)?,
        completed_at: row.get(16)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_task() -> Task {
        Task {
            id: TaskId::generate(),
            project_id: ProjectId::from("proj_1"),
            title: "Fix the thing".into(),
            description: String::new(),
            status: "review".into(),
            priority: TaskPriority::Normal,
            assigned_agent: Some(djinnbot_types::AgentId::from("yukihiro")),
            run_id: None,
            parent_task_id: None,
            depends_on: vec![],
            tags: vec![],
            column_id: "col_review".into(),
            column_position: 0,
            metadata: TaskMetadata {
                pr_number: Some(42),
                git_branch: Some("feat/task_abc-fix".into()),
                ..Default::default()
            },
            created_at: 0,
            updated_at: 0,
            completed_at: None,
        }
    }

    #[tokio::test]
    async fn find_task_by_pr_metadata_matches_on_pr_number() {
        let store = Store::open_in_memory().unwrap();
        let task = sample_task();
        let id = task.id.clone();
        store.insert_task(task).await.unwrap();

        let found = store
            .find_task_by_pr_metadata(ProjectId::from("proj_1"), 42)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, id);
    }

    #[tokio::test]
    async fn transition_task_status_appends_a_note_and_sets_completed_at() {
        let store = Store::open_in_memory().unwrap();
        let task = sample_task();
        let id = task.id.clone();
        store.insert_task(task).await.unwrap();

        store
            .transition_task_status(
                id.clone(),
                "done".into(),
                "col_done".into(),
                TransitionNote {
                    from: "review".into(),
                    to: "done".into(),
                    note: "PR #42 merged".into(),
                    timestamp: 1_000,
                    source: "github_webhook".into(),
                },
                Some(1_000),
                1_000,
            )
            .await
            .unwrap();

        let loaded = store.get_task(id).await.unwrap();
        assert_eq!(loaded.status, "done");
        assert_eq!(loaded.completed_at, Some(1_000));
        assert_eq!(loaded.metadata.transition_notes.len(), 1);
    }
}
