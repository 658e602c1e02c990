use djinnbot_types::{Project, ProjectId};
use rusqlite::{params, OptionalExtension};

use crate::{Store, StoreError, StoreResult};

impl Store {
    pub async fn insert_project(&self, project: Project) -> StoreResult<Project> {
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO projects (id, name, repository_full_name, status_semantics,
                    agent_assignments, created_at) VALUES (?1,?2,?3,?4,?5,?6)",
                params![
                    project.id.as_str(),
                    project.name,
                    project.repository_full_name,
                    serde_json::to_string(&project.status_semantics)?,
                    serde_json::to_string(&project.agent_assignments)?,
                    project.created_at,
                ],
            )?;
            Ok(project)
        })
        .await
    }

    pub async fn get_project(&self, id: ProjectId) -> StoreResult<Project> {
        self.with_conn(move |conn| {
            conn.query_row(&select_project_sql("WHERE id = ?1"), params![id.as_str()], row_to_project)
                .optional()?
                .ok_or(StoreError::NotFound)
        })
        .await
    }

    /// Resolves the project a webhook delivery belongs to (§4.6 step 7:
    /// "look up the project by matching repository URL").
    pub async fn find_project_by_repository(
        &self,
        repository_full_name: String,
    ) -> StoreResult<Option<Project>> {
        self.with_conn(move |conn| {
            conn.query_row(
                &select_project_sql("WHERE repository_full_name = ?1"),
                params![repository_full_name],
                row_to_project,
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }
}

fn select_project_sql(filter: &str) -> String {
    format!(
        "SELECT id, name, repository_full_name, status_semantics, agent_assignments, created_at
         FROM projects {filter}"
    )
}

fn row_to_project(row: &rusqlite::Row<'_>) -> rusqlite::Result<Project> {
    let status_semantics_json: String = row.get(3)?;
    let agent_assignments_json: String = row.get(4)?;
    Ok(Project {
        id: row.get::<_, String>(0)?.into(),
        name: row.get(1)?,
        repository_full_name: row.get(2)?,
        status_semantics: serde_json::from_str(&status_semantics_json).unwrap_or_default(),
        agent_assignments: serde_json::from_str(&agent_assignments_json).unwrap_or_default(),
        created_at: row.get(5)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use djinnbot_types::task::StatusSemantics;

    fn sample_project() -> Project {
        Project {
            id: ProjectId::generate(),
            name: "Widgets".into(),
            repository_full_name: Some("acme/widgets".into()),
            status_semantics: StatusSemantics::default(),
            agent_assignments: vec![],
            created_at: 0,
        }
    }

    #[tokio::test]
    async fn find_project_by_repository_matches_on_full_name() {
        let store = Store::open_in_memory().unwrap();
        let project = sample_project();
        let id = project.id.clone();
        store.insert_project(project).await.unwrap();

        let found = store
            .find_project_by_repository("acme/widgets".into())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, id);
    }

    #[tokio::test]
    async fn unknown_repository_returns_none_not_an_error() {
        let store = Store::open_in_memory().unwrap();
        let found = store
            .find_project_by_repository("nobody/nothing".into())
            .await
            .unwrap();
        assert!(found.is_none());
    }
}
