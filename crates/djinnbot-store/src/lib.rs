//! Relational transactional store for runs, steps, tasks, sessions,
//! retrieval scores, and webhook events — the only durable record of
//! these entities (§3/§4.1).
//!
//! `rusqlite::Connection` is neither `Send` across await points in a way
//! that's safe to share, nor meant to be driven from the async reactor
//! directly. Every public method confines its SQL to a `spawn_blocking`
//! closure over a connection guarded by a single mutex, so synchronous
//! SQLite calls never block the tokio runtime (§9, "isolated worker").

mod projects;
mod retrieval;
mod runs;
mod sessions;
mod steps;
mod tasks;
mod webhooks;

pub use projects::*;
pub use retrieval::*;
pub use runs::*;
pub use sessions::*;
pub use steps::*;
pub use tasks::*;
pub use webhooks::*;

use std::path::Path;
use std::sync::{Arc, Mutex};

use rusqlite::Connection;
use thiserror::Error;

const SCHEMA_VERSION: i64 = 1;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found")]
    NotFound,
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("schema version {on_disk} is newer than this binary supports ({supported})")]
    SchemaTooNew { on_disk: i64, supported: i64 },
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("worker unavailable: {0}")]
    Worker(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    pub async fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        let conn = tokio::task::spawn_blocking(move || -> StoreResult<Connection> {
            let conn = Connection::open(&path)?;
            conn.pragma_update(None, "journal_mode", "WAL")?;
            conn.pragma_update(None, "foreign_keys", "ON")?;
            run_migrations(&conn)?;
            Ok(conn)
        })
        .await
        .map_err(|e| StoreError::Worker(e.to_string()))??;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        run_migrations(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Runs a closure against the connection on a blocking worker thread.
    /// The request surface this crate exposes (runs/steps/tasks/sessions/
    /// retrieval/webhooks) is the small handful of query kinds Design
    /// Note §9 calls for; this helper is the plumbing all of them share.
    pub(crate) async fn with_conn<F, T>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&Connection) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().expect("store connection mutex poisoned");
            f(&guard)
        })
        .await
        .map_err(|e| StoreError::Worker(e.to_string()))?
    }
}

fn run_migrations(conn: &Connection) -> StoreResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_meta (version INTEGER NOT NULL);",
    )?;

    let current: Option<i64> = conn
        .query_row("SELECT version FROM schema_meta LIMIT 1", [], |row| {
            row.get(0)
        })
        .ok();

    match current {
        Some(version) if version > SCHEMA_VERSION => {
            return Err(StoreError::SchemaTooNew {
                on_disk: version,
                supported: SCHEMA_VERSION,
            });
        }
        Some(_) => {}
        None => {
            conn.execute("INSERT INTO schema_meta (version) VALUES (?1)", [SCHEMA_VERSION])?;
        }
    }

    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS runs (
            id TEXT PRIMARY KEY,
            pipeline_id TEXT NOT NULL,
            project_id TEXT,
            task_description TEXT NOT NULL,
            status TEXT NOT NULL,
            current_step_id TEXT,
            outputs TEXT NOT NULL,
            human_context TEXT NOT NULL,
            model_override TEXT,
            task_branch TEXT,
            workspace_type TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            completed_at INTEGER,
            tasks_imported INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS steps (
            id TEXT PRIMARY KEY,
            run_id TEXT NOT NULL REFERENCES runs(id) ON DELETE CASCADE,
            step_logical_id TEXT NOT NULL,
            agent_id TEXT NOT NULL,
            status TEXT NOT NULL,
            inputs TEXT NOT NULL,
            outputs TEXT NOT NULL,
            error TEXT,
            retry_count INTEGER NOT NULL,
            max_retries INTEGER NOT NULL,
            session_id TEXT,
            started_at INTEGER,
            completed_at INTEGER
        );
        CREATE INDEX IF NOT EXISTS idx_steps_run_id ON steps(run_id);

        CREATE TABLE IF NOT EXISTS tasks (
            id TEXT PRIMARY KEY,
            project_id TEXT NOT NULL,
            title TEXT NOT NULL,
            description TEXT NOT NULL,
            status TEXT NOT NULL,
            priority TEXT NOT NULL,
            assigned_agent TEXT,
            run_id TEXT,
            parent_task_id TEXT,
            depends_on TEXT NOT NULL,
            tags TEXT NOT NULL,
            column_id TEXT NOT NULL,
            column_position INTEGER NOT NULL,
            metadata TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            completed_at INTEGER
        );
        CREATE INDEX IF NOT EXISTS idx_tasks_project_id ON tasks(project_id);

        CREATE TABLE IF NOT EXISTS sessions (
            id TEXT PRIMARY KEY,
            agent_id TEXT NOT NULL,
            status TEXT NOT NULL,
            model TEXT,
            container_id TEXT,
            created_at INTEGER NOT NULL,
            started_at INTEGER,
            last_activity_at INTEGER NOT NULL,
            completed_at INTEGER,
            message_count INTEGER NOT NULL,
            pulse_triggered INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS retrieval_scores (
            agent_id TEXT NOT NULL,
            memory_id TEXT NOT NULL,
            access_count INTEGER NOT NULL,
            success_count INTEGER NOT NULL,
            failure_count INTEGER NOT NULL,
            last_accessed INTEGER NOT NULL,
            PRIMARY KEY (agent_id, memory_id)
        );

        CREATE TABLE IF NOT EXISTS projects (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            repository_full_name TEXT,
            status_semantics TEXT NOT NULL,
            agent_assignments TEXT NOT NULL,
            created_at INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_projects_repository ON projects(repository_full_name);

        CREATE TABLE IF NOT EXISTS webhook_events (
            id TEXT PRIMARY KEY,
            delivery_id TEXT NOT NULL UNIQUE,
            event_type TEXT NOT NULL,
            action TEXT,
            repository_full_name TEXT,
            installation_id INTEGER,
            signature TEXT NOT NULL,
            verified INTEGER NOT NULL,
            payload TEXT NOT NULL,
            received_at INTEGER NOT NULL,
            processed INTEGER NOT NULL,
            processing_error TEXT
        );
        ",
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_in_memory_creates_schema_and_version_row() {
        let store = Store::open_in_memory().unwrap();
        let guard = store.conn.lock().unwrap();
        let version: i64 = guard
            .query_row("SELECT version FROM schema_meta", [], |r| r.get(0))
            .unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[test]
    fn rejects_a_database_from_a_newer_schema_version() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE schema_meta (version INTEGER NOT NULL);")
            .unwrap();
        conn.execute("INSERT INTO schema_meta (version) VALUES (?1)", [SCHEMA_VERSION + 1])
            .unwrap();
        let result = run_migrations(&conn);
        assert!(matches!(result, Err(StoreError::SchemaTooNew { .. })));
    }
}
