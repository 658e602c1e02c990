use djinnbot_types::{AgentId, Session, SessionId, SessionStatus};
use rusqlite::{params, OptionalExtension};

use crate::{Store, StoreError, StoreResult};

impl Store {
    pub async fn insert_session(&self, session: Session) -> StoreResult<Session> {
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO sessions (id, agent_id, status, model, container_id, created_at,
                    started_at, last_activity_at, completed_at, message_count, pulse_triggered)
                 VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11)",
                params![
                    session.id.as_str(),
                    session.agent_id.as_str(),
                    status_str(session.status),
                    session.model,
                    session.container_id,
                    session.created_at,
                    session.started_at,
                    session.last_activity_at,
                    session.completed_at,
                    session.message_count,
                    session.pulse_triggered,
                ],
            )?;
            Ok(session)
        })
        .await
    }

    pub async fn get_session(&self, id: SessionId) -> StoreResult<Session> {
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT id, agent_id, status, model, container_id, created_at, started_at,
                    last_activity_at, completed_at, message_count, pulse_triggered
                    FROM sessions WHERE id = ?1",
                params![id.as_str()],
                row_to_session,
            )
            .optional()?
            .ok_or(StoreError::NotFound)
        })
        .await
    }

    pub async fn touch_session(&self, id: SessionId, at_ms: i64) -> StoreResult<()> {
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "UPDATE sessions SET last_activity_at = ?1, message_count = message_count + 1
                 WHERE id = ?2 AND last_activity_at < ?1",
                params![at_ms, id.as_str()],
            )?;
            if changed == 0 {
                // Either not found, or the touch was a no-op because the
                // clock did not advance — distinguish the two.
                let exists: Option<String> = conn
                    .query_row("SELECT id FROM sessions WHERE id = ?1", params![id.as_str()], |r| {
                        r.get(0)
                    })
                    .optional()?;
                if exists.is_none() {
                    return Err(StoreError::NotFound);
                }
            }
            Ok(())
        })
        .await
    }

    pub async fn update_session_status(
        &self,
        id: SessionId,
        status: SessionStatus,
        at_ms: i64,
    ) -> StoreResult<()> {
        self.with_conn(move |conn| {
            let completed_at = if status.is_live() { None } else { Some(at_ms) };
            let changed = conn.execute(
                "UPDATE sessions SET status = ?1, completed_at = COALESCE(?2, completed_at)
                 WHERE id = ?3",
                params![status_str(status), completed_at, id.as_str()],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound);
            }
            Ok(())
        })
        .await
    }

    /// Live, pulse-originated sessions started before `cutoff_ms` — the
    /// deadline enforcer's candidate set (§3's "explicit deadline").
    pub async fn list_overdue_pulse_sessions(&self, cutoff_ms: i64) -> StoreResult<Vec<Session>> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, agent_id, status, model, container_id, created_at, started_at,
                    last_activity_at, completed_at, message_count, pulse_triggered
                 FROM sessions
                 WHERE pulse_triggered = 1 AND status IN ('starting', 'running')
                    AND created_at < ?1",
            )?;
            let rows = stmt
                .query_map(params![cutoff_ms], row_to_session)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }

    pub async fn count_live_sessions_for_agent(&self, agent_id: AgentId) -> StoreResult<u32> {
        self.with_conn(move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM sessions WHERE agent_id = ?1 AND status IN ('starting', 'running')",
                params![agent_id.as_str()],
                |r| r.get(0),
            )?;
            Ok(count as u32)
        })
        .await
    }
}

fn status_str(status: SessionStatus) -> &'static str {
    match status {
        SessionStatus::Starting => "starting",
        SessionStatus::Running => "running",
        SessionStatus::Completed => "completed",
        SessionStatus::Failed => "failed",
        SessionStatus::Cancelled => "cancelled",
    }
}

fn parse_status(s: &str) -> SessionStatus {
    match s {
        "running" => SessionStatus::Running,
        "completed" => SessionStatus::Completed,
        "failed" => SessionStatus::Failed,
        "cancelled" => SessionStatus::Cancelled,
        _ => SessionStatus::Starting,
    }
}

fn row_to_session(row: &rusqlite::Row<'_>) -> rusqlite::Result<Session> {
    let status_text: String = row.get(2)?;
    Ok(Session {
        id: row.get::<_, String>(0)?.into(),
        agent_id: row.get::<_, String>(1)?.into(),
        status: parse_status(&status_text),
        model: row.get(3)?,
        container_id: row.get(4)?,
        created_at: row.get(5)?,
        started_at: row.get(6)?,
        last_activity_at: row.get(7)?,
        completed_at: row.get(8)?,
        message_count: row.get(9)?,
        pulse_triggered: row.get(10)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn update_session_status_sets_completed_at_only_on_terminal_states() {
        let store = Store::open_in_memory().unwrap();
        let session = Session::new(AgentId::from("reviewer"), None);
        let id = session.id.clone();
        store.insert_session(session).await.unwrap();

        store
            .update_session_status(id.clone(), SessionStatus::Running, 1_000)
            .await
            .unwrap();
        assert_eq!(store.get_session(id.clone()).await.unwrap().completed_at, None);

        store
            .update_session_status(id.clone(), SessionStatus::Completed, 2_000)
            .await
            .unwrap();
        assert_eq!(store.get_session(id).await.unwrap().completed_at, Some(2_000));
    }

    #[tokio::test]
    async fn count_live_sessions_excludes_terminal_ones() {
        let store = Store::open_in_memory().unwrap();
        let agent = AgentId::from("reviewer");
        let live = Session::new(agent.clone(), None);
        let done = Session::new(agent.clone(), None);
        let done_id = done.id.clone();
        store.insert_session(live).await.unwrap();
        store.insert_session(done).await.unwrap();
        store
            .update_session_status(done_id, SessionStatus::Completed, 1_000)
            .await
            .unwrap();

        assert_eq!(store.count_live_sessions_for_agent(agent).await.unwrap(), 1);
    }
}
