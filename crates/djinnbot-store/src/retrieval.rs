use djinnbot_types::{AgentId, RetrievalScore};
use rusqlite::{params, OptionalExtension};

use crate::{Store, StoreResult};

impl Store {
    pub async fn get_retrieval_score(
        &self,
        agent_id: AgentId,
        memory_id: String,
    ) -> StoreResult<Option<RetrievalScore>> {
        self.with_conn(move |conn| {
            let score = conn
                .query_row(
                    "SELECT agent_id, memory_id, access_count, success_count, failure_count,
                        last_accessed FROM retrieval_scores WHERE agent_id = ?1 AND memory_id = ?2",
                    params![agent_id.as_str(), memory_id],
                    row_to_score,
                )
                .optional()?;
            Ok(score)
        })
        .await
    }

    /// Records one access against a memory's retrieval score, creating the
    /// row on first access. `success_rate`/`adaptive_score` are never
    /// stored — they're recomputed on read per §3's invariant.
    pub async fn record_retrieval_access(
        &self,
        agent_id: AgentId,
        memory_id: String,
        succeeded: bool,
        at_ms: i64,
    ) -> StoreResult<RetrievalScore> {
        self.with_conn(move |conn| {
            let mut score = conn
                .query_row(
                    "SELECT agent_id, memory_id, access_count, success_count, failure_count,
                        last_accessed FROM retrieval_scores WHERE agent_id = ?1 AND memory_id = ?2",
                    params![agent_id.as_str(), memory_id],
                    row_to_score,
                )
                .optional()?
                .unwrap_or_else(|| RetrievalScore::new(agent_id.clone(), memory_id.clone()));

            score.record_access(succeeded, at_ms);

            conn.execute(
                "INSERT INTO retrieval_scores (agent_id, memory_id, access_count, success_count,
                    failure_count, last_accessed)
                 VALUES (?1,?2,?3,?4,?5,?6)
                 ON CONFLICT(agent_id, memory_id) DO UPDATE SET
                    access_count = excluded.access_count,
                    success_count = excluded.success_count,
                    failure_count = excluded.failure_count,
                    last_accessed = excluded.last_accessed",
                params![
                    score.agent_id.as_str(),
                    score.memory_id,
                    score.access_count,
                    score.success_count,
                    score.failure_count,
                    score.last_accessed,
                ],
            )?;
            Ok(score)
        })
        .await
    }
}

fn row_to_score(row: &rusqlite::Row<'_>) -> rusqlite::Result<RetrievalScore> {
    Ok(RetrievalScore {
        agent_id: row.get::<_, String>(0)?.into(),
        memory_id: row.get(1)?,
        access_count: row.get(2)?,
        success_count: row.get(3)?,
        failure_count: row.get(4)?,
        last_accessed: row.get(5)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn record_retrieval_access_creates_then_accumulates() {
        let store = Store::open_in_memory().unwrap();
        let agent = AgentId::from("reviewer");
        store
            .record_retrieval_access(agent.clone(), "mem_1".into(), true, 1_000)
            .await
            .unwrap();
        let score = store
            .record_retrieval_access(agent.clone(), "mem_1".into(), false, 2_000)
            .await
            .unwrap();
        assert_eq!(score.access_count, 2);
        assert_eq!(score.success_count, 1);
        assert_eq!(score.failure_count, 1);

        let loaded = store
            .get_retrieval_score(agent, "mem_1".into())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.access_count, 2);
    }
}
