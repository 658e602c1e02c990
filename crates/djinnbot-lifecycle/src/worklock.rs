use anyhow::Result;
use djinnbot_bus::{Bus, LockOutcome};
use djinnbot_types::{SessionId, WorkLock};

/// Thin, named wrapper over the bus's CAS primitive so callers reason in
/// terms of "claim"/"release" rather than raw Redis keys.
#[derive(Clone)]
pub struct WorkLockHandle {
    bus: Bus,
}

impl WorkLockHandle {
    pub fn new(bus: Bus) -> Self {
        Self { bus }
    }

    pub async fn claim(
        &self,
        agent_id: &str,
        work_key: &str,
        session_id: SessionId,
        description: &str,
        ttl_seconds: u64,
    ) -> Result<LockOutcome> {
        let lock = WorkLock {
            agent_id: agent_id.into(),
            work_key: work_key.to_string(),
            session_id,
            description: description.to_string(),
            acquired_at: djinnbot_types::now_ms(),
            ttl_seconds,
        };
        Ok(self.bus.acquire_work_lock(lock).await?)
    }

    pub async fn release(&self, agent_id: &str, work_key: &str) -> Result<()> {
        self.bus.release_work_lock(agent_id, work_key).await?;
        Ok(())
    }

    pub async fn ledger(&self, agent_id: &str) -> Result<Vec<WorkLock>> {
        Ok(self.bus.list_work_ledger(agent_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_bus() -> Option<Bus> {
        match std::env::var("DJINNBOT_TEST_REDIS_URL") {
            Ok(url) => Bus::connect(&url).await.ok(),
            Err(_) => None,
        }
    }

    #[tokio::test]
    async fn second_claim_on_same_work_key_is_rejected() {
        let Some(bus) = test_bus().await else {
            return;
        };
        let handle = WorkLockHandle::new(bus);
        let agent_id = format!("test-agent-{}", std::process::id());
        let session_id = SessionId::from("sess_test");
        let first = handle
            .claim(&agent_id, "task:1", session_id.clone(), "first claim", 30)
            .await
            .unwrap();
        assert!(matches!(first, LockOutcome::Acquired(_)));

        let second = handle
            .claim(&agent_id, "task:1", session_id, "second claim", 30)
            .await
            .unwrap();
        assert!(matches!(second, LockOutcome::AlreadyHeld(_)));

        handle.release(&agent_id, "task:1").await.unwrap();
    }
}
