use djinnbot_types::WorkLock;
use redis::AsyncCommands;

use crate::keys;
use crate::{Bus, BusResult};

#[derive(Debug, Clone)]
pub enum LockOutcome {
    Acquired(WorkLock),
    AlreadyHeld(WorkLock),
}

impl Bus {
    /// Atomic CAS: the single mechanism preventing two parallel instances
    /// of the same agent from claiming the same work-key (§4.4). Uses a
    /// Lua script so the existence check, the `SET ... PX`, and the
    /// `SADD` to the ledger happen as one server-side operation.
    pub async fn acquire_work_lock(&self, lock: WorkLock) -> BusResult<LockOutcome> {
        let mut conn = self.conn();
        let lock_key = keys::agent_work_lock(lock.agent_id.as_str(), &lock.work_key);
        let ledger_key = keys::agent_work_ledger(lock.agent_id.as_str());
        let value = serde_json::to_string(&lock)?;
        let ttl_ms = lock.ttl_seconds * 1000;

        let script = redis::Script::new(
            r"
            local existing = redis.call('GET', KEYS[1])
            if existing then
                return existing
            end
            redis.call('SET', KEYS[1], ARGV[1], 'PX', ARGV[2])
            redis.call('SADD', KEYS[2], ARGV[3])
            return false
            ",
        );

        let result: redis::Value = script
            .key(&lock_key)
            .key(&ledger_key)
            .arg(&value)
            .arg(ttl_ms)
            .arg(&lock.work_key)
            .invoke_async(&mut conn)
            .await?;

        match result {
            redis::Value::BulkString(bytes) => {
                let existing: WorkLock = serde_json::from_slice(&bytes)?;
                Ok(LockOutcome::AlreadyHeld(existing))
            }
            _ => Ok(LockOutcome::Acquired(lock)),
        }
    }

    pub async fn release_work_lock(&self, agent_id: &str, work_key: &str) -> BusResult<()> {
        let mut conn = self.conn();
        let lock_key = keys::agent_work_lock(agent_id, work_key);
        let ledger_key = keys::agent_work_ledger(agent_id);
        let _: () = conn.del(&lock_key).await?;
        let _: () = conn.srem(&ledger_key, work_key).await?;
        Ok(())
    }

    /// Enumerates held locks, reaping any ledger entries whose lock key
    /// has already expired (TTL is the sole expiry mechanism — this just
    /// keeps the ledger set from accumulating stale members).
    pub async fn list_work_ledger(&self, agent_id: &str) -> BusResult<Vec<WorkLock>> {
        let mut conn = self.conn();
        let ledger_key = keys::agent_work_ledger(agent_id);
        let members: Vec<String> = conn.smembers(&ledger_key).await?;

        let mut live = Vec::new();
        for work_key in members {
            let lock_key = keys::agent_work_lock(agent_id, &work_key);
            let value: Option<String> = conn.get(&lock_key).await?;
            match value {
                Some(json) => {
                    if let Ok(lock) = serde_json::from_str::<WorkLock>(&json) {
                        live.push(lock);
                    }
                }
                None => {
                    let _: () = conn.srem(&ledger_key, &work_key).await?;
                }
            }
        }
        Ok(live)
    }
}
