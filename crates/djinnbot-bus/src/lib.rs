//! Event bus: append-only streams, pub/sub channels, and key/value with
//! TTL, all backed by Redis (§4.2). A `ConnectionManager` is shared by
//! every bus handle so a dropped connection reconnects transparently
//! instead of pushing retry logic onto every caller.

pub mod keys;
mod pubsub;
mod streams;
mod wake;
mod worklock;

pub use pubsub::Subscription;
pub use streams::StreamEntry;
pub use worklock::LockOutcome;

use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BusError {
    #[error(transparent)]
    Redis(#[from] redis::RedisError),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type BusResult<T> = Result<T, BusError>;

#[derive(Clone)]
pub struct Bus {
    client: redis::Client,
    conn: ConnectionManager,
}

impl Bus {
    pub async fn connect(redis_url: &str) -> BusResult<Self> {
        let client = redis::Client::open(redis_url)?;
        let conn = client.get_connection_manager().await?;
        Ok(Self { client, conn })
    }

    pub(crate) fn conn(&self) -> ConnectionManager {
        self.conn.clone()
    }

    pub async fn get(&self, key: &str) -> BusResult<Option<String>> {
        let mut conn = self.conn();
        Ok(conn.get(key).await?)
    }

    pub async fn set(&self, key: &str, value: &str) -> BusResult<()> {
        let mut conn = self.conn();
        let _: () = conn.set(key, value).await?;
        Ok(())
    }

    pub async fn set_with_ttl(&self, key: &str, value: &str, ttl_ms: u64) -> BusResult<()> {
        let mut conn = self.conn();
        let _: () = conn.pset_ex(key, value, ttl_ms).await?;
        Ok(())
    }

    pub async fn delete(&self, key: &str) -> BusResult<()> {
        let mut conn = self.conn();
        let _: () = conn.del(key).await?;
        Ok(())
    }

    /// Atomic per Redis semantics: `SADD` either adds the member or is a
    /// no-op if already present, returning whether it was newly added.
    pub async fn add_to_set(&self, key: &str, member: &str) -> BusResult<bool> {
        let mut conn = self.conn();
        let added: i64 = conn.sadd(key, member).await?;
        Ok(added > 0)
    }

    pub async fn remove_from_set(&self, key: &str, member: &str) -> BusResult<()> {
        let mut conn = self.conn();
        let _: () = conn.srem(key, member).await?;
        Ok(())
    }

    pub async fn set_members(&self, key: &str) -> BusResult<Vec<String>> {
        let mut conn = self.conn();
        Ok(conn.smembers(key).await?)
    }

    /// Atomic counter increment with an expiry set only the first time the
    /// key is created — used for the daily wake/session-minute counters,
    /// which must reset at the next calendar day without a separate
    /// scheduled job.
    pub async fn incr_with_expiry(&self, key: &str, by: i64, ttl_seconds: u64) -> BusResult<i64> {
        let mut conn = self.conn();
        let script = redis::Script::new(
            r"
            local value = redis.call('INCRBY', KEYS[1], ARGV[1])
            if tonumber(value) == tonumber(ARGV[1]) then
                redis.call('EXPIRE', KEYS[1], ARGV[2])
            end
            return value
            ",
        );
        let value: i64 = script
            .key(key)
            .arg(by)
            .arg(ttl_seconds)
            .invoke_async(&mut conn)
            .await?;
        Ok(value)
    }

    pub async fn get_counter(&self, key: &str) -> BusResult<i64> {
        let mut conn = self.conn();
        let value: Option<i64> = conn.get(key).await?;
        Ok(value.unwrap_or(0))
    }
}
