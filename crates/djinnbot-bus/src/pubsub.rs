use futures::StreamExt;
use redis::AsyncCommands;

use crate::{Bus, BusResult};

/// A live subscription to one channel. Dropping it closes the underlying
/// pub/sub connection; messages published before `subscribe` returns are
/// never seen, matching the "fire-and-forget, no backlog" contract of
/// channels (as opposed to streams, which do replay).
pub struct Subscription {
    inner: redis::aio::PubSub,
}

impl Subscription {
    /// Waits for the next published message. Returns `None` only if the
    /// underlying connection closed.
    pub async fn next(&mut self) -> Option<String> {
        let mut stream = self.inner.on_message();
        let msg = stream.next().await?;
        msg.get_payload().ok()
    }
}

impl Bus {
    pub async fn publish(&self, channel: &str, payload: &str) -> BusResult<()> {
        let mut conn = self.conn();
        let _: () = conn.publish(channel, payload).await?;
        Ok(())
    }

    pub async fn subscribe(&self, channel: &str) -> BusResult<Subscription> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(channel).await?;
        Ok(Subscription { inner: pubsub })
    }
}
