use anyhow::{bail, Result};
use djinnbot_bus::{keys, Bus};
use djinnbot_types::{AgentId, InboxFilter, InboxMessage};

/// Thin wrapper over a pair of bus primitives (one append-only stream per
/// recipient, one cursor key) implementing send/list/mark-read/clear.
pub struct InboxRouter {
    bus: Bus,
}

/// A page of `list()` results alongside the total count of messages the
/// filter matched, for callers paginating with `limit`/`offset`.
pub struct InboxList {
    pub messages: Vec<InboxMessage>,
    pub total_matched: usize,
}

impl InboxRouter {
    pub fn new(bus: Bus) -> Self {
        Self { bus }
    }

    /// send(): appends to `agent:{to}:inbox`, returning the stream-id as
    /// the message-id.
    pub async fn send(&self, message: &InboxMessage) -> Result<String> {
        let stream = keys::agent_inbox_stream(message.to_agent.as_str());
        let payload = serde_json::to_string(message)?;
        let stream_id = self
            .bus
            .xadd(&stream, &[("data", payload.as_str())], None)
            .await?;
        Ok(stream_id)
    }

    /// list(): ranges the full stream and filters in application code —
    /// the stream itself carries no secondary index. Read/unread is
    /// computed against the last-read cursor rather than stored per
    /// message, so `mark_read` never has to rewrite history.
    pub async fn list(
        &self,
        agent_id: &AgentId,
        filter: &InboxFilter,
        limit: usize,
        offset: usize,
    ) -> Result<InboxList> {
        let stream = keys::agent_inbox_stream(agent_id.as_str());
        let last_read_key = keys::agent_inbox_last_read(agent_id.as_str());
        let last_read = self.bus.get(&last_read_key).await?;

        let entries = self.bus.xrange(&stream, "-", "+").await?;
        let mut matched = Vec::new();
        for entry in entries {
            let Some(payload) = entry.fields.get("data") else {
                continue;
            };
            let Ok(mut message) = serde_json::from_str::<InboxMessage>(payload) else {
                continue;
            };
            message.id = entry.id.clone();
            message.read = last_read
                .as_deref()
                .map(|cursor| stream_id_le(&entry.id, cursor))
                .unwrap_or(false);
            if filter.matches(&message) {
                matched.push(message);
            }
        }

        let total_matched = matched.len();
        let page = matched.into_iter().skip(offset).take(limit).collect();
        Ok(InboxList {
            messages: page,
            total_matched,
        })
    }

    /// mark-read(): advances the cursor to the max of its current value
    /// and the highest id in `message_ids` — never moves it backwards, so
    /// marking an old message read after a newer one doesn't un-read it.
    pub async fn mark_read(&self, agent_id: &AgentId, message_ids: &[String]) -> Result<()> {
        let Some(highest) = message_ids.iter().max_by(|a, b| stream_id_cmp(a, b)) else {
            return Ok(());
        };
        let last_read_key = keys::agent_inbox_last_read(agent_id.as_str());
        let current = self.bus.get(&last_read_key).await?;
        let winner = match &current {
            Some(current) if stream_id_le(highest, current) => current.clone(),
            _ => highest.clone(),
        };
        self.bus.set(&last_read_key, &winner).await?;
        Ok(())
    }

    /// clear(): deletes the stream and the cursor. Requires `confirm` to
    /// guard against an accidental call wiping durable history.
    pub async fn clear(&self, agent_id: &AgentId, confirm: bool) -> Result<()> {
        if !confirm {
            bail!("clear requires confirm=true");
        }
        let stream = keys::agent_inbox_stream(agent_id.as_str());
        let last_read_key = keys::agent_inbox_last_read(agent_id.as_str());
        self.bus.delete(&stream).await?;
        self.bus.delete(&last_read_key).await?;
        Ok(())
    }
}

/// Redis stream ids are `{millis}-{seq}`; comparing them numerically
/// (rather than lexicographically) keeps ordering correct once the
/// millisecond component grows past the original digit width.
fn stream_id_parts(id: &str) -> (u64, u64) {
    let mut parts = id.splitn(2, '-');
    let millis = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);
    let seq = parts.next().and_then(|s| s.parse().ok()).unwrap_or(0);
    (millis, seq)
}

fn stream_id_cmp(a: &str, b: &str) -> std::cmp::Ordering {
    stream_id_parts(a).cmp(&stream_id_parts(b))
}

fn stream_id_le(a: &str, b: &str) -> bool {
    stream_id_cmp(a, b) != std::cmp::Ordering::Greater
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_id_comparison_is_numeric_not_lexicographic() {
        assert!(stream_id_le("9-0", "10-0"));
        assert_eq!(stream_id_cmp("9-0", "10-0"), std::cmp::Ordering::Less);
    }

    #[test]
    fn stream_id_comparison_breaks_ties_on_sequence() {
        assert_eq!(stream_id_cmp("100-1", "100-2"), std::cmp::Ordering::Less);
        assert_eq!(stream_id_cmp("100-2", "100-1"), std::cmp::Ordering::Greater);
    }

    async fn test_bus() -> Option<Bus> {
        match std::env::var("DJINNBOT_TEST_REDIS_URL") {
            Ok(url) => Bus::connect(&url).await.ok(),
            Err(_) => None,
        }
    }

    #[tokio::test]
    async fn send_then_list_round_trips_and_mark_read_advances_the_cursor() {
        let Some(bus) = test_bus().await else {
            return;
        };
        let router = InboxRouter::new(bus);
        let to = AgentId::from(format!("test-agent-{}", std::process::id()));
        let from = AgentId::from("sender");

        let msg = InboxMessage::new(
            to.clone(),
            from,
            djinnbot_types::MessageType::ReviewRequest,
            djinnbot_types::MessagePriority::High,
            Some("please look".into()),
            "PR 42 is ready",
            None,
            None,
        );
        let id = router.send(&msg).await.unwrap();

        let all = router
            .list(&to, &InboxFilter::default(), 10, 0)
            .await
            .unwrap();
        assert_eq!(all.total_matched, 1);
        assert!(!all.messages[0].read);

        router.mark_read(&to, &[id]).await.unwrap();

        let after = router
            .list(&to, &InboxFilter::default(), 10, 0)
            .await
            .unwrap();
        assert!(after.messages[0].read);

        router.clear(&to, true).await.unwrap();
    }

    #[tokio::test]
    async fn clear_without_confirm_is_rejected() {
        let Some(bus) = test_bus().await else {
            return;
        };
        let router = InboxRouter::new(bus);
        let to = AgentId::from("someone");
        assert!(router.clear(&to, false).await.is_err());
    }
}
