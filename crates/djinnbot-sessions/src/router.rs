use std::time::Duration;

use anyhow::Result;
use djinnbot_bus::{keys, Bus};
use djinnbot_types::SessionEventEnvelope;
use tokio::sync::mpsc;
use tracing::warn;

const STREAM_MAXLEN: u64 = 10_000;
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(20);
const SUBSCRIBER_QUEUE_CAPACITY: usize = 256;

/// Token-level chunks are broadcast-only; every other variant is both
/// appended to the durable stream and broadcast, so a reconnecting
/// subscriber can replay structure without having seen the channel.
fn is_structural(event: &SessionEventEnvelope) -> bool {
    !matches!(event, SessionEventEnvelope::Token { .. })
}

pub struct SessionRouter {
    bus: Bus,
}

impl SessionRouter {
    pub fn new(bus: Bus) -> Self {
        Self { bus }
    }

    /// Publish(session-id, event) from §4.5's contract.
    pub async fn publish(&self, session_id: &str, event: SessionEventEnvelope) -> Result<()> {
        let payload = serde_json::to_string(&event)?;
        if is_structural(&event) {
            let stream = keys::session_stream(session_id);
            self.bus
                .xadd(&stream, &[("data", payload.as_str())], Some(STREAM_MAXLEN))
                .await?;
        }
        let channel = keys::session_channel(session_id);
        self.bus.publish(&channel, &payload).await?;
        Ok(())
    }

    /// Subscribe(session-id, since-stream-id) from §4.5's contract. Phase 1
    /// replays everything after `since_stream_id`; phase 2 forwards live
    /// channel traffic, decoupled from the Redis connection by a bounded
    /// queue so one slow subscriber can't stall the publisher.
    pub async fn subscribe(&self, session_id: &str, since_stream_id: &str) -> Result<Subscription> {
        let stream = keys::session_stream(session_id);
        let replay = self.bus.xrange_after(&stream, since_stream_id).await?;

        let channel = keys::session_channel(session_id);
        let mut live = self.bus.subscribe(&channel).await?;

        let (tx, rx) = mpsc::channel(SUBSCRIBER_QUEUE_CAPACITY);
        let session_id_owned = session_id.to_string();
        tokio::spawn(async move {
            while let Some(payload) = live.next().await {
                if tx.try_send(payload).is_err() {
                    warn!(
                        session_id = %session_id_owned,
                        "session subscriber queue overflowed, disconnecting"
                    );
                    break;
                }
            }
        });

        Ok(Subscription {
            replay: replay.into_iter(),
            sent_connected: false,
            live: rx,
        })
    }
}

/// One item in the flattened subscribe-stream: a sentinel, a replayed
/// structural event (with its original stream-id so the client's cursor
/// advances), a live event, or a keepalive.
pub enum SessionStreamItem {
    Connected,
    Replayed { stream_id: String, event: SessionEventEnvelope },
    Live(SessionEventEnvelope),
    Heartbeat,
    Disconnected,
}

pub struct Subscription {
    replay: std::vec::IntoIter<djinnbot_bus::StreamEntry>,
    sent_connected: bool,
    live: mpsc::Receiver<String>,
}

impl Subscription {
    pub async fn next(&mut self) -> SessionStreamItem {
        while let Some(entry) = self.replay.next() {
            let Some(payload) = entry.fields.get("data") else {
                continue;
            };
            if let Ok(event) = serde_json::from_str::<SessionEventEnvelope>(payload) {
                return SessionStreamItem::Replayed {
                    stream_id: entry.id,
                    event,
                };
            }
        }

        if !self.sent_connected {
            self.sent_connected = true;
            return SessionStreamItem::Connected;
        }

        self.next_live().await
    }

    async fn next_live(&mut self) -> SessionStreamItem {
        match tokio::time::timeout(HEARTBEAT_INTERVAL, self.live.recv()).await {
            Ok(Some(payload)) => match serde_json::from_str::<SessionEventEnvelope>(&payload) {
                Ok(event) => SessionStreamItem::Live(event),
                Err(_) => SessionStreamItem::Heartbeat,
            },
            Ok(None) => SessionStreamItem::Disconnected,
            Err(_) => SessionStreamItem::Heartbeat,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use djinnbot_types::SessionId;

    #[test]
    fn token_events_are_not_structural() {
        let token = SessionEventEnvelope::Token {
            session_id: SessionId::from("sess_1"),
            sequence: 1,
            payload: serde_json::json!("hello"),
        };
        assert!(!is_structural(&token));
    }

    #[tokio::test]
    async fn connected_sentinel_follows_replay_backlog() {
        let event = SessionEventEnvelope::Error {
            session_id: SessionId::from("sess_1"),
            message: "boom".into(),
            at: 1_000,
        };
        let mut fields = std::collections::HashMap::new();
        fields.insert("data".to_string(), serde_json::to_string(&event).unwrap());
        let replay = vec![djinnbot_bus::StreamEntry {
            id: "1-0".to_string(),
            fields,
        }];
        let (_tx, rx) = mpsc::channel(1);
        let mut subscription = Subscription {
            replay: replay.into_iter(),
            sent_connected: false,
            live: rx,
        };

        assert!(matches!(
            subscription.next().await,
            SessionStreamItem::Replayed { .. }
        ));
        assert!(matches!(subscription.next().await, SessionStreamItem::Connected));
    }

    #[test]
    fn status_events_are_structural() {
        let status = SessionEventEnvelope::Error {
            session_id: SessionId::from("sess_1"),
            message: "boom".into(),
            at: 1_000,
        };
        assert!(is_structural(&status));
    }
}
