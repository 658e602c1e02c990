use djinnbot_types::WebhookEvent;
use rusqlite::{params, OptionalExtension};

use crate::{Store, StoreError, StoreResult};

impl Store {
    /// Persists a webhook delivery before signature verification, so a
    /// replayed delivery-id is recognized even if verification fails.
    pub async fn insert_webhook_event(&self, event: WebhookEvent) -> StoreResult<WebhookEvent> {
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO webhook_events (id, delivery_id, event_type, action,
                    repository_full_name, installation_id, signature, verified, payload,
                    received_at, processed, processing_error)
                 VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12)",
                params![
                    event.id,
                    event.delivery_id,
                    event.event_type,
                    event.action,
                    event.repository_full_name,
                    event.installation_id,
                    event.signature,
                    event.verified as i64,
                    serde_json::to_string(&event.payload)?,
                    event.received_at,
                    event.processed as i64,
                    event.processing_error,
                ],
            )?;
            Ok(event)
        })
        .await
    }

    pub async fn get_webhook_event_by_delivery_id(
        &self,
        delivery_id: String,
    ) -> StoreResult<Option<WebhookEvent>> {
        self.with_conn(move |conn| {
            let event = conn
                .query_row(
                    "SELECT id, delivery_id, event_type, action, repository_full_name,
                        installation_id, signature, verified, payload, received_at, processed,
                        processing_error FROM webhook_events WHERE delivery_id = ?1",
                    params![delivery_id],
                    row_to_event,
                )
                .optional()?;
            Ok(event)
        })
        .await
    }

    /// Looked up by the webhook consumer task, which only sees the
    /// opaque `id` (not the external `delivery_id`) on the `webhooks:github`
    /// notice it subscribes to.
    pub async fn get_webhook_event(&self, id: String) -> StoreResult<Option<WebhookEvent>> {
        self.with_conn(move |conn| {
            let event = conn
                .query_row(
                    "SELECT id, delivery_id, event_type, action, repository_full_name,
                        installation_id, signature, verified, payload, received_at, processed,
                        processing_error FROM webhook_events WHERE id = ?1",
                    params![id],
                    row_to_event,
                )
                .optional()?;
            Ok(event)
        })
        .await
    }

    pub async fn mark_webhook_verified(&self, id: String, verified: bool) -> StoreResult<()> {
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "UPDATE webhook_events SET verified = ?1 WHERE id = ?2",
                params![verified as i64, id],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound);
            }
            Ok(())
        })
        .await
    }

    /// The single commit point for "we've seen this delivery" (§4.6 step
    /// 5). Only called after every side effect in routing has succeeded.
    pub async fn mark_webhook_processed(&self, id: String, error: Option<String>) -> StoreResult<()> {
        self.with_conn(move |conn| {
            let processed = error.is_none();
            let changed = conn.execute(
                "UPDATE webhook_events SET processed = ?1, processing_error = ?2 WHERE id = ?3",
                params![processed as i64, error, id],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound);
            }
            Ok(())
        })
        .await
    }

    /// Replayed at startup to pick up deliveries that crashed mid-routing.
    pub async fn list_unprocessed_webhook_events(&self) -> StoreResult<Vec<WebhookEvent>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, delivery_id, event_type, action, repository_full_name,
                    installation_id, signature, verified, payload, received_at, processed,
                    processing_error FROM webhook_events WHERE processed = 0 AND verified = 1",
            )?;
            let rows = stmt
                .query_map([], row_to_event)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
        .await
    }
}

fn row_to_event(row: &rusqlite::Row<'_>) -> rusqlite::Result<WebhookEvent> {
    let payload_json: String = row.get(8)?;
    Ok(WebhookEvent {
        id: row.get(0)?,
        delivery_id: row.get(1)?,
        event_type: row.get(2)?,
        action: row.get(3)?,
        repository_full_name: row.get(4)?,
        installation_id: row.get(5)?,
        signature: row.get(6)?,
        verified: row.get::<_, i64>(7)? != 0,
        payload: serde_json::from_str(&payload_json).unwrap_or(serde_json::Value::Null),
        received_at: row.get(9)?,
        processed: row.get::<_, i64>(10)? != 0,
        processing_error: row.get(11)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn replaying_a_delivery_id_finds_the_existing_row_instead_of_duplicating() {
        let store = Store::open_in_memory().unwrap();
        let event = WebhookEvent::new("delivery-1", "pull_request", "sig", serde_json::json!({}));
        store.insert_webhook_event(event).await.unwrap();

        let found = store
            .get_webhook_event_by_delivery_id("delivery-1".into())
            .await
            .unwrap();
        assert!(found.is_some());
    }

    #[tokio::test]
    async fn get_webhook_event_looks_up_by_opaque_id_not_delivery_id() {
        let store = Store::open_in_memory().unwrap();
        let event = WebhookEvent::new("delivery-3", "pull_request", "sig", serde_json::json!({}));
        let id = event.id.clone();
        store.insert_webhook_event(event).await.unwrap();

        let found = store.get_webhook_event(id).await.unwrap();
        assert!(found.is_some());
        assert!(store.get_webhook_event("whk_missing".into()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn mark_processed_removes_it_from_the_unprocessed_replay_set() {
        let store = Store::open_in_memory().unwrap();
        let mut event = WebhookEvent::new("delivery-2", "pull_request", "sig", serde_json::json!({}));
        event.verified = true;
        let id = event.id.clone();
        store.insert_webhook_event(event).await.unwrap();

        assert_eq!(store.list_unprocessed_webhook_events().await.unwrap().len(), 1);
        store.mark_webhook_processed(id, None).await.unwrap();
        assert_eq!(store.list_unprocessed_webhook_events().await.unwrap().len(), 0);
    }
}
