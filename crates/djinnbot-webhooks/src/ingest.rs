use anyhow::Result;
use djinnbot_bus::{keys, Bus};
use djinnbot_store::Store;
use djinnbot_types::WebhookEvent;
use serde_json::Value;

use crate::ratelimit::SlidingWindowLimiter;
use crate::verify::verify_signature;

#[derive(Debug)]
pub enum IngestOutcome {
    RateLimited,
    Unverified,
    Accepted(WebhookEvent),
}

/// §4.6 ingress, steps 1-4. Step 5 (marking `processed`) belongs to the
/// router, once routing has actually run.
pub struct WebhookIngest {
    store: Store,
    bus: Bus,
    limiter: SlidingWindowLimiter,
}

impl WebhookIngest {
    pub fn new(store: Store, bus: Bus) -> Self {
        let limiter = SlidingWindowLimiter::new(bus.clone());
        Self { store, bus, limiter }
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn ingest(
        &self,
        source: &str,
        secret: &[u8],
        delivery_id: &str,
        event_type: &str,
        action: Option<String>,
        repository_full_name: Option<String>,
        installation_id: Option<i64>,
        raw_body: &[u8],
        signature_header: &str,
        payload: Value,
    ) -> Result<IngestOutcome> {
        let now_ms = djinnbot_types::now_ms();
        if !self.limiter.check(source, now_ms).await? {
            return Ok(IngestOutcome::RateLimited);
        }

        if let Some(existing) = self
            .store
            .get_webhook_event_by_delivery_id(delivery_id.to_string())
            .await?
        {
            return Ok(IngestOutcome::Accepted(existing));
        }

        let verified = verify_signature(secret, raw_body, signature_header);

        let mut event = WebhookEvent::new(delivery_id, event_type, signature_header, payload);
        event.action = action;
        event.repository_full_name = repository_full_name;
        event.installation_id = installation_id;
        event.verified = verified;
        let event = self.store.insert_webhook_event(event).await?;

        if !verified {
            return Ok(IngestOutcome::Unverified);
        }

        let notice = serde_json::json!({
            "event_id": event.id,
            "event_type": event.event_type,
            "action": event.action,
            "repository_full_name": event.repository_full_name,
            "installation_id": event.installation_id,
        });
        self.bus
            .publish(keys::WEBHOOKS_GITHUB, &notice.to_string())
            .await?;

        Ok(IngestOutcome::Accepted(event))
    }
}
