use djinnbot_bus::keys;
use tracing::{error, info, warn};

use crate::state::AppState;

/// Replays every webhook delivery left `processed=false` by a crash
/// between ingest and routing, before the server starts accepting new
/// traffic. Mirrors what the live consumer does for each notice, but
/// reading straight from the store instead of from a pub/sub message
/// that no longer exists.
pub async fn replay_unprocessed_webhooks(state: &AppState) -> anyhow::Result<()> {
    let pending = state.store.list_unprocessed_webhook_events().await?;
    if !pending.is_empty() {
        info!(count = pending.len(), "replaying unprocessed webhook deliveries");
    }
    for event in pending {
        if let Err(err) = state.webhook_router.route(&event).await {
            warn!(event_id = %event.id, error = %err, "webhook replay failed, left for next startup");
        }
    }
    Ok(())
}

/// Spawns the long-lived duties §5 describes as independent tasks
/// communicating only through the bus or store: the reconcile loop, the
/// pulse tick scheduler, the deadline sweep, and the webhook consumer.
/// Returns their join handles so `serve()` can abort them on shutdown,
/// matching the teacher's `serve()` supervision pattern.
pub fn spawn(
    state: AppState,
    pulse_roster: impl Fn() -> Vec<String> + Send + Sync + 'static,
) -> Vec<tokio::task::JoinHandle<()>> {
    let reconciler_state = state.clone();
    let reconcile_handle = tokio::spawn(async move {
        loop {
            match reconciler_state.reconciler.run_once().await {
                Ok(_) => {}
                Err(err) => {
                    error!(error = %err, "reconcile pass failed, retrying after backoff");
                    tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                }
            }
        }
    });

    let pulse_state = state.clone();
    let pulse_handle = tokio::spawn(async move {
        let tick = pulse_state.pulse.tick_interval();
        loop {
            tokio::time::sleep(tick).await;
            let roster = pulse_roster();
            if let Err(err) = pulse_state.pulse.run_once(&roster).await {
                warn!(error = %err, "pulse tick failed");
            }
        }
    });

    let deadline_state = state.clone();
    let deadline_tick = deadline_state.pulse.tick_interval();
    let deadline_handle = tokio::spawn(async move {
        loop {
            tokio::time::sleep(deadline_tick).await;
            let now_ms = djinnbot_types::now_ms();
            if let Err(err) = deadline_state.deadlines.run_once(now_ms).await {
                warn!(error = %err, "pulse deadline sweep failed");
            }
        }
    });

    let webhook_state = state.clone();
    let webhook_handle = tokio::spawn(async move {
        loop {
            let mut subscription = match webhook_state.bus.subscribe(keys::WEBHOOKS_GITHUB).await {
                Ok(sub) => sub,
                Err(err) => {
                    error!(error = %err, "failed to subscribe to webhooks:github, retrying after backoff");
                    tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                    continue;
                }
            };
            while let Some(payload) = subscription.next().await {
                let Ok(notice) = serde_json::from_str::<serde_json::Value>(&payload) else {
                    warn!("discarding malformed webhooks:github notice");
                    continue;
                };
                let Some(event_id) = notice.get("event_id").and_then(|v| v.as_str()) else {
                    warn!("webhooks:github notice missing event_id");
                    continue;
                };
                match webhook_state.store.get_webhook_event(event_id.to_string()).await {
                    Ok(Some(event)) => {
                        if let Err(err) = webhook_state.webhook_router.route(&event).await {
                            warn!(event_id, error = %err, "webhook routing failed, left unprocessed for replay");
                        }
                    }
                    Ok(None) => warn!(event_id, "webhooks:github notice referenced an unknown event"),
                    Err(err) => warn!(event_id, error = %err, "failed to load webhook event for routing"),
                }
            }
            warn!("webhooks:github subscription closed, resubscribing");
        }
    });

    vec![reconcile_handle, pulse_handle, deadline_handle, webhook_handle]
}
