use std::time::Duration;

use djinnbot_bus::{keys, Bus};
use djinnbot_store::Store;
use djinnbot_types::{ControlSignal, SessionEventEnvelope, SessionStatus, WakeGuardrailConfig};
use tracing::{info, warn};

use crate::guardrails::GuardrailGate;
use crate::worklock::WorkLockHandle;

/// Enforces the explicit deadline every pulse session carries (§3): once
/// a pulse-originated session has run longer than `pulse_deadline_minutes`,
/// signal cancellation on its control channel, wait out the grace period
/// for the engine to wind down, then release its work-locks and
/// concurrency slot and mark the session cancelled.
pub struct DeadlineEnforcer {
    store: Store,
    bus: Bus,
    gate: GuardrailGate,
    work_locks: WorkLockHandle,
    deadline_minutes: u32,
    grace_period: Duration,
}

impl DeadlineEnforcer {
    pub fn new(store: Store, bus: Bus, config: WakeGuardrailConfig) -> Self {
        let gate = GuardrailGate::new(bus.clone(), config);
        let work_locks = WorkLockHandle::new(bus.clone());
        Self {
            store,
            bus,
            gate,
            work_locks,
            deadline_minutes: config.pulse_deadline_minutes,
            grace_period: Duration::from_secs(config.pulse_grace_period_seconds),
        }
    }

    /// One sweep: finds every overdue pulse session and enforces its
    /// deadline in turn. Each enforcement blocks for the grace period, so
    /// a sweep's wall-clock cost scales with how many sessions are
    /// simultaneously overdue — acceptable given `max_concurrent_pulse_sessions`
    /// bounds that count per agent.
    pub async fn run_once(&self, now_ms: i64) -> anyhow::Result<()> {
        let cutoff_ms = now_ms - (self.deadline_minutes as i64) * 60_000;
        let overdue = self.store.list_overdue_pulse_sessions(cutoff_ms).await?;
        for session in overdue {
            if let Err(err) = self.enforce(&session, now_ms).await {
                warn!(session_id = %session.id, error = %err, "deadline enforcement failed");
            }
        }
        Ok(())
    }

    async fn enforce(&self, session: &djinnbot_types::Session, now_ms: i64) -> anyhow::Result<()> {
        let signal = ControlSignal::DeadlineExceeded {
            reason: "pulse session deadline exceeded".into(),
            at: now_ms,
        };
        self.bus
            .publish(&keys::session_control(session.id.as_str()), &serde_json::to_string(&signal)?)
            .await?;
        info!(session_id = %session.id, agent_id = %session.agent_id, "pulse deadline exceeded, signalling cancellation");

        tokio::time::sleep(self.grace_period).await;

        for lock in self.work_locks.ledger(session.agent_id.as_str()).await? {
            self.work_locks.release(session.agent_id.as_str(), &lock.work_key).await?;
        }

        let minutes_used = (now_ms - session.created_at).max(0) / 60_000;
        self.gate
            .release_pulse_session(session.agent_id.as_str(), now_ms, minutes_used)
            .await?;

        self.store
            .update_session_status(session.id.clone(), SessionStatus::Cancelled, now_ms)
            .await?;

        let aborted = SessionEventEnvelope::ResponseAborted {
            session_id: session.id.clone(),
            reason: "pulse session deadline exceeded".into(),
            at: now_ms,
        };
        self.bus
            .publish(&keys::session_channel(session.id.as_str()), &serde_json::to_string(&aborted)?)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use djinnbot_store::Store;
    use djinnbot_types::{AgentId, Session};

    async fn test_bus() -> Option<Bus> {
        match std::env::var("DJINNBOT_TEST_REDIS_URL") {
            Ok(url) => Bus::connect(&url).await.ok(),
            Err(_) => None,
        }
    }

    #[tokio::test]
    async fn overdue_pulse_session_is_cancelled_and_its_lock_released() {
        let Some(bus) = test_bus().await else {
            return;
        };
        let store = Store::open_in_memory().unwrap();
        let agent_id = format!("test-agent-{}", std::process::id());

        let mut session = Session::new(AgentId::from(agent_id.as_str()), None);
        session.pulse_triggered = true;
        session.created_at = 0;
        session.status = djinnbot_types::SessionStatus::Running;
        let session_id = session.id.clone();
        store.insert_session(session).await.unwrap();

        let work_locks = WorkLockHandle::new(bus.clone());
        work_locks
            .claim(&agent_id, "task:overdue", session_id.clone(), "overdue work", 3600)
            .await
            .unwrap();

        let config = WakeGuardrailConfig {
            pulse_deadline_minutes: 30,
            pulse_grace_period_seconds: 0,
            ..Default::default()
        };
        let enforcer = DeadlineEnforcer::new(store.clone(), bus.clone(), config);

        let mut control = bus.subscribe(&keys::session_control(session_id.as_str())).await.unwrap();
        enforcer.run_once(60 * 60 * 1000).await.unwrap();

        let signal_payload = control.next().await.expect("expected a deadline signal");
        let signal: ControlSignal = serde_json::from_str(&signal_payload).unwrap();
        assert!(matches!(signal, ControlSignal::DeadlineExceeded { .. }));

        let ledger = work_locks.ledger(&agent_id).await.unwrap();
        assert!(ledger.is_empty());

        let loaded = store.get_session(session_id).await.unwrap();
        assert_eq!(loaded.status, djinnbot_types::SessionStatus::Cancelled);
    }
}
