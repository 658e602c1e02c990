use anyhow::Result;
use djinnbot_bus::Bus;
use djinnbot_types::{AgentLifecycleState, CurrentWork, LifecycleStateKind, RunId, StepId};
use tracing::debug;

use djinnbot_bus::keys;

/// Reads and writes one agent's lifecycle state against its single bus
/// key (§4.4). There is exactly one live `AgentLifecycleState` document
/// per agent regardless of how many container instances are running —
/// the document, not an in-process struct, is the source of truth.
pub struct LifecycleController {
    bus: Bus,
}

impl LifecycleController {
    pub fn new(bus: Bus) -> Self {
        Self { bus }
    }

    pub async fn load(&self, agent_id: &str) -> Result<Option<AgentLifecycleState>> {
        let key = keys::agent_state(agent_id);
        match self.bus.get(&key).await? {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn store(&self, state: &AgentLifecycleState) -> Result<()> {
        let key = keys::agent_state(state.agent_id.as_str());
        let json = serde_json::to_string(state)?;
        self.bus.set(&key, &json).await?;
        Ok(())
    }

    /// Creates the idle document for an agent that has never run, or
    /// returns the existing one unchanged.
    pub async fn ensure_registered(
        &self,
        agent_id: &str,
        pulse_enabled: bool,
    ) -> Result<AgentLifecycleState> {
        if let Some(existing) = self.load(agent_id).await? {
            return Ok(existing);
        }
        let state = AgentLifecycleState::idle(agent_id.into(), pulse_enabled);
        self.store(&state).await?;
        Ok(state)
    }

    /// idle -> thinking, on receiving a wake or an inbound message.
    pub async fn begin_thinking(&self, agent_id: &str) -> Result<AgentLifecycleState> {
        let mut state = self
            .ensure_registered(agent_id, false)
            .await?;
        state.state = LifecycleStateKind::Thinking;
        state.last_active = djinnbot_types::now_ms();
        self.store(&state).await?;
        debug!(agent_id, "agent entering thinking state");
        Ok(state)
    }

    /// thinking -> working, once a step is claimed.
    pub async fn begin_working(
        &self,
        agent_id: &str,
        run_id: RunId,
        step_id: StepId,
    ) -> Result<AgentLifecycleState> {
        let mut state = self.ensure_registered(agent_id, false).await?;
        state.state = LifecycleStateKind::Working;
        state.last_active = djinnbot_types::now_ms();
        state.current_work = Some(CurrentWork { step_id, run_id });
        self.store(&state).await?;
        Ok(state)
    }

    /// working/thinking -> idle, once a step finishes or no further work
    /// is claimed after a wake.
    pub async fn return_to_idle(&self, agent_id: &str) -> Result<AgentLifecycleState> {
        let mut state = self.ensure_registered(agent_id, false).await?;
        state.state = LifecycleStateKind::Idle;
        state.last_active = djinnbot_types::now_ms();
        state.current_work = None;
        self.store(&state).await?;
        Ok(state)
    }

    pub async fn record_pulse(
        &self,
        agent_id: &str,
        last_pulse: i64,
        next_pulse: Option<i64>,
    ) -> Result<AgentLifecycleState> {
        let mut state = self.ensure_registered(agent_id, true).await?;
        state.last_pulse = Some(last_pulse);
        state.next_pulse = next_pulse;
        self.store(&state).await?;
        Ok(state)
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
    async fn ensure_registered_is_idempotent() {
        let Some(bus) = test_bus().await else {
            return;
        };
        let controller = LifecycleController::new(bus);
        let agent_id = format!("test-agent-{}", std::process::id());
        let first = controller
            .ensure_registered(&agent_id, true)
            .await
            .unwrap();
        let second = controller
            .ensure_registered(&agent_id, false)
            .await
            .unwrap();
        assert_eq!(first.last_active, second.last_active);
        assert!(second.pulse_enabled);
    }
}
