use std::time::Duration;

use djinnbot_bus::{keys, Bus};
use djinnbot_types::{LifecycleEvent, WakeGuardrailConfig};
use tracing::{info, warn};

use crate::guardrails::{GuardrailGate, WakeDecision};
use crate::state::LifecycleController;

/// Periodically wakes every pulse-enabled agent that is due, per §4.4's
/// `schedule-pulse-tick`. One driver instance is meant to run per process;
/// agents are discovered from the caller-supplied roster rather than a
/// scan, since the persisted registry of pulse-enabled agents belongs to
/// the layer above (workspace/project configuration), not to the bus.
pub struct PulseDriver {
    bus: Bus,
    gate: GuardrailGate,
    controller: LifecycleController,
    tick: Duration,
}

impl PulseDriver {
    pub fn new(bus: Bus, config: WakeGuardrailConfig, tick: Duration) -> Self {
        let controller = LifecycleController::new(bus.clone());
        let gate = GuardrailGate::new(bus.clone(), config);
        Self {
            bus,
            gate,
            controller,
            tick,
        }
    }

    /// Runs one pass over `agent_ids`, attempting a pulse wake for each
    /// and publishing the outcome to the global event stream. Intended to
    /// be called from a loop on `self.tick`, with the roster refreshed by
    /// the caller between iterations.
    pub async fn run_once(&self, agent_ids: &[String]) -> anyhow::Result<()> {
        let now_ms = djinnbot_types::now_ms();
        for agent_id in agent_ids {
            match self.gate.try_wake(agent_id, None, now_ms).await {
                Ok(WakeDecision::Granted) => {
                    self.controller.record_pulse(agent_id, now_ms, None).await?;
                    self.publish_lifecycle_event(LifecycleEvent::WakeRequested {
                        agent_id: agent_id.clone().into(),
                        reason: "pulse".into(),
                        at: now_ms,
                    })
                    .await?;
                    info!(agent_id, "pulse wake granted");
                }
                Ok(WakeDecision::Rejected(reason)) => {
                    self.publish_lifecycle_event(LifecycleEvent::WakeRejected {
                        agent_id: agent_id.clone().into(),
                        reason,
                        at: now_ms,
                    })
                    .await?;
                }
                Err(err) => {
                    warn!(agent_id, error = %err, "pulse wake check failed");
                }
            }
        }
        Ok(())
    }

    async fn publish_lifecycle_event(&self, event: LifecycleEvent) -> anyhow::Result<()> {
        let payload = serde_json::to_string(&event)?;
        self.bus
            .xadd(keys::EVENTS_GLOBAL, &[("data", payload.as_str())], None)
            .await?;
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        self.tick
    }
}
