use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::ids::{AgentId, RunId, SessionId, StepId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleStateKind {
    Idle,
    Thinking,
    Working,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurrentWork {
    pub step_id: StepId,
    pub run_id: RunId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentLifecycleState {
    pub agent_id: AgentId,
    pub state: LifecycleStateKind,
    pub last_active: i64,
    #[serde(default)]
    pub current_work: Option<CurrentWork>,
    pub pulse_enabled: bool,
    #[serde(default)]
    pub last_pulse: Option<i64>,
    #[serde(default)]
    pub next_pulse: Option<i64>,
}

impl AgentLifecycleState {
    pub fn idle(agent_id: AgentId, pulse_enabled: bool) -> Self {
        Self {
            agent_id,
            state: LifecycleStateKind::Idle,
            last_active: crate::now_ms(),
            current_work: None,
            pulse_enabled,
            last_pulse: None,
            next_pulse: None,
        }
    }
}

/// A short-lived exclusive claim on `(agent_id, work_key)`. The sole
/// mechanism preventing two concurrent container instances of the same
/// logical agent from claiming the same piece of work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkLock {
    pub agent_id: AgentId,
    pub work_key: String,
    pub session_id: SessionId,
    pub description: String,
    pub acquired_at: i64,
    pub ttl_seconds: u64,
}

impl WorkLock {
    pub fn expires_at(&self) -> i64 {
        self.acquired_at + (self.ttl_seconds as i64) * 1000
    }

    pub fn is_expired(&self, now_ms: i64) -> bool {
        now_ms >= self.expires_at()
    }
}

/// Per-agent daily wake guardrail thresholds, read fresh on every check
/// (§4.4: "implementations MUST read them on each check").
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct WakeGuardrailConfig {
    pub cooldown_seconds: u64,
    pub max_wakes_per_day: u32,
    pub max_session_minutes_per_day: u32,
    pub max_wakes_per_pair_per_day: u32,
    pub max_concurrent_pulse_sessions: u32,
    /// The explicit deadline a pulse session carries (§3: "Every lock has
    /// a TTL... a pulse session carries an explicit deadline"). Exceeding
    /// it triggers the deadline enforcer's cancel-then-release sequence.
    pub pulse_deadline_minutes: u32,
    /// How long the enforcer waits after signalling cancellation before
    /// releasing the session's work-lock and concurrency slot, giving the
    /// engine a chance to wind down gracefully.
    pub pulse_grace_period_seconds: u64,
}

impl Default for WakeGuardrailConfig {
    fn default() -> Self {
        Self {
            cooldown_seconds: 300,
            max_wakes_per_day: 12,
            max_session_minutes_per_day: 120,
            max_wakes_per_pair_per_day: 5,
            max_concurrent_pulse_sessions: 2,
            pulse_deadline_minutes: 30,
            pulse_grace_period_seconds: 30,
        }
    }
}

/// Per-agent daily counters, reset at the local day boundary (the bus key
/// is itself scoped by date, so "reset" is really "a fresh key").
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WakeGuardrailCounters {
    pub wakes_today: u32,
    pub session_minutes_today: u32,
    #[serde(default)]
    pub wake_pair_count: HashMap<AgentId, u32>,
    pub concurrent_pulse_sessions: u32,
    #[serde(default)]
    pub last_wake_at: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WakeRejectReason {
    Cooldown,
    DailyCap,
    SessionBudget,
    PairCap,
    Concurrency,
}

impl WakeRejectReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cooldown => "cooldown",
            Self::DailyCap => "daily_cap",
            Self::SessionBudget => "session_budget",
            Self::PairCap => "pair_cap",
            Self::Concurrency => "concurrency",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn work_lock_expires_after_its_ttl() {
        let lock = WorkLock {
            agent_id: AgentId::from("reviewer"),
            work_key: "task:42".into(),
            session_id: SessionId::from("sess_1"),
            description: "reviewing PR 42".into(),
            acquired_at: 1_000,
            ttl_seconds: 30,
        };
        assert!(!lock.is_expired(1_000 + 29_000));
        assert!(lock.is_expired(1_000 + 30_000));
    }
}
