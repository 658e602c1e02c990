use serde::{Deserialize, Serialize};

use crate::ids::{AgentId, SessionId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Starting,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl SessionStatus {
    pub fn is_live(self) -> bool {
        matches!(self, Self::Starting | Self::Running)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub agent_id: AgentId,
    pub status: SessionStatus,
    pub model: Option<String>,
    #[serde(default)]
    pub container_id: Option<String>,
    pub created_at: i64,
    #[serde(default)]
    pub started_at: Option<i64>,
    pub last_activity_at: i64,
    #[serde(default)]
    pub completed_at: Option<i64>,
    #[serde(default)]
    pub message_count: u64,
    /// True if this session exists because a pulse wake was granted
    /// rather than because a human started a chat directly. Only
    /// pulse-originated sessions credit their elapsed time against the
    /// daily session-minutes guardrail and free a concurrency slot on
    /// completion (§4.4).
    #[serde(default)]
    pub pulse_triggered: bool,
}

impl Session {
    pub fn new(agent_id: AgentId, model: Option<String>) -> Self {
        let now = crate::now_ms();
        Self {
            id: SessionId::generate(),
            agent_id,
            status: SessionStatus::Starting,
            model,
            container_id: None,
            created_at: now,
            started_at: None,
            last_activity_at: now,
            completed_at: None,
            message_count: 0,
            pulse_triggered: false,
        }
    }

    /// Enforces `last_activity_at` monotonicity: a touch from an
    /// out-of-order delivery never moves the clock backwards.
    pub fn touch(&mut self, at_ms: i64) {
        if at_ms > self.last_activity_at {
            self.last_activity_at = at_ms;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn touch_never_moves_last_activity_backwards() {
        let mut session = Session::new(AgentId::from("reviewer"), None);
        let original = session.last_activity_at;
        session.touch(original - 1000);
        assert_eq!(session.last_activity_at, original);
        session.touch(original + 1000);
        assert_eq!(session.last_activity_at, original + 1000);
    }

    #[test]
    fn starting_and_running_are_live() {
        assert!(SessionStatus::Starting.is_live());
        assert!(SessionStatus::Running.is_live());
        assert!(!SessionStatus::Completed.is_live());
    }
}
