use serde::{Deserialize, Serialize};

use crate::ids::AgentId;

/// Adaptive ranking signal attached to a (agent, memory) pair, used to bias
/// recall. `success_rate` and `adaptive_score` are derived fields —
/// recomputed on every read rather than stored, so stale writes can never
/// desync them from `access_count`/`success_count`/`failure_count`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalScore {
    pub agent_id: AgentId,
    pub memory_id: String,
    pub access_count: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub last_accessed: i64,
}

impl RetrievalScore {
    pub fn new(agent_id: AgentId, memory_id: impl Into<String>) -> Self {
        Self {
            agent_id,
            memory_id: memory_id.into(),
            access_count: 0,
            success_count: 0,
            failure_count: 0,
            last_accessed: crate::now_ms(),
        }
    }

    pub fn record_access(&mut self, succeeded: bool, at_ms: i64) {
        self.access_count += 1;
        if succeeded {
            self.success_count += 1;
        } else {
            self.failure_count += 1;
        }
        self.last_accessed = at_ms;
    }

    /// 0.0 when never accessed; otherwise successes / accesses.
    pub fn success_rate(&self) -> f64 {
        if self.access_count == 0 {
            0.0
        } else {
            self.success_count as f64 / self.access_count as f64
        }
    }

    /// Success-rate weighted by recency and a log-scaled confidence term so
    /// that a memory accessed once successfully doesn't outrank one with a
    /// long, mostly-successful track record.
    pub fn adaptive_score(&self, now_ms: i64) -> f64 {
        if self.access_count == 0 {
            return 0.0;
        }
        let confidence = ((self.access_count as f64) + 1.0).ln();
        let age_days = ((now_ms - self.last_accessed).max(0) as f64) / 86_400_000.0;
        let recency_decay = 1.0 / (1.0 + age_days / 14.0);
        self.success_rate() * confidence * recency_decay
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_rate_is_zero_before_any_access() {
        let score = RetrievalScore::new(AgentId::from("reviewer"), "mem_1");
        assert_eq!(score.success_rate(), 0.0);
        assert_eq!(score.adaptive_score(crate::now_ms()), 0.0);
    }

    #[test]
    fn success_and_failure_never_exceed_access_count() {
        let mut score = RetrievalScore::new(AgentId::from("reviewer"), "mem_1");
        score.record_access(true, 1_000);
        score.record_access(false, 2_000);
        assert_eq!(score.access_count, 2);
        assert!(score.success_count + score.failure_count <= score.access_count);
        assert_eq!(score.success_rate(), 0.5);
    }

    #[test]
    fn older_accesses_decay_the_adaptive_score() {
        let mut fresh = RetrievalScore::new(AgentId::from("reviewer"), "mem_1");
        fresh.record_access(true, 1_000_000);
        let mut stale = fresh.clone();
        stale.last_accessed = 0;
        let now = 1_000_000 + 30 * 86_400_000;
        assert!(fresh.adaptive_score(now) > stale.adaptive_score(now));
    }
}
