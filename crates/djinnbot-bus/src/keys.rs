//! Well-known key/stream/channel names (§4.2). Naming is illustrative per
//! the spec, but every component must agree on one scheme — this module is
//! that single source of truth.

pub const EVENTS_GLOBAL: &str = "events:global";
pub const EVENTS_NEW_RUNS: &str = "events:new_runs";
pub const EVENTS_NEW_SWARMS: &str = "events:new_swarms";

pub fn session_stream(session_id: &str) -> String {
    format!("sessions:{session_id}:stream")
}

pub fn session_channel(session_id: &str) -> String {
    format!("sessions:{session_id}")
}

/// Out-of-band cancellation channel an engine subscribes to alongside its
/// session channel (§3, §5 cancellation levels 2-3).
pub fn session_control(session_id: &str) -> String {
    format!("sessions:{session_id}:control")
}

/// Persisted last-seen id for the reconciler's consumption of
/// `events:global`, so a restart resumes instead of replaying from
/// the start of the stream.
pub const DISPATCHER_CURSOR: &str = "dispatcher:cursor";

pub const SESSIONS_LIVE: &str = "sessions:live";
pub const WEBHOOKS_GITHUB: &str = "webhooks:github";
pub const LLM_CALLS_LIVE: &str = "llm-calls:live";
pub const TTS_CALLS_LIVE: &str = "tts-calls:live";

pub fn agent_inbox_stream(agent_id: &str) -> String {
    format!("agent:{agent_id}:inbox")
}

pub fn agent_inbox_last_read(agent_id: &str) -> String {
    format!("agent:{agent_id}:inbox:last_read")
}

pub fn agent_state(agent_id: &str) -> String {
    format!("agent:{agent_id}:state")
}

pub fn agent_queue(agent_id: &str) -> String {
    format!("agent:{agent_id}:queue")
}

pub fn agent_pulse(agent_id: &str) -> String {
    format!("agent:{agent_id}:pulse")
}

pub fn agent_work_lock(agent_id: &str, work_key: &str) -> String {
    format!("agent:{agent_id}:work_lock:{work_key}")
}

pub fn agent_work_ledger(agent_id: &str) -> String {
    format!("agent:{agent_id}:work_ledger")
}

pub fn agent_wakes_today(agent_id: &str, date: &str) -> String {
    format!("agent:{agent_id}:wakes:{date}")
}

pub fn agent_session_minutes_today(agent_id: &str, date: &str) -> String {
    format!("agent:{agent_id}:session_minutes:{date}")
}

pub fn agent_wake_pair_today(agent_id: &str, peer_id: &str, date: &str) -> String {
    format!("agent:{agent_id}:wake_pair:{peer_id}:{date}")
}

pub fn agent_concurrent_pulses(agent_id: &str) -> String {
    format!("agent:{agent_id}:concurrent_pulses")
}

pub fn agent_last_wake_at(agent_id: &str) -> String {
    format!("agent:{agent_id}:last_wake_at")
}
