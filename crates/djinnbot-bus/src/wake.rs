use djinnbot_types::{WakeGuardrailConfig, WakeRejectReason};

use crate::keys;
use crate::{Bus, BusResult};

/// Safety-net TTL on the concurrent-pulse-sessions counter. A granted
/// `try_wake` increments it and a matching `release_pulse_session` is
/// expected to decrement it, but a crashed or killed agent container
/// never gets to call release — without an expiry that slot is leaked
/// forever and the agent can never be pulsed again. Chosen generously
/// above any realistic pulse session length so a live session's slot
/// never expires out from under it.
const CONCURRENCY_SAFETY_TTL_SECONDS: i64 = 4 * 3600;

/// A single atomic Lua script checks every guardrail and, only if all
/// pass, reserves the wake by incrementing the counters in the same
/// round-trip (§4.4: "treat them as one logical operation"). A rejected
/// call never mutates state, which is what makes `try-wake` safe to call
/// speculatively without a separate `record-wake` step racing it.
impl Bus {
    pub async fn try_wake(
        &self,
        agent_id: &str,
        peer_agent_id: Option<&str>,
        config: WakeGuardrailConfig,
        now_ms: i64,
        date: &str,
        seconds_to_day_boundary: i64,
    ) -> BusResult<Result<(), WakeRejectReason>> {
        let mut conn = self.conn();

        let last_wake_key = keys::agent_last_wake_at(agent_id);
        let wakes_key = keys::agent_wakes_today(agent_id, date);
        let minutes_key = keys::agent_session_minutes_today(agent_id, date);
        let pair_key = peer_agent_id
            .map(|peer| keys::agent_wake_pair_today(agent_id, peer, date))
            .unwrap_or_default();
        let concurrency_key = keys::agent_concurrent_pulses(agent_id);

        let script = redis::Script::new(
            r"
            local last_wake = tonumber(redis.call('GET', KEYS[1]) or '0')
            if (tonumber(ARGV[1]) - last_wake) < (tonumber(ARGV[2]) * 1000) then
                return 'cooldown'
            end
            local wakes = tonumber(redis.call('GET', KEYS[2]) or '0')
            if wakes >= tonumber(ARGV[3]) then
                return 'daily_cap'
            end
            local minutes = tonumber(redis.call('GET', KEYS[3]) or '0')
            if minutes >= tonumber(ARGV[4]) then
                return 'session_budget'
            end
            if KEYS[4] ~= '' then
                local pair = tonumber(redis.call('GET', KEYS[4]) or '0')
                if pair >= tonumber(ARGV[5]) then
                    return 'pair_cap'
                end
            end
            local concurrent = tonumber(redis.call('GET', KEYS[5]) or '0')
            if concurrent >= tonumber(ARGV[6]) then
                return 'concurrency'
            end

            redis.call('SET', KEYS[1], ARGV[1])
            redis.call('INCR', KEYS[2])
            redis.call('EXPIRE', KEYS[2], ARGV[7])
            if KEYS[4] ~= '' then
                redis.call('INCR', KEYS[4])
                redis.call('EXPIRE', KEYS[4], ARGV[7])
            end
            redis.call('INCR', KEYS[5])
            redis.call('EXPIRE', KEYS[5], ARGV[8])
            return false
            ",
        );

        let result: redis::Value = script
            .key(&last_wake_key)
            .key(&wakes_key)
            .key(&minutes_key)
            .key(&pair_key)
            .key(&concurrency_key)
            .arg(now_ms)
            .arg(config.cooldown_seconds)
            .arg(config.max_wakes_per_day)
            .arg(config.max_session_minutes_per_day)
            .arg(config.max_wakes_per_pair_per_day)
            .arg(config.max_concurrent_pulse_sessions)
            .arg(seconds_to_day_boundary.max(1))
            .arg(CONCURRENCY_SAFETY_TTL_SECONDS)
            .invoke_async(&mut conn)
            .await?;

        Ok(match result {
            redis::Value::BulkString(bytes) => {
                let reason = String::from_utf8_lossy(&bytes);
                Err(match reason.as_ref() {
                    "cooldown" => WakeRejectReason::Cooldown,
                    "daily_cap" => WakeRejectReason::DailyCap,
                    "session_budget" => WakeRejectReason::SessionBudget,
                    "pair_cap" => WakeRejectReason::PairCap,
                    _ => WakeRejectReason::Concurrency,
                })
            }
            _ => Ok(()),
        })
    }

    /// Releases one concurrent-pulse-session slot when a pulse session
    /// ends, and adds its duration to the daily session-minutes budget.
    pub async fn release_pulse_session(
        &self,
        agent_id: &str,
        date: &str,
        minutes_used: i64,
        seconds_to_day_boundary: i64,
    ) -> BusResult<()> {
        use redis::AsyncCommands;
        let mut conn = self.conn();
        let concurrency_key = keys::agent_concurrent_pulses(agent_id);
        let minutes_key = keys::agent_session_minutes_today(agent_id, date);
        let _: i64 = conn.decr(&concurrency_key, 1).await?;
        let _: i64 = conn.incr(&minutes_key, minutes_used).await?;
        let _: () = conn
            .expire(&minutes_key, seconds_to_day_boundary.max(1))
            .await?;
        Ok(())
    }
}
