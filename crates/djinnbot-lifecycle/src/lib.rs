//! Agent Lifecycle Controller (C4) — the hardest subsystem per the design
//! doc: it manages one logical agent across potentially many concurrent
//! container instances, serializing its state on a single bus-backed key
//! and arbitrating wake access through guardrails that must be checked
//! and recorded as one atomic operation.

mod deadline;
mod guardrails;
mod pulse;
mod state;
mod worklock;

pub use deadline::DeadlineEnforcer;
pub use guardrails::{GuardrailGate, WakeDecision};
pub use pulse::PulseDriver;
pub use state::LifecycleController;
pub use worklock::WorkLockHandle;
