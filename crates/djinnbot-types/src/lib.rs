//! Shared data model and event types for the DjinnBot agent execution plane.
//!
//! Every cross-component payload in the control plane — run/step state,
//! task/kanban state, session lifecycle, agent lifecycle, webhook events —
//! is defined here so that C1-C7 (see the design doc) share one vocabulary
//! instead of passing untyped JSON across crate boundaries.

mod events;
mod ids;
mod inbox;
pub mod lifecycle;
mod project;
mod provider;
mod retrieval;
mod run;
mod session;
pub mod task;
mod webhook;

pub use events::{
    ControlSignal, LifecycleEvent, PlanningEvent, RunEvent, SessionEventEnvelope, TaskEvent,
    WebhookNotice,
};
pub use ids::{new_opaque_id, AgentId, ProjectId, RunId, SessionId, StepId, TaskId};
pub use inbox::{InboxFilter, InboxMessage, InboxView, MessagePriority, MessageType};
pub use lifecycle::{
    AgentLifecycleState, CurrentWork, LifecycleStateKind, WakeGuardrailConfig,
    WakeGuardrailCounters, WakeRejectReason, WorkLock,
};
pub use project::Project;
pub use provider::{ModelInfo, ModelSpec, ProviderInfo};
pub use retrieval::RetrievalScore;
pub use run::{Run, RunStatus, Step, StepStatus};
pub use session::{Session, SessionStatus};
pub use task::{
    AgentAssignmentFilters, ColumnRef, StatusClass, StatusSemantics, Task, TaskMetadata,
    TaskPriority, TransitionNote,
};
pub use webhook::{AgentAssignment, WebhookEvent};

/// Milliseconds since the Unix epoch, matching the wire format used across
/// the HTTP surface and the event bus.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
