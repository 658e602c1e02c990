//! Tagged event envelopes published on the event bus. Each enum follows the
//! `{"type": "...", ...}` wire shape so that a subscriber can dispatch on
//! `type` without a side-channel discriminant column, and so new variants
//! are additive rather than breaking for older subscribers.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{AgentId, ProjectId, RunId, SessionId, StepId, TaskId};
use crate::run::RunStatus;
use crate::session::SessionStatus;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    Created {
        run_id: RunId,
        pipeline_id: String,
        task_id: Option<TaskId>,
        at: i64,
    },
    StatusChanged {
        run_id: RunId,
        from: RunStatus,
        to: RunStatus,
        at: i64,
    },
    StepStarted {
        run_id: RunId,
        step_id: StepId,
        agent_id: AgentId,
        at: i64,
    },
    StepCompleted {
        run_id: RunId,
        step_id: StepId,
        #[serde(default)]
        outputs: std::collections::HashMap<String, Value>,
        at: i64,
    },
    StepFailed {
        run_id: RunId,
        step_id: StepId,
        error: String,
        at: i64,
    },
    /// Per the resolved open question in Design Note §9: outputs travel
    /// with the event itself so the reconciler commits `Run.outputs` and
    /// `Run.status = completed` in the one write this event triggers —
    /// there is no second, racing write path for outputs.
    Completed {
        run_id: RunId,
        #[serde(default)]
        outputs: std::collections::HashMap<String, Value>,
        at: i64,
    },
    Failed {
        run_id: RunId,
        error: String,
        at: i64,
    },
    Cancelled {
        run_id: RunId,
        at: i64,
    },
}

impl RunEvent {
    pub fn run_id(&self) -> &RunId {
        match self {
            Self::Created { run_id, .. }
            | Self::StatusChanged { run_id, .. }
            | Self::StepStarted { run_id, .. }
            | Self::StepCompleted { run_id, .. }
            | Self::StepFailed { run_id, .. }
            | Self::Completed { run_id, .. }
            | Self::Failed { run_id, .. }
            | Self::Cancelled { run_id, .. } => run_id,
        }
    }
}

/// Structural session lifecycle events, as distinct from the raw
/// token-level chunks a session streams — those pass through as opaque
/// `Token` payloads so the router never has to parse model output.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEventEnvelope {
    Status {
        session_id: SessionId,
        status: SessionStatus,
        at: i64,
    },
    Token {
        session_id: SessionId,
        sequence: u64,
        payload: Value,
    },
    ToolCall {
        session_id: SessionId,
        tool_name: String,
        arguments: Value,
        at: i64,
    },
    Error {
        session_id: SessionId,
        message: String,
        at: i64,
    },
    /// §5 cancellation level 3: a wake cancellation released the
    /// work-lock and the in-flight response was aborted mid-stream.
    ResponseAborted {
        session_id: SessionId,
        reason: String,
        at: i64,
    },
}

impl SessionEventEnvelope {
    pub fn session_id(&self) -> &SessionId {
        match self {
            Self::Status { session_id, .. }
            | Self::Token { session_id, .. }
            | Self::ToolCall { session_id, .. }
            | Self::Error { session_id, .. }
            | Self::ResponseAborted { session_id, .. } => session_id,
        }
    }
}

/// Published to `sessions:{id}:control` — the out-of-band channel an
/// engine watches alongside its normal chat traffic so a cancellation can
/// interrupt a session without waiting for the next token boundary (§3,
/// §5 cancellation levels 2 and 3).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlSignal {
    /// Level 2: a run cancel. The engine translates this into a
    /// STEP_FAILED with reason=cancelled for whatever step is in flight.
    Cancel { run_id: RunId, reason: String, at: i64 },
    /// Level 3: a pulse session exceeded its deadline. The engine aborts
    /// the in-flight response; the controller releases the work-lock and
    /// publishes `response_aborted` on the session channel once the grace
    /// period elapses.
    DeadlineExceeded { reason: String, at: i64 },
}

/// Emitted after a webhook delivery has been verified and its side
/// effects applied, for subscribers that only care about the outcome and
/// not the raw payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WebhookNotice {
    PullRequestOpened {
        repository_full_name: String,
        pr_number: i64,
        branch: String,
        author: String,
        at: i64,
    },
    PullRequestMerged {
        repository_full_name: String,
        pr_number: i64,
        task_id: Option<TaskId>,
        at: i64,
    },
    AgentAssigned {
        repository_full_name: String,
        agent_id: AgentId,
        at: i64,
    },
    VerificationFailed {
        delivery_id: String,
        reason: String,
        at: i64,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LifecycleEvent {
    WakeRequested {
        agent_id: AgentId,
        reason: String,
        at: i64,
    },
    WakeRejected {
        agent_id: AgentId,
        reason: crate::lifecycle::WakeRejectReason,
        at: i64,
    },
    WorkLockAcquired {
        agent_id: AgentId,
        work_key: String,
        session_id: SessionId,
        at: i64,
    },
    WorkLockReleased {
        agent_id: AgentId,
        work_key: String,
        at: i64,
    },
    StateChanged {
        agent_id: AgentId,
        state: crate::lifecycle::LifecycleStateKind,
        at: i64,
    },
}

/// Emitted by the webhook router's PR-merge auto-completion path (§4.6):
/// a task moved status without an agent session driving it, and the
/// assigned agent's worktree should be cleaned up.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskEvent {
    StatusChanged {
        task_id: TaskId,
        project_id: ProjectId,
        from: String,
        to: String,
        note: String,
        at: i64,
    },
    WorkspaceRemoveRequested {
        task_id: TaskId,
        project_id: ProjectId,
        agent_id: AgentId,
        at: i64,
    },
}

/// Emitted by the dispatcher's planning post-processing (§4.3) once a
/// planning run's generated tasks have been imported.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PlanningEvent {
    Completed {
        run_id: RunId,
        project_id: ProjectId,
        imported_task_count: usize,
        at: i64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_event_serializes_with_a_type_tag() {
        let event = RunEvent::Completed {
            run_id: RunId::from("run_1"),
            outputs: Default::default(),
            at: 1_000,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "completed");
        assert_eq!(json["run_id"], "run_1");
    }

    #[test]
    fn run_id_accessor_covers_every_variant() {
        let event = RunEvent::StepFailed {
            run_id: RunId::from("run_2"),
            step_id: StepId::from("run_2_analyze"),
            error: "boom".into(),
            at: 1_000,
        };
        assert_eq!(event.run_id().as_str(), "run_2");
    }

    #[test]
    fn webhook_notice_round_trips_through_json() {
        let notice = WebhookNotice::PullRequestMerged {
            repository_full_name: "acme/widgets".into(),
            pr_number: 42,
            task_id: Some(TaskId::from("task_abc")),
            at: 1_000,
        };
        let json = serde_json::to_string(&notice).unwrap();
        let back: WebhookNotice = serde_json::from_str(&json).unwrap();
        match back {
            WebhookNotice::PullRequestMerged { pr_number, .. } => assert_eq!(pr_number, 42),
            _ => panic!("wrong variant"),
        }
    }
}
