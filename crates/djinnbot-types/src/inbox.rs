use serde::{Deserialize, Serialize};

use crate::ids::{AgentId, RunId, StepId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessagePriority {
    Normal,
    High,
    Urgent,
}

impl Default for MessagePriority {
    fn default() -> Self {
        Self::Normal
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Info,
    ReviewRequest,
    HelpRequest,
    Urgent,
    WorkAssignment,
}

/// A single message in an agent's durable, ordered inbox. Messages are
/// append-only and never reordered; `read` is the only mutable field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboxMessage {
    pub id: String,
    pub to_agent: AgentId,
    pub from_agent: AgentId,
    pub message_type: MessageType,
    #[serde(default)]
    pub priority: MessagePriority,
    #[serde(default)]
    pub subject: Option<String>,
    pub body: String,
    #[serde(default)]
    pub run_context: Option<RunId>,
    #[serde(default)]
    pub step_context: Option<StepId>,
    pub sent_at: i64,
    #[serde(default)]
    pub read: bool,
    #[serde(default)]
    pub read_at: Option<i64>,
}

impl InboxMessage {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        to_agent: AgentId,
        from_agent: AgentId,
        message_type: MessageType,
        priority: MessagePriority,
        subject: Option<String>,
        body: impl Into<String>,
        run_context: Option<RunId>,
        step_context: Option<StepId>,
    ) -> Self {
        Self {
            id: crate::ids::new_opaque_id("msg"),
            to_agent,
            from_agent,
            message_type,
            priority,
            subject,
            body: body.into(),
            run_context,
            step_context,
            sent_at: crate::now_ms(),
            read: false,
            read_at: None,
        }
    }

    pub fn mark_read(&mut self, at_ms: i64) {
        if !self.read {
            self.read = true;
            self.read_at = Some(at_ms);
        }
    }
}

/// The five named views `list()` accepts. `Urgent` filters on priority,
/// the other named variants filter on message type — deliberately two
/// different axes collapsed into one filter, matching how the view is
/// presented to a caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InboxView {
    #[default]
    All,
    Unread,
    Urgent,
    ReviewRequest,
    HelpRequest,
}

/// Query filters accepted by the inbox list operation. All fields are
/// conjunctive; an absent field imposes no constraint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InboxFilter {
    #[serde(default)]
    pub view: InboxView,
    #[serde(default)]
    pub from_agent: Option<AgentId>,
    #[serde(default)]
    pub since: Option<i64>,
}

impl InboxFilter {
    pub fn matches(&self, message: &InboxMessage) -> bool {
        let view_ok = match self.view {
            InboxView::All => true,
            InboxView::Unread => !message.read,
            InboxView::Urgent => message.priority == MessagePriority::Urgent,
            InboxView::ReviewRequest => message.message_type == MessageType::ReviewRequest,
            InboxView::HelpRequest => message.message_type == MessageType::HelpRequest,
        };
        if !view_ok {
            return false;
        }
        if let Some(from) = &self.from_agent {
            if &message.from_agent != from {
                return false;
            }
        }
        if let Some(since) = self.since {
            if message.sent_at < since {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message() -> InboxMessage {
        InboxMessage::new(
            AgentId::from("reviewer"),
            AgentId::from("planner"),
            MessageType::ReviewRequest,
            MessagePriority::High,
            Some("PR 42".into()),
            "please review PR 42",
            None,
            None,
        )
    }

    #[test]
    fn mark_read_is_idempotent() {
        let mut msg = message();
        msg.mark_read(1_000);
        let first = msg.read_at;
        msg.mark_read(2_000);
        assert_eq!(msg.read_at, first);
    }

    #[test]
    fn unread_view_excludes_read_messages() {
        let mut msg = message();
        let filter = InboxFilter {
            view: InboxView::Unread,
            ..Default::default()
        };
        assert!(filter.matches(&msg));
        msg.mark_read(1_000);
        assert!(!filter.matches(&msg));
    }

    #[test]
    fn urgent_view_filters_on_priority_not_type() {
        let mut msg = message();
        let filter = InboxFilter {
            view: InboxView::Urgent,
            ..Default::default()
        };
        assert!(!filter.matches(&msg));
        msg.priority = MessagePriority::Urgent;
        assert!(filter.matches(&msg));
    }

    #[test]
    fn review_request_view_filters_on_message_type() {
        let filter = InboxFilter {
            view: InboxView::ReviewRequest,
            ..Default::default()
        };
        assert!(filter.matches(&message()));
    }

    #[test]
    fn from_agent_filter_requires_exact_match() {
        let msg = message();
        let filter = InboxFilter {
            from_agent: Some(AgentId::from("someone-else")),
            ..Default::default()
        };
        assert!(!filter.matches(&msg));
    }
}
