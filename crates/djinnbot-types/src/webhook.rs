use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::AgentId;
use crate::task::AgentAssignmentFilters;

/// A single inbound webhook delivery, persisted before verification so a
/// replayed delivery-id can be recognized even if verification itself
/// later fails.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEvent {
    pub id: String,
    pub delivery_id: String,
    pub event_type: String,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub repository_full_name: Option<String>,
    #[serde(default)]
    pub installation_id: Option<i64>,
    pub signature: String,
    pub verified: bool,
    pub payload: Value,
    pub received_at: i64,
    /// Flipped to `true` only after every side effect it triggers has
    /// completed — a crash mid-processing leaves this `false` so the
    /// delivery is retried rather than silently dropped.
    pub processed: bool,
    #[serde(default)]
    pub processing_error: Option<String>,
}

impl WebhookEvent {
    pub fn new(
        delivery_id: impl Into<String>,
        event_type: impl Into<String>,
        signature: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self {
            id: crate::ids::new_opaque_id("whk"),
            delivery_id: delivery_id.into(),
            event_type: event_type.into(),
            action: None,
            repository_full_name: None,
            installation_id: None,
            signature: signature.into(),
            verified: false,
            payload,
            received_at: crate::now_ms(),
            processed: false,
            processing_error: None,
        }
    }
}

/// A project's declared rule for routing inbound work (issues, PR review
/// requests) to a specific agent: (agent-id, event-type, optional action,
/// filter-labels, filter-file-patterns, filter-authors, auto-respond).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentAssignment {
    pub agent_id: AgentId,
    pub event_type: String,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub filters: AgentAssignmentFilters,
    /// `true` wakes the agent directly (PULSE_TRIGGERED); `false` files a
    /// task in the project's first column instead, for the agent to pick
    /// up on its own schedule.
    #[serde(default = "default_auto_respond")]
    pub auto_respond: bool,
}

fn default_auto_respond() -> bool {
    true
}

impl AgentAssignment {
    /// An assignment matches if the event-type (and action, when
    /// declared) agree, and every filter category it declares has at
    /// least one hit; categories it leaves empty are ignored (not
    /// wildcards that reject everything).
    pub fn matches(
        &self,
        event_type: &str,
        action: Option<&str>,
        labels: &[String],
        changed_files: &[String],
        author: &str,
    ) -> bool {
        if self.event_type != event_type {
            return false;
        }
        if let Some(wanted_action) = self.action.as_deref() {
            if Some(wanted_action) != action {
                return false;
            }
        }
        let labels_ok = self.filters.labels.is_empty()
            || self
                .filters
                .labels
                .iter()
                .any(|wanted| labels.iter().any(|l| l == wanted));
        let files_ok = self.filters.file_patterns.is_empty()
            || self.filters.file_patterns.iter().any(|pattern| {
                changed_files
                    .iter()
                    .any(|f| glob_match(pattern, f))
            });
        let authors_ok = author_matches(&self.filters.authors, author);
        labels_ok && files_ok && authors_ok
    }
}

/// `!`-prefixed patterns exclude; any exclusion match rejects outright.
/// With no inclusive patterns declared, an author passes by default
/// unless excluded; with at least one inclusive pattern, the author must
/// match one of them.
fn author_matches(patterns: &[String], author: &str) -> bool {
    let (excludes, includes): (Vec<&str>, Vec<&str>) =
        patterns.iter().map(String::as_str).partition(|p| p.starts_with('!'));
    if excludes.iter().any(|p| &p[1..] == author) {
        return false;
    }
    includes.is_empty() || includes.iter().any(|p| *p == author)
}

/// Minimal `*`/`?` glob matcher, sufficient for file-pattern filters like
/// `crates/**/*.rs` without pulling in a dedicated glob crate.
fn glob_match(pattern: &str, candidate: &str) -> bool {
    fn inner(p: &[u8], c: &[u8]) -> bool {
        match (p.first(), c.first()) {
            (None, None) => true,
            (Some(b'*'), _) => inner(&p[1..], c) || (!c.is_empty() && inner(p, &c[1..])),
            (Some(b'?'), Some(_)) => inner(&p[1..], &c[1..]),
            (Some(a), Some(b)) if a == b => inner(&p[1..], &c[1..]),
            _ => false,
        }
    }
    inner(pattern.as_bytes(), candidate.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assignment(labels: &[&str], patterns: &[&str]) -> AgentAssignment {
        AgentAssignment {
            agent_id: AgentId::from("reviewer"),
            event_type: "pull_request".into(),
            action: None,
            filters: AgentAssignmentFilters {
                labels: labels.iter().map(|s| s.to_string()).collect(),
                file_patterns: patterns.iter().map(|s| s.to_string()).collect(),
                authors: Vec::new(),
            },
            auto_respond: true,
        }
    }

    #[test]
    fn empty_filter_categories_do_not_reject() {
        let a = assignment(&[], &[]);
        assert!(a.matches("pull_request", None, &[], &[], "anyone"));
    }

    #[test]
    fn event_type_mismatch_rejects_regardless_of_filters() {
        let a = assignment(&[], &[]);
        assert!(!a.matches("issues", None, &[], &[], "anyone"));
    }

    #[test]
    fn declared_action_must_agree() {
        let mut a = assignment(&[], &[]);
        a.action = Some("opened".into());
        assert!(a.matches("pull_request", Some("opened"), &[], &[], "x"));
        assert!(!a.matches("pull_request", Some("closed"), &[], &[], "x"));
    }

    #[test]
    fn label_filter_requires_a_hit() {
        let a = assignment(&["needs-review"], &[]);
        assert!(a.matches("pull_request", None, &["needs-review".to_string()], &[], "x"));
        assert!(!a.matches("pull_request", None, &["wontfix".to_string()], &[], "x"));
    }

    #[test]
    fn file_pattern_glob_matches_nested_paths() {
        let a = assignment(&[], &["crates/*/src/*.rs"]);
        assert!(a.matches(
            "pull_request",
            None,
            &[],
            &["crates/foo/src/lib.rs".to_string()],
            "x"
        ));
        assert!(!a.matches("pull_request", None, &[], &["docs/readme.md".to_string()], "x"));
    }

    #[test]
    fn excluded_author_is_rejected_even_with_no_inclusive_patterns() {
        assert!(author_matches(&[], "anyone"));
        assert!(!author_matches(&["!bot-account".to_string()], "bot-account"));
        assert!(author_matches(&["!bot-account".to_string()], "a-human"));
    }

    #[test]
    fn inclusive_patterns_require_a_match() {
        let patterns = vec!["alice".to_string(), "bob".to_string()];
        assert!(author_matches(&patterns, "alice"));
        assert!(!author_matches(&patterns, "carol"));
    }
}
