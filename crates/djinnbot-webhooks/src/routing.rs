use anyhow::Result;
use djinnbot_bus::{keys, Bus};
use djinnbot_lifecycle::{GuardrailGate, WakeDecision};
use djinnbot_store::Store;
use djinnbot_types::{
    AgentAssignment, LifecycleEvent, ProjectId, Task, TaskEvent, TaskId, TaskMetadata,
    TaskPriority, TransitionNote, WakeGuardrailConfig, WebhookEvent,
};
use regex::Regex;
use serde_json::Value;
use tracing::{debug, info, warn};

/// Matches `feat/task_…` branches, extracting the task id. Anchored at
/// the start of the branch so `feat/task_abc-implement-oauth` yields
/// `task_abc` without requiring an exact match.
fn task_branch_regex() -> Regex {
    Regex::new(r"^feat/(task_[a-zA-Z0-9]+)").expect("static regex")
}

pub struct WebhookRouter {
    store: Store,
    bus: Bus,
    gate: GuardrailGate,
    /// The fixed reviewer persona woken for PR-ready-for-review events —
    /// distinct from whichever agent wrote the code, so review happens
    /// from a second pair of eyes (§4.6 SUPPLEMENTAL).
    review_agent_id: String,
}

impl WebhookRouter {
    pub fn new(
        store: Store,
        bus: Bus,
        wake_guardrails: WakeGuardrailConfig,
        review_agent_id: impl Into<String>,
    ) -> Self {
        let gate = GuardrailGate::new(bus.clone(), wake_guardrails);
        Self {
            store,
            bus,
            gate,
            review_agent_id: review_agent_id.into(),
        }
    }

    /// Gates a webhook-driven wake on the same single-authority guardrail
    /// check pulse and chat-start wakes go through, so a burst of
    /// deliveries can't exceed the agent's wake-rate limits. Rejected
    /// wakes are recorded as `WakeRejected` rather than silently dropped.
    async fn request_wake(&self, agent_id: &str, reason: String, at: i64) -> Result<()> {
        match self.gate.try_wake(agent_id, None, at).await {
            Ok(WakeDecision::Granted) => {
                self.publish_lifecycle(LifecycleEvent::WakeRequested {
                    agent_id: agent_id.into(),
                    reason,
                    at,
                })
                .await
            }
            Ok(WakeDecision::Rejected(reject_reason)) => {
                self.publish_lifecycle(LifecycleEvent::WakeRejected {
                    agent_id: agent_id.into(),
                    reason: reject_reason,
                    at,
                })
                .await
            }
            Err(err) => {
                warn!(agent_id, error = %err, "webhook wake guardrail check failed");
                Ok(())
            }
        }
    }

    /// Routes one verified delivery, marking it processed (or recording
    /// the failure) per §4.6 step 5 — the sole commit point for "we've
    /// seen this delivery".
    pub async fn route(&self, event: &WebhookEvent) -> Result<()> {
        let result = self.route_inner(event).await;
        match &result {
            Ok(()) => {
                self.store
                    .mark_webhook_processed(event.id.clone(), None)
                    .await?;
            }
            Err(err) => {
                warn!(delivery_id = %event.delivery_id, error = %err, "webhook routing failed");
                self.store
                    .mark_webhook_processed(event.id.clone(), Some(err.to_string()))
                    .await?;
            }
        }
        result
    }

    async fn route_inner(&self, event: &WebhookEvent) -> Result<()> {
        if event.event_type == "pull_request" {
            self.route_pull_request(event).await?;
        }
        self.route_agent_assignment(event).await?;
        Ok(())
    }

    /// §4.6 step 6: PR lifecycle side-effects, run before agent routing.
    async fn route_pull_request(&self, event: &WebhookEvent) -> Result<()> {
        let Some(pr) = event.payload.get("pull_request") else {
            return Ok(());
        };
        let action = event.action.as_deref().unwrap_or_default();
        let head_branch = pr
            .pointer("/head/ref")
            .and_then(Value::as_str)
            .unwrap_or_default();

        if (action == "opened" || action == "ready_for_review")
            && task_branch_regex().is_match(head_branch)
        {
            let pr_number = pr.get("number").and_then(Value::as_i64).unwrap_or_default();
            let pr_title = pr.get("title").and_then(Value::as_str).unwrap_or_default();
            let pr_url = pr.get("html_url").and_then(Value::as_str).unwrap_or_default();
            let context = format!("PR #{pr_number} ready for review: {pr_title} ({pr_url})");
            self.request_wake(&self.review_agent_id, context, djinnbot_types::now_ms())
                .await?;
            info!(pr_number, branch = head_branch, "review pulse triggered");
        }

        if action != "closed" {
            return Ok(());
        }
        let merged = pr.get("merged").and_then(Value::as_bool).unwrap_or(false);
        if !merged {
            return Ok(());
        }
        self.complete_merged_pr(event, pr, head_branch).await
    }

    async fn complete_merged_pr(
        &self,
        event: &WebhookEvent,
        pr: &Value,
        head_branch: &str,
    ) -> Result<()> {
        let Some(repo) = event.repository_full_name.clone() else {
            return Ok(());
        };
        let Some(project) = self.store.find_project_by_repository(repo).await? else {
            debug!(repository = %event.repository_full_name.as_deref().unwrap_or(""), "no project linked to repository, skipping PR auto-complete");
            return Ok(());
        };
        let pr_number = pr.get("number").and_then(Value::as_i64).unwrap_or_default();

        let task = self.resolve_linked_task(project.id.clone(), pr_number, head_branch).await?;
        let Some(task) = task else {
            debug!(pr_number, branch = head_branch, "no task linked to merged PR, skipping");
            return Ok(());
        };

        if project.status_semantics.is_terminal_done(&task.status) {
            return Ok(());
        }
        let Some(done_status) = project.status_semantics.done_status() else {
            warn!(project_id = %project.id, "project has no terminal-done status, cannot auto-complete task");
            return Ok(());
        };
        let done_column = project
            .status_semantics
            .column_for_status(done_status)
            .map(|c| c.column_id.clone())
            .unwrap_or_else(|| task.column_id.clone());

        let now_ms = djinnbot_types::now_ms();
        let note = TransitionNote {
            from: task.status.clone(),
            to: done_status.to_string(),
            note: format!("Auto-completed: PR #{pr_number} merged"),
            timestamp: now_ms,
            source: "webhook_pr_lifecycle".into(),
        };
        self.store
            .transition_task_status(
                task.id.clone(),
                done_status.to_string(),
                done_column,
                note.clone(),
                Some(now_ms),
                now_ms,
            )
            .await?;

        self.publish_task_event(TaskEvent::StatusChanged {
            task_id: task.id.clone(),
            project_id: project.id.clone(),
            from: task.status.clone(),
            to: done_status.to_string(),
            note: note.note,
            at: now_ms,
        })
        .await?;

        if let Some(agent_id) = task.assigned_agent.clone() {
            self.publish_task_event(TaskEvent::WorkspaceRemoveRequested {
                task_id: task.id,
                project_id: project.id,
                agent_id,
                at: now_ms,
            })
            .await?;
        }

        Ok(())
    }

    /// (a) pr metadata, falling back to (b) git_branch metadata, falling
    /// back to (c) extracting the task id out of the branch name.
    async fn resolve_linked_task(
        &self,
        project_id: ProjectId,
        pr_number: i64,
        head_branch: &str,
    ) -> Result<Option<Task>> {
        if let Some(task) = self
            .store
            .find_task_by_pr_metadata(project_id.clone(), pr_number)
            .await?
        {
            return Ok(Some(task));
        }
        if let Some(task) = self
            .store
            .find_task_by_branch(project_id.clone(), head_branch.to_string())
            .await?
        {
            return Ok(Some(task));
        }
        if let Some(captures) = task_branch_regex().captures(head_branch) {
            let task_id = TaskId::from(&captures[1]);
            if let Ok(task) = self.store.get_task(task_id).await {
                if task.project_id == project_id {
                    return Ok(Some(task));
                }
            }
        }
        Ok(None)
    }

    /// §4.6 step 7: agent assignment matching.
    async fn route_agent_assignment(&self, event: &WebhookEvent) -> Result<()> {
        let Some(repo) = event.repository_full_name.clone() else {
            return Ok(());
        };
        let Some(project) = self.store.find_project_by_repository(repo).await? else {
            return Ok(());
        };

        let labels = extract_labels(&event.payload);
        let changed_files = extract_changed_files(&event.payload);
        let author = extract_author(&event.payload);

        for assignment in &project.agent_assignments {
            if !assignment.matches(
                &event.event_type,
                event.action.as_deref(),
                &labels,
                &changed_files,
                &author,
            ) {
                continue;
            }
            self.apply_assignment(&project, assignment, &event.payload)
                .await?;
        }
        Ok(())
    }

    async fn apply_assignment(
        &self,
        project: &djinnbot_types::Project,
        assignment: &AgentAssignment,
        payload: &Value,
    ) -> Result<()> {
        if assignment.auto_respond {
            return self
                .request_wake(
                    assignment.agent_id.as_str(),
                    format!("github_webhook assignment for project {}", project.id),
                    djinnbot_types::now_ms(),
                )
                .await;
        }

        let title = payload
            .pointer("/pull_request/title")
            .or_else(|| payload.pointer("/issue/title"))
            .and_then(Value::as_str)
            .unwrap_or("Untitled webhook assignment")
            .to_string();
        let description = payload
            .pointer("/pull_request/html_url")
            .or_else(|| payload.pointer("/issue/html_url"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let Some(task) = task_from_webhook_assignment(
            project,
            title,
            description,
            assignment.agent_id.clone(),
        ) else {
            warn!(project_id = %project.id, "project has no column to file a webhook-assigned task into");
            return Ok(());
        };
        self.store.insert_task(task).await?;
        Ok(())
    }

    async fn publish_lifecycle(&self, event: LifecycleEvent) -> Result<()> {
        let payload = serde_json::to_string(&event)?;
        self.bus
            .xadd(keys::EVENTS_GLOBAL, &[("data", payload.as_str())], None)
            .await?;
        Ok(())
    }

    async fn publish_task_event(&self, event: TaskEvent) -> Result<()> {
        let payload = serde_json::to_string(&event)?;
        self.bus
            .xadd(keys::EVENTS_GLOBAL, &[("data", payload.as_str())], None)
            .await?;
        Ok(())
    }
}

fn extract_labels(payload: &Value) -> Vec<String> {
    payload
        .pointer("/pull_request/labels")
        .or_else(|| payload.pointer("/issue/labels"))
        .and_then(Value::as_array)
        .map(|labels| {
            labels
                .iter()
                .filter_map(|l| l.get("name").and_then(Value::as_str))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn extract_changed_files(payload: &Value) -> Vec<String> {
    payload
        .get("commits")
        .and_then(Value::as_array)
        .map(|commits| {
            commits
                .iter()
                .flat_map(|c| {
                    ["added", "modified", "removed"]
                        .into_iter()
                        .filter_map(move |key| c.get(key).and_then(Value::as_array))
                        .flatten()
                })
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn extract_author(payload: &Value) -> String {
    payload
        .pointer("/sender/login")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// Used by the auto-respond=false branch of assignment matching: creates
/// a tracked task in the project's first column instead of waking an
/// agent directly.
pub fn task_from_webhook_assignment(
    project: &djinnbot_types::Project,
    title: String,
    description: String,
    assigned_agent: djinnbot_types::AgentId,
) -> Option<Task> {
    let column = project.status_semantics.first_column()?;
    let status = column.task_statuses.first().cloned().unwrap_or_default();
    let now_ms = djinnbot_types::now_ms();
    Some(Task {
        id: TaskId::generate(),
        project_id: project.id.clone(),
        title,
        description,
        status,
        priority: TaskPriority::Normal,
        assigned_agent: Some(assigned_agent),
        run_id: None,
        parent_task_id: None,
        depends_on: vec![],
        tags: vec![],
        column_id: column.column_id.clone(),
        column_position: 0,
        metadata: TaskMetadata {
            source: Some("github_webhook".into()),
            ..Default::default()
        },
        created_at: now_ms,
        updated_at: now_ms,
        completed_at: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_branch_regex_extracts_the_task_id() {
        let re = task_branch_regex();
        let caps = re.captures("feat/task_abc123-implement-oauth").unwrap();
        assert_eq!(&caps[1], "task_abc123");
    }

    #[test]
    fn task_branch_regex_rejects_non_task_branches() {
        assert!(!task_branch_regex().is_match("chore/bump-deps"));
    }

    #[test]
    fn extract_author_reads_sender_login() {
        let payload = serde_json::json!({"sender": {"login": "octocat"}});
        assert_eq!(extract_author(&payload), "octocat");
    }

    async fn test_bus() -> Option<Bus> {
        match std::env::var("DJINNBOT_TEST_REDIS_URL") {
            Ok(url) => Bus::connect(&url).await.ok(),
            Err(_) => None,
        }
    }

    #[tokio::test]
    async fn a_second_wake_within_the_cooldown_is_rejected_not_published_unguarded() {
        let Some(bus) = test_bus().await else {
            return;
        };
        let store = Store::open_in_memory().unwrap();
        let mut config = WakeGuardrailConfig::default();
        config.cooldown_seconds = 300;
        let router = WebhookRouter::new(store, bus.clone(), config, "reviewer");
        let agent_id = format!("test-agent-{}", std::process::id());

        let cursor = "0";
        router
            .request_wake(&agent_id, "first delivery".into(), 1_000_000)
            .await
            .unwrap();
        router
            .request_wake(&agent_id, "second delivery".into(), 1_000_500)
            .await
            .unwrap();

        let entries = bus.xrange_after(keys::EVENTS_GLOBAL, cursor).await.unwrap();
        let events: Vec<LifecycleEvent> = entries
            .iter()
            .filter_map(|e| e.fields.get("data"))
            .filter_map(|data| serde_json::from_str(data).ok())
            .filter(|event: &LifecycleEvent| match event {
                LifecycleEvent::WakeRequested { agent_id: a, .. }
                | LifecycleEvent::WakeRejected { agent_id: a, .. } => a.as_str() == agent_id,
                #[allow(unreachable_patterns)]
                _ => false,
            })
            .collect();

        assert!(matches!(events.last(), Some(LifecycleEvent::WakeRejected { .. })));
    }
}
