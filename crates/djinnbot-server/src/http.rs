use std::net::SocketAddr;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

use djinnbot_bus::keys;
use djinnbot_inbox::InboxList;
use djinnbot_sessions::SessionStreamItem;
use djinnbot_types::{
    AgentId, InboxFilter, InboxMessage, InboxView, MessagePriority, MessageType, ProjectId, RunEvent,
    RunId, RunStatus, Session, SessionEventEnvelope, SessionId, SessionStatus, StepId,
};

use crate::error::{ControlPlaneError, ControlPlaneResult};
use crate::state::AppState;

/// `CORS_ORIGINS` read as either `*` or a comma-separated allow-list.
#[derive(Debug, Clone)]
pub enum CorsPolicy {
    Any,
    Origins(Vec<String>),
}

impl CorsPolicy {
    fn layer(&self) -> CorsLayer {
        let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
        match self {
            Self::Any => layer.allow_origin(Any),
            Self::Origins(origins) => {
                let parsed: Vec<axum::http::HeaderValue> = origins
                    .iter()
                    .filter_map(|origin| origin.parse().ok())
                    .collect();
                layer.allow_origin(parsed)
            }
        }
    }
}

pub fn app_router(state: AppState, cors: CorsPolicy) -> Router {
    let cors = cors.layer();

    Router::new()
        .route("/v1/runs/", post(create_run))
        .route("/v1/runs/{id}", get(get_run))
        .route("/v1/runs/{id}/{action}", post(transition_run))
        .route("/v1/events/stream/{run_id}", get(stream_run_events))
        .route(
            "/v1/events/sessions/{session_id}/events",
            get(stream_session_events),
        )
        .route("/v1/agents/{id}/chat/start", post(chat_start))
        .route("/v1/agents/{id}/chat/{sid}/message", post(chat_message))
        .route("/v1/agents/{id}/chat/{sid}/stop", post(chat_stop))
        .route("/v1/agents/{id}/lifecycle", get(agent_lifecycle))
        .route("/v1/agents/{id}/work-ledger", get(agent_work_ledger))
        .route("/v1/agents/{id}/inbox", post(send_inbox).get(list_inbox))
        .route("/v1/webhooks/github", post(webhook_github))
        .route("/v1/resolve/", post(resolve_issue))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(
    addr: SocketAddr,
    state: AppState,
    cors: CorsPolicy,
    background: Vec<tokio::task::JoinHandle<()>>,
) -> anyhow::Result<()> {
    let app = app_router(state, cors);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let result = axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if tokio::signal::ctrl_c().await.is_err() {
                futures::future::pending::<()>().await;
            }
        })
        .await;
    for handle in background {
        handle.abort();
    }
    result?;
    Ok(())
}

#[derive(Debug, Deserialize)]
struct CreateRunRequest {
    pipeline_id: String,
    task: String,
    project_id: Option<String>,
    human_context: Option<Value>,
    model: Option<String>,
    workspace_type: Option<String>,
}

#[derive(Debug, Serialize)]
struct RunCreatedResponse {
    id: String,
    status: RunStatus,
}

async fn create_run(
    State(state): State<AppState>,
    Json(body): Json<CreateRunRequest>,
) -> ControlPlaneResult<Json<RunCreatedResponse>> {
    let run = state
        .dispatcher
        .create_run(
            &body.pipeline_id,
            body.project_id.map(ProjectId::from),
            &body.task,
            body.human_context.unwrap_or_else(|| json!({})),
            body.model,
            body.workspace_type,
        )
        .await?;
    Ok(Json(RunCreatedResponse {
        id: run.id.to_string(),
        status: run.status,
    }))
}

async fn get_run(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ControlPlaneResult<Json<Value>> {
    let run = state.store.get_run(RunId::from(id.clone())).await?;
    let steps = state.store.list_steps_for_run(RunId::from(id)).await?;
    Ok(Json(json!({ "run": run, "steps": steps })))
}

async fn transition_run(
    State(state): State<AppState>,
    Path((id, action)): Path<(String, String)>,
) -> ControlPlaneResult<Json<Value>> {
    let run_id = RunId::from(id);
    match action.as_str() {
        "cancel" => {
            state.dispatcher.cancel_run(run_id.clone()).await?;
        }
        "pause" => {
            state.dispatcher.pause_run(run_id.clone()).await?;
        }
        "resume" => {
            state.dispatcher.resume_run(run_id.clone()).await?;
        }
        "restart" => {
            let restarted = state.dispatcher.restart_run(run_id).await?;
            return Ok(Json(json!({ "id": restarted.id, "status": restarted.status })));
        }
        "delete" => {
            state.dispatcher.delete_run(run_id).await?;
            return Ok(Json(json!({ "deleted": true })));
        }
        other => {
            return Err(ControlPlaneError::InvalidInput(format!(
                "unknown run action '{other}'"
            )))
        }
    }
    let run = state.store.get_run(run_id).await?;
    Ok(Json(json!({ "id": run.id, "status": run.status })))
}

struct RunEventCursor {
    state: AppState,
    run_id: String,
    cursor: String,
    pending: std::collections::VecDeque<Event>,
}

/// `/v1/events/stream/{run_id}` has no dedicated per-run stream (runs
/// share the `events:global` stream with every other component), so this
/// polls the global stream and drops entries that don't belong to the
/// requested run rather than opening a second storage primitive just for
/// this endpoint.
async fn next_run_event(mut cursor: RunEventCursor) -> Option<(Result<Event, std::convert::Infallible>, RunEventCursor)> {
    loop {
        if let Some(event) = cursor.pending.pop_front() {
            return Some((Ok(event), cursor));
        }
        match cursor
            .state
            .bus
            .xread_blocking(keys::EVENTS_GLOBAL, &cursor.cursor, 64, 20_000)
            .await
        {
            Ok(entries) => {
                if entries.is_empty() {
                    return Some((Ok(Event::default().comment("heartbeat")), cursor));
                }
                for entry in entries {
                    cursor.cursor = entry.id.clone();
                    let Some(payload) = entry.fields.get("data") else { continue };
                    let Ok(event) = serde_json::from_str::<RunEvent>(payload) else { continue };
                    if event.run_id().as_str() != cursor.run_id {
                        continue;
                    }
                    let body = json!({ "stream_id": entry.id, "event": event });
                    if let Ok(data) = serde_json::to_string(&body) {
                        cursor.pending.push_back(Event::default().data(data));
                    }
                }
            }
            Err(err) => {
                warn!(error = %err, "run event stream read failed");
                tokio::time::sleep(Duration::from_secs(1)).await;
                return Some((Ok(Event::default().comment("heartbeat")), cursor));
            }
        }
    }
}

async fn stream_run_events(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> Sse<impl Stream<Item = Result<Event, std::convert::Infallible>>> {
    let seed = RunEventCursor {
        state,
        run_id,
        cursor: "0".to_string(),
        pending: std::collections::VecDeque::new(),
    };
    let events = stream::unfold(seed, next_run_event);
    Sse::new(events).keep_alive(KeepAlive::new().interval(Duration::from_secs(20)).text("heartbeat"))
}

#[derive(Debug, Deserialize)]
struct SessionStreamQuery {
    #[serde(default = "default_since")]
    since: String,
}

fn default_since() -> String {
    "0".to_string()
}

async fn next_session_event(
    mut subscription: djinnbot_sessions::Subscription,
) -> Option<(Result<Event, std::convert::Infallible>, djinnbot_sessions::Subscription)> {
    loop {
        match subscription.next().await {
            SessionStreamItem::Connected => {
                return Some((Ok(Event::default().event("connected").data("{}")), subscription));
            }
            SessionStreamItem::Replayed { stream_id, event } => {
                let body = json!({ "stream_id": stream_id, "event": event });
                if let Ok(data) = serde_json::to_string(&body) {
                    return Some((Ok(Event::default().data(data)), subscription));
                }
            }
            SessionStreamItem::Live(event) => {
                if let Ok(data) = serde_json::to_string(&event) {
                    return Some((Ok(Event::default().data(data)), subscription));
                }
            }
            SessionStreamItem::Heartbeat => {
                return Some((Ok(Event::default().comment("heartbeat")), subscription));
            }
            SessionStreamItem::Disconnected => return None,
        }
    }
}

async fn stream_session_events(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Query(query): Query<SessionStreamQuery>,
) -> ControlPlaneResult<Sse<impl Stream<Item = Result<Event, std::convert::Infallible>>>> {
    let subscription = state.sessions.subscribe(&session_id, &query.since).await?;
    let events = stream::unfold(subscription, next_session_event);
    Ok(Sse::new(events).keep_alive(KeepAlive::new().interval(Duration::from_secs(20)).text("heartbeat")))
}

#[derive(Debug, Deserialize)]
struct ChatStartRequest {
    model: Option<String>,
    /// Set by an agent container that is starting this session in
    /// response to a granted wake, so its eventual completion credits
    /// the daily session-minutes budget and frees its concurrency slot
    /// (§4.4). Absent for sessions a human starts directly.
    #[serde(default)]
    pulse_triggered: bool,
}

#[derive(Debug, Serialize)]
struct ChatStartResponse {
    #[serde(rename = "sessionId")]
    session_id: String,
    status: SessionStatus,
}

async fn chat_start(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
    Json(body): Json<ChatStartRequest>,
) -> ControlPlaneResult<Json<ChatStartResponse>> {
    let agent_id = AgentId::from(agent_id);
    let mut session = Session::new(agent_id.clone(), body.model);
    session.pulse_triggered = body.pulse_triggered;
    let session = state.store.insert_session(session).await?;
    state.lifecycle.begin_thinking(agent_id.as_str()).await?;

    let announcement = json!({ "sessionId": session.id, "agentId": agent_id, "status": session.status });
    state
        .bus
        .publish(keys::SESSIONS_LIVE, &announcement.to_string())
        .await?;
    state
        .sessions
        .publish(
            session.id.as_str(),
            SessionEventEnvelope::Status {
                session_id: session.id.clone(),
                status: session.status,
                at: session.created_at,
            },
        )
        .await?;

    Ok(Json(ChatStartResponse {
        session_id: session.id.to_string(),
        status: session.status,
    }))
}

#[derive(Debug, Deserialize)]
struct ChatMessageRequest {
    content: Value,
}

async fn chat_message(
    State(state): State<AppState>,
    Path((_agent_id, session_id)): Path<(String, String)>,
    Json(body): Json<ChatMessageRequest>,
) -> ControlPlaneResult<StatusCode> {
    let now = djinnbot_types::now_ms();
    state
        .store
        .touch_session(SessionId::from(session_id.clone()), now)
        .await?;
    state
        .sessions
        .publish(
            &session_id,
            SessionEventEnvelope::Token {
                session_id: SessionId::from(session_id.clone()),
                sequence: now as u64,
                payload: json!({ "role": "user", "content": body.content }),
            },
        )
        .await?;
    Ok(StatusCode::ACCEPTED)
}

async fn chat_stop(
    State(state): State<AppState>,
    Path((agent_id, session_id)): Path<(String, String)>,
) -> ControlPlaneResult<Json<Value>> {
    let now = djinnbot_types::now_ms();
    let session = state.store.get_session(SessionId::from(session_id.clone())).await?;
    state
        .store
        .update_session_status(SessionId::from(session_id.clone()), SessionStatus::Cancelled, now)
        .await?;
    if session.pulse_triggered {
        let minutes_used = (now - session.created_at).max(0) / 60_000;
        state
            .guardrails
            .release_pulse_session(&agent_id, now, minutes_used)
            .await?;
    }
    state.lifecycle.return_to_idle(&agent_id).await?;
    state
        .sessions
        .publish(
            &session_id,
            SessionEventEnvelope::Status {
                session_id: SessionId::from(session_id.clone()),
                status: SessionStatus::Cancelled,
                at: now,
            },
        )
        .await?;
    Ok(Json(json!({ "status": "cancelled" })))
}

async fn agent_lifecycle(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
) -> ControlPlaneResult<Json<Value>> {
    let lifecycle = state.lifecycle.ensure_registered(&agent_id, false).await?;
    let queue_depth = state.work_locks.ledger(&agent_id).await?.len();
    Ok(Json(json!({
        "state": lifecycle.state,
        "queueDepth": queue_depth,
        "currentWork": lifecycle.current_work,
        "pulse": {
            "enabled": lifecycle.pulse_enabled,
            "lastPulse": lifecycle.last_pulse,
            "nextPulse": lifecycle.next_pulse,
        },
    })))
}

async fn agent_work_ledger(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
) -> ControlPlaneResult<Json<Value>> {
    let locks = state.work_locks.ledger(&agent_id).await?;
    Ok(Json(json!({ "locks": locks })))
}

#[derive(Debug, Deserialize)]
struct SendInboxRequest {
    from_agent: String,
    message_type: MessageType,
    #[serde(default)]
    priority: MessagePriority,
    subject: Option<String>,
    body: String,
    run_context: Option<String>,
    step_context: Option<String>,
}

async fn send_inbox(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
    Json(body): Json<SendInboxRequest>,
) -> ControlPlaneResult<Json<Value>> {
    let message = InboxMessage::new(
        AgentId::from(agent_id),
        AgentId::from(body.from_agent),
        body.message_type,
        body.priority,
        body.subject,
        body.body,
        body.run_context.map(RunId::from),
        body.step_context.map(StepId::from),
    );
    let message_id = state.inbox.send(&message).await.map_err(ControlPlaneError::from)?;
    Ok(Json(json!({ "message_id": message_id })))
}

#[derive(Debug, Deserialize)]
struct InboxQuery {
    #[serde(default)]
    filter: InboxFilterParam,
    from_agent: Option<String>,
    since: Option<i64>,
    #[serde(default = "default_limit")]
    limit: usize,
    #[serde(default)]
    offset: usize,
}

fn default_limit() -> usize {
    50
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
enum InboxFilterParam {
    #[default]
    All,
    Unread,
    Urgent,
    ReviewRequest,
    HelpRequest,
}

async fn list_inbox(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
    Query(query): Query<InboxQuery>,
) -> ControlPlaneResult<Json<Value>> {
    let view = match query.filter {
        InboxFilterParam::All => InboxView::All,
        InboxFilterParam::Unread => InboxView::Unread,
        InboxFilterParam::Urgent => InboxView::Urgent,
        InboxFilterParam::ReviewRequest => InboxView::ReviewRequest,
        InboxFilterParam::HelpRequest => InboxView::HelpRequest,
    };
    let filter = InboxFilter {
        view,
        from_agent: query.from_agent.map(AgentId::from),
        since: query.since,
    };
    let InboxList { messages, total_matched } = state
        .inbox
        .list(&AgentId::from(agent_id), &filter, query.limit, query.offset)
        .await
        .map_err(ControlPlaneError::from)?;
    Ok(Json(json!({ "messages": messages, "total_matched": total_matched })))
}

async fn webhook_github(
    State(state): State<AppState>,
    headers: HeaderMap,
    raw_body: Bytes,
) -> ControlPlaneResult<Json<Value>> {
    let signature = headers
        .get("x-hub-signature-256")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ControlPlaneError::InvalidInput("missing X-Hub-Signature-256".into()))?
        .to_string();
    let event_type = headers
        .get("x-github-event")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ControlPlaneError::InvalidInput("missing X-GitHub-Event".into()))?
        .to_string();
    let delivery_id = headers
        .get("x-github-delivery")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ControlPlaneError::InvalidInput("missing X-GitHub-Delivery".into()))?
        .to_string();

    let payload: Value = serde_json::from_slice(&raw_body)
        .map_err(|err| ControlPlaneError::InvalidInput(format!("invalid JSON body: {err}")))?;
    let action = payload.get("action").and_then(Value::as_str).map(String::from);
    let repository_full_name = payload
        .pointer("/repository/full_name")
        .and_then(Value::as_str)
        .map(String::from);
    let installation_id = payload.pointer("/installation/id").and_then(Value::as_i64);

    let outcome = state
        .webhook_ingest
        .ingest(
            "github",
            &state.github_webhook_secret,
            &delivery_id,
            &event_type,
            action,
            repository_full_name,
            installation_id,
            &raw_body,
            &signature,
            payload,
        )
        .await
        .map_err(ControlPlaneError::from)?;

    use djinnbot_webhooks::IngestOutcome;
    match outcome {
        IngestOutcome::RateLimited => Err(ControlPlaneError::RateLimited),
        IngestOutcome::Unverified => Err(ControlPlaneError::SignatureInvalid),
        IngestOutcome::Accepted(event) => {
            // Routing happens off the request path: ingest already published
            // a notice on `webhooks:github` for the background webhook
            // consumer task to pick up, so the endpoint can acknowledge as
            // soon as the delivery is durably recorded rather than waiting
            // on task-completion side effects.
            Ok(Json(json!({ "status": "accepted", "delivery_id": event.delivery_id })))
        }
    }
}

#[derive(Debug, Deserialize)]
struct ResolveIssueRequest {
    issue_url: String,
    model: Option<String>,
}

async fn resolve_issue(
    State(state): State<AppState>,
    Json(body): Json<ResolveIssueRequest>,
) -> ControlPlaneResult<Json<RunCreatedResponse>> {
    let (repository_full_name, issue_number) = parse_github_issue_url(&body.issue_url)
        .ok_or_else(|| ControlPlaneError::InvalidInput("issue_url is not a GitHub issue URL".into()))?;

    let project = state
        .store
        .find_project_by_repository(repository_full_name.clone())
        .await?
        .ok_or_else(|| {
            ControlPlaneError::InvalidInput(format!(
                "no project is registered for repository '{repository_full_name}'"
            ))
        })?;

    let human_context = json!({ "issue_url": body.issue_url, "issue_number": issue_number });
    let run = state
        .dispatcher
        .create_run(
            "resolve-issue",
            Some(project.id),
            &format!("Resolve issue #{issue_number} in {repository_full_name}"),
            human_context,
            body.model,
            None,
        )
        .await?;
    Ok(Json(RunCreatedResponse {
        id: run.id.to_string(),
        status: run.status,
    }))
}

/// Parses `https://github.com/{owner}/{repo}/issues/{number}` into
/// `("owner/repo", number)`. Doesn't use a generic URL parser crate since
/// the shape is this one fixed pattern.
fn parse_github_issue_url(url: &str) -> Option<(String, i64)> {
    let trimmed = url
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .trim_start_matches("github.com/");
    let mut parts = trimmed.splitn(4, '/');
    let owner = parts.next()?;
    let repo = parts.next()?;
    let marker = parts.next()?;
    if marker != "issues" {
        return None;
    }
    let number: i64 = parts.next()?.parse().ok()?;
    Some((format!("{owner}/{repo}"), number))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use djinnbot_dispatcher::PipelineRegistry;
    use djinnbot_types::{Project, ProjectId};
    use tower::ServiceExt;

    #[test]
    fn parses_a_well_formed_issue_url() {
        let (repo, number) = parse_github_issue_url("https://github.com/acme/widgets/issues/42").unwrap();
        assert_eq!(repo, "acme/widgets");
        assert_eq!(number, 42);
    }

    #[test]
    fn rejects_a_pull_request_url() {
        assert!(parse_github_issue_url("https://github.com/acme/widgets/pull/42").is_none());
    }

    struct AlwaysExists;
    impl PipelineRegistry for AlwaysExists {
        fn exists(&self, _pipeline_id: &str) -> bool {
            true
        }
    }

    async fn test_state() -> Option<AppState> {
        let url = std::env::var("DJINNBOT_TEST_REDIS_URL").ok()?;
        let bus = djinnbot_bus::Bus::connect(&url).await.ok()?;
        let store = djinnbot_store::Store::open_in_memory().ok()?;
        Some(AppState::new(
            store,
            bus,
            Arc::new(AlwaysExists),
            djinnbot_types::WakeGuardrailConfig::default(),
            Duration::from_secs(300),
            "reviewer",
            b"test-secret".to_vec(),
        ))
    }

    #[tokio::test]
    async fn create_run_round_trips_through_the_http_layer() {
        let Some(state) = test_state().await else {
            return;
        };
        let app = app_router(state, CorsPolicy::Any);
        let body = json!({ "pipeline_id": "code-review", "task": "Review PR #7" });
        let request = Request::builder()
            .method("POST")
            .uri("/v1/runs/")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let payload: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(payload["status"], json!("pending"));
    }

    #[tokio::test]
    async fn create_run_rejects_an_unknown_pipeline_with_bad_request() {
        struct NeverExists;
        impl PipelineRegistry for NeverExists {
            fn exists(&self, _pipeline_id: &str) -> bool {
                false
            }
        }
        let Ok(url) = std::env::var("DJINNBOT_TEST_REDIS_URL") else {
            return;
        };
        let Ok(bus) = djinnbot_bus::Bus::connect(&url).await else {
            return;
        };
        let store = djinnbot_store::Store::open_in_memory().unwrap();
        let state = AppState::new(
            store,
            bus,
            Arc::new(NeverExists),
            djinnbot_types::WakeGuardrailConfig::default(),
            Duration::from_secs(300),
            "reviewer",
            b"test-secret".to_vec(),
        );
        let app = app_router(state, CorsPolicy::Any);
        let body = json!({ "pipeline_id": "ghost", "task": "do something" });
        let request = Request::builder()
            .method("POST")
            .uri("/v1/runs/")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn resolve_issue_requires_a_registered_project() {
        let Some(state) = test_state().await else {
            return;
        };
        let app = app_router(state, CorsPolicy::Any);
        let body = json!({ "issue_url": "https://github.com/acme/unregistered/issues/3" });
        let request = Request::builder()
            .method("POST")
            .uri("/v1/resolve/")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn resolve_issue_dispatches_a_run_for_a_registered_project() {
        let Some(state) = test_state().await else {
            return;
        };
        state
            .store
            .insert_project(Project {
                id: ProjectId::from("proj_1"),
                name: "Widgets".to_string(),
                repository_full_name: Some("acme/widgets".to_string()),
                status_semantics: Default::default(),
                agent_assignments: Vec::new(),
                created_at: djinnbot_types::now_ms(),
            })
            .await
            .unwrap();
        let app = app_router(state, CorsPolicy::Any);
        let body = json!({ "issue_url": "https://github.com/acme/widgets/issues/11" });
        let request = Request::builder()
            .method("POST")
            .uri("/v1/resolve/")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn webhook_github_rejects_a_request_missing_signature_headers() {
        let Some(state) = test_state().await else {
            return;
        };
        let app = app_router(state, CorsPolicy::Any);
        let request = Request::builder()
            .method("POST")
            .uri("/v1/webhooks/github")
            .header("x-github-event", "issues")
            .header("x-github-delivery", "abc-123")
            .body(Body::from("{}"))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn agent_lifecycle_reports_a_freshly_registered_agent_as_idle() {
        let Some(state) = test_state().await else {
            return;
        };
        let app = app_router(state, CorsPolicy::Any);
        let request = Request::builder()
            .method("GET")
            .uri("/v1/agents/aurora/lifecycle")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let payload: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(payload["state"], json!("idle"));
        assert_eq!(payload["queueDepth"], json!(0));
    }
}
