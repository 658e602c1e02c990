use std::sync::Arc;

use djinnbot_bus::Bus;
use djinnbot_dispatcher::{PipelineRegistry, Reconciler, RunDispatcher};
use djinnbot_inbox::InboxRouter;
use djinnbot_lifecycle::{DeadlineEnforcer, GuardrailGate, LifecycleController, PulseDriver, WorkLockHandle};
use djinnbot_sessions::SessionRouter;
use djinnbot_store::Store;
use djinnbot_types::WakeGuardrailConfig;
use djinnbot_webhooks::{WebhookIngest, WebhookRouter};

/// Composition root: every component handle the HTTP layer needs, wired
/// once at startup and cheaply cloned into each request (every field is
/// itself an `Arc`/connection-pool handle, matching the teacher's
/// `AppState` pattern of a thin `Clone` wrapper over shared state).
#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub bus: Bus,
    pub dispatcher: Arc<RunDispatcher>,
    pub reconciler: Arc<Reconciler>,
    pub guardrails: Arc<GuardrailGate>,
    pub lifecycle: Arc<LifecycleController>,
    pub work_locks: Arc<WorkLockHandle>,
    pub pulse: Arc<PulseDriver>,
    pub deadlines: Arc<DeadlineEnforcer>,
    pub sessions: Arc<SessionRouter>,
    pub webhook_ingest: Arc<WebhookIngest>,
    pub webhook_router: Arc<WebhookRouter>,
    pub inbox: Arc<InboxRouter>,
    pub github_webhook_secret: Arc<Vec<u8>>,
}

impl AppState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Store,
        bus: Bus,
        pipelines: Arc<dyn PipelineRegistry>,
        wake_guardrails: WakeGuardrailConfig,
        pulse_tick: std::time::Duration,
        review_agent_id: impl Into<String>,
        github_webhook_secret: Vec<u8>,
    ) -> Self {
        let dispatcher = Arc::new(RunDispatcher::new(store.clone(), bus.clone(), pipelines));
        let reconciler = Arc::new(Reconciler::new(store.clone(), bus.clone()));
        let guardrails = Arc::new(GuardrailGate::new(bus.clone(), wake_guardrails));
        let lifecycle = Arc::new(LifecycleController::new(bus.clone()));
        let work_locks = Arc::new(WorkLockHandle::new(bus.clone()));
        let pulse = Arc::new(PulseDriver::new(bus.clone(), wake_guardrails, pulse_tick));
        let deadlines = Arc::new(DeadlineEnforcer::new(store.clone(), bus.clone(), wake_guardrails));
        let sessions = Arc::new(SessionRouter::new(bus.clone()));
        let webhook_ingest = Arc::new(WebhookIngest::new(store.clone(), bus.clone()));
        let webhook_router = Arc::new(WebhookRouter::new(
            store.clone(),
            bus.clone(),
            wake_guardrails,
            review_agent_id,
        ));
        let inbox = Arc::new(InboxRouter::new(bus.clone()));

        Self {
            store,
            bus,
            dispatcher,
            reconciler,
            guardrails,
            lifecycle,
            work_locks,
            pulse,
            deadlines,
            sessions,
            webhook_ingest,
            webhook_router,
            inbox,
            github_webhook_secret: Arc::new(github_webhook_secret),
        }
    }
}
