use std::sync::Arc;

use djinnbot_bus::{keys, Bus};
use djinnbot_store::Store;
use djinnbot_types::{ControlSignal, Run, RunId, RunStatus};
use serde_json::Value;
use tracing::info;

use crate::error::DispatchError;
use crate::pipelines::PipelineRegistry;

pub struct RunDispatcher {
    store: Store,
    bus: Bus,
    pipelines: Arc<dyn PipelineRegistry>,
}

impl RunDispatcher {
    pub fn new(store: Store, bus: Bus, pipelines: Arc<dyn PipelineRegistry>) -> Self {
        Self {
            store,
            bus,
            pipelines,
        }
    }

    /// create-run(): validates the pipeline reference, inserts a pending
    /// run, and publishes both the global event and the dispatch handoff
    /// the engine consumes.
    #[allow(clippy::too_many_arguments)]
    pub async fn create_run(
        &self,
        pipeline_id: &str,
        project_id: Option<djinnbot_types::ProjectId>,
        task_description: &str,
        human_context: Value,
        model_override: Option<String>,
        workspace_type: Option<String>,
    ) -> Result<Run, DispatchError> {
        if pipeline_id.trim().is_empty() || task_description.trim().is_empty() {
            return Err(DispatchError::InvalidInput(
                "pipeline_id and task_description are required".into(),
            ));
        }
        if !self.pipelines.exists(pipeline_id) {
            return Err(DispatchError::PipelineNotFound(pipeline_id.to_string()));
        }

        let run = Run::new(
            pipeline_id,
            project_id,
            task_description,
            human_context,
            model_override,
            workspace_type,
        );
        let run = self.store.insert_run(run).await?;

        self.publish_run_event(djinnbot_types::RunEvent::Created {
            run_id: run.id.clone(),
            pipeline_id: run.pipeline_id.clone(),
            task_id: run.linked_task_id().map(|t| t.0.into()),
            at: run.created_at,
        })
        .await?;

        let dispatch = serde_json::json!({
            "run_id": run.id,
            "pipeline_id": run.pipeline_id,
            "task_description": run.task_description,
            "human_context": run.human_context,
            "model_override": run.model_override,
            "workspace_type": run.workspace_type,
        });
        self.bus
            .xadd(keys::EVENTS_NEW_RUNS, &[("data", dispatch.to_string().as_str())], None)
            .await?;

        info!(run_id = %run.id, pipeline_id, "run created");
        Ok(run)
    }

    /// §5 cancellation level (2): flips the run's status, then — if a
    /// step is in flight and has a session attached — emits a control
    /// signal the engine translates into a STEP_FAILED with
    /// reason=cancelled. A run with no live session (nothing dispatched
    /// yet, or the step never attached a session) cancels cleanly with
    /// just the status transition.
    pub async fn cancel_run(&self, run_id: RunId) -> Result<(), DispatchError> {
        let run = self.get_run(run_id.clone()).await?;
        self.transition(run_id.clone(), RunStatus::Cancelled).await?;

        let Some(step_id) = run.current_step_id.clone() else {
            return Ok(());
        };
        let step = self.store.get_step(step_id).await?;
        let Some(session_id) = step.session_id else {
            return Ok(());
        };
        let signal = ControlSignal::Cancel {
            run_id,
            reason: "run cancelled".into(),
            at: djinnbot_types::now_ms(),
        };
        let payload = serde_json::to_string(&signal).map_err(djinnbot_store::StoreError::Json)?;
        self.bus
            .publish(&keys::session_control(session_id.as_str()), &payload)
            .await?;
        Ok(())
    }

    pub async fn pause_run(&self, run_id: RunId) -> Result<(), DispatchError> {
        self.transition(run_id, RunStatus::Paused).await
    }

    pub async fn resume_run(&self, run_id: RunId) -> Result<(), DispatchError> {
        self.transition(run_id, RunStatus::Running).await
    }

    async fn transition(&self, run_id: RunId, to: RunStatus) -> Result<(), DispatchError> {
        let run = self.get_run(run_id.clone()).await?;
        if !run.status.can_transition_to(to) {
            return Err(DispatchError::IllegalTransition(format!(
                "{:?} -> {:?} is not a legal run transition",
                run.status, to
            )));
        }
        let now_ms = djinnbot_types::now_ms();
        let completed_at = if to.is_terminal() { Some(now_ms) } else { None };
        self.store
            .update_run_status(run_id.clone(), to, completed_at, now_ms)
            .await?;
        self.publish_run_event(djinnbot_types::RunEvent::StatusChanged {
            run_id,
            from: run.status,
            to,
            at: now_ms,
        })
        .await?;
        Ok(())
    }

    /// restart(): copies the original run's inputs into a freshly minted
    /// run-id rather than resurrecting a terminal run in place, so the
    /// original's history stays intact.
    pub async fn restart_run(&self, run_id: RunId) -> Result<Run, DispatchError> {
        let original = self.get_run(run_id).await?;
        self.create_run(
            &original.pipeline_id,
            original.project_id,
            &original.task_description,
            original.human_context,
            original.model_override,
            Some(original.workspace_type),
        )
        .await
    }

    /// delete-run(): cascades to the run's steps.
    pub async fn delete_run(&self, run_id: RunId) -> Result<(), DispatchError> {
        self.store.delete_run(run_id).await.map_err(|err| match err {
            djinnbot_store::StoreError::NotFound => DispatchError::RunNotFound,
            other => DispatchError::Store(other),
        })
    }

    async fn get_run(&self, run_id: RunId) -> Result<Run, DispatchError> {
        self.store.get_run(run_id).await.map_err(|err| match err {
            djinnbot_store::StoreError::NotFound => DispatchError::RunNotFound,
            other => DispatchError::Store(other),
        })
    }

    async fn publish_run_event(&self, event: djinnbot_types::RunEvent) -> Result<(), DispatchError> {
        let payload = serde_json::to_string(&event).map_err(djinnbot_store::StoreError::Json)?;
        self.bus
            .xadd(keys::EVENTS_GLOBAL, &[("data", payload.as_str())], None)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AlwaysExists;
    impl PipelineRegistry for AlwaysExists {
        fn exists(&self, _pipeline_id: &str) -> bool {
            true
        }
    }
    struct NeverExists;
    impl PipelineRegistry for NeverExists {
        fn exists(&self, _pipeline_id: &str) -> bool {
            false
        }
    }

    async fn test_bus() -> Option<Bus> {
        match std::env::var("DJINNBOT_TEST_REDIS_URL") {
            Ok(url) => Bus::connect(&url).await.ok(),
            Err(_) => None,
        }
    }

    #[tokio::test]
    async fn create_run_rejects_an_unknown_pipeline() {
        let Some(bus) = test_bus().await else {
            return;
        };
        let store = Store::open_in_memory().unwrap();
        let dispatcher = RunDispatcher::new(store, bus, Arc::new(NeverExists));
        let result = dispatcher
            .create_run("ghost-pipeline", None, "do something", Value::Null, None, None)
            .await;
        assert!(matches!(result, Err(DispatchError::PipelineNotFound(_))));
    }

    #[tokio::test]
    async fn create_run_rejects_empty_task_description() {
        let Some(bus) = test_bus().await else {
            return;
        };
        let store = Store::open_in_memory().unwrap();
        let dispatcher = RunDispatcher::new(store, bus, Arc::new(AlwaysExists));
        let result = dispatcher
            .create_run("code-review", None, "   ", Value::Null, None, None)
            .await;
        assert!(matches!(result, Err(DispatchError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn happy_path_creates_a_pending_run_and_restart_copies_its_inputs() {
        let Some(bus) = test_bus().await else {
            return;
        };
        let store = Store::open_in_memory().unwrap();
        let dispatcher = RunDispatcher::new(store, bus, Arc::new(AlwaysExists));
        let run = dispatcher
            .create_run(
                "code-review",
                None,
                "Review PR #42",
                serde_json::json!({}),
                None,
                None,
            )
            .await
            .unwrap();
        assert_eq!(run.status, RunStatus::Pending);

        let restarted = dispatcher.restart_run(run.id).await.unwrap();
        assert_eq!(restarted.pipeline_id, "code-review");
        assert_eq!(restarted.task_description, "Review PR #42");
    }

    #[tokio::test]
    async fn cancel_rejects_an_already_terminal_run() {
        let Some(bus) = test_bus().await else {
            return;
        };
        let store = Store::open_in_memory().unwrap();
        let dispatcher = RunDispatcher::new(store, bus, Arc::new(AlwaysExists));
        let run = dispatcher
            .create_run("code-review", None, "task", Value::Null, None, None)
            .await
            .unwrap();
        dispatcher.cancel_run(run.id.clone()).await.unwrap();
        let result = dispatcher.resume_run(run.id).await;
        assert!(matches!(result, Err(DispatchError::IllegalTransition(_))));
    }

    #[tokio::test]
    async fn cancel_run_publishes_a_control_signal_for_a_session_holding_step() {
        let Some(bus) = test_bus().await else {
            return;
        };
        let store = Store::open_in_memory().unwrap();
        let dispatcher = RunDispatcher::new(store.clone(), bus.clone(), Arc::new(AlwaysExists));
        let run = dispatcher
            .create_run("code-review", None, "task", Value::Null, None, None)
            .await
            .unwrap();

        let mut step = djinnbot_types::Step::new(
            run.id.clone(),
            "analyze",
            djinnbot_types::AgentId::from("reviewer"),
        );
        step.session_id = Some(djinnbot_types::SessionId::from("sess_1"));
        let step_id = step.id.clone();
        store.upsert_step(step).await.unwrap();
        store
            .set_run_current_step(run.id.clone(), Some(step_id.as_str().to_string()), djinnbot_types::now_ms())
            .await
            .unwrap();

        let mut subscription = bus.subscribe(&keys::session_control("sess_1")).await.unwrap();
        dispatcher.cancel_run(run.id).await.unwrap();

        let payload = subscription.next().await.expect("expected a control signal");
        let signal: ControlSignal = serde_json::from_str(&payload).unwrap();
        assert!(matches!(signal, ControlSignal::Cancel { .. }));
    }
}
