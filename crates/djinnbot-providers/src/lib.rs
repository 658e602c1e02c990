//! Model provider resolution as an interface only. Actually dispatching a
//! run's prompt to a concrete LLM backend, streaming its output, and
//! billing for token usage all live outside the control plane — a run
//! only needs to know which `(provider_id, model_id)` a step resolved to
//! and whether that pair is currently registered.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use djinnbot_types::{ModelInfo, ModelSpec, ProviderInfo};

#[async_trait]
pub trait ModelResolver: Send + Sync {
    /// Resolves a possibly-partial spec (model id only, provider implied)
    /// to the full model metadata, or an error if nothing matches.
    async fn resolve(&self, spec: &ModelSpec) -> anyhow::Result<ModelInfo>;

    async fn list_providers(&self) -> Vec<ProviderInfo>;
}

/// A resolver backed by a static, reloadable registry of provider/model
/// metadata — the shape an operator would populate from config rather
/// than discover by calling out to a provider's API at startup.
#[derive(Clone)]
pub struct StaticModelResolver {
    providers: Arc<RwLock<Vec<ProviderInfo>>>,
}

impl StaticModelResolver {
    pub fn new(providers: Vec<ProviderInfo>) -> Self {
        Self {
            providers: Arc::new(RwLock::new(providers)),
        }
    }

    pub async fn reload(&self, providers: Vec<ProviderInfo>) {
        *self.providers.write().await = providers;
    }
}

#[async_trait]
impl ModelResolver for StaticModelResolver {
    async fn resolve(&self, spec: &ModelSpec) -> anyhow::Result<ModelInfo> {
        let providers = self.providers.read().await;
        let provider = providers
            .iter()
            .find(|p| p.id == spec.provider_id)
            .ok_or_else(|| anyhow::anyhow!("unknown provider '{}'", spec.provider_id))?;
        provider
            .models
            .iter()
            .find(|m| m.id == spec.model_id)
            .cloned()
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "unknown model '{}' for provider '{}'",
                    spec.model_id,
                    spec.provider_id
                )
            })
    }

    async fn list_providers(&self) -> Vec<ProviderInfo> {
        self.providers.read().await.clone()
    }
}

/// Picks a fallback `(provider_id, model_id)` pair when a run carries no
/// `model_override`, using the first provider with at least one model.
pub fn default_model_spec(providers: &[ProviderInfo]) -> Option<ModelSpec> {
    providers
        .iter()
        .find_map(|p| p.models.first().map(|m| (p.id.clone(), m.id.clone())))
        .map(|(provider_id, model_id)| ModelSpec {
            provider_id,
            model_id,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_providers() -> Vec<ProviderInfo> {
        vec![ProviderInfo {
            id: "anthropic".into(),
            name: "Anthropic".into(),
            models: vec![ModelInfo {
                id: "claude".into(),
                provider_id: "anthropic".into(),
                display_name: "Claude".into(),
                context_window: 200_000,
            }],
        }]
    }

    #[tokio::test]
    async fn resolve_finds_a_registered_model() {
        let resolver = StaticModelResolver::new(sample_providers());
        let info = resolver
            .resolve(&ModelSpec {
                provider_id: "anthropic".into(),
                model_id: "claude".into(),
            })
            .await
            .unwrap();
        assert_eq!(info.display_name, "Claude");
    }

    #[tokio::test]
    async fn resolve_rejects_an_unknown_provider() {
        let resolver = StaticModelResolver::new(sample_providers());
        let result = resolver
            .resolve(&ModelSpec {
                provider_id: "openai".into(),
                model_id: "gpt".into(),
            })
            .await;
        assert!(result.is_err());
    }

    #[test]
    fn default_model_spec_picks_the_first_available_model() {
        let spec = default_model_spec(&sample_providers()).unwrap();
        assert_eq!(spec.provider_id, "anthropic");
        assert_eq!(spec.model_id, "claude");
    }
}
