mod config;
mod layout;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use djinnbot_bus::Bus;
use djinnbot_dispatcher::FsPipelineRegistry;
use djinnbot_observability::{canonical_logs_dir_from_root, init_process_logging, ProcessKind};
use djinnbot_server::{replay_unprocessed_webhooks, serve, spawn_background, AppState};
use djinnbot_store::Store;
use djinnbot_types::WakeGuardrailConfig;
use tracing::info;

use crate::config::Config;
use crate::layout::Layout;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();
    let layout = Layout::new(config.agents_dir(), config.vaults_dir(), config.data_path.clone());

    std::fs::create_dir_all(&config.data_path)
        .with_context(|| format!("creating data path {}", config.data_path.display()))?;
    std::fs::create_dir_all(layout.pipelines_root()).context("creating pipelines directory")?;

    let logs_dir = canonical_logs_dir_from_root(&config.data_path);
    let (_log_guard, _log_info) =
        init_process_logging(ProcessKind::Server, &logs_dir, config.log_retention_days)?;

    let store = Store::open(layout.store_path()).await?;
    let bus = Bus::connect(&config.redis_url).await?;
    let pipelines = Arc::new(FsPipelineRegistry::new(layout.pipelines_root()));

    let state = AppState::new(
        store,
        bus,
        pipelines,
        WakeGuardrailConfig::default(),
        Duration::from_secs(config.pulse_tick_seconds),
        config.review_agent_id.clone(),
        config.github_app_webhook_secret.clone().into_bytes(),
    );

    replay_unprocessed_webhooks(&state)
        .await
        .context("replaying unprocessed webhook deliveries")?;

    let roster_layout = layout.clone();
    let background = spawn_background(state.clone(), move || roster_layout.agent_roster());

    let addr: SocketAddr = config
        .http_bind_addr
        .parse()
        .with_context(|| format!("invalid HTTP_BIND_ADDR '{}'", config.http_bind_addr))?;

    info!("starting djinnbot control plane on http://{addr}");
    serve(addr, state, config.cors_policy(), background).await?;
    Ok(())
}
