use std::path::PathBuf;

use clap::Parser;

/// Every ambient setting the control plane reads at startup (§6's
/// "recognized options" table). Runtime changes to any of these require
/// a restart; nothing here is re-read once `serve` is running.
#[derive(Parser, Debug)]
#[command(name = "djinnbot")]
#[command(about = "DjinnBot control plane: run dispatch, agent lifecycle, webhooks")]
pub struct Config {
    #[arg(long, env = "REDIS_URL", default_value = "redis://127.0.0.1:6379")]
    pub redis_url: String,

    #[arg(long, env = "HTTP_BIND_ADDR", default_value = "0.0.0.0:8080")]
    pub http_bind_addr: String,

    #[arg(long, env = "DJINN_DATA_PATH", default_value = ".djinnbot")]
    pub data_path: PathBuf,

    #[arg(long, env = "AGENTS_DIR")]
    pub agents_dir: Option<PathBuf>,

    #[arg(long, env = "VAULTS_DIR")]
    pub vaults_dir: Option<PathBuf>,

    #[arg(long, env = "CORS_ORIGINS", default_value = "*")]
    pub cors_origins: String,

    #[arg(long, env = "AUTH_ENABLED", default_value_t = false)]
    pub auth_enabled: bool,

    #[arg(long, env = "GITHUB_APP_ID")]
    pub github_app_id: Option<String>,

    #[arg(long, env = "GITHUB_APP_CLIENT_ID")]
    pub github_app_client_id: Option<String>,

    #[arg(long, env = "GITHUB_APP_WEBHOOK_SECRET", default_value = "")]
    pub github_app_webhook_secret: String,

    #[arg(long, env = "GITHUB_APP_PRIVATE_KEY_PATH")]
    pub github_app_private_key_path: Option<PathBuf>,

    #[arg(long, env = "REVIEW_AGENT_ID", default_value = "reviewer")]
    pub review_agent_id: String,

    #[arg(long, env = "PULSE_TICK_SECONDS", default_value_t = 300)]
    pub pulse_tick_seconds: u64,

    #[arg(long, env = "LOG_RETENTION_DAYS", default_value_t = 14)]
    pub log_retention_days: u64,
}

impl Config {
    pub fn agents_dir(&self) -> PathBuf {
        self.agents_dir
            .clone()
            .unwrap_or_else(|| self.data_path.join("agents"))
    }

    pub fn vaults_dir(&self) -> PathBuf {
        self.vaults_dir
            .clone()
            .unwrap_or_else(|| self.data_path.join("vaults"))
    }

    pub fn cors_policy(&self) -> djinnbot_server::CorsPolicy {
        if self.cors_origins.trim() == "*" {
            djinnbot_server::CorsPolicy::Any
        } else {
            djinnbot_server::CorsPolicy::Origins(
                self.cors_origins
                    .split(',')
                    .map(|origin| origin.trim().to_string())
                    .filter(|origin| !origin.is_empty())
                    .collect(),
            )
        }
    }
}
