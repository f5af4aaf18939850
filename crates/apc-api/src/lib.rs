//! Audit Pit-Crew API Service
//!
//! Receives GitHub webhooks, queues scan jobs, and runs the worker loop
//! that clones repositories, drives the analyzers, and reports results back
//! to the pull request.

pub mod baseline;
pub mod github;
pub mod queue;
pub mod routes;
pub mod worker;

use baseline::BaselineStore;
use github::GitHubAuth;
use queue::JobQueue;

/// Process-wide configuration, read from the environment at startup.
#[derive(Clone)]
pub struct AppConfig {
    pub app_name: String,
    pub bind_addr: String,
    pub github_app_id: String,
    pub github_private_key: String,
    pub webhook_secret: String,
    pub github_api_url: String,
    pub redis_url: String,
    pub worker_count: usize,
}

impl AppConfig {
    /// Read configuration from the environment. Credentials are required;
    /// transports and tuning have defaults.
    pub fn from_env() -> Result<Self, String> {
        let github_app_id = require_env("GITHUB_APP_ID")?;
        let webhook_secret = require_env("GITHUB_WEBHOOK_SECRET")?;
        let private_key_path = require_env("GITHUB_PRIVATE_KEY_PATH")?;
        let github_private_key = std::fs::read_to_string(&private_key_path)
            .map_err(|err| format!("cannot read private key at {private_key_path}: {err}"))?;

        Ok(Self {
            app_name: "Audit Pit-Crew".to_string(),
            bind_addr: env_or("BIND_ADDR", "0.0.0.0:8000"),
            github_app_id,
            github_private_key,
            webhook_secret,
            github_api_url: env_or("GITHUB_API_URL", "https://api.github.com"),
            redis_url: env_or("REDIS_URL", "redis://localhost:6379/0"),
            worker_count: env_or("WORKER_COUNT", "2").parse().unwrap_or(2),
        })
    }
}

fn require_env(name: &str) -> Result<String, String> {
    std::env::var(name).map_err(|_| format!("{name} must be set"))
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

/// Shared state: the webhook handler enqueues into `queue`, workers consume
/// it and use `auth` and `baseline` to do their work; `jobs` tracks the
/// in-flight jobs so an operator can cancel one.
pub struct AppState {
    pub config: AppConfig,
    pub auth: GitHubAuth,
    pub queue: JobQueue,
    pub baseline: BaselineStore,
    pub jobs: worker::JobRegistry,
}
