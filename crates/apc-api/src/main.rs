//! Audit Pit-Crew server: webhook intake plus the scan worker pool.

use apc_api::baseline::BaselineStore;
use apc_api::github::GitHubAuth;
use apc_api::queue::JobQueue;
use apc_api::{routes, worker, AppConfig, AppState};
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,apc_api=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("starting Audit Pit-Crew");

    let config = AppConfig::from_env().expect("invalid configuration");

    let auth = GitHubAuth::new(
        &config.github_app_id,
        &config.github_private_key,
        &config.github_api_url,
    )
    .expect("invalid GitHub App credentials");

    let queue = JobQueue::connect(&config.redis_url)
        .await
        .expect("failed to connect to job queue");
    let baseline = BaselineStore::connect(&config.redis_url)
        .await
        .expect("failed to connect to baseline store");

    let state = Arc::new(AppState {
        config: config.clone(),
        auth,
        queue,
        baseline,
        jobs: worker::JobRegistry::default(),
    });

    // The shutdown token fans out to every worker and, through per-job child
    // tokens, to every in-flight job.
    let shutdown = CancellationToken::new();
    let mut workers = Vec::with_capacity(config.worker_count);
    for worker_id in 0..config.worker_count {
        let state = state.clone();
        let shutdown = shutdown.clone();
        workers.push(tokio::spawn(async move {
            worker::run_worker(worker_id, state, shutdown).await;
        }));
    }
    info!("spawned {} scan worker(s)", config.worker_count);

    let app = Router::new()
        .route("/health", get(routes::health_check))
        .route("/webhook/github", post(routes::webhook::github_webhook))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    info!("listening on {}", config.bind_addr);
    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("failed to bind");

    let signal_token = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received, cancelling active jobs");
            signal_token.cancel();
        })
        .await
        .expect("server error");

    for handle in workers {
        let _ = handle.await;
    }
    info!("all workers stopped");
}
