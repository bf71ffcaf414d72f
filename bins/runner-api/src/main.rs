mod handlers;
mod metrics;
mod routes;

use anyhow::Context;
use axum::Router;
use runner_common::config::RunnerConfig;
use runner_engine::docker::DockerRuntime;
use runner_engine::{Engine, EngineSettings, LanguageRegistry};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

#[derive(Clone)]
pub struct AppState {
    pub engine: Engine,
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let json = std::env::var("RUNNER_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received, draining in-flight requests");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    info!("Runner API booting...");

    let config = RunnerConfig::from_env().context("Invalid runner configuration")?;
    let registry = LanguageRegistry::from_config(config.languages_file.as_deref())
        .context("Failed to load language table")?;

    info!(
        languages = ?registry.list_languages(),
        deadline_ms = config.deadline.as_millis() as u64,
        memory_mb = config.limits.memory_mb,
        cpu_limit = config.limits.cpu_limit,
        pids_limit = config.limits.pids_limit,
        scratch_dir = %config.scratch_dir.display(),
        "Configuration loaded"
    );

    let docker = DockerRuntime::connect().context("Failed to create Docker client")?;
    match docker.preflight().await {
        Ok(support) => info!(
            server_version = %support.server_version,
            pids_limit = support.pids_limit,
            "Docker daemon ready"
        ),
        // Requests will come back as infrastructure failures until the daemon is fixed
        Err(e) => warn!(error = %format!("{:#}", e), "Docker preflight failed"),
    }

    let engine = Engine::new(
        Arc::new(registry),
        Arc::new(docker),
        EngineSettings::from(&config),
    );

    let warm = engine.clone();
    tokio::spawn(async move {
        let failures = warm.warm_up().await;
        if failures.is_empty() {
            info!("All language images ready");
        }
    });

    let state = Arc::new(AppState { engine });

    let app = Router::new().merge(routes::routes()).with_state(state);

    let listener = TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind_addr))?;

    info!("HTTP server listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Runner API stopped");
    Ok(())
}
