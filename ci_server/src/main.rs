//! Centrix auto-fix server.
//!
//! Receives GitHub webhooks, runs builds on the registered CI platform and
//! opens fix pull requests for recognised failures. Records live in memory;
//! repositories are registered from a JSON seed file at startup.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use centrix_autofix::config::CiConfig;
use centrix_autofix::pipeline::Pipeline;
use centrix_autofix::platforms::AdapterRegistry;
use centrix_autofix::routes::{self, CiRouterState};
use centrix_autofix::services::github_service::GitHubClient;
use centrix_autofix::store::MemoryStore;
use centrix_autofix::{metrics, seeder};

#[derive(Parser)]
#[command(name = "centrix-autofix", about = "CI orchestration with automatic failure remediation")]
struct Cli {
    /// Server port
    #[arg(short, long, env = "CI_PORT", default_value = "9090")]
    port: u16,

    /// JSON file of repositories and integrations to register
    #[arg(long, env = "CI_REPOSITORIES_FILE")]
    repositories: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_default();
    if log_format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "info".into()),
            )
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "info".into()),
            )
            .init();
    }

    let cli = Cli::parse();

    tracing::info!("Starting Centrix auto-fix server...");

    let config = CiConfig::from_env();

    let store = Arc::new(MemoryStore::new());
    match &cli.repositories {
        Some(path) => {
            let summary = seeder::seed_from_file(&store, path).await?;
            tracing::info!(
                repositories = summary.repositories,
                integrations = summary.integrations,
                "Registration seed loaded"
            );
        }
        None => tracing::warn!("No repositories file given -- every webhook will be unregistered"),
    }

    let adapters = AdapterRegistry::from_config(&config);
    let source_control = Arc::new(GitHubClient::new(
        config.github_api_url.clone(),
        config.github_token.clone(),
    ));

    let (pipeline, pool) = Pipeline::start(&config, store, adapters, source_control);

    metrics::init_metrics();

    let app = routes::ci_router(CiRouterState { pipeline, config });

    let addr = SocketAddr::from(([0, 0, 0, 0], cli.port));
    tracing::info!("Centrix auto-fix server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Stopping workers...");
    pool.shutdown();
    tracing::info!("Shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received SIGINT, shutting down..."),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down..."),
    }
}
