use axum::{
    routing::{get, post},
    Router,
};
use splitlab::{ExperimentService, ExperimentsConfig};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::handlers::{
    archive_experiment, assign_arm, complete_experiment, create_experiment, get_active_for_embed,
    get_experiment, get_experiment_insights, get_experiment_results, health, list_experiments,
    metrics_handler, pause_experiment, record_event, start_experiment, AppState,
};

pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:7800";

/// All routes with CORS and request tracing applied.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_handler))
        .route(
            "/1/experiments",
            post(create_experiment).get(list_experiments),
        )
        .route("/1/experiments/:id", get(get_experiment))
        .route("/1/experiments/:id/start", post(start_experiment))
        .route("/1/experiments/:id/pause", post(pause_experiment))
        .route("/1/experiments/:id/complete", post(complete_experiment))
        .route("/1/experiments/:id/archive", post(archive_experiment))
        .route("/1/experiments/:id/assign", post(assign_arm))
        .route("/1/experiments/:id/events", post(record_event))
        .route("/1/experiments/:id/results", get(get_experiment_results))
        .route("/1/experiments/:id/insights", get(get_experiment_insights))
        .route("/1/embeds/:embed_id/active", get(get_active_for_embed))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::very_permissive().max_age(std::time::Duration::from_secs(86400)))
}

pub async fn serve() -> Result<(), Box<dyn std::error::Error>> {
    let startup_start = std::time::Instant::now();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ExperimentsConfig::from_env();
    tracing::info!(
        data_dir = ?config.data_dir,
        min_detectable_effect = config.min_detectable_effect,
        stat_power = config.stat_power,
        "experiment configuration loaded"
    );
    let storage = match config.data_dir {
        Some(ref dir) => dir.display().to_string(),
        None => "in-memory".to_string(),
    };

    let service = Arc::new(ExperimentService::from_config(config)?);
    let state = Arc::new(AppState::new(service));
    let app = build_router(state);

    let bind_addr = std::env::var("SPLITLAB_BIND_ADDR")
        .ok()
        .filter(|addr| !addr.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    let local_addr = listener.local_addr()?.to_string();

    print_startup_banner(&local_addr, startup_start.elapsed().as_millis(), &storage);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("server stopped");
    Ok(())
}

fn print_startup_banner(bind_addr: &str, startup_ms: u128, storage: &str) {
    use colored::Colorize;

    let url = format!("http://{}", bind_addr);
    let version = format!("v{}", env!("CARGO_PKG_VERSION"));
    let timing = format!("ready in {}ms", startup_ms);

    println!();
    println!(
        "  {} {}  {}",
        "Splitlab".bold().bright_green(),
        version.as_str().dimmed(),
        timing.as_str().dimmed(),
    );
    println!();
    println!("  {}  Local:      {}", "➜".green(), url.as_str().cyan());
    let experiments = format!("{}/1/experiments", url);
    println!("  {}  API:        {}", "➜".green(), experiments.as_str().cyan());
    println!("  {}  Storage:    {}", "➜".green(), storage.dimmed());
    println!();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("failed to install Ctrl+C handler: {}", e);
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
                tracing::warn!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received Ctrl+C, shutting down"),
        _ = terminate => tracing::info!("received SIGTERM, shutting down"),
    }
}
