use axum::{extract::State, Json};
use std::sync::Arc;

use super::AppState;

/// Liveness plus a few cheap counters.
pub async fn health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let experiments = state.service.list(None).map(|all| all.len()).ok();
    let persistent = state.service.config().data_dir.is_some();

    Json(serde_json::json!({
        "status": if experiments.is_some() { "ok" } else { "degraded" },
        "experiments": experiments,
        "tracked_experiments": state.service.metrics().all_arms().len(),
        "persistent": persistent,
        "build_profile": if cfg!(debug_assertions) { "debug" } else { "release" },
        "uptime_secs": state.start_time.elapsed().as_secs(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
