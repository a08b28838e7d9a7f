//! Prometheus `/metrics` endpoint.
//!
//! Gauges are rebuilt from the live service on every scrape: experiment
//! counts by status and per-arm event counters for every experiment that
//! has received traffic since startup.

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use prometheus::{Encoder, Gauge, GaugeVec, Opts, Registry, TextEncoder};
use splitlab::experiments::ExperimentStatus;
use splitlab::ExperimentService;
use std::sync::Arc;

use super::AppState;

/// GET /metrics: Prometheus text exposition format.
pub async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let registry = Registry::new();
    if let Err(e) = populate(&registry, &state) {
        tracing::warn!(error = %e, "failed to build metrics registry");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("metrics error: {}", e),
        )
            .into_response();
    }

    let encoder = TextEncoder::new();
    let metric_families = registry.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("metrics encode error: {}", e),
        )
            .into_response();
    }

    (
        StatusCode::OK,
        [(
            header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        buffer,
    )
        .into_response()
}

fn populate(registry: &Registry, state: &AppState) -> prometheus::Result<()> {
    register_gauge(
        registry,
        "splitlab_uptime_seconds",
        "Seconds since the server started",
        state.start_time.elapsed().as_secs_f64(),
    )?;

    populate_status_gauges(registry, &state.service)?;
    populate_arm_gauges(registry, &state.service)
}

fn populate_status_gauges(
    registry: &Registry,
    service: &ExperimentService,
) -> prometheus::Result<()> {
    let by_status = register_gauge_vec(
        registry,
        "splitlab_experiments",
        "Number of experiments per lifecycle status",
        &["status"],
    )?;
    // A storage failure leaves the gauge empty; the scrape itself still succeeds.
    let experiments = match service.list(None) {
        Ok(experiments) => experiments,
        Err(e) => {
            tracing::warn!(error = %e, "could not list experiments for metrics");
            return Ok(());
        }
    };
    for status in ExperimentStatus::ALL {
        let count = experiments.iter().filter(|e| e.status == status).count();
        by_status
            .with_label_values(&[status.as_str()])
            .set(count as f64);
    }
    Ok(())
}

fn populate_arm_gauges(registry: &Registry, service: &ExperimentService) -> prometheus::Result<()> {
    let labels = &["experiment_id", "arm"];
    let impressions = register_gauge_vec(
        registry,
        "splitlab_arm_impressions",
        "Impressions recorded per experiment arm",
        labels,
    )?;
    let clicks = register_gauge_vec(
        registry,
        "splitlab_arm_clicks",
        "Clicks recorded per experiment arm",
        labels,
    )?;
    let conversions = register_gauge_vec(
        registry,
        "splitlab_arm_conversions",
        "Conversions recorded per experiment arm",
        labels,
    )?;

    for (id, control, variant) in service.metrics().all_arms() {
        for (arm, counts) in [("control", control), ("variant", variant)] {
            impressions
                .with_label_values(&[id.as_str(), arm])
                .set(counts.impressions as f64);
            clicks
                .with_label_values(&[id.as_str(), arm])
                .set(counts.clicks as f64);
            conversions
                .with_label_values(&[id.as_str(), arm])
                .set(counts.conversions as f64);
        }
    }
    Ok(())
}

fn register_gauge(registry: &Registry, name: &str, help: &str, value: f64) -> prometheus::Result<()> {
    let gauge = Gauge::new(name, help)?;
    registry.register(Box::new(gauge.clone()))?;
    gauge.set(value);
    Ok(())
}

fn register_gauge_vec(
    registry: &Registry,
    name: &str,
    help: &str,
    labels: &[&str],
) -> prometheus::Result<GaugeVec> {
    let gauge = GaugeVec::new(Opts::new(name, help), labels)?;
    registry.register(Box::new(gauge.clone()))?;
    Ok(gauge)
}
