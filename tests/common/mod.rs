use axum::{
    body::Body,
    http::{Method, Request},
    Router,
};
use splitlab::{Arm, ExperimentService, ExperimentsConfig};
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

#[allow(dead_code)]
pub fn memory_app() -> Router {
    let service = Arc::new(ExperimentService::in_memory());
    splitlab_http::build_router(Arc::new(splitlab_http::handlers::AppState::new(service)))
}

#[allow(dead_code)]
pub fn file_backed_service(temp_dir: &TempDir) -> ExperimentService {
    let config = ExperimentsConfig {
        data_dir: Some(temp_dir.path().to_path_buf()),
        ..Default::default()
    };
    ExperimentService::from_config(config).unwrap()
}

/// Records `impressions` impressions then `conversions` conversions on `arm`.
/// The experiment must be running.
#[allow(dead_code)]
pub fn record_arm(
    service: &ExperimentService,
    test_id: &str,
    arm: Arm,
    impressions: u64,
    conversions: u64,
) {
    for _ in 0..impressions {
        service.record_impression(test_id, arm).unwrap();
    }
    for _ in 0..conversions {
        service.record_conversion(test_id, arm).unwrap();
    }
}

#[allow(dead_code)]
pub async fn send_json_request(
    app: &Router,
    method: Method,
    uri: &str,
    body: serde_json::Value,
) -> axum::http::Response<Body> {
    app.clone()
        .oneshot(
            Request::builder()
                .method(method)
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap()
}

#[allow(dead_code)]
pub async fn send_empty_request(
    app: &Router,
    method: Method,
    uri: &str,
) -> axum::http::Response<Body> {
    app.clone()
        .oneshot(
            Request::builder()
                .method(method)
                .uri(uri)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap()
}

#[allow(dead_code)]
pub async fn body_json(resp: axum::http::Response<Body>) -> serde_json::Value {
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}
