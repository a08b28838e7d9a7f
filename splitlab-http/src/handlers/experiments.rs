use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    response::Response,
    Json,
};
use serde::{Deserialize, Serialize};
use splitlab::experiments::{
    Arm, EventKind, Experiment, ExperimentError, ExperimentFilter, ExperimentService,
    ExperimentStatus, NewExperiment,
};
use std::sync::Arc;

use super::AppState;

const DEFAULT_LIST_LIMIT: usize = 20;
const DEFAULT_LIST_OFFSET: usize = 0;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListExperimentsQuery {
    #[serde(default)]
    pub embed_id: Option<String>,
    #[serde(default)]
    pub creator_id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: Option<usize>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListExperimentsResponse {
    pub experiments: Vec<Experiment>,
    pub count: usize,
    pub total: usize,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignRequest {
    pub user_id: String,
}

#[derive(Debug, Serialize)]
pub struct AssignResponse {
    pub arm: Arm,
}

#[derive(Debug, Deserialize)]
pub struct EventRequest {
    pub arm: Arm,
    pub event: EventKind,
}

type Transition = fn(&ExperimentService, &str) -> Result<bool, ExperimentError>;

fn require_experiment(state: &AppState, id: &str) -> Result<Experiment, Response> {
    match state.service.get(id) {
        Ok(Some(experiment)) => Ok(experiment),
        Ok(None) => Err(ExperimentError::NotFound(id.to_string()).into_response()),
        Err(err) => Err(err.into_response()),
    }
}

/// 200 with the updated record, 409 when the move is illegal from the
/// current status, 404 when the id is unknown.
fn run_transition(state: &AppState, id: &str, transition: Transition) -> Response {
    let applied = match transition(&state.service, id) {
        Ok(applied) => applied,
        Err(err) => return err.into_response(),
    };
    let experiment = match require_experiment(state, id) {
        Ok(experiment) => experiment,
        Err(resp) => return resp,
    };
    if applied {
        Json(experiment).into_response()
    } else {
        ExperimentError::InvalidStatus(experiment.status.to_string()).into_response()
    }
}

pub async fn create_experiment(
    State(state): State<Arc<AppState>>,
    Json(body): Json<NewExperiment>,
) -> Response {
    match state.service.create(body) {
        Ok(created) => (StatusCode::CREATED, Json(created)).into_response(),
        Err(err) => err.into_response(),
    }
}

pub async fn list_experiments(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListExperimentsQuery>,
) -> Response {
    let status = match params.status.as_deref() {
        Some(status) => match ExperimentStatus::parse(status) {
            Ok(parsed) => Some(parsed),
            Err(err) => return err.into_response(),
        },
        None => None,
    };

    let filter = ExperimentFilter {
        embed_id: params.embed_id,
        creator_id: params.creator_id,
        status,
    };

    let experiments = match state.service.list(Some(&filter)) {
        Ok(experiments) => experiments,
        Err(err) => return err.into_response(),
    };

    let total = experiments.len();
    let offset = params.offset.unwrap_or(DEFAULT_LIST_OFFSET);
    let limit = params.limit.unwrap_or(DEFAULT_LIST_LIMIT);
    let page: Vec<Experiment> = experiments.into_iter().skip(offset).take(limit).collect();
    let count = page.len();

    Json(ListExperimentsResponse {
        experiments: page,
        count,
        total,
    })
    .into_response()
}

pub async fn get_experiment(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Response {
    match require_experiment(&state, &id) {
        Ok(experiment) => Json(experiment).into_response(),
        Err(resp) => resp,
    }
}

pub async fn start_experiment(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Response {
    run_transition(&state, &id, ExperimentService::start)
}

pub async fn pause_experiment(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Response {
    run_transition(&state, &id, ExperimentService::pause)
}

pub async fn complete_experiment(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Response {
    run_transition(&state, &id, ExperimentService::complete)
}

pub async fn archive_experiment(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Response {
    run_transition(&state, &id, ExperimentService::archive)
}

pub async fn assign_arm(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<AssignRequest>,
) -> Response {
    match state.service.assign(&id, &body.user_id) {
        Ok(arm) => Json(AssignResponse { arm }).into_response(),
        Err(err) => err.into_response(),
    }
}

pub async fn record_event(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<EventRequest>,
) -> Response {
    // 404 for unknown ids, 409 unless the experiment is running
    match state.service.record(&id, body.arm, body.event) {
        Ok(_) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => err.into_response(),
    }
}

pub async fn get_experiment_results(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Response {
    if let Err(resp) = require_experiment(&state, &id) {
        return resp;
    }
    match state.service.report(&id) {
        Ok(Some(report)) => Json(report).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({
                "error": "no_results",
                "message": format!("no events recorded for experiment {id}"),
            })),
        )
            .into_response(),
        Err(err) => err.into_response(),
    }
}

pub async fn get_experiment_insights(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Response {
    if let Err(resp) = require_experiment(&state, &id) {
        return resp;
    }
    match state.service.insights(&id) {
        Ok(insights) => Json(insights).into_response(),
        Err(err) => err.into_response(),
    }
}

pub async fn get_active_for_embed(
    State(state): State<Arc<AppState>>,
    Path(embed_id): Path<String>,
) -> Response {
    match state.service.active_for_embed(&embed_id) {
        Ok(Some(experiment)) => Json(experiment).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({
                "error": "no_active_experiment",
                "message": format!("no running experiment for embed {embed_id}"),
            })),
        )
            .into_response(),
        Err(err) => err.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::build_router;
    use axum::{
        body::Body,
        http::{Method, Request},
        Router,
    };
    use splitlab::ExperimentsConfig;
    use tempfile::TempDir;
    use tower::ServiceExt;

    fn app() -> Router {
        let state = Arc::new(AppState::new(Arc::new(ExperimentService::in_memory())));
        build_router(state)
    }

    fn file_backed_app(tmp: &TempDir) -> Router {
        let config = ExperimentsConfig {
            data_dir: Some(tmp.path().to_path_buf()),
            ..Default::default()
        };
        let service = ExperimentService::from_config(config).unwrap();
        build_router(Arc::new(AppState::new(Arc::new(service))))
    }

    fn create_experiment_body() -> serde_json::Value {
        serde_json::json!({
            "name": "Hero copy",
            "embedId": "embed-1",
            "creatorId": "creator-1",
            "trafficSplit": 50,
            "primaryGoal": "conversions"
        })
    }

    async fn send_json_request(
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

    async fn send_empty_request(
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

    async fn body_json(resp: axum::http::Response<Body>) -> serde_json::Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn create_experiment_and_get_id(app: &Router) -> String {
        let resp = send_json_request(
            app,
            Method::POST,
            "/1/experiments",
            create_experiment_body(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let json = body_json(resp).await;
        json["id"].as_str().unwrap().to_string()
    }

    async fn send_events(app: &Router, id: &str, arm: &str, event: &str, n: usize) {
        for _ in 0..n {
            let resp = send_json_request(
                app,
                Method::POST,
                &format!("/1/experiments/{id}/events"),
                serde_json::json!({ "arm": arm, "event": event }),
            )
            .await;
            assert_eq!(resp.status(), StatusCode::NO_CONTENT);
        }
    }

    #[tokio::test]
    async fn create_experiment_returns_201_as_draft() {
        let app = app();
        let resp = send_json_request(
            &app,
            Method::POST,
            "/1/experiments",
            create_experiment_body(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let json = body_json(resp).await;
        assert_eq!(json["status"], "draft");
        assert_eq!(json["trafficSplit"], 50);
        assert_eq!(json["embedId"], "embed-1");
        assert!(json["startDate"].is_null());
    }

    #[tokio::test]
    async fn create_experiment_invalid_traffic_split_returns_400() {
        let app = app();
        let mut body = create_experiment_body();
        body["trafficSplit"] = serde_json::json!(120);
        let resp = send_json_request(&app, Method::POST, "/1/experiments", body).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let json = body_json(resp).await;
        assert_eq!(json["error"], "invalid_config");
    }

    #[tokio::test]
    async fn create_experiment_blank_name_returns_400() {
        let app = app();
        let mut body = create_experiment_body();
        body["name"] = serde_json::json!("  ");
        let resp = send_json_request(&app, Method::POST, "/1/experiments", body).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn get_experiment_returns_200() {
        let app = app();
        let id = create_experiment_and_get_id(&app).await;
        let resp = send_empty_request(&app, Method::GET, &format!("/1/experiments/{id}")).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await["id"], id.as_str());
    }

    #[tokio::test]
    async fn get_nonexistent_experiment_returns_404() {
        let app = app();
        let resp = send_empty_request(&app, Method::GET, "/1/experiments/nope").await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(resp).await["error"], "experiment_not_found");
    }

    #[tokio::test]
    async fn list_experiments_with_filters_and_pagination() {
        let app = app();
        let first = create_experiment_and_get_id(&app).await;
        let _second = create_experiment_and_get_id(&app).await;
        let mut other = create_experiment_body();
        other["embedId"] = serde_json::json!("embed-2");
        send_json_request(&app, Method::POST, "/1/experiments", other).await;
        send_empty_request(&app, Method::POST, &format!("/1/experiments/{first}/start")).await;

        let resp = send_empty_request(&app, Method::GET, "/1/experiments").await;
        let json = body_json(resp).await;
        assert_eq!(json["total"], 3);

        let resp = send_empty_request(&app, Method::GET, "/1/experiments?embedId=embed-1").await;
        assert_eq!(body_json(resp).await["total"], 2);

        let resp = send_empty_request(&app, Method::GET, "/1/experiments?status=running").await;
        let json = body_json(resp).await;
        assert_eq!(json["total"], 1);
        assert_eq!(json["experiments"][0]["id"], first.as_str());

        let resp =
            send_empty_request(&app, Method::GET, "/1/experiments?limit=1&offset=1").await;
        let json = body_json(resp).await;
        assert_eq!(json["count"], 1);
        assert_eq!(json["total"], 3);
    }

    #[tokio::test]
    async fn list_experiments_invalid_status_filter_returns_400() {
        let app = app();
        let resp = send_empty_request(&app, Method::GET, "/1/experiments?status=stopped").await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn lifecycle_endpoints_walk_the_state_machine() {
        let app = app();
        let id = create_experiment_and_get_id(&app).await;

        let resp = send_empty_request(&app, Method::POST, &format!("/1/experiments/{id}/start")).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json["status"], "running");
        assert!(json["startDate"].is_i64());

        let resp = send_empty_request(&app, Method::POST, &format!("/1/experiments/{id}/pause")).await;
        assert_eq!(body_json(resp).await["status"], "paused");

        let resp =
            send_empty_request(&app, Method::POST, &format!("/1/experiments/{id}/complete")).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json["status"], "completed");
        assert!(json["endDate"].is_i64());
        assert_eq!(json["results"]["winner"], "inconclusive");

        let resp =
            send_empty_request(&app, Method::POST, &format!("/1/experiments/{id}/archive")).await;
        assert_eq!(body_json(resp).await["status"], "archived");
    }

    #[tokio::test]
    async fn illegal_transition_returns_409() {
        let app = app();
        let id = create_experiment_and_get_id(&app).await;
        let resp = send_empty_request(&app, Method::POST, &format!("/1/experiments/{id}/pause")).await;
        assert_eq!(resp.status(), StatusCode::CONFLICT);
        assert_eq!(body_json(resp).await["error"], "invalid_status");

        let resp =
            send_empty_request(&app, Method::POST, &format!("/1/experiments/{id}/complete")).await;
        assert_eq!(resp.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn transition_on_unknown_id_returns_404() {
        let app = app();
        for action in ["start", "pause", "complete", "archive"] {
            let resp =
                send_empty_request(&app, Method::POST, &format!("/1/experiments/ghost/{action}"))
                    .await;
            assert_eq!(resp.status(), StatusCode::NOT_FOUND, "{action}");
        }
    }

    #[tokio::test]
    async fn assign_returns_control_until_started() {
        let app = app();
        let mut body = create_experiment_body();
        body["trafficSplit"] = serde_json::json!(100);
        let resp = send_json_request(&app, Method::POST, "/1/experiments", body).await;
        let id = body_json(resp).await["id"].as_str().unwrap().to_string();
        let uri = format!("/1/experiments/{id}/assign");

        let resp =
            send_json_request(&app, Method::POST, &uri, serde_json::json!({"userId": "u-1"})).await;
        assert_eq!(body_json(resp).await["arm"], "control");

        send_empty_request(&app, Method::POST, &format!("/1/experiments/{id}/start")).await;
        let resp =
            send_json_request(&app, Method::POST, &uri, serde_json::json!({"userId": "u-1"})).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await["arm"], "variant");
    }

    #[tokio::test]
    async fn assign_unknown_experiment_serves_control() {
        let app = app();
        let resp = send_json_request(
            &app,
            Method::POST,
            "/1/experiments/ghost/assign",
            serde_json::json!({"userId": "u-1"}),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await["arm"], "control");
    }

    #[tokio::test]
    async fn record_event_on_unknown_experiment_returns_404() {
        let app = app();
        let resp = send_json_request(
            &app,
            Method::POST,
            "/1/experiments/ghost/events",
            serde_json::json!({"arm": "control", "event": "impression"}),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn record_event_outside_running_returns_409() {
        let app = app();
        let id = create_experiment_and_get_id(&app).await;
        let event = serde_json::json!({"arm": "variant", "event": "impression"});
        let uri = format!("/1/experiments/{id}/events");

        let resp = send_json_request(&app, Method::POST, &uri, event.clone()).await;
        assert_eq!(resp.status(), StatusCode::CONFLICT);
        assert_eq!(body_json(resp).await["error"], "invalid_status");

        send_empty_request(&app, Method::POST, &format!("/1/experiments/{id}/start")).await;
        let resp = send_json_request(&app, Method::POST, &uri, event.clone()).await;
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);

        send_empty_request(&app, Method::POST, &format!("/1/experiments/{id}/pause")).await;
        let resp = send_json_request(&app, Method::POST, &uri, event).await;
        assert_eq!(resp.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn results_after_complete_ignore_late_events() {
        let app = app();
        let id = create_experiment_and_get_id(&app).await;
        send_empty_request(&app, Method::POST, &format!("/1/experiments/{id}/start")).await;
        send_events(&app, &id, "control", "impression", 120).await;
        send_events(&app, &id, "control", "conversion", 12).await;
        send_events(&app, &id, "variant", "impression", 120).await;
        send_events(&app, &id, "variant", "conversion", 36).await;

        let resp =
            send_empty_request(&app, Method::POST, &format!("/1/experiments/{id}/complete")).await;
        let stored = body_json(resp).await["results"].clone();
        assert_eq!(stored["winner"], "variant");

        let resp = send_json_request(
            &app,
            Method::POST,
            &format!("/1/experiments/{id}/events"),
            serde_json::json!({"arm": "control", "event": "conversion"}),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::CONFLICT);

        let resp =
            send_empty_request(&app, Method::GET, &format!("/1/experiments/{id}/results")).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await["results"], stored);
    }

    #[tokio::test]
    async fn record_event_rejects_unknown_event_kind() {
        let app = app();
        let id = create_experiment_and_get_id(&app).await;
        let resp = send_json_request(
            &app,
            Method::POST,
            &format!("/1/experiments/{id}/events"),
            serde_json::json!({"arm": "control", "event": "purchase"}),
        )
        .await;
        assert!(resp.status().is_client_error());
    }

    #[tokio::test]
    async fn results_404_before_any_event() {
        let app = app();
        let id = create_experiment_and_get_id(&app).await;
        let resp =
            send_empty_request(&app, Method::GET, &format!("/1/experiments/{id}/results")).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(resp).await["error"], "no_results");
    }

    #[tokio::test]
    async fn results_reflect_recorded_events() {
        let app = app();
        let id = create_experiment_and_get_id(&app).await;
        send_empty_request(&app, Method::POST, &format!("/1/experiments/{id}/start")).await;
        send_events(&app, &id, "control", "impression", 10).await;
        send_events(&app, &id, "control", "click", 3).await;
        send_events(&app, &id, "variant", "impression", 10).await;
        send_events(&app, &id, "variant", "conversion", 2).await;

        let resp =
            send_empty_request(&app, Method::GET, &format!("/1/experiments/{id}/results")).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        let results = &json["results"];
        assert_eq!(results["control"]["impressions"], 10);
        assert_eq!(results["control"]["clickThroughRate"], 0.3);
        assert_eq!(results["variant"]["conversionRate"], 0.2);
        assert_eq!(results["winner"], "inconclusive");
        assert_eq!(results["confidenceLevel"], 0.95);
        assert_eq!(json["sampleRatioMismatch"], false);
    }

    #[tokio::test]
    async fn insights_for_unknown_experiment_returns_404() {
        let app = app();
        let resp =
            send_empty_request(&app, Method::GET, "/1/experiments/ghost/insights").await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn insights_without_data_are_empty_lists() {
        let app = app();
        let id = create_experiment_and_get_id(&app).await;
        let resp =
            send_empty_request(&app, Method::GET, &format!("/1/experiments/{id}/insights")).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json["insights"], serde_json::json!([]));
        assert_eq!(json["recommendations"], serde_json::json!([]));
        assert_eq!(json["nextSteps"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn active_for_embed_returns_running_experiment() {
        let app = app();
        let id = create_experiment_and_get_id(&app).await;
        let resp = send_empty_request(&app, Method::GET, "/1/embeds/embed-1/active").await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        send_empty_request(&app, Method::POST, &format!("/1/experiments/{id}/start")).await;
        let resp = send_empty_request(&app, Method::GET, "/1/embeds/embed-1/active").await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await["id"], id.as_str());
    }

    #[tokio::test]
    async fn file_backed_state_survives_router_rebuild() {
        let tmp = TempDir::new().unwrap();
        let id = {
            let app = file_backed_app(&tmp);
            let id = create_experiment_and_get_id(&app).await;
            send_empty_request(&app, Method::POST, &format!("/1/experiments/{id}/start")).await;
            id
        };
        let app = file_backed_app(&tmp);
        let resp = send_empty_request(&app, Method::GET, &format!("/1/experiments/{id}")).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await["status"], "running");
    }
}
