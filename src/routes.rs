use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use tower_http::{catch_panic::CatchPanicLayer, cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use uuid::Uuid;

use crate::{
    engine::DecisionEngine,
    error::{AppError, ScanFailure},
    probe::Prober,
    types::{HealthResponse, ScanRequest, ScanResponse},
};

pub struct AppState {
    pub engine: DecisionEngine,
    pub prober: Arc<dyn Prober>,
    pub probe_redirects: bool,
    pub metrics: Option<PrometheusHandle>,
}

pub type SharedState = Arc<AppState>;

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/scan", post(scan))
        .route("/health", get(health_check))
        .route("/metrics", get(metrics))
        .layer(CatchPanicLayer::new())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn scan(
    State(state): State<SharedState>,
    Json(payload): Json<ScanRequest>,
) -> Result<Json<ScanResponse>, ScanFailure> {
    let request_id = Uuid::new_v4();

    let verdict = state
        .engine
        .scan(&payload.url, state.prober.as_ref(), state.probe_redirects)
        .await
        .map_err(|e| AppError::from(e).with_request_id(request_id))?;

    info!(
        request_id = %request_id,
        prediction = verdict.prediction.as_str(),
        trust = verdict.trust,
        "Scan completed"
    );

    Ok(Json(ScanResponse::from_verdict(verdict, request_id)))
}

pub async fn health_check(State(state): State<SharedState>) -> Result<Json<HealthResponse>, AppError> {
    let policy = state.engine.config().policy;
    Ok(Json(HealthResponse {
        status: "healthy".to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        scoring: policy.describe(),
        classifier: state.engine.classifier_description(),
    }))
}

pub async fn metrics(State(state): State<SharedState>) -> Response {
    match &state.metrics {
        Some(handle) => handle.render().into_response(),
        None => (StatusCode::NOT_FOUND, "metrics exporter not installed").into_response(),
    }
}
