// HTTP route handlers for the runner API

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use runner_common::types::{ExecutionRequest, ExecutionResult, OutcomeKind};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

use crate::metrics;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct LanguageSummary {
    pub id: String,
    pub file_extension: String,
    pub image: String,
    pub compiled: bool,
}

/// POST /execute - Run code in a sandbox and return its output
pub async fn execute(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ExecutionRequest>,
) -> Response {
    let request_id = Uuid::new_v4();
    let timer = metrics::EXECUTION_DURATION.start_timer();

    info!(
        request_id = %request_id,
        language = %payload.language,
        source_size = payload.code.len(),
        "Execution requested"
    );

    // Own task per request: a client hanging up does not abort a sandbox midway
    let engine = state.engine.clone();
    let joined = tokio::spawn(async move { engine.execute_with_id(&payload, request_id).await }).await;
    timer.observe_duration();

    match joined {
        Ok(Ok(result)) => {
            metrics::record_outcome(result.outcome_kind);
            let status = match result.outcome_kind {
                OutcomeKind::InfrastructureFailure => StatusCode::INTERNAL_SERVER_ERROR,
                _ => StatusCode::OK,
            };
            (status, Json(result)).into_response()
        }
        Ok(Err(rejection)) => {
            metrics::REJECTIONS_TOTAL.inc();
            (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({
                    "error": rejection.to_string()
                })),
            )
                .into_response()
        }
        Err(e) => {
            error!(request_id = %request_id, error = %e, "Execution task failed");
            metrics::record_outcome(OutcomeKind::InfrastructureFailure);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ExecutionResult::infrastructure_failure(
                    "Execution service failed while running the request",
                )),
            )
                .into_response()
        }
    }
}

/// GET /status - Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// GET /languages - Supported languages
pub async fn list_languages(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let languages: Vec<LanguageSummary> = state
        .engine
        .registry()
        .profiles()
        .map(|p| LanguageSummary {
            id: p.id.clone(),
            file_extension: p.file_extension.clone(),
            image: p.image.clone(),
            compiled: p.is_compiled(),
        })
        .collect();

    Json(languages)
}

/// GET /metrics - Prometheus exposition
pub async fn metrics() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        metrics::render(),
    )
}
