//! HTTP routes: GitHub webhook receiver and pipeline command endpoints.

pub mod api;
pub mod webhook;

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use tower::ServiceBuilder;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::config::CiConfig;
use crate::models::{Build, FixAttempt};
use crate::pipeline::Pipeline;
use crate::services::orchestrator::CancelOutcome;

/// Upper bound for a single request.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Shared state for route handlers.
#[derive(Clone)]
pub struct CiRouterState {
    pub pipeline: Arc<Pipeline>,
    pub config: CiConfig,
}

pub fn ci_router(state: CiRouterState) -> Router {
    Router::new()
        .route("/health", get(health))
        // Webhook
        .route("/webhook/github", post(webhook_handler))
        // Builds
        .route("/api/builds/trigger", post(trigger_build_handler))
        .route("/api/builds/{build_id}/retry", post(retry_build_handler))
        .route("/api/builds/{build_id}/cancel", post(cancel_build_handler))
        .route(
            "/api/repositories/{repository_id}/retry-failed",
            post(retry_failed_handler),
        )
        // Fix attempts
        .route("/api/fix-attempts/{attempt_id}/approve", post(approve_fix_handler))
        .route("/api/fix-attempts/{attempt_id}/cancel", post(cancel_fix_handler))
        .route("/api/fix-attempts/{attempt_id}/revert", post(revert_fix_handler))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(timeout_layer(REQUEST_TIMEOUT)),
        )
        .with_state(state)
}

/// Requests still running after `limit` are answered with 408.
fn timeout_layer(limit: Duration) -> TimeoutLayer {
    TimeoutLayer::with_status_code(StatusCode::REQUEST_TIMEOUT, limit)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

// ── Webhook ──

async fn webhook_handler(
    State(state): State<CiRouterState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<webhook::WebhookAck>), StatusCode> {
    crate::metrics::webhook_received(
        headers
            .get("x-github-event")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("unknown"),
    );

    webhook::handle_webhook(&state.config, state.pipeline.queue(), &headers, &body)
}

// ── Builds ──

async fn trigger_build_handler(
    State(state): State<CiRouterState>,
    Json(req): Json<api::TriggerRequest>,
) -> Result<(StatusCode, Json<api::TriggerResponse>), api::ApiError> {
    api::trigger_build(&state.pipeline, req).await
}

async fn retry_build_handler(
    State(state): State<CiRouterState>,
    Path(build_id): Path<i64>,
) -> Result<(StatusCode, Json<Build>), api::ApiError> {
    let build = state.pipeline.orchestrator.retry(build_id).await?;
    Ok((StatusCode::CREATED, Json(build)))
}

async fn cancel_build_handler(
    State(state): State<CiRouterState>,
    Path(build_id): Path<i64>,
) -> Result<Json<CancelOutcome>, api::ApiError> {
    Ok(Json(state.pipeline.orchestrator.cancel(build_id).await?))
}

async fn retry_failed_handler(
    State(state): State<CiRouterState>,
    Path(repository_id): Path<i64>,
) -> Result<Json<api::RetryFailedResponse>, api::ApiError> {
    let retried = state.pipeline.orchestrator.retry_failed(repository_id).await?;
    Ok(Json(api::RetryFailedResponse {
        repository_id,
        retried: retried.iter().map(|b| b.id).collect(),
    }))
}

// ── Fix attempts ──

/// Remediation talks to GitHub, so it runs on the `fixes` queue rather than
/// inside the request.
async fn approve_fix_handler(
    State(state): State<CiRouterState>,
    Path(attempt_id): Path<i64>,
) -> Result<(StatusCode, Json<FixAttempt>), api::ApiError> {
    let attempt = state.pipeline.fixes.request_approval(attempt_id).await?;
    Ok((StatusCode::ACCEPTED, Json(attempt)))
}

async fn cancel_fix_handler(
    State(state): State<CiRouterState>,
    Path(attempt_id): Path<i64>,
) -> Result<Json<FixAttempt>, api::ApiError> {
    Ok(Json(state.pipeline.fixes.cancel(attempt_id).await?))
}

async fn revert_fix_handler(
    State(state): State<CiRouterState>,
    Path(attempt_id): Path<i64>,
) -> Result<Json<FixAttempt>, api::ApiError> {
    Ok(Json(state.pipeline.fixes.revert(attempt_id).await?))
}
