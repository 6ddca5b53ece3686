//! GitHub webhook handler: authenticates and normalizes the delivery, then queues it.

use axum::http::{HeaderMap, StatusCode};
use axum::response::Json;
use serde::Serialize;

use crate::config::CiConfig;
use crate::services::ingest_service::{self, IngestError};
use crate::worker::{Job, JobQueue};

#[derive(Debug, Serialize)]
pub struct WebhookAck {
    pub event: String,
    pub repository: String,
}

/// Handle an incoming GitHub webhook payload.
///
/// Dispatch happens on the worker pool; the sender only learns the delivery
/// was accepted.
pub fn handle_webhook(
    config: &CiConfig,
    queue: &JobQueue,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<(StatusCode, Json<WebhookAck>), StatusCode> {
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());

    let event = ingest_service::ingest(
        &config.github_webhook_secret,
        body,
        header("x-hub-signature-256"),
        header("x-github-event"),
    )
    .map_err(|e| match e {
        IngestError::Unauthorized => StatusCode::UNAUTHORIZED,
        IngestError::MalformedPayload(reason) => {
            tracing::warn!(%reason, "Rejected webhook payload");
            StatusCode::BAD_REQUEST
        }
    })?;

    let ack = WebhookAck {
        event: event.kind.name().to_string(),
        repository: event.repository.clone(),
    };
    tracing::info!(event = %ack.event, repository = %ack.repository, sender = %event.sender, "Webhook accepted");

    queue.enqueue(Job::Dispatch(event)).map_err(|e| {
        tracing::error!(error = %e, "Could not queue webhook event");
        StatusCode::SERVICE_UNAVAILABLE
    })?;

    Ok((StatusCode::ACCEPTED, Json(ack)))
}
