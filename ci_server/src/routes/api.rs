//! REST API request/response types and error mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::pipeline::Pipeline;
use crate::services::dispatch_service::DispatchOutcome;

#[derive(Debug, Deserialize)]
pub struct TriggerRequest {
    /// `owner/name`
    pub repository: String,
    /// Empty builds the repository's primary branch.
    #[serde(default)]
    pub branch: String,
    #[serde(default)]
    pub commit_sha: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TriggerResponse {
    pub build_id: i64,
}

/// Start a manual build.
pub async fn trigger_build(
    pipeline: &Pipeline,
    req: TriggerRequest,
) -> Result<(StatusCode, Json<TriggerResponse>), ApiError> {
    match pipeline
        .dispatcher
        .trigger_manual(&req.repository, &req.branch, req.commit_sha)
        .await?
    {
        DispatchOutcome::Created { build_id } => {
            Ok((StatusCode::CREATED, Json(TriggerResponse { build_id })))
        }
        DispatchOutcome::NotRegistered { repository } => Err(ApiError {
            status: StatusCode::NOT_FOUND,
            message: format!("repository {repository} is not registered"),
        }),
        DispatchOutcome::Skipped { reason } => Err(ApiError {
            status: StatusCode::UNPROCESSABLE_ENTITY,
            message: reason,
        }),
    }
}

#[derive(Debug, Serialize)]
pub struct RetryFailedResponse {
    pub repository_id: i64,
    pub retried: Vec<i64>,
}

/// JSON error body with the matching status code.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl From<PipelineError> for ApiError {
    fn from(e: PipelineError) -> Self {
        let status = match &e {
            PipelineError::NotFound { .. } => StatusCode::NOT_FOUND,
            PipelineError::InvalidTransition { .. } | PipelineError::BoundReached { .. } => {
                StatusCode::CONFLICT
            }
            PipelineError::Store(_) | PipelineError::Queue(_) => {
                tracing::error!(error = %e, "Request failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self {
            status,
            message: e.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(serde_json::json!({ "error": self.message }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreError;

    #[test]
    fn pipeline_errors_map_to_status_codes() {
        let cases = [
            (PipelineError::NotFound { entity: "build", id: 1 }, StatusCode::NOT_FOUND),
            (
                PipelineError::InvalidTransition {
                    entity: "fix attempt",
                    id: 1,
                    from: "applied".into(),
                    to: "cancelled".into(),
                },
                StatusCode::CONFLICT,
            ),
            (PipelineError::BoundReached { chain_id: 1, limit: 3 }, StatusCode::CONFLICT),
            (
                PipelineError::Store(StoreError::Unavailable("down".into())),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (error, status) in cases {
            assert_eq!(ApiError::from(error).status, status);
        }
    }
}
