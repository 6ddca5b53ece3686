//! CircleCI v2 adapter.
//!
//! A pipeline fans out into workflows; the pipeline is reported finished only
//! once every workflow is.

use async_trait::async_trait;
use serde::Deserialize;

use super::http::ApiClient;
use super::{BuildTarget, Platform, PlatformAdapter, PlatformError, PlatformStatus, TriggerReceipt};

pub const DEFAULT_API_URL: &str = "https://circleci.com/api/v2";

pub struct CircleCiAdapter {
    api: ApiClient,
}

#[derive(Deserialize)]
struct Pipeline {
    id: String,
    #[serde(default)]
    number: Option<i64>,
}

#[derive(Deserialize)]
struct Page<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
}

#[derive(Deserialize)]
struct Workflow {
    id: String,
    name: String,
    status: String,
}

#[derive(Deserialize)]
struct WorkflowJob {
    name: String,
    status: String,
    #[serde(default)]
    job_number: Option<i64>,
}

impl CircleCiAdapter {
    pub fn new(api_url: &str, token: &str) -> Self {
        Self {
            api: ApiClient::new(api_url, "Circle-Token", token.trim().to_string()),
        }
    }

    async fn workflows(&self, target: &BuildTarget<'_>) -> Result<Vec<Workflow>, PlatformError> {
        let pipeline_id = target.platform_build_id()?;
        let page: Page<Workflow> = self
            .api
            .get_json(&format!("/pipeline/{pipeline_id}/workflow"), &[])
            .await?;
        Ok(page.items)
    }
}

fn project_slug(target: &BuildTarget<'_>) -> String {
    target
        .integration
        .setting("project_slug")
        .map(str::to_string)
        .unwrap_or_else(|| format!("gh/{}", target.repository.full_name))
}

#[async_trait]
impl PlatformAdapter for CircleCiAdapter {
    fn platform(&self) -> Platform {
        Platform::CircleCi
    }

    async fn trigger(&self, target: &BuildTarget<'_>) -> Result<TriggerReceipt, PlatformError> {
        if !self.api.has_credentials() {
            return Err(PlatformError::Misconfigured("CI_CIRCLECI_TOKEN not set".to_string()));
        }
        let slug = project_slug(target);
        let pipeline: Pipeline = self
            .api
            .post_json(
                &format!("/project/{slug}/pipeline"),
                &serde_json::json!({ "branch": target.build.branch }),
            )
            .await?;

        Ok(TriggerReceipt {
            logs_url: pipeline
                .number
                .map(|n| format!("https://app.circleci.com/pipelines/{slug}/{n}")),
            platform_build_id: pipeline.id,
        })
    }

    async fn poll_status(&self, target: &BuildTarget<'_>) -> Result<PlatformStatus, PlatformError> {
        let workflows = self.workflows(target).await?;
        Ok(pipeline_status(workflows.iter().map(|w| w.status.as_str())))
    }

    async fn fetch_logs(&self, target: &BuildTarget<'_>) -> Result<String, PlatformError> {
        let mut logs = String::new();
        for workflow in self.workflows(target).await? {
            logs.push_str(&format!("==> workflow {} ({})\n", workflow.name, workflow.status));
            let jobs: Page<WorkflowJob> = self
                .api
                .get_json(&format!("/workflow/{}/job", workflow.id), &[])
                .await?;
            for job in jobs.items {
                match job.job_number {
                    Some(n) => logs.push_str(&format!("job {} #{n}: {}\n", job.name, job.status)),
                    None => logs.push_str(&format!("job {}: {}\n", job.name, job.status)),
                }
            }
        }
        Ok(logs)
    }
}

fn pipeline_status<'a>(statuses: impl Iterator<Item = &'a str>) -> PlatformStatus {
    let statuses: Vec<&str> = statuses.collect();
    if statuses.is_empty() {
        // Workflows are created asynchronously after the pipeline.
        return PlatformStatus::Running;
    }
    if statuses
        .iter()
        .any(|s| matches!(*s, "running" | "on_hold" | "failing"))
    {
        return PlatformStatus::Running;
    }
    if statuses.iter().any(|s| *s == "canceled") {
        return PlatformStatus::Cancelled;
    }
    if statuses
        .iter()
        .any(|s| matches!(*s, "failed" | "error" | "unauthorized"))
    {
        return PlatformStatus::Failed;
    }
    PlatformStatus::Success
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platforms::testing::fixtures;

    #[test]
    fn pipeline_waits_for_every_workflow() {
        assert_eq!(pipeline_status([].into_iter()), PlatformStatus::Running);
        assert_eq!(
            pipeline_status(["success", "failing"].into_iter()),
            PlatformStatus::Running
        );
        assert_eq!(
            pipeline_status(["success", "failed"].into_iter()),
            PlatformStatus::Failed
        );
        assert_eq!(
            pipeline_status(["failed", "canceled"].into_iter()),
            PlatformStatus::Cancelled
        );
        assert_eq!(
            pipeline_status(["success", "not_run"].into_iter()),
            PlatformStatus::Success
        );
    }

    #[tokio::test]
    async fn trigger_defaults_slug_to_github_project() {
        let mut server = mockito::Server::new_async().await;
        let create = server
            .mock("POST", "/project/gh/acme/app/pipeline")
            .match_header("circle-token", "cc-token")
            .with_status(201)
            .with_body(r#"{"id":"pipe-1","number":41,"state":"created"}"#)
            .create_async()
            .await;

        let adapter = CircleCiAdapter::new(&server.url(), "cc-token");
        let (build, repository, integration) = fixtures("circleci", serde_json::json!({}), None);
        let target = BuildTarget { build: &build, repository: &repository, integration: &integration };

        let receipt = adapter.trigger(&target).await.unwrap();
        assert_eq!(receipt.platform_build_id, "pipe-1");
        assert_eq!(
            receipt.logs_url.as_deref(),
            Some("https://app.circleci.com/pipelines/gh/acme/app/41")
        );
        create.assert_async().await;
    }
}
