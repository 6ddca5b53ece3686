//! GitHub Actions adapter (workflow_dispatch + runs API).

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;

use super::http::ApiClient;
use super::{BuildTarget, Platform, PlatformAdapter, PlatformError, PlatformStatus, TriggerReceipt};

const DEFAULT_WORKFLOW: &str = "ci.yml";

/// Dispatch returns no run id, so the run is looked up afterwards.
const RUN_LOOKUP_ATTEMPTS: u32 = 5;

pub struct GitHubActionsAdapter {
    api: ApiClient,
    run_lookup_delay: Duration,
}

#[derive(Deserialize)]
struct RunList {
    #[serde(default)]
    workflow_runs: Vec<WorkflowRun>,
}

#[derive(Deserialize)]
struct WorkflowRun {
    id: i64,
    #[serde(default)]
    html_url: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    conclusion: Option<String>,
}

#[derive(Deserialize)]
struct JobList {
    #[serde(default)]
    jobs: Vec<Job>,
}

#[derive(Deserialize)]
struct Job {
    id: i64,
    name: String,
    #[serde(default)]
    conclusion: Option<String>,
}

impl GitHubActionsAdapter {
    pub fn new(api_url: &str, token: &str) -> Self {
        let auth = if token.trim().is_empty() {
            String::new()
        } else {
            format!("Bearer {token}")
        };
        Self {
            api: ApiClient::new(api_url, "Authorization", auth),
            run_lookup_delay: Duration::from_secs(2),
        }
    }

    /// Override the pause between run lookups after a dispatch.
    pub fn with_run_lookup_delay(mut self, delay: Duration) -> Self {
        self.run_lookup_delay = delay;
        self
    }

    fn ensure_token(&self) -> Result<(), PlatformError> {
        if self.api.has_credentials() {
            Ok(())
        } else {
            Err(PlatformError::Misconfigured("CI_GITHUB_TOKEN not set".to_string()))
        }
    }

    async fn find_run(
        &self,
        repo: &str,
        workflow: &str,
        branch: &str,
        since: &str,
    ) -> Result<WorkflowRun, PlatformError> {
        let path = format!("/repos/{repo}/actions/workflows/{workflow}/runs");
        let created = format!(">={since}");

        for attempt in 1..=RUN_LOOKUP_ATTEMPTS {
            let runs: RunList = self
                .api
                .get_json(
                    &path,
                    &[
                        ("branch", branch),
                        ("event", "workflow_dispatch"),
                        ("created", created.as_str()),
                        ("per_page", "1"),
                    ],
                )
                .await?;
            if let Some(run) = runs.workflow_runs.into_iter().next() {
                return Ok(run);
            }
            tracing::debug!(repo, branch, attempt, "Dispatched run not visible yet");
            tokio::time::sleep(self.run_lookup_delay).await;
        }

        Err(PlatformError::Transient(format!(
            "workflow run for {repo}@{branch} did not appear after dispatch"
        )))
    }
}

#[async_trait]
impl PlatformAdapter for GitHubActionsAdapter {
    fn platform(&self) -> Platform {
        Platform::GithubActions
    }

    async fn trigger(&self, target: &BuildTarget<'_>) -> Result<TriggerReceipt, PlatformError> {
        self.ensure_token()?;
        let repo = &target.repository.full_name;
        let workflow = target.integration.setting("workflow").unwrap_or(DEFAULT_WORKFLOW);
        let branch = &target.build.branch;
        let since = Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string();

        self.api
            .post(
                &format!("/repos/{repo}/actions/workflows/{workflow}/dispatches"),
                &serde_json::json!({ "ref": branch }),
            )
            .await?;

        let run = self.find_run(repo, workflow, branch, &since).await?;
        tracing::info!(build_id = target.build.id, run_id = run.id, "Workflow run dispatched");

        Ok(TriggerReceipt {
            platform_build_id: run.id.to_string(),
            logs_url: run.html_url,
        })
    }

    async fn poll_status(&self, target: &BuildTarget<'_>) -> Result<PlatformStatus, PlatformError> {
        let repo = &target.repository.full_name;
        let run_id = target.platform_build_id()?;
        let run: WorkflowRun = self
            .api
            .get_json(&format!("/repos/{repo}/actions/runs/{run_id}"), &[])
            .await?;

        Ok(run_status(run.status.as_deref(), run.conclusion.as_deref()))
    }

    async fn fetch_logs(&self, target: &BuildTarget<'_>) -> Result<String, PlatformError> {
        let repo = &target.repository.full_name;
        let run_id = target.platform_build_id()?;
        let jobs: JobList = self
            .api
            .get_json(&format!("/repos/{repo}/actions/runs/{run_id}/jobs"), &[])
            .await?;

        let mut logs = String::new();
        for job in jobs.jobs {
            let text = self
                .api
                .get_text(&format!("/repos/{repo}/actions/jobs/{}/logs", job.id))
                .await?;
            logs.push_str(&format!(
                "==> {} ({})\n{}\n",
                job.name,
                job.conclusion.as_deref().unwrap_or("unknown"),
                text
            ));
        }
        Ok(logs)
    }
}

fn run_status(status: Option<&str>, conclusion: Option<&str>) -> PlatformStatus {
    if status != Some("completed") {
        return PlatformStatus::Running;
    }
    match conclusion {
        Some("success" | "neutral" | "skipped") => PlatformStatus::Success,
        Some("cancelled") => PlatformStatus::Cancelled,
        _ => PlatformStatus::Failed,
    }
}
