//! Codemagic adapter.

use async_trait::async_trait;
use serde::Deserialize;

use super::http::ApiClient;
use super::{BuildTarget, Platform, PlatformAdapter, PlatformError, PlatformStatus, TriggerReceipt};

pub const DEFAULT_API_URL: &str = "https://api.codemagic.io";

pub struct CodemagicAdapter {
    api: ApiClient,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartedBuild {
    build_id: String,
}

#[derive(Deserialize)]
struct BuildEnvelope {
    build: BuildInfo,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BuildInfo {
    status: String,
    #[serde(default)]
    build_actions: Vec<BuildAction>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BuildAction {
    name: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    log_url: Option<String>,
}

impl CodemagicAdapter {
    pub fn new(api_url: &str, token: &str) -> Self {
        Self {
            api: ApiClient::new(api_url, "x-auth-token", token.trim().to_string()),
        }
    }

    async fn build_info(&self, target: &BuildTarget<'_>) -> Result<BuildInfo, PlatformError> {
        let id = target.platform_build_id()?;
        let envelope: BuildEnvelope = self.api.get_json(&format!("/builds/{id}"), &[]).await?;
        Ok(envelope.build)
    }
}

#[async_trait]
impl PlatformAdapter for CodemagicAdapter {
    fn platform(&self) -> Platform {
        Platform::Codemagic
    }

    async fn trigger(&self, target: &BuildTarget<'_>) -> Result<TriggerReceipt, PlatformError> {
        if !self.api.has_credentials() {
            return Err(PlatformError::Misconfigured("CI_CODEMAGIC_TOKEN not set".to_string()));
        }
        let app_id = target.setting("app_id")?;
        let workflow_id = target.integration.setting("workflow_id").unwrap_or("default");

        let started: StartedBuild = self
            .api
            .post_json(
                "/builds",
                &serde_json::json!({
                    "appId": app_id,
                    "workflowId": workflow_id,
                    "branch": target.build.branch,
                }),
            )
            .await?;

        Ok(TriggerReceipt {
            logs_url: Some(format!(
                "https://codemagic.io/app/{app_id}/build/{}",
                started.build_id
            )),
            platform_build_id: started.build_id,
        })
    }

    async fn poll_status(&self, target: &BuildTarget<'_>) -> Result<PlatformStatus, PlatformError> {
        let info = self.build_info(target).await?;
        Ok(match info.status.as_str() {
            "finished" => PlatformStatus::Success,
            "failed" | "timeout" | "skipped" => PlatformStatus::Failed,
            "canceled" => PlatformStatus::Cancelled,
            _ => PlatformStatus::Running,
        })
    }

    async fn fetch_logs(&self, target: &BuildTarget<'_>) -> Result<String, PlatformError> {
        let info = self.build_info(target).await?;

        let mut logs = String::new();
        for action in info.build_actions {
            logs.push_str(&format!(
                "==> {} ({})\n",
                action.name,
                action.status.as_deref().unwrap_or("unknown")
            ));
            if let Some(url) = action.log_url {
                logs.push_str(&self.api.get_text_unauthenticated(&url).await?);
                logs.push('\n');
            }
        }
        Ok(logs)
    }
}

#[cfg(test)]
mod tests {
    use mockito::Matcher;

    use super::*;
    use crate::platforms::testing::fixtures;

    #[tokio::test]
    async fn trigger_starts_workflow_for_app() {
        let mut server = mockito::Server::new_async().await;
        let start = server
            .mock("POST", "/builds")
            .match_header("x-auth-token", "cm-token")
            .match_body(Matcher::Json(serde_json::json!({
                "appId": "app-1",
                "workflowId": "release",
                "branch": "main",
            })))
            .with_status(200)
            .with_body(r#"{"buildId":"5f1a"}"#)
            .create_async()
            .await;

        let adapter = CodemagicAdapter::new(&server.url(), "cm-token");
        let (build, repository, integration) = fixtures(
            "codemagic",
            serde_json::json!({ "app_id": "app-1", "workflow_id": "release" }),
            None,
        );
        let target = BuildTarget { build: &build, repository: &repository, integration: &integration };

        let receipt = adapter.trigger(&target).await.unwrap();
        assert_eq!(receipt.platform_build_id, "5f1a");
        assert_eq!(
            receipt.logs_url.as_deref(),
            Some("https://codemagic.io/app/app-1/build/5f1a")
        );
        start.assert_async().await;
    }

    #[tokio::test]
    async fn missing_app_id_is_misconfigured() {
        let adapter = CodemagicAdapter::new("http://127.0.0.1:1", "cm-token");
        let (build, repository, integration) = fixtures("codemagic", serde_json::json!({}), None);
        let target = BuildTarget { build: &build, repository: &repository, integration: &integration };

        let err = adapter.trigger(&target).await.unwrap_err();
        assert!(matches!(err, PlatformError::Misconfigured(_)));
    }

    #[tokio::test]
    async fn failed_build_logs_come_from_actions() {
        let mut server = mockito::Server::new_async().await;
        let body = serde_json::json!({
            "build": {
                "status": "failed",
                "buildActions": [
                    { "name": "Install", "status": "success" },
                    { "name": "Build", "status": "failed", "logUrl": format!("{}/logs/build.txt", server.url()) }
                ]
            }
        });
        server
            .mock("GET", "/builds/5f1a")
            .with_status(200)
            .with_body(body.to_string())
            .expect(2)
            .create_async()
            .await;
        server
            .mock("GET", "/logs/build.txt")
            .with_status(200)
            .with_body("Gradle sync failed")
            .create_async()
            .await;

        let adapter = CodemagicAdapter::new(&server.url(), "cm-token");
        let (build, repository, integration) =
            fixtures("codemagic", serde_json::json!({ "app_id": "app-1" }), Some("5f1a"));
        let target = BuildTarget { build: &build, repository: &repository, integration: &integration };

        assert_eq!(adapter.poll_status(&target).await.unwrap(), PlatformStatus::Failed);
        let logs = adapter.fetch_logs(&target).await.unwrap();
        assert_eq!(
            logs,
            "==> Install (success)\n==> Build (failed)\nGradle sync failed\n"
        );
    }
}
