//! Bitrise adapter.

use async_trait::async_trait;
use serde::Deserialize;

use super::http::ApiClient;
use super::{BuildTarget, Platform, PlatformAdapter, PlatformError, PlatformStatus, TriggerReceipt};

pub const DEFAULT_API_URL: &str = "https://api.bitrise.io/v0.1";

pub struct BitriseAdapter {
    api: ApiClient,
}

#[derive(Deserialize)]
struct TriggeredBuild {
    build_slug: String,
    #[serde(default)]
    build_url: Option<String>,
}

#[derive(Deserialize)]
struct BuildEnvelope {
    data: BuildData,
}

#[derive(Deserialize)]
struct BuildData {
    status: i64,
}

#[derive(Deserialize)]
struct LogInfo {
    #[serde(default)]
    expiring_raw_log_url: Option<String>,
}

impl BitriseAdapter {
    pub fn new(api_url: &str, token: &str) -> Self {
        Self {
            api: ApiClient::new(api_url, "Authorization", token.trim().to_string()),
        }
    }
}

#[async_trait]
impl PlatformAdapter for BitriseAdapter {
    fn platform(&self) -> Platform {
        Platform::Bitrise
    }

    async fn trigger(&self, target: &BuildTarget<'_>) -> Result<TriggerReceipt, PlatformError> {
        if !self.api.has_credentials() {
            return Err(PlatformError::Misconfigured("CI_BITRISE_TOKEN not set".to_string()));
        }
        let app_slug = target.setting("app_slug")?;

        let mut build_params = serde_json::json!({ "branch": target.build.branch });
        if let Some(sha) = target.build.commit_sha.as_deref() {
            build_params["commit_hash"] = sha.into();
        }
        if let Some(workflow) = target.integration.setting("workflow_id") {
            build_params["workflow_id"] = workflow.into();
        }

        let triggered: TriggeredBuild = self
            .api
            .post_json(
                &format!("/apps/{app_slug}/builds"),
                &serde_json::json!({
                    "hook_info": { "type": "bitrise" },
                    "build_params": build_params,
                }),
            )
            .await?;

        Ok(TriggerReceipt {
            platform_build_id: triggered.build_slug,
            logs_url: triggered.build_url,
        })
    }

    async fn poll_status(&self, target: &BuildTarget<'_>) -> Result<PlatformStatus, PlatformError> {
        let app_slug = target.setting("app_slug")?;
        let slug = target.platform_build_id()?;
        let envelope: BuildEnvelope = self
            .api
            .get_json(&format!("/apps/{app_slug}/builds/{slug}"), &[])
            .await?;

        match envelope.data.status {
            0 => Ok(PlatformStatus::Running),
            1 => Ok(PlatformStatus::Success),
            2 => Ok(PlatformStatus::Failed),
            3 | 4 => Ok(PlatformStatus::Cancelled),
            other => Err(PlatformError::Malformed(format!("unknown bitrise status {other}"))),
        }
    }

    async fn fetch_logs(&self, target: &BuildTarget<'_>) -> Result<String, PlatformError> {
        let app_slug = target.setting("app_slug")?;
        let slug = target.platform_build_id()?;
        let info: LogInfo = self
            .api
            .get_json(&format!("/apps/{app_slug}/builds/{slug}/log"), &[])
            .await?;

        // Logs are only archived once the build finishes.
        match info.expiring_raw_log_url {
            Some(url) => self.api.get_text_unauthenticated(&url).await,
            None => Ok(String::new()),
        }
    }
}
