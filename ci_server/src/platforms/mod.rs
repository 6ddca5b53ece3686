//! CI platform adapters: trigger, poll and fetch logs on an external CI service.
//!
//! Each adapter speaks one platform's REST API. The registry maps the
//! integration's platform string to an adapter once per build run; a platform
//! without an adapter is a configuration error for that build.

pub mod bitrise;
pub mod circleci;
pub mod codemagic;
pub mod github_actions;
mod http;

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::CiConfig;
use crate::models::{Build, Integration, Repository};

pub(crate) use http::{http_client, REQUEST_TIMEOUT};

pub use bitrise::BitriseAdapter;
pub use circleci::CircleCiAdapter;
pub use codemagic::CodemagicAdapter;
pub use github_actions::GitHubActionsAdapter;

/// Platforms an integration may name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Platform {
    GithubActions,
    Codemagic,
    CircleCi,
    Bitrise,
    GitlabCi,
    AzureDevops,
    TravisCi,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GithubActions => "github_actions",
            Self::Codemagic => "codemagic",
            Self::CircleCi => "circleci",
            Self::Bitrise => "bitrise",
            Self::GitlabCi => "gitlab_ci",
            Self::AzureDevops => "azure_devops",
            Self::TravisCi => "travis_ci",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = PlatformError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "github_actions" => Ok(Self::GithubActions),
            "codemagic" => Ok(Self::Codemagic),
            "circleci" => Ok(Self::CircleCi),
            "bitrise" => Ok(Self::Bitrise),
            "gitlab_ci" => Ok(Self::GitlabCi),
            "azure_devops" => Ok(Self::AzureDevops),
            "travis_ci" => Ok(Self::TravisCi),
            _ => Err(PlatformError::Unsupported(s.to_string())),
        }
    }
}

/// Status reported by a platform for a triggered build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformStatus {
    Running,
    Success,
    Failed,
    Cancelled,
}

/// What a platform hands back when a build is accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerReceipt {
    pub platform_build_id: String,
    pub logs_url: Option<String>,
}

#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("unsupported platform '{0}'")]
    Unsupported(String),

    #[error("integration misconfigured: {0}")]
    Misconfigured(String),

    #[error("platform unreachable: {0}")]
    Transient(String),

    #[error("platform rejected request ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("unexpected platform response: {0}")]
    Malformed(String),
}

impl PlatformError {
    /// Worth polling again after a pause.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Everything an adapter may need to know about the build it drives.
#[derive(Debug, Clone, Copy)]
pub struct BuildTarget<'a> {
    pub build: &'a Build,
    pub repository: &'a Repository,
    pub integration: &'a Integration,
}

impl<'a> BuildTarget<'a> {
    /// Platform build id recorded at trigger time.
    pub fn platform_build_id(&self) -> Result<&'a str, PlatformError> {
        self.build.platform_build_id.as_deref().ok_or_else(|| {
            PlatformError::Malformed(format!("build {} was never triggered", self.build.id))
        })
    }

    /// Required integration setting.
    pub fn setting(&self, key: &str) -> Result<&'a str, PlatformError> {
        self.integration
            .setting(key)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| {
                PlatformError::Misconfigured(format!(
                    "{} integration {} has no '{key}' setting",
                    self.integration.platform, self.integration.id
                ))
            })
    }
}

#[async_trait]
pub trait PlatformAdapter: Send + Sync {
    fn platform(&self) -> Platform;

    /// Start a build. Errors mean the platform never accepted it.
    async fn trigger(&self, target: &BuildTarget<'_>) -> Result<TriggerReceipt, PlatformError>;

    async fn poll_status(&self, target: &BuildTarget<'_>) -> Result<PlatformStatus, PlatformError>;

    async fn fetch_logs(&self, target: &BuildTarget<'_>) -> Result<String, PlatformError>;
}

/// Adapters keyed by platform, built once at startup.
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: HashMap<Platform, Arc<dyn PlatformAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the adapters this server ships with.
    pub fn from_config(config: &CiConfig) -> Self {
        Self::new()
            .with(Arc::new(GitHubActionsAdapter::new(
                &config.github_api_url,
                &config.github_token,
            )))
            .with(Arc::new(CodemagicAdapter::new(
                codemagic::DEFAULT_API_URL,
                &config.codemagic_token,
            )))
            .with(Arc::new(CircleCiAdapter::new(
                circleci::DEFAULT_API_URL,
                &config.circleci_token,
            )))
            .with(Arc::new(BitriseAdapter::new(
                bitrise::DEFAULT_API_URL,
                &config.bitrise_token,
            )))
    }

    pub fn with(mut self, adapter: Arc<dyn PlatformAdapter>) -> Self {
        self.adapters.insert(adapter.platform(), adapter);
        self
    }

    /// Map an integration's platform string to its adapter.
    pub fn resolve(&self, platform: &str) -> Result<Arc<dyn PlatformAdapter>, PlatformError> {
        let parsed: Platform = platform.parse()?;
        self.adapters
            .get(&parsed)
            .cloned()
            .ok_or_else(|| PlatformError::Unsupported(platform.to_string()))
    }
}
