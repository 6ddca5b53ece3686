//! Remediation: turns a fix attempt into a fix branch and pull request.
//!
//! Strategies never touch the store; the fix-attempt manager records whatever
//! they return (or the reason they failed) on the attempt.

pub mod strategies;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{Build, FixAttempt, FixType, Repository};

pub use strategies::{ConfigFix, DependencyFix, EnvironmentFix, MissingFileFix};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequest {
    pub url: String,
    pub number: i64,
}

#[derive(Debug, Error)]
pub enum SourceControlError {
    #[error("source control credentials not configured")]
    NotConfigured,

    #[error("source control unreachable: {0}")]
    Unreachable(String),

    #[error("source control rejected request ({status}): {body}")]
    Rejected { status: u16, body: String },
}

/// Host that can branch a repository and open pull requests.
#[async_trait]
pub trait SourceControl: Send + Sync {
    async fn open_pull_request(
        &self,
        repo: &str,
        branch: &str,
        base: &str,
        title: &str,
        summary: &str,
    ) -> Result<PullRequest, SourceControlError>;
}

/// The failed build an attempt belongs to, plus where to open the fix.
pub struct RemediationContext<'a> {
    pub build: &'a Build,
    pub repository: &'a Repository,
    pub source_control: &'a dyn SourceControl,
}

impl RemediationContext<'_> {
    /// Fixes target the failed build's branch, else the repository default.
    pub fn base_branch(&self) -> Result<&str, RemediationError> {
        [self.build.branch.as_str(), self.repository.primary_branch.as_str()]
            .into_iter()
            .find(|b| !b.is_empty())
            .ok_or_else(|| {
                RemediationError::MissingContext(format!(
                    "build {} has no branch and {} has no primary branch",
                    self.build.id, self.repository.full_name
                ))
            })
    }
}

/// What a strategy produced.
#[derive(Debug, Clone, PartialEq)]
pub struct Remediation {
    pub branch_name: String,
    pub changes_summary: String,
    pub pull_request: PullRequest,
}

#[derive(Debug, Error)]
pub enum RemediationError {
    #[error(transparent)]
    SourceControl(#[from] SourceControlError),

    #[error("skipped: {0}")]
    Skipped(String),

    #[error("missing context: {0}")]
    MissingContext(String),
}

#[async_trait]
pub trait RemediationStrategy: Send + Sync {
    fn fix_type(&self) -> FixType;

    async fn apply(
        &self,
        attempt: &FixAttempt,
        ctx: &RemediationContext<'_>,
    ) -> Result<Remediation, RemediationError>;
}

/// Strategies keyed by the fix type they handle.
#[derive(Clone, Default)]
pub struct StrategySet {
    strategies: HashMap<FixType, Arc<dyn RemediationStrategy>>,
}

impl StrategySet {
    /// The strategies the server ships with.
    pub fn standard() -> Self {
        Self::default()
            .with(Arc::new(DependencyFix))
            .with(Arc::new(ConfigFix))
            .with(Arc::new(MissingFileFix))
            .with(Arc::new(EnvironmentFix))
    }

    pub fn with(mut self, strategy: Arc<dyn RemediationStrategy>) -> Self {
        self.strategies.insert(strategy.fix_type(), strategy);
        self
    }

    pub async fn apply(
        &self,
        attempt: &FixAttempt,
        ctx: &RemediationContext<'_>,
    ) -> Result<Remediation, RemediationError> {
        let strategy = self.strategies.get(&attempt.fix_type).ok_or_else(|| {
            RemediationError::Skipped(format!(
                "no remediation strategy for {}",
                attempt.fix_type
            ))
        })?;
        strategy.apply(attempt, ctx).await
    }
}
