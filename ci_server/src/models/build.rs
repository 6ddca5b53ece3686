//! Build: one CI run for a repository/branch, driven through an external platform.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Build lifecycle: `pending → running → {success | failed | cancelled | timeout}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildStatus {
    Pending,
    Running,
    Success,
    Failed,
    Cancelled,
    Timeout,
}

impl BuildStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Timeout => "timeout",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending | Self::Running)
    }

    /// Failed and timed-out builds are both handed to failure analysis.
    pub fn needs_analysis(&self) -> bool {
        matches!(self, Self::Failed | Self::Timeout)
    }
}

impl fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What caused a build to be created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    Push,
    PullRequest,
    Manual,
    Retry,
    AutoFix,
}

impl TriggerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Push => "push",
            Self::PullRequest => "pull_request",
            Self::Manual => "manual",
            Self::Retry => "retry",
            Self::AutoFix => "auto_fix",
        }
    }
}

impl fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Build {
    pub id: i64,
    pub repository_id: i64,
    pub integration_id: i64,
    pub branch: String,
    pub commit_sha: Option<String>,
    /// Build id assigned by the CI platform once triggered.
    pub platform_build_id: Option<String>,
    pub logs_url: Option<String>,
    pub pull_request_id: Option<i64>,
    pub trigger: TriggerKind,
    pub status: BuildStatus,
    /// Build this one retries or follows up on.
    pub parent_build_id: Option<i64>,
    /// Root build of the retry chain; equals `id` for root builds.
    pub chain_id: i64,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub logs: Option<String>,
    pub error_logs: Option<String>,
    pub test_results: Option<serde_json::Value>,
    pub coverage_percentage: Option<i32>,
    pub created_at: DateTime<Utc>,
}

impl Build {
    /// Mark the build as running. Returns `false` if it was not pending.
    pub fn start(&mut self, at: DateTime<Utc>) -> bool {
        if self.status != BuildStatus::Pending {
            return false;
        }
        self.status = BuildStatus::Running;
        self.started_at = Some(at);
        true
    }

    /// Move the build to a terminal status and derive its duration.
    ///
    /// Returns `false` without touching anything if the build already finished.
    pub fn finish(&mut self, status: BuildStatus, at: DateTime<Utc>) -> bool {
        debug_assert!(status.is_terminal());
        if self.status.is_terminal() || self.finished_at.is_some() {
            return false;
        }
        self.status = status;
        self.finished_at = Some(at);
        self.duration_ms = self
            .started_at
            .map(|started| (at - started).num_milliseconds());
        true
    }

    /// Text handed to failure analysis: platform logs followed by the error log.
    pub fn analysis_text(&self) -> String {
        let mut text = self.logs.clone().unwrap_or_default();
        if let Some(errors) = self.error_logs.as_deref().filter(|e| !e.is_empty()) {
            if !text.is_empty() {
                text.push('\n');
            }
            text.push_str(errors);
        }
        text
    }
}

/// Insertable build. `chain_id = None` starts a new chain rooted at the new build.
#[derive(Debug, Clone)]
pub struct NewBuild {
    pub repository_id: i64,
    pub integration_id: i64,
    pub branch: String,
    pub commit_sha: Option<String>,
    pub pull_request_id: Option<i64>,
    pub trigger: TriggerKind,
    pub parent_build_id: Option<i64>,
    pub chain_id: Option<i64>,
}

impl NewBuild {
    /// A build that continues the chain of `parent` on another branch or commit.
    pub fn follow_up(parent: &Build, branch: impl Into<String>, trigger: TriggerKind) -> Self {
        Self {
            repository_id: parent.repository_id,
            integration_id: parent.integration_id,
            branch: branch.into(),
            commit_sha: None,
            pull_request_id: None,
            trigger,
            parent_build_id: Some(parent.id),
            chain_id: Some(parent.chain_id),
        }
    }
}
