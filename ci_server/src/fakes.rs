//! In-memory fakes for the platform and source-control collaborators (testing only)
//!
//! `ScriptedAdapter` plays back a fixed sequence of poll results and
//! `RecordingSourceControl` remembers every pull request it was asked to open.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::platforms::{
    BuildTarget, Platform, PlatformAdapter, PlatformError, PlatformStatus, TriggerReceipt,
};
use crate::remediation::{PullRequest, SourceControl, SourceControlError};

// ---------------------------------------------------------------------------
// ScriptedAdapter
// ---------------------------------------------------------------------------

/// Platform adapter whose answers are scripted up front.
///
/// Poll results are consumed in order; once the script runs out every poll
/// reports `Running`, which is how timeouts are provoked.
#[derive(Debug)]
pub struct ScriptedAdapter {
    platform: Platform,
    stalled: bool,
    trigger_error: Mutex<Option<String>>,
    polls: Mutex<VecDeque<Result<PlatformStatus, PlatformError>>>,
    logs: Mutex<String>,
    trigger_calls: AtomicUsize,
    poll_calls: AtomicUsize,
    log_calls: AtomicUsize,
}

impl ScriptedAdapter {
    pub fn new(platform: Platform) -> Self {
        Self {
            platform,
            stalled: false,
            trigger_error: Mutex::new(None),
            polls: Mutex::new(VecDeque::new()),
            logs: Mutex::new(String::new()),
            trigger_calls: AtomicUsize::new(0),
            poll_calls: AtomicUsize::new(0),
            log_calls: AtomicUsize::new(0),
        }
    }

    /// Reject every trigger with a 422 carrying `message`.
    pub fn reject_trigger(self, message: &str) -> Self {
        *self.trigger_error.lock().unwrap() = Some(message.to_string());
        self
    }

    /// Polls are counted but never answer.
    pub fn stall_polls(mut self) -> Self {
        self.stalled = true;
        self
    }

    pub fn then_status(self, status: PlatformStatus) -> Self {
        self.polls.lock().unwrap().push_back(Ok(status));
        self
    }

    pub fn then_error(self, error: PlatformError) -> Self {
        self.polls.lock().unwrap().push_back(Err(error));
        self
    }

    pub fn with_logs(self, logs: &str) -> Self {
        *self.logs.lock().unwrap() = logs.to_string();
        self
    }

    pub fn trigger_calls(&self) -> usize {
        self.trigger_calls.load(Ordering::SeqCst)
    }

    pub fn poll_calls(&self) -> usize {
        self.poll_calls.load(Ordering::SeqCst)
    }

    pub fn log_calls(&self) -> usize {
        self.log_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PlatformAdapter for ScriptedAdapter {
    fn platform(&self) -> Platform {
        self.platform
    }

    async fn trigger(&self, target: &BuildTarget<'_>) -> Result<TriggerReceipt, PlatformError> {
        self.trigger_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = self.trigger_error.lock().unwrap().clone() {
            return Err(PlatformError::Rejected {
                status: 422,
                body: message,
            });
        }
        Ok(TriggerReceipt {
            platform_build_id: format!("scripted-{}", target.build.id),
            logs_url: Some(format!("https://ci.example/builds/{}", target.build.id)),
        })
    }

    async fn poll_status(&self, _target: &BuildTarget<'_>) -> Result<PlatformStatus, PlatformError> {
        self.poll_calls.fetch_add(1, Ordering::SeqCst);
        if self.stalled {
            std::future::pending::<()>().await;
        }
        self.polls
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(PlatformStatus::Running))
    }

    async fn fetch_logs(&self, _target: &BuildTarget<'_>) -> Result<String, PlatformError> {
        self.log_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.logs.lock().unwrap().clone())
    }
}

// ---------------------------------------------------------------------------
// RecordingSourceControl
// ---------------------------------------------------------------------------

/// One `open_pull_request` call and what it returned.
#[derive(Debug, Clone, PartialEq)]
pub struct OpenedPullRequest {
    pub repo: String,
    pub branch: String,
    pub base: String,
    pub title: String,
    pub summary: String,
    pub pull_request: PullRequest,
}

/// Source control that records requests and numbers pull requests from 1.
///
/// Like GitHub, it refuses to open a second pull request from a branch it
/// already created.
#[derive(Debug, Default)]
pub struct RecordingSourceControl {
    opened: Mutex<Vec<OpenedPullRequest>>,
    failure: Option<fn() -> SourceControlError>,
}

impl RecordingSourceControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every request with the error `make` builds.
    pub fn failing(make: fn() -> SourceControlError) -> Self {
        Self {
            opened: Mutex::new(Vec::new()),
            failure: Some(make),
        }
    }

    pub fn opened(&self) -> Vec<OpenedPullRequest> {
        self.opened.lock().unwrap().clone()
    }
}

#[async_trait]
impl SourceControl for RecordingSourceControl {
    async fn open_pull_request(
        &self,
        repo: &str,
        branch: &str,
        base: &str,
        title: &str,
        summary: &str,
    ) -> Result<PullRequest, SourceControlError> {
        if let Some(make) = self.failure {
            return Err(make());
        }
        let mut opened = self.opened.lock().unwrap();
        if opened.iter().any(|pr| pr.repo == repo && pr.branch == branch) {
            return Err(SourceControlError::Rejected {
                status: 422,
                body: "Reference already exists".to_string(),
            });
        }
        let number = opened.len() as i64 + 1;
        let pull_request = PullRequest {
            url: format!("https://github.com/{repo}/pull/{number}"),
            number,
        };
        opened.push(OpenedPullRequest {
            repo: repo.to_string(),
            branch: branch.to_string(),
            base: base.to_string(),
            title: title.to_string(),
            summary: summary.to_string(),
            pull_request: pull_request.clone(),
        });
        Ok(pull_request)
    }
}
