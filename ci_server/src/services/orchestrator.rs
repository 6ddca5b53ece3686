//! Build orchestrator: drives one build through its CI platform.
//!
//! `pending → running → {success | failed | cancelled | timeout}`. The build's
//! lock is held only while its record is read, checked and written, never
//! across a poll sleep, so `cancel` can land while a poll loop is running. The
//! loop notices on its next iteration and stops without touching the build.
//!
//! Every platform call runs under `PollConfig::call_timeout`; a call that
//! overruns counts as a transient error, so a silent platform costs at most
//! the poll budget.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;

use crate::config::{PollConfig, MIN_POLL_INTERVAL};
use crate::error::{PipelineError, Result};
use crate::models::{Build, BuildStatus, Integration, NewBuild, Repository, TriggerKind};
use crate::platforms::{
    AdapterRegistry, BuildTarget, PlatformAdapter, PlatformError, PlatformStatus,
};
use crate::services::build_service;
use crate::store::Store;
use crate::worker::{Job, JobQueue, KeyedLocks};

/// How a call to `run` ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "status", rename_all = "snake_case")]
pub enum RunOutcome {
    /// The build was not pending; nothing was done.
    NotPending(BuildStatus),
    /// The build reached this terminal status during the run.
    Finished(BuildStatus),
    /// The build was cancelled from outside while the run was in flight.
    Abandoned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "status", rename_all = "snake_case")]
pub enum CancelOutcome {
    Cancelled,
    AlreadyFinished(BuildStatus),
}

/// Final state to write on a running build.
struct Conclusion {
    status: BuildStatus,
    logs: Option<String>,
    error_logs: Option<String>,
    /// Hand the build to failure analysis afterwards.
    analyze: bool,
}

impl Conclusion {
    fn failed(error: String) -> Self {
        Self {
            status: BuildStatus::Failed,
            logs: None,
            error_logs: Some(error),
            analyze: true,
        }
    }
}

pub struct BuildOrchestrator {
    store: Arc<dyn Store>,
    adapters: AdapterRegistry,
    queue: JobQueue,
    poll: PollConfig,
    locks: KeyedLocks<i64>,
}

impl BuildOrchestrator {
    pub fn new(
        store: Arc<dyn Store>,
        adapters: AdapterRegistry,
        queue: JobQueue,
        poll: PollConfig,
    ) -> Self {
        Self {
            store,
            adapters,
            queue,
            poll,
            locks: KeyedLocks::new(),
        }
    }

    /// Run a pending build to a terminal status. Re-running any other build is a no-op.
    pub async fn run(&self, build_id: i64) -> Result<RunOutcome> {
        let build = {
            let _guard = self.locks.lock(build_id).await;
            let mut build = build_service::get_build(&*self.store, build_id).await?;
            if !build.start(Utc::now()) {
                tracing::info!(build_id, status = %build.status, "Build is not pending, skipping");
                return Ok(RunOutcome::NotPending(build.status));
            }
            build_service::save_status(&*self.store, &build).await?;
            build
        };
        tracing::info!(build_id, branch = %build.branch, trigger = %build.trigger, "Build started");

        let repository = self.store.get_repository(build.repository_id).await?;
        let integration = self.store.get_integration(build.integration_id).await?;
        let (Some(repository), Some(integration)) = (repository, integration) else {
            let message = format!(
                "configuration error: repository {} or integration {} no longer exists",
                build.repository_id, build.integration_id
            );
            return self.conclude_unrecoverable(build_id, message).await;
        };

        let adapter = match self.adapters.resolve(&integration.platform) {
            Ok(adapter) => adapter,
            Err(e) => {
                tracing::error!(build_id, platform = %integration.platform, "No adapter for platform");
                return self
                    .conclude_unrecoverable(build_id, format!("configuration error: {e}"))
                    .await;
            }
        };

        self.drive(build, &repository, &integration, adapter.as_ref()).await
    }

    async fn drive(
        &self,
        mut build: Build,
        repository: &Repository,
        integration: &Integration,
        adapter: &dyn PlatformAdapter,
    ) -> Result<RunOutcome> {
        let build_id = build.id;
        let platform = adapter.platform();

        let receipt = {
            let target = BuildTarget { build: &build, repository, integration };
            match self.bounded("trigger", adapter.trigger(&target)).await {
                Ok(receipt) => receipt,
                Err(e) => {
                    tracing::error!(build_id, %platform, error = %e, "Trigger failed");
                    return self.conclude(build_id, Conclusion::failed(e.to_string())).await;
                }
            }
        };

        {
            let _guard = self.locks.lock(build_id).await;
            let mut current = build_service::get_build(&*self.store, build_id).await?;
            if current.status.is_terminal() {
                return Ok(RunOutcome::Abandoned);
            }
            current.platform_build_id = Some(receipt.platform_build_id.clone());
            current.logs_url = receipt.logs_url.clone();
            self.store.update_build(&current).await?;
            build = current;
        }
        tracing::info!(
            build_id,
            %platform,
            platform_build_id = %receipt.platform_build_id,
            "Build triggered"
        );

        let target = BuildTarget { build: &build, repository, integration };
        let mut delay = self.poll.interval;
        for poll in 1..=self.poll.max_polls {
            tokio::time::sleep(delay).await;

            let current = build_service::get_build(&*self.store, build_id).await?;
            if current.status.is_terminal() {
                tracing::info!(build_id, status = %current.status, "Build finished elsewhere, polling stopped");
                return Ok(RunOutcome::Abandoned);
            }

            let status = match self.bounded("status poll", adapter.poll_status(&target)).await {
                Ok(status) => status,
                Err(e) if e.is_transient() => {
                    delay = backoff(delay, self.poll.backoff_max);
                    tracing::warn!(build_id, %platform, poll, error = %e, retry_in = ?delay, "Transient poll error");
                    continue;
                }
                Err(e) => {
                    tracing::error!(build_id, %platform, poll, error = %e, "Poll failed");
                    return self.conclude(build_id, Conclusion::failed(e.to_string())).await;
                }
            };
            delay = self.poll.interval;

            match status {
                PlatformStatus::Running => {
                    tracing::debug!(build_id, poll, "Build still running");
                }
                PlatformStatus::Success => {
                    let logs = self.collect_logs(adapter, &target).await;
                    let outcome = self
                        .conclude(
                            build_id,
                            Conclusion {
                                status: BuildStatus::Success,
                                logs: logs.ok(),
                                error_logs: None,
                                analyze: false,
                            },
                        )
                        .await?;
                    if outcome == RunOutcome::Finished(BuildStatus::Success) {
                        let at = Utc::now();
                        self.store.record_repository_build(repository.id, at).await?;
                        self.store.record_integration_use(integration.id, at).await?;
                    }
                    return Ok(outcome);
                }
                PlatformStatus::Failed => {
                    let (logs, error_logs) = match self.collect_logs(adapter, &target).await {
                        Ok(logs) => (Some(logs), None),
                        Err(e) => (None, Some(format!("log retrieval failed: {e}"))),
                    };
                    return self
                        .conclude(
                            build_id,
                            Conclusion {
                                status: BuildStatus::Failed,
                                logs,
                                error_logs,
                                analyze: true,
                            },
                        )
                        .await;
                }
                PlatformStatus::Cancelled => {
                    return self
                        .conclude(
                            build_id,
                            Conclusion {
                                status: BuildStatus::Cancelled,
                                logs: None,
                                error_logs: Some(format!("cancelled on {platform}")),
                                analyze: false,
                            },
                        )
                        .await;
                }
            }
        }

        tracing::warn!(build_id, %platform, max_polls = self.poll.max_polls, "Poll budget exhausted");
        crate::metrics::poll_timeout(platform.as_str());
        let logs = self.collect_logs(adapter, &target).await.ok();
        self.conclude(
            build_id,
            Conclusion {
                status: BuildStatus::Timeout,
                logs,
                error_logs: Some(format!(
                    "build did not finish within {} polls",
                    self.poll.max_polls
                )),
                analyze: true,
            },
        )
        .await
    }

    async fn collect_logs(
        &self,
        adapter: &dyn PlatformAdapter,
        target: &BuildTarget<'_>,
    ) -> std::result::Result<String, PlatformError> {
        self.bounded("log fetch", adapter.fetch_logs(target))
            .await
            .inspect_err(|e| {
                tracing::warn!(build_id = target.build.id, error = %e, "Could not fetch build logs");
            })
    }

    async fn bounded<T>(
        &self,
        call: &str,
        fut: impl Future<Output = std::result::Result<T, PlatformError>>,
    ) -> std::result::Result<T, PlatformError> {
        let limit = self.poll.call_timeout;
        tokio::time::timeout(limit, fut).await.unwrap_or_else(|_| {
            Err(PlatformError::Transient(format!(
                "{call} timed out after {}s",
                limit.as_secs()
            )))
        })
    }

    /// Fail a build that can never succeed as configured. No analysis, no retry.
    async fn conclude_unrecoverable(&self, build_id: i64, message: String) -> Result<RunOutcome> {
        self.conclude(
            build_id,
            Conclusion {
                analyze: false,
                ..Conclusion::failed(message)
            },
        )
        .await
    }

    async fn conclude(&self, build_id: i64, conclusion: Conclusion) -> Result<RunOutcome> {
        {
            let _guard = self.locks.lock(build_id).await;
            let mut build = build_service::get_build(&*self.store, build_id).await?;
            if build.status.is_terminal() {
                return Ok(RunOutcome::Abandoned);
            }
            if conclusion.logs.is_some() {
                build.logs = conclusion.logs;
            }
            if conclusion.error_logs.is_some() {
                build.error_logs = conclusion.error_logs;
            }
            build.finish(conclusion.status, Utc::now());
            build_service::save_status(&*self.store, &build).await?;
        }

        if conclusion.analyze {
            self.queue.enqueue(Job::RemediateFailure(build_id))?;
        }
        Ok(RunOutcome::Finished(conclusion.status))
    }

    /// Cancel a build that has not finished yet.
    pub async fn cancel(&self, build_id: i64) -> Result<CancelOutcome> {
        let _guard = self.locks.lock(build_id).await;
        let mut build = build_service::get_build(&*self.store, build_id).await?;
        if !build.finish(BuildStatus::Cancelled, Utc::now()) {
            return Ok(CancelOutcome::AlreadyFinished(build.status));
        }
        build_service::save_status(&*self.store, &build).await?;
        tracing::info!(build_id, "Build cancelled");
        Ok(CancelOutcome::Cancelled)
    }

    /// Start a fresh build of the same commit in the same chain.
    pub async fn retry(&self, build_id: i64) -> Result<Build> {
        let build = build_service::get_build(&*self.store, build_id).await?;
        if !matches!(
            build.status,
            BuildStatus::Failed | BuildStatus::Timeout | BuildStatus::Cancelled
        ) {
            return Err(PipelineError::InvalidTransition {
                entity: "build",
                id: build_id,
                from: build.status.to_string(),
                to: "retry".to_string(),
            });
        }

        let mut new_build = NewBuild::follow_up(&build, build.branch.clone(), TriggerKind::Retry);
        new_build.commit_sha = build.commit_sha.clone();
        new_build.pull_request_id = build.pull_request_id;

        let retry = build_service::create_build(&*self.store, &self.queue, new_build).await?;
        tracing::info!(build_id, retry_build_id = retry.id, "Build retried");
        Ok(retry)
    }

    /// Retry every failed or timed-out build of a repository that has no follow-up yet.
    ///
    /// A build already retried or auto-fixed is skipped, so calling this twice
    /// in a row retries nothing the second time.
    pub async fn retry_failed(&self, repository_id: i64) -> Result<Vec<Build>> {
        if self.store.get_repository(repository_id).await?.is_none() {
            return Err(PipelineError::NotFound {
                entity: "repository",
                id: repository_id,
            });
        }

        let builds = self.store.repository_builds(repository_id).await?;
        let followed_up: HashSet<i64> = builds.iter().filter_map(|b| b.parent_build_id).collect();

        let mut retried = Vec::new();
        for build in builds.iter().filter(|b| {
            matches!(b.status, BuildStatus::Failed | BuildStatus::Timeout)
                && !followed_up.contains(&b.id)
        }) {
            match self.retry(build.id).await {
                Ok(retry) => retried.push(retry),
                Err(PipelineError::InvalidTransition { .. }) => {
                    tracing::debug!(build_id = build.id, "Build changed state, not retried");
                }
                Err(e) => return Err(e),
            }
        }

        tracing::info!(repository_id, retried = retried.len(), "Failed builds retried");
        Ok(retried)
    }
}

fn backoff(current: Duration, max: Duration) -> Duration {
    current
        .max(MIN_POLL_INTERVAL)
        .saturating_mul(2)
        .min(max.max(MIN_POLL_INTERVAL))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_up_to_the_cap() {
        let max = Duration::from_secs(60);
        assert_eq!(backoff(Duration::from_secs(10), max), Duration::from_secs(20));
        assert_eq!(backoff(Duration::from_secs(40), max), max);
        assert_eq!(backoff(max, max), max);
    }

    #[test]
    fn backoff_never_stays_at_zero() {
        let max = Duration::from_secs(60);
        assert_eq!(backoff(Duration::ZERO, max), Duration::from_secs(2));
        assert_eq!(backoff(Duration::ZERO, Duration::ZERO), MIN_POLL_INTERVAL);
        assert!(backoff(Duration::from_millis(1), max) >= MIN_POLL_INTERVAL);
    }
}
