//! Dispatcher: resolves the repository and integration for an event and creates its build.

use std::sync::Arc;

use serde::Serialize;

use crate::error::Result;
use crate::models::{Integration, NewBuild, NewIntegration, Repository, TriggerKind};
use crate::services::build_service;
use crate::services::ingest_service::{EventKind, NormalizedEvent};
use crate::store::Store;
use crate::worker::JobQueue;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DispatchOutcome {
    Created { build_id: i64 },
    Skipped { reason: String },
    NotRegistered { repository: String },
}

/// Where a new build should run.
struct BuildRequest {
    branch: String,
    commit_sha: Option<String>,
    pull_request_id: Option<i64>,
    trigger: TriggerKind,
}

pub struct Dispatcher {
    store: Arc<dyn Store>,
    queue: JobQueue,
}

impl Dispatcher {
    pub fn new(store: Arc<dyn Store>, queue: JobQueue) -> Self {
        Self { store, queue }
    }

    pub async fn dispatch(&self, event: &NormalizedEvent) -> Result<DispatchOutcome> {
        let Some(repository) = self.store.find_repository(&event.repository).await? else {
            tracing::debug!(repository = %event.repository, "No repository registered");
            return Ok(DispatchOutcome::NotRegistered {
                repository: event.repository.clone(),
            });
        };

        if !repository.auto_fix_enabled {
            return Ok(skipped(format!(
                "auto-fix is disabled for {}",
                repository.full_name
            )));
        }

        let request = match &event.kind {
            EventKind::Push(push) => {
                if push.deleted {
                    return Ok(skipped("push deleted the branch".to_string()));
                }
                let Some(branch) = push.branch.clone() else {
                    return Ok(skipped("push has no branch (tag push)".to_string()));
                };
                BuildRequest {
                    branch,
                    commit_sha: push.head_commit.clone(),
                    pull_request_id: None,
                    trigger: TriggerKind::Push,
                }
            }
            EventKind::PullRequest(pr) => BuildRequest {
                branch: pr.head_branch.clone(),
                commit_sha: pr.head_sha.clone(),
                pull_request_id: Some(pr.number),
                trigger: TriggerKind::PullRequest,
            },
            EventKind::Ignored { event, reason } => {
                return Ok(skipped(format!("{event}: {reason}")));
            }
            EventKind::Opaque { event, .. } => {
                return Ok(skipped(format!("{event} events do not start builds")));
            }
        };

        self.create(&repository, request).await
    }

    /// Start a build on request, regardless of the repository's auto-fix setting.
    ///
    /// An empty branch builds the repository's primary branch.
    pub async fn trigger_manual(
        &self,
        full_name: &str,
        branch: &str,
        commit_sha: Option<String>,
    ) -> Result<DispatchOutcome> {
        let Some(repository) = self.store.find_repository(full_name).await? else {
            return Ok(DispatchOutcome::NotRegistered {
                repository: full_name.to_string(),
            });
        };

        let branch = if branch.trim().is_empty() {
            repository.primary_branch.clone()
        } else {
            branch.trim().to_string()
        };

        self.create(
            &repository,
            BuildRequest {
                branch,
                commit_sha,
                pull_request_id: None,
                trigger: TriggerKind::Manual,
            },
        )
        .await
    }

    async fn create(&self, repository: &Repository, request: BuildRequest) -> Result<DispatchOutcome> {
        let integration = self.resolve_integration(repository).await?;

        let build = build_service::create_build(
            &*self.store,
            &self.queue,
            NewBuild {
                repository_id: repository.id,
                integration_id: integration.id,
                branch: request.branch,
                commit_sha: request.commit_sha,
                pull_request_id: request.pull_request_id,
                trigger: request.trigger,
                parent_build_id: None,
                chain_id: None,
            },
        )
        .await?;

        Ok(DispatchOutcome::Created { build_id: build.id })
    }

    /// Active integration, or a default GitHub Actions one provisioned on the spot.
    async fn resolve_integration(&self, repository: &Repository) -> Result<Integration> {
        if let Some(integration) = self.store.find_active_integration(repository.id).await? {
            return Ok(integration);
        }

        let integration = self
            .store
            .create_integration(NewIntegration::github_actions_default(repository.id))
            .await?;
        tracing::info!(
            repository = %repository.full_name,
            integration_id = integration.id,
            "Provisioned default GitHub Actions integration"
        );
        Ok(integration)
    }
}

fn skipped(reason: String) -> DispatchOutcome {
    tracing::debug!(%reason, "Event skipped");
    DispatchOutcome::Skipped { reason }
}
