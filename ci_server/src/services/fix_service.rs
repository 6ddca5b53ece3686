//! Fix-attempt manager: turns a failed build into gated, bounded remediation.
//!
//! `pending → {applied | failed | cancelled}`, `applied → reverted`.
//!
//! All bookkeeping for a retry chain happens under that chain's lock:
//! recording candidates (dedupe plus attempt numbering) and remediation
//! (bound check, pull request, follow-up build). Two failures in the same
//! chain therefore never race each other past the dedupe check or the bound.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;

use crate::error::{PipelineError, Result};
use crate::models::{
    Build, FixAttempt, FixAttemptStatus, NewBuild, NewFixAttempt, Repository, TriggerKind,
};
use crate::remediation::{RemediationContext, SourceControl, StrategySet};
use crate::services::analyzer::{self, FixCandidate};
use crate::services::build_service;
use crate::store::Store;
use crate::worker::{Job, JobQueue, KeyedLocks};

/// What `record_candidates` did with a batch of candidates.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct RecordReport {
    pub created: Vec<FixAttempt>,
    /// Candidates dropped because their pattern already has an open attempt in the chain.
    pub deduplicated: usize,
}

/// Summary of one `process_failure` run.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct FailureReport {
    pub build_id: i64,
    pub candidates: usize,
    pub deduplicated: usize,
    pub created: Vec<i64>,
    pub applied: Vec<i64>,
    /// Attempts left pending for a human (approval, safe-only policy or bound).
    pub held: Vec<i64>,
    pub failed: Vec<i64>,
    pub follow_up_builds: Vec<i64>,
}

enum Remediated {
    Applied { follow_up_build_id: i64 },
    Failed,
}

pub struct FixAttemptManager {
    store: Arc<dyn Store>,
    strategies: StrategySet,
    source_control: Arc<dyn SourceControl>,
    queue: JobQueue,
    default_max_attempts: u32,
    chain_locks: KeyedLocks<i64>,
}

impl FixAttemptManager {
    pub fn new(
        store: Arc<dyn Store>,
        strategies: StrategySet,
        source_control: Arc<dyn SourceControl>,
        queue: JobQueue,
        default_max_attempts: u32,
    ) -> Self {
        Self {
            store,
            strategies,
            source_control,
            queue,
            default_max_attempts,
            chain_locks: KeyedLocks::new(),
        }
    }

    /// Analyze a failed or timed-out build, record its fix attempts and apply the ungated ones.
    pub async fn process_failure(&self, build_id: i64) -> Result<FailureReport> {
        let build = build_service::get_build(&*self.store, build_id).await?;
        if !build.status.needs_analysis() {
            return Err(PipelineError::InvalidTransition {
                entity: "build",
                id: build_id,
                from: build.status.to_string(),
                to: "analysis".to_string(),
            });
        }
        let repository = self.repository(build.repository_id).await?;

        let candidates = analyzer::analyze(&build.analysis_text());
        let mut report = FailureReport {
            build_id,
            candidates: candidates.len(),
            ..FailureReport::default()
        };
        if candidates.is_empty() {
            tracing::info!(build_id, "No known failure pattern in build logs");
            return Ok(report);
        }

        let recorded = self.record_candidates(&build, &candidates).await?;
        report.deduplicated = recorded.deduplicated;

        for mut attempt in recorded.created {
            report.created.push(attempt.id);

            if let Some(reason) = hold_reason(&attempt, &repository) {
                tracing::info!(attempt_id = attempt.id, build_id, reason, "Fix attempt awaiting approval");
                attempt.append_note(&format!("Awaiting approval: {reason}"));
                self.store.update_fix_attempt(&attempt).await?;
                report.held.push(attempt.id);
                continue;
            }

            match self.remediate(attempt.id, &build, &repository).await {
                Ok(Remediated::Applied { follow_up_build_id }) => {
                    report.applied.push(attempt.id);
                    report.follow_up_builds.push(follow_up_build_id);
                }
                Ok(Remediated::Failed) => report.failed.push(attempt.id),
                Err(PipelineError::BoundReached { chain_id, limit }) => {
                    tracing::warn!(
                        attempt_id = attempt.id,
                        chain_id,
                        limit,
                        "Auto-fix bound reached, leaving attempt pending"
                    );
                    report.held.push(attempt.id);
                }
                Err(e) => return Err(e),
            }
        }

        tracing::info!(
            build_id,
            candidates = report.candidates,
            created = report.created.len(),
            deduplicated = report.deduplicated,
            applied = report.applied.len(),
            held = report.held.len(),
            failed = report.failed.len(),
            "Failure processed"
        );
        Ok(report)
    }

    /// Create one pending attempt per candidate whose pattern has no open attempt in the chain.
    ///
    /// Calling this twice with the same candidates creates nothing the second time.
    pub async fn record_candidates(
        &self,
        build: &Build,
        candidates: &[FixCandidate],
    ) -> Result<RecordReport> {
        let _guard = self.chain_locks.lock(build.chain_id).await;
        let mut report = RecordReport::default();

        for candidate in candidates {
            let prior = self
                .store
                .chain_fix_attempts(build.chain_id, candidate.rule_name)
                .await?;
            if prior.iter().any(|a| a.status.is_open()) {
                tracing::debug!(
                    build_id = build.id,
                    pattern = candidate.rule_name,
                    "Open fix attempt already exists in chain"
                );
                report.deduplicated += 1;
                continue;
            }

            let attempt = self
                .store
                .create_fix_attempt(NewFixAttempt {
                    build_id: build.id,
                    chain_id: build.chain_id,
                    attempt_number: prior.len() as u32 + 1,
                    fix_type: candidate.fix_type,
                    error_pattern: candidate.rule_name.to_string(),
                    error_message: candidate.error_message.clone(),
                    matched_text: candidate.matched_text.clone(),
                    confidence_score: candidate.confidence,
                    fix_suggestion: Some(candidate.suggestion.clone()),
                })
                .await?;

            crate::metrics::fix_attempt_status_changed(
                attempt.fix_type.as_str(),
                attempt.status.as_str(),
            );
            tracing::info!(
                attempt_id = attempt.id,
                build_id = build.id,
                pattern = %attempt.error_pattern,
                fix_type = %attempt.fix_type,
                confidence = attempt.confidence_score,
                attempt_number = attempt.attempt_number,
                line = candidate.line_number,
                "Fix attempt recorded"
            );
            report.created.push(attempt);
        }

        Ok(report)
    }

    /// Accept an approval and leave the remediation to the `fixes` queue.
    ///
    /// Fails fast when the attempt is missing, no longer pending, or its chain
    /// has no follow-up builds left.
    pub async fn request_approval(&self, attempt_id: i64) -> Result<FixAttempt> {
        let attempt = self.attempt(attempt_id).await?;
        if attempt.status != FixAttemptStatus::Pending {
            return Err(invalid_transition(&attempt, FixAttemptStatus::Applied));
        }
        let build = build_service::get_build(&*self.store, attempt.build_id).await?;
        let repository = self.repository(build.repository_id).await?;
        self.check_bound(&build, &repository).await?;

        self.queue.enqueue(Job::ApproveFix(attempt_id))?;
        tracing::info!(attempt_id, build_id = build.id, "Fix attempt approval queued");
        Ok(attempt)
    }

    /// Apply a pending attempt on a human's say-so. The chain bound still applies.
    pub async fn approve(&self, attempt_id: i64) -> Result<FixAttempt> {
        let attempt = self.attempt(attempt_id).await?;
        let build = build_service::get_build(&*self.store, attempt.build_id).await?;
        let repository = self.repository(build.repository_id).await?;

        tracing::info!(attempt_id, build_id = build.id, "Fix attempt approved");
        self.remediate(attempt_id, &build, &repository).await?;
        self.attempt(attempt_id).await
    }

    pub async fn cancel(&self, attempt_id: i64) -> Result<FixAttempt> {
        self.transition(attempt_id, FixAttemptStatus::Pending, FixAttemptStatus::Cancelled, |a| {
            a.status = FixAttemptStatus::Cancelled;
        })
        .await
    }

    /// Mark an applied fix as reverted. Closing its pull request is left to the reviewer.
    pub async fn revert(&self, attempt_id: i64) -> Result<FixAttempt> {
        self.transition(attempt_id, FixAttemptStatus::Applied, FixAttemptStatus::Reverted, |a| {
            a.mark_reverted(Utc::now());
        })
        .await
    }

    async fn transition(
        &self,
        attempt_id: i64,
        from: FixAttemptStatus,
        to: FixAttemptStatus,
        apply: impl FnOnce(&mut FixAttempt),
    ) -> Result<FixAttempt> {
        let chain_id = self.attempt(attempt_id).await?.chain_id;
        let _guard = self.chain_locks.lock(chain_id).await;

        let mut attempt = self.attempt(attempt_id).await?;
        if attempt.status != from {
            return Err(invalid_transition(&attempt, to));
        }
        apply(&mut attempt);
        self.store.update_fix_attempt(&attempt).await?;

        crate::metrics::fix_attempt_status_changed(attempt.fix_type.as_str(), to.as_str());
        tracing::info!(attempt_id, status = %to, "Fix attempt updated");
        Ok(attempt)
    }

    /// Run the strategy for a pending attempt and schedule the follow-up build.
    async fn remediate(
        &self,
        attempt_id: i64,
        build: &Build,
        repository: &Repository,
    ) -> Result<Remediated> {
        let _guard = self.chain_locks.lock(build.chain_id).await;

        let mut attempt = self.attempt(attempt_id).await?;
        if attempt.status != FixAttemptStatus::Pending {
            return Err(invalid_transition(&attempt, FixAttemptStatus::Applied));
        }

        self.check_bound(build, repository).await?;

        let ctx = RemediationContext {
            build,
            repository,
            source_control: self.source_control.as_ref(),
        };
        let remediation = match self.strategies.apply(&attempt, &ctx).await {
            Ok(remediation) => remediation,
            Err(e) => {
                tracing::warn!(attempt_id, fix_type = %attempt.fix_type, error = %e, "Remediation failed");
                attempt.mark_failed(&e.to_string());
                self.store.update_fix_attempt(&attempt).await?;
                crate::metrics::fix_attempt_status_changed(
                    attempt.fix_type.as_str(),
                    attempt.status.as_str(),
                );
                return Ok(Remediated::Failed);
            }
        };

        attempt.branch_name = Some(remediation.branch_name.clone());
        attempt.pull_request_url = Some(remediation.pull_request.url.clone());
        attempt.pull_request_number = Some(remediation.pull_request.number);
        attempt.changes_summary = Some(remediation.changes_summary);
        attempt.mark_applied(Utc::now());
        self.store.update_fix_attempt(&attempt).await?;
        crate::metrics::fix_attempt_status_changed(attempt.fix_type.as_str(), attempt.status.as_str());

        let follow_up = build_service::create_build(
            &*self.store,
            &self.queue,
            NewBuild::follow_up(build, remediation.branch_name, TriggerKind::AutoFix),
        )
        .await?;

        tracing::info!(
            attempt_id,
            build_id = build.id,
            follow_up_build_id = follow_up.id,
            pull_request = %remediation.pull_request.url,
            "Fix applied, follow-up build scheduled"
        );
        Ok(Remediated::Applied {
            follow_up_build_id: follow_up.id,
        })
    }

    async fn check_bound(&self, build: &Build, repository: &Repository) -> Result<()> {
        let limit = repository
            .auto_fix_max_attempts
            .unwrap_or(self.default_max_attempts);
        let used = self
            .store
            .count_chain_builds(build.chain_id, TriggerKind::AutoFix)
            .await?;
        if used >= limit as usize {
            return Err(PipelineError::BoundReached {
                chain_id: build.chain_id,
                limit,
            });
        }
        Ok(())
    }

    async fn attempt(&self, attempt_id: i64) -> Result<FixAttempt> {
        self.store
            .get_fix_attempt(attempt_id)
            .await?
            .ok_or(PipelineError::NotFound {
                entity: "fix attempt",
                id: attempt_id,
            })
    }

    async fn repository(&self, repository_id: i64) -> Result<Repository> {
        self.store
            .get_repository(repository_id)
            .await?
            .ok_or(PipelineError::NotFound {
                entity: "repository",
                id: repository_id,
            })
    }
}

/// Why an attempt must wait for a human, if it must.
fn hold_reason(attempt: &FixAttempt, repository: &Repository) -> Option<&'static str> {
    if attempt.requires_approval {
        Some("confidence below approval threshold")
    } else if repository.auto_fix_safe_only && !attempt.fix_type.is_safe() {
        Some("fix type not allowed by safe-only policy")
    } else {
        None
    }
}

fn invalid_transition(attempt: &FixAttempt, to: FixAttemptStatus) -> PipelineError {
    PipelineError::InvalidTransition {
        entity: "fix attempt",
        id: attempt.id,
        from: attempt.status.to_string(),
        to: to.to_string(),
    }
}
