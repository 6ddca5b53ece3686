//! In-memory store backed by `HashMap`s behind one mutex.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{Store, StoreError, StoreResult};
use crate::models::{
    Build, BuildStatus, FixAttempt, FixAttemptStatus, Integration, NewBuild, NewFixAttempt,
    NewIntegration, NewRepository, Repository, TriggerKind,
};

#[derive(Debug, Default)]
struct Tables {
    next_id: i64,
    repositories: BTreeMap<i64, Repository>,
    repositories_by_name: HashMap<String, i64>,
    integrations: BTreeMap<i64, Integration>,
    builds: BTreeMap<i64, Build>,
    fix_attempts: BTreeMap<i64, FixAttempt>,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a repository. Re-registering a name replaces its settings.
    pub fn insert_repository(&self, new: NewRepository) -> StoreResult<Repository> {
        let mut tables = self.lock()?;
        let existing = tables.repositories_by_name.get(&new.full_name).copied();
        let id = match existing {
            Some(id) => id,
            None => tables.next_id(),
        };
        let repository = Repository {
            id,
            full_name: new.full_name.clone(),
            auto_fix_enabled: new.auto_fix_enabled,
            auto_fix_safe_only: new.auto_fix_safe_only,
            auto_fix_max_attempts: new.auto_fix_max_attempts,
            primary_branch: new.primary_branch,
            last_build_at: None,
        };
        tables.repositories_by_name.insert(new.full_name, id);
        tables.repositories.insert(id, repository.clone());
        Ok(repository)
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Tables>> {
        self.tables
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store mutex poisoned".to_string()))
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn find_repository(&self, full_name: &str) -> StoreResult<Option<Repository>> {
        let tables = self.lock()?;
        Ok(tables
            .repositories_by_name
            .get(full_name)
            .and_then(|id| tables.repositories.get(id))
            .cloned())
    }

    async fn get_repository(&self, id: i64) -> StoreResult<Option<Repository>> {
        Ok(self.lock()?.repositories.get(&id).cloned())
    }

    async fn record_repository_build(&self, id: i64, at: DateTime<Utc>) -> StoreResult<()> {
        let mut tables = self.lock()?;
        let repository = tables
            .repositories
            .get_mut(&id)
            .ok_or(StoreError::Missing { entity: "repository", id })?;
        repository.last_build_at = Some(at);
        Ok(())
    }

    async fn find_active_integration(
        &self,
        repository_id: i64,
    ) -> StoreResult<Option<Integration>> {
        Ok(self
            .lock()?
            .integrations
            .values()
            .find(|i| i.repository_id == repository_id && i.is_active)
            .cloned())
    }

    async fn get_integration(&self, id: i64) -> StoreResult<Option<Integration>> {
        Ok(self.lock()?.integrations.get(&id).cloned())
    }

    async fn create_integration(&self, new: NewIntegration) -> StoreResult<Integration> {
        let mut tables = self.lock()?;
        if !tables.repositories.contains_key(&new.repository_id) {
            return Err(StoreError::Missing {
                entity: "repository",
                id: new.repository_id,
            });
        }
        let id = tables.next_id();
        let integration = Integration {
            id,
            repository_id: new.repository_id,
            platform: new.platform,
            is_active: new.is_active,
            settings: new.settings,
            last_used_at: None,
        };
        tables.integrations.insert(id, integration.clone());
        Ok(integration)
    }

    async fn record_integration_use(&self, id: i64, at: DateTime<Utc>) -> StoreResult<()> {
        let mut tables = self.lock()?;
        let integration = tables
            .integrations
            .get_mut(&id)
            .ok_or(StoreError::Missing { entity: "integration", id })?;
        integration.last_used_at = Some(at);
        Ok(())
    }

    async fn create_build(&self, new: NewBuild) -> StoreResult<Build> {
        let mut tables = self.lock()?;
        let id = tables.next_id();
        let build = Build {
            id,
            repository_id: new.repository_id,
            integration_id: new.integration_id,
            branch: new.branch,
            commit_sha: new.commit_sha,
            platform_build_id: None,
            logs_url: None,
            pull_request_id: new.pull_request_id,
            trigger: new.trigger,
            status: BuildStatus::Pending,
            parent_build_id: new.parent_build_id,
            chain_id: new.chain_id.unwrap_or(id),
            started_at: None,
            finished_at: None,
            duration_ms: None,
            logs: None,
            error_logs: None,
            test_results: None,
            coverage_percentage: None,
            created_at: Utc::now(),
        };
        tables.builds.insert(id, build.clone());
        Ok(build)
    }

    async fn get_build(&self, id: i64) -> StoreResult<Option<Build>> {
        Ok(self.lock()?.builds.get(&id).cloned())
    }

    async fn update_build(&self, build: &Build) -> StoreResult<()> {
        let mut tables = self.lock()?;
        let slot = tables
            .builds
            .get_mut(&build.id)
            .ok_or(StoreError::Missing { entity: "build", id: build.id })?;
        *slot = build.clone();
        Ok(())
    }

    async fn repository_builds(&self, repository_id: i64) -> StoreResult<Vec<Build>> {
        Ok(self
            .lock()?
            .builds
            .values()
            .filter(|b| b.repository_id == repository_id)
            .cloned()
            .collect())
    }

    async fn count_chain_builds(&self, chain_id: i64, trigger: TriggerKind) -> StoreResult<usize> {
        Ok(self
            .lock()?
            .builds
            .values()
            .filter(|b| b.chain_id == chain_id && b.trigger == trigger)
            .count())
    }

    async fn create_fix_attempt(&self, new: NewFixAttempt) -> StoreResult<FixAttempt> {
        let mut tables = self.lock()?;
        let id = tables.next_id();
        let requires_approval = new.requires_approval();
        let attempt = FixAttempt {
            id,
            build_id: new.build_id,
            chain_id: new.chain_id,
            attempt_number: new.attempt_number,
            fix_type: new.fix_type,
            status: FixAttemptStatus::Pending,
            error_pattern: new.error_pattern,
            error_message: new.error_message,
            matched_text: new.matched_text,
            confidence_score: new.confidence_score,
            requires_approval,
            fix_suggestion: new.fix_suggestion,
            branch_name: None,
            pull_request_url: None,
            pull_request_number: None,
            changes_summary: None,
            notes: None,
            created_at: Utc::now(),
            applied_at: None,
            reverted_at: None,
        };
        tables.fix_attempts.insert(id, attempt.clone());
        Ok(attempt)
    }

    async fn get_fix_attempt(&self, id: i64) -> StoreResult<Option<FixAttempt>> {
        Ok(self.lock()?.fix_attempts.get(&id).cloned())
    }

    async fn update_fix_attempt(&self, attempt: &FixAttempt) -> StoreResult<()> {
        let mut tables = self.lock()?;
        let slot = tables
            .fix_attempts
            .get_mut(&attempt.id)
            .ok_or(StoreError::Missing { entity: "fix attempt", id: attempt.id })?;
        *slot = attempt.clone();
        Ok(())
    }

    async fn chain_fix_attempts(
        &self,
        chain_id: i64,
        error_pattern: &str,
    ) -> StoreResult<Vec<FixAttempt>> {
        Ok(self
            .lock()?
            .fix_attempts
            .values()
            .filter(|a| a.chain_id == chain_id && a.error_pattern == error_pattern)
            .cloned()
            .collect())
    }

    async fn build_fix_attempts(&self, build_id: i64) -> StoreResult<Vec<FixAttempt>> {
        Ok(self
            .lock()?
            .fix_attempts
            .values()
            .filter(|a| a.build_id == build_id)
            .cloned()
            .collect())
    }
}
