//! Persistence contract for pipeline records.
//!
//! The store is the only shared mutable state in the pipeline. Lookups return
//! `Option` so a missing record is never an error; `StoreError` is reserved for
//! backend failures.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::models::{
    Build, FixAttempt, Integration, NewBuild, NewFixAttempt, NewIntegration, Repository,
    TriggerKind,
};

pub use memory::MemoryStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("{entity} {id} does not exist")]
    Missing { entity: &'static str, id: i64 },
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait Store: Send + Sync {
    // ── Repositories & integrations ──

    async fn find_repository(&self, full_name: &str) -> StoreResult<Option<Repository>>;

    async fn get_repository(&self, id: i64) -> StoreResult<Option<Repository>>;

    async fn record_repository_build(&self, id: i64, at: DateTime<Utc>) -> StoreResult<()>;

    async fn find_active_integration(&self, repository_id: i64)
        -> StoreResult<Option<Integration>>;

    async fn get_integration(&self, id: i64) -> StoreResult<Option<Integration>>;

    async fn create_integration(&self, new: NewIntegration) -> StoreResult<Integration>;

    async fn record_integration_use(&self, id: i64, at: DateTime<Utc>) -> StoreResult<()>;

    // ── Builds ──

    async fn create_build(&self, new: NewBuild) -> StoreResult<Build>;

    async fn get_build(&self, id: i64) -> StoreResult<Option<Build>>;

    async fn update_build(&self, build: &Build) -> StoreResult<()>;

    /// Every build of a repository, oldest first.
    async fn repository_builds(&self, repository_id: i64) -> StoreResult<Vec<Build>>;

    /// Number of builds in a chain created with the given trigger.
    async fn count_chain_builds(&self, chain_id: i64, trigger: TriggerKind) -> StoreResult<usize>;

    // ── Fix attempts ──

    async fn create_fix_attempt(&self, new: NewFixAttempt) -> StoreResult<FixAttempt>;

    async fn get_fix_attempt(&self, id: i64) -> StoreResult<Option<FixAttempt>>;

    async fn update_fix_attempt(&self, attempt: &FixAttempt) -> StoreResult<()>;

    /// All attempts for a pattern within a chain, oldest first.
    async fn chain_fix_attempts(
        &self,
        chain_id: i64,
        error_pattern: &str,
    ) -> StoreResult<Vec<FixAttempt>>;

    async fn build_fix_attempts(&self, build_id: i64) -> StoreResult<Vec<FixAttempt>>;
}
