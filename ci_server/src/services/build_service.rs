//! Build bookkeeping shared by the dispatcher, the orchestrator and the fix manager.

use crate::error::{PipelineError, Result};
use crate::models::{Build, NewBuild};
use crate::store::Store;
use crate::worker::{Job, JobQueue};

/// Create a pending build and put it on the builds queue.
pub async fn create_build(store: &dyn Store, queue: &JobQueue, new_build: NewBuild) -> Result<Build> {
    let build = store.create_build(new_build).await?;

    crate::metrics::build_status_changed(build.status.as_str());
    tracing::info!(
        build_id = build.id,
        repository_id = build.repository_id,
        chain_id = build.chain_id,
        trigger = %build.trigger,
        branch = %build.branch,
        "Build created"
    );

    queue.enqueue(Job::RunBuild(build.id))?;
    Ok(build)
}

/// Load a build that must exist.
pub async fn get_build(store: &dyn Store, build_id: i64) -> Result<Build> {
    store
        .get_build(build_id)
        .await?
        .ok_or(PipelineError::NotFound {
            entity: "build",
            id: build_id,
        })
}

/// Persist a status change and record it.
pub async fn save_status(store: &dyn Store, build: &Build) -> Result<()> {
    store.update_build(build).await?;

    crate::metrics::build_status_changed(build.status.as_str());
    if build.status.is_terminal() {
        if let Some(duration) = build.duration_ms {
            crate::metrics::build_duration(duration.max(0) as u64);
        }
        tracing::info!(
            build_id = build.id,
            status = %build.status,
            duration_ms = build.duration_ms,
            "Build finished"
        );
    }
    Ok(())
}
