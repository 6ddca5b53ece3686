//! Pipeline wiring: the components, their shared queue, and the job handler.

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::CiConfig;
use crate::platforms::AdapterRegistry;
use crate::remediation::{SourceControl, StrategySet};
use crate::services::dispatch_service::Dispatcher;
use crate::services::fix_service::FixAttemptManager;
use crate::services::orchestrator::BuildOrchestrator;
use crate::store::Store;
use crate::worker::{Job, JobHandler, JobQueue, WorkerPool};

pub struct Pipeline {
    pub dispatcher: Dispatcher,
    pub orchestrator: BuildOrchestrator,
    pub fixes: FixAttemptManager,
    queue: JobQueue,
}

impl Pipeline {
    pub fn new(
        config: &CiConfig,
        store: Arc<dyn Store>,
        adapters: AdapterRegistry,
        source_control: Arc<dyn SourceControl>,
        queue: JobQueue,
    ) -> Self {
        Self {
            dispatcher: Dispatcher::new(store.clone(), queue.clone()),
            orchestrator: BuildOrchestrator::new(
                store.clone(),
                adapters,
                queue.clone(),
                config.poll.clone(),
            ),
            fixes: FixAttemptManager::new(
                store,
                StrategySet::standard(),
                source_control,
                queue.clone(),
                config.auto_fix_max_attempts,
            ),
            queue,
        }
    }

    /// Build the pipeline and start draining its queues.
    pub fn start(
        config: &CiConfig,
        store: Arc<dyn Store>,
        adapters: AdapterRegistry,
        source_control: Arc<dyn SourceControl>,
    ) -> (Arc<Self>, WorkerPool) {
        let (queue, receivers) = JobQueue::new();
        let pipeline = Arc::new(Self::new(config, store, adapters, source_control, queue));
        let pool = WorkerPool::spawn(&config.workers, receivers, pipeline.clone());
        (pipeline, pool)
    }

    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }
}

#[async_trait]
impl JobHandler for Pipeline {
    async fn handle(&self, job: Job) {
        match job {
            Job::Dispatch(event) => match self.dispatcher.dispatch(&event).await {
                Ok(outcome) => {
                    tracing::info!(repository = %event.repository, event = event.kind.name(), ?outcome, "Event dispatched");
                }
                Err(e) => {
                    tracing::error!(repository = %event.repository, error = %e, "Dispatch failed");
                }
            },
            Job::RunBuild(build_id) => match self.orchestrator.run(build_id).await {
                Ok(outcome) => tracing::debug!(build_id, ?outcome, "Build run complete"),
                Err(e) => tracing::error!(build_id, error = %e, "Build run failed"),
            },
            Job::RemediateFailure(build_id) => {
                if let Err(e) = self.fixes.process_failure(build_id).await {
                    tracing::error!(build_id, error = %e, "Failure processing failed");
                }
            }
            Job::ApproveFix(attempt_id) => match self.fixes.approve(attempt_id).await {
                Ok(attempt) => tracing::info!(attempt_id, status = %attempt.status, "Approved fix processed"),
                Err(e) => tracing::warn!(attempt_id, error = %e, "Approved fix not applied"),
            },
        }
    }
}
