//! Background worker pool.
//!
//! Three named queues (`dispatch`, `builds`, `fixes`) feed one drain loop each.
//! A drain loop spawns a task per job once a permit from its queue's semaphore
//! is available, so a failing or panicking job only takes itself down.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::{OwnedMutexGuard, Semaphore};
use tokio::task::JoinHandle;

use crate::config::{QueueConfig, WorkerPoolConfig, BUILDS_QUEUE, DISPATCH_QUEUE, FIXES_QUEUE};
use crate::metrics;
use crate::services::ingest_service::NormalizedEvent;

#[derive(Debug, Clone, PartialEq)]
pub enum Job {
    /// Resolve a webhook event into a build.
    Dispatch(NormalizedEvent),
    /// Drive a pending build through its platform.
    RunBuild(i64),
    /// Analyze a failed or timed-out build and try to fix it.
    RemediateFailure(i64),
    /// Apply a pending fix attempt a human approved.
    ApproveFix(i64),
}

impl Job {
    pub fn queue(&self) -> &'static str {
        match self {
            Self::Dispatch(_) => DISPATCH_QUEUE,
            Self::RunBuild(_) => BUILDS_QUEUE,
            Self::RemediateFailure(_) | Self::ApproveFix(_) => FIXES_QUEUE,
        }
    }
}

#[derive(Debug, Error)]
#[error("{0} queue is closed")]
pub struct QueueClosed(pub &'static str);

/// Sending half of the queues; cheap to clone into every component.
#[derive(Clone, Debug)]
pub struct JobQueue {
    dispatch: UnboundedSender<Job>,
    builds: UnboundedSender<Job>,
    fixes: UnboundedSender<Job>,
}

/// Receiving half of the queues, handed to `WorkerPool::spawn` (or drained by tests).
#[derive(Debug)]
pub struct JobReceivers {
    pub dispatch: UnboundedReceiver<Job>,
    pub builds: UnboundedReceiver<Job>,
    pub fixes: UnboundedReceiver<Job>,
}

impl JobQueue {
    pub fn new() -> (Self, JobReceivers) {
        let (dispatch_tx, dispatch_rx) = mpsc::unbounded_channel();
        let (builds_tx, builds_rx) = mpsc::unbounded_channel();
        let (fixes_tx, fixes_rx) = mpsc::unbounded_channel();
        (
            Self {
                dispatch: dispatch_tx,
                builds: builds_tx,
                fixes: fixes_tx,
            },
            JobReceivers {
                dispatch: dispatch_rx,
                builds: builds_rx,
                fixes: fixes_rx,
            },
        )
    }

    pub fn enqueue(&self, job: Job) -> Result<(), QueueClosed> {
        let queue = job.queue();
        let sender = match job {
            Job::Dispatch(_) => &self.dispatch,
            Job::RunBuild(_) => &self.builds,
            Job::RemediateFailure(_) | Job::ApproveFix(_) => &self.fixes,
        };
        sender.send(job).map_err(|_| QueueClosed(queue))?;
        tracing::debug!(queue, "Job enqueued");
        Ok(())
    }
}

/// Executes jobs pulled off the queues.
#[async_trait]
pub trait JobHandler: Send + Sync + 'static {
    async fn handle(&self, job: Job);
}

/// Running drain loops, one per queue.
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn spawn(
        config: &WorkerPoolConfig,
        receivers: JobReceivers,
        handler: Arc<dyn JobHandler>,
    ) -> Self {
        let handles = vec![
            tokio::spawn(drain(config.dispatch.clone(), receivers.dispatch, handler.clone())),
            tokio::spawn(drain(config.builds.clone(), receivers.builds, handler.clone())),
            tokio::spawn(drain(config.fixes.clone(), receivers.fixes, handler)),
        ];
        tracing::info!(
            dispatch = config.dispatch.concurrency,
            builds = config.builds.concurrency,
            fixes = config.fixes.concurrency,
            "Worker pool started"
        );
        Self { handles }
    }

    /// Stop pulling new jobs. Jobs already running finish on their own.
    pub fn shutdown(&self) {
        for handle in &self.handles {
            handle.abort();
        }
    }
}

async fn drain(queue: QueueConfig, mut rx: UnboundedReceiver<Job>, handler: Arc<dyn JobHandler>) {
    let permits = Arc::new(Semaphore::new(queue.concurrency.max(1)));

    while let Some(job) = rx.recv().await {
        let Ok(permit) = permits.clone().acquire_owned().await else {
            break;
        };
        metrics::job_started(queue.name);
        let handler = handler.clone();
        tokio::spawn(async move {
            let _permit = permit;
            handler.handle(job).await;
        });
    }

    tracing::info!(queue = queue.name, "Queue closed, worker stopped");
}

/// One async mutex per key, created on first use.
///
/// Idle entries are pruned whenever a new key is locked.
pub struct KeyedLocks<K> {
    locks: Mutex<HashMap<K, Arc<tokio::sync::Mutex<()>>>>,
}

impl<K> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }
}

impl<K: Eq + Hash + Clone> KeyedLocks<K> {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, key: K) -> OwnedMutexGuard<()> {
        let mutex = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            if !locks.contains_key(&key) {
                locks.retain(|_, m| Arc::strong_count(m) > 1);
            }
            locks.entry(key).or_default().clone()
        };
        mutex.lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;

    #[test]
    fn jobs_route_to_their_queue() {
        let (queue, mut rx) = JobQueue::new();
        queue.enqueue(Job::RunBuild(1)).unwrap();
        queue.enqueue(Job::RemediateFailure(2)).unwrap();
        queue.enqueue(Job::ApproveFix(3)).unwrap();

        assert_eq!(rx.builds.try_recv().unwrap(), Job::RunBuild(1));
        assert_eq!(rx.fixes.try_recv().unwrap(), Job::RemediateFailure(2));
        assert_eq!(rx.fixes.try_recv().unwrap(), Job::ApproveFix(3));
        assert!(rx.dispatch.try_recv().is_err());
        assert!(rx.builds.try_recv().is_err());
    }

    #[test]
    fn enqueue_after_receivers_drop_fails() {
        let (queue, rx) = JobQueue::new();
        drop(rx);
        let err = queue.enqueue(Job::RunBuild(1)).unwrap_err();
        assert_eq!(err.to_string(), "builds queue is closed");
    }

    struct SlowHandler {
        running: AtomicUsize,
        peak: AtomicUsize,
        done: AtomicUsize,
    }

    #[async_trait]
    impl JobHandler for SlowHandler {
        async fn handle(&self, job: Job) {
            if job == Job::RunBuild(0) {
                panic!("job 0 blows up");
            }
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_secs(1)).await;
            self.running.fetch_sub(1, Ordering::SeqCst);
            self.done.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn concurrency_is_bounded_and_panics_are_contained() {
        let handler = Arc::new(SlowHandler {
            running: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            done: AtomicUsize::new(0),
        });
        let mut config = WorkerPoolConfig::default();
        config.builds.concurrency = 2;

        let (queue, rx) = JobQueue::new();
        let _pool = WorkerPool::spawn(&config, rx, handler.clone());
        for id in 0..7 {
            queue.enqueue(Job::RunBuild(id)).unwrap();
        }

        for _ in 0..100 {
            if handler.done.load(Ordering::SeqCst) == 6 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(250)).await;
        }
        assert_eq!(handler.done.load(Ordering::SeqCst), 6);
        assert_eq!(handler.peak.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn keyed_locks_serialize_per_key() {
        let locks = KeyedLocks::new();
        let guard = locks.lock(1).await;

        // A different key is independent.
        let other = tokio::time::timeout(Duration::from_millis(50), locks.lock(2)).await;
        assert!(other.is_ok());

        let same = tokio::time::timeout(Duration::from_millis(50), locks.lock(1)).await;
        assert!(same.is_err());

        drop(guard);
        assert!(tokio::time::timeout(Duration::from_millis(50), locks.lock(1)).await.is_ok());
    }
}
