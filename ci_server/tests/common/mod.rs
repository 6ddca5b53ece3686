#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;

use centrix_autofix::config::CiConfig;
use centrix_autofix::fakes::{RecordingSourceControl, ScriptedAdapter};
use centrix_autofix::models::{Build, NewIntegration, NewRepository, Repository};
use centrix_autofix::pipeline::Pipeline;
use centrix_autofix::platforms::AdapterRegistry;
use centrix_autofix::services::dispatch_service::DispatchOutcome;
use centrix_autofix::services::ingest_service::{self, NormalizedEvent};
use centrix_autofix::store::{MemoryStore, Store};
use centrix_autofix::worker::{Job, JobQueue, JobReceivers};

pub const WEBHOOK_SECRET: &str = "s3cret";
pub const REPO: &str = "acme/app";

pub const JAVA_HOME_LOG: &str = "> Task :app:compileDebugJava\nERROR: JAVA_HOME is not set and no 'java' command could be found\n";
pub const SYNTAX_LOG: &str = "  File \"app.py\", line 3\n    def broken(:\nSyntaxError: invalid syntax\n";
pub const UNKNOWN_LOG: &str = "test suite exploded in an unfamiliar way\n";

pub fn config(max_polls: u32) -> CiConfig {
    let vars: HashMap<&str, String> = [
        ("CI_WEBHOOK_SECRET", WEBHOOK_SECRET.to_string()),
        ("CI_GITHUB_TOKEN", "test-token".to_string()),
        ("CI_POLL_INTERVAL_SECS", "1".to_string()),
        ("CI_POLL_BACKOFF_MAX_SECS", "4".to_string()),
        ("CI_MAX_POLLS", max_polls.to_string()),
    ]
    .into_iter()
    .collect();
    CiConfig::from_lookup(|key| vars.get(key).cloned())
}

/// A pipeline over an in-memory store whose queues are drained by the test.
pub struct Harness {
    pub config: CiConfig,
    pub store: Arc<MemoryStore>,
    pub adapter: Arc<ScriptedAdapter>,
    pub scm: Arc<RecordingSourceControl>,
    pub pipeline: Arc<Pipeline>,
    receivers: JobReceivers,
}

impl Harness {
    pub fn new(adapter: ScriptedAdapter) -> Self {
        Self::with(adapter, RecordingSourceControl::new(), config(5))
    }

    pub fn with(adapter: ScriptedAdapter, scm: RecordingSourceControl, config: CiConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        let adapter = Arc::new(adapter);
        let scm = Arc::new(scm);
        let (queue, receivers) = JobQueue::new();
        let pipeline = Arc::new(Pipeline::new(
            &config,
            store.clone(),
            AdapterRegistry::new().with(adapter.clone()),
            scm.clone(),
            queue,
        ));
        Self {
            config,
            store,
            adapter,
            scm,
            pipeline,
            receivers,
        }
    }

    /// Register `acme/app` with auto-fix on and an integration for `platform`.
    pub async fn register(&self, platform: &str, max_attempts: Option<u32>) -> Repository {
        let repository = self
            .store
            .insert_repository(NewRepository {
                full_name: REPO.to_string(),
                auto_fix_enabled: true,
                auto_fix_safe_only: true,
                auto_fix_max_attempts: max_attempts,
                primary_branch: "main".to_string(),
            })
            .unwrap();
        self.store
            .create_integration(NewIntegration {
                repository_id: repository.id,
                platform: platform.to_string(),
                is_active: true,
                settings: serde_json::json!({ "app_id": "app-1" }),
            })
            .await
            .unwrap();
        repository
    }

    /// Dispatch a push to `main` and return the new build's id.
    pub async fn push(&mut self) -> i64 {
        let event = push_event("main");
        match self.pipeline.dispatcher.dispatch(&event).await.unwrap() {
            DispatchOutcome::Created { build_id } => {
                assert_eq!(self.take_jobs(), vec![Job::RunBuild(build_id)]);
                build_id
            }
            other => panic!("push did not create a build: {other:?}"),
        }
    }

    pub async fn build(&self, id: i64) -> Build {
        self.store.get_build(id).await.unwrap().unwrap()
    }

    /// Everything enqueued since the last call, across all three queues.
    pub fn take_jobs(&mut self) -> Vec<Job> {
        let mut jobs = Vec::new();
        while let Ok(job) = self.receivers.dispatch.try_recv() {
            jobs.push(job);
        }
        while let Ok(job) = self.receivers.builds.try_recv() {
            jobs.push(job);
        }
        while let Ok(job) = self.receivers.fixes.try_recv() {
            jobs.push(job);
        }
        jobs
    }
}

pub fn push_body(branch: &str) -> Vec<u8> {
    serde_json::json!({
        "ref": format!("refs/heads/{branch}"),
        "after": "9f2c1e0d",
        "repository": { "full_name": REPO },
        "sender": { "login": "octocat" },
        "pusher": { "name": "Octo Cat" },
        "commits": [{ "id": "9f2c1e0d", "message": "add login" }]
    })
    .to_string()
    .into_bytes()
}

pub fn push_event(branch: &str) -> NormalizedEvent {
    ingest_service::ingest("", &push_body(branch), None, Some("push")).unwrap()
}
