//! HTTP surface: webhook authentication and the command endpoints.

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::Response;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tower::ServiceExt;

use centrix_autofix::fakes::ScriptedAdapter;
use centrix_autofix::models::{BuildStatus, FixAttemptStatus, NewRepository};
use centrix_autofix::platforms::{Platform, PlatformStatus};
use centrix_autofix::routes::{ci_router, CiRouterState};
use centrix_autofix::store::Store;
use centrix_autofix::worker::{Job, JobHandler};

use common::{push_body, Harness, WEBHOOK_SECRET};

fn sign(body: &[u8]) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(WEBHOOK_SECRET.as_bytes()).unwrap();
    mac.update(body);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

async fn send(h: &Harness, request: Request<Body>) -> (StatusCode, serde_json::Value) {
    let app = ci_router(CiRouterState {
        pipeline: h.pipeline.clone(),
        config: h.config.clone(),
    });
    let response: Response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
    (status, json)
}

fn webhook(body: Vec<u8>, signature: Option<String>, event: &str) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/webhook/github")
        .header("content-type", "application/json")
        .header("x-github-event", event);
    if let Some(signature) = signature {
        builder = builder.header("x-hub-signature-256", signature);
    }
    builder.body(Body::from(body)).unwrap()
}

fn post(uri: &str, json: Option<serde_json::Value>) -> Request<Body> {
    let builder = Request::builder().method("POST").uri(uri);
    match json {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

#[tokio::test]
async fn health_reports_ok() {
    let h = Harness::new(ScriptedAdapter::new(Platform::Codemagic));
    let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let (status, body) = send(&h, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn signed_push_is_accepted_and_queued() {
    let mut h = Harness::new(ScriptedAdapter::new(Platform::Codemagic));
    let body = push_body("main");
    let signature = sign(&body);

    let (status, ack) = send(&h, webhook(body, Some(signature), "push")).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(ack["event"], "push");
    assert_eq!(ack["repository"], "acme/app");

    let jobs = h.take_jobs();
    assert_eq!(jobs.len(), 1);
    assert!(matches!(&jobs[0], Job::Dispatch(event) if event.repository == "acme/app"));
}

#[tokio::test]
async fn bad_or_missing_signature_is_unauthorized() {
    let mut h = Harness::new(ScriptedAdapter::new(Platform::Codemagic));

    let (status, _) = send(&h, webhook(push_body("main"), Some("sha256=deadbeef".into()), "push")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(&h, webhook(push_body("main"), None, "push")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // Signature over a different body.
    let signature = sign(&push_body("other"));
    let (status, _) = send(&h, webhook(push_body("main"), Some(signature), "push")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    assert!(h.take_jobs().is_empty());
}

#[tokio::test]
async fn malformed_payload_is_a_bad_request() {
    let mut h = Harness::new(ScriptedAdapter::new(Platform::Codemagic));
    let body = b"{not json".to_vec();
    let signature = sign(&body);

    let (status, _) = send(&h, webhook(body, Some(signature), "push")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let body = serde_json::json!({ "ref": "refs/heads/main" }).to_string().into_bytes();
    let signature = sign(&body);
    let (status, _) = send(&h, webhook(body, Some(signature), "push")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    assert!(h.take_jobs().is_empty());
}

#[tokio::test]
async fn manual_trigger_creates_a_build() {
    let mut h = Harness::new(ScriptedAdapter::new(Platform::Codemagic));
    h.register("codemagic", None).await;

    let (status, body) = send(
        &h,
        post(
            "/api/builds/trigger",
            Some(serde_json::json!({ "repository": "acme/app", "branch": "release" })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let build_id = body["build_id"].as_i64().unwrap();

    let build = h.build(build_id).await;
    assert_eq!(build.branch, "release");
    assert_eq!(build.status, BuildStatus::Pending);
    assert_eq!(h.take_jobs(), vec![Job::RunBuild(build_id)]);

    let (status, body) = send(
        &h,
        post(
            "/api/builds/trigger",
            Some(serde_json::json!({ "repository": "acme/unknown" })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("acme/unknown"));
}

#[tokio::test]
async fn build_commands_map_pipeline_errors() {
    let mut h = Harness::new(ScriptedAdapter::new(Platform::Codemagic));
    h.register("codemagic", None).await;
    let build_id = h.push().await;

    let (status, _) = send(&h, post(&format!("/api/builds/{build_id}/retry"), None)).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = send(&h, post(&format!("/api/builds/{build_id}/cancel"), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"], "cancelled");

    let (status, body) = send(&h, post(&format!("/api/builds/{build_id}/retry"), None)).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["trigger"], "retry");
    assert_eq!(body["chain_id"], build_id);

    let (status, _) = send(&h, post("/api/builds/4242/cancel", None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test(start_paused = true)]
async fn repository_retry_reports_the_new_builds() {
    let mut h = Harness::new(ScriptedAdapter::new(Platform::Codemagic).then_status(PlatformStatus::Failed));
    let repository = h.register("codemagic", None).await;
    let build_id = h.push().await;
    h.pipeline.orchestrator.run(build_id).await.unwrap();
    h.take_jobs();

    let uri = format!("/api/repositories/{}/retry-failed", repository.id);
    let (status, body) = send(&h, post(&uri, None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["repository_id"], repository.id);
    let retried = body["retried"].as_array().unwrap();
    assert_eq!(retried.len(), 1);
    let retry_id = retried[0].as_i64().unwrap();
    assert_eq!(h.build(retry_id).await.parent_build_id, Some(build_id));
    assert_eq!(h.take_jobs(), vec![Job::RunBuild(retry_id)]);

    let (status, _) = send(&h, post("/api/repositories/4242/retry-failed", None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test(start_paused = true)]
async fn fix_attempt_commands_follow_the_state_machine() {
    let mut h = Harness::new(
        ScriptedAdapter::new(Platform::Codemagic)
            .then_status(PlatformStatus::Failed)
            .with_logs(common::SYNTAX_LOG),
    );
    h.register("codemagic", None).await;
    let build_id = h.push().await;
    h.pipeline.orchestrator.run(build_id).await.unwrap();
    let report = h.pipeline.fixes.process_failure(build_id).await.unwrap();
    let attempt_id = report.held[0];
    h.take_jobs();

    let (status, _) = send(&h, post(&format!("/api/fix-attempts/{attempt_id}/revert"), None)).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = send(&h, post(&format!("/api/fix-attempts/{attempt_id}/cancel"), None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "cancelled");

    let (status, _) = send(&h, post(&format!("/api/fix-attempts/{attempt_id}/approve"), None)).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = send(&h, post("/api/fix-attempts/4242/approve", None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(h.take_jobs().is_empty());
}

#[tokio::test(start_paused = true)]
async fn approval_is_accepted_and_applied_off_the_request() {
    let logs = format!("{}{}", common::JAVA_HOME_LOG, "Android SDK location not found\n");
    let mut h = Harness::new(
        ScriptedAdapter::new(Platform::Codemagic)
            .then_status(PlatformStatus::Failed)
            .with_logs(&logs),
    );
    h.register("codemagic", Some(1)).await;
    let build_id = h.push().await;
    h.pipeline.orchestrator.run(build_id).await.unwrap();
    h.take_jobs();
    let report = h.pipeline.fixes.process_failure(build_id).await.unwrap();
    let follow_up = report.follow_up_builds[0];
    let held = report.held[0];
    h.take_jobs();

    // The chain bound is already spent, so the approval is refused up front.
    let (status, body) = send(&h, post(&format!("/api/fix-attempts/{held}/approve"), None)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"].as_str().unwrap().contains("auto-fix builds"));
    assert!(h.take_jobs().is_empty());

    // Re-registering with a larger bound frees one more follow-up build.
    h.store
        .insert_repository(NewRepository {
            full_name: common::REPO.to_string(),
            auto_fix_enabled: true,
            auto_fix_safe_only: true,
            auto_fix_max_attempts: Some(2),
            primary_branch: "main".to_string(),
        })
        .unwrap();

    let (status, body) = send(&h, post(&format!("/api/fix-attempts/{held}/approve"), None)).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["status"], "pending");
    assert_eq!(h.scm.opened().len(), 1);

    let jobs = h.take_jobs();
    assert_eq!(jobs, vec![Job::ApproveFix(held)]);
    h.pipeline.handle(jobs[0].clone()).await;

    let attempt = h.store.get_fix_attempt(held).await.unwrap().unwrap();
    assert_eq!(attempt.status, FixAttemptStatus::Applied);
    assert_eq!(h.scm.opened().len(), 2);
    let jobs = h.take_jobs();
    assert_eq!(jobs.len(), 1);
    assert!(matches!(jobs[0], Job::RunBuild(id) if id != follow_up));
}
