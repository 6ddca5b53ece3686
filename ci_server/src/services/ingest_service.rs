//! Webhook ingestion: authenticates GitHub deliveries and normalizes their payloads.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::services::github_service;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("webhook signature validation failed")]
    Unauthorized,

    #[error("malformed webhook payload: {0}")]
    MalformedPayload(String),
}

/// A webhook delivery reduced to what the dispatcher needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedEvent {
    /// `repository.full_name`; empty for opaque events sent without one.
    pub repository: String,
    /// `sender.login`
    pub sender: String,
    pub kind: EventKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    Push(PushEvent),
    PullRequest(PullRequestEvent),
    /// A known event kind carrying nothing to build (closed PR, labels, ...).
    Ignored { event: String, reason: String },
    /// Any other event kind, passed through untouched for generic routing.
    Opaque {
        event: String,
        payload: serde_json::Value,
    },
}

impl EventKind {
    pub fn name(&self) -> &str {
        match self {
            Self::Push(_) => "push",
            Self::PullRequest(_) => "pull_request",
            Self::Ignored { event, .. } | Self::Opaque { event, .. } => event.as_str(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushEvent {
    /// `None` for tag pushes.
    pub branch: Option<String>,
    pub head_commit: Option<String>,
    pub commits: Vec<CommitSummary>,
    pub pusher: String,
    /// The push deleted the ref.
    pub deleted: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitSummary {
    pub id: String,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullRequestEvent {
    pub number: i64,
    pub action: String,
    pub head_branch: String,
    pub head_sha: Option<String>,
    pub base_branch: String,
}

// ── Wire payloads ──

#[derive(Deserialize)]
struct Envelope {
    #[serde(default)]
    repository: Option<RepositoryRef>,
    #[serde(default)]
    sender: Option<Account>,
}

#[derive(Deserialize)]
struct RepositoryRef {
    full_name: String,
}

#[derive(Deserialize)]
struct Account {
    login: String,
}

#[derive(Deserialize)]
struct PushPayload {
    #[serde(rename = "ref")]
    git_ref: String,
    #[serde(default)]
    after: Option<String>,
    #[serde(default)]
    commits: Vec<CommitSummary>,
    #[serde(default)]
    pusher: Option<Pusher>,
    #[serde(default)]
    deleted: bool,
}

#[derive(Deserialize)]
struct Pusher {
    name: String,
}

#[derive(Deserialize)]
struct PullRequestPayload {
    action: String,
    #[serde(default)]
    number: Option<i64>,
    pull_request: PullRequestBody,
}

#[derive(Deserialize)]
struct PullRequestBody {
    #[serde(default)]
    number: Option<i64>,
    head: BranchRef,
    base: BranchRef,
}

#[derive(Deserialize)]
struct BranchRef {
    #[serde(rename = "ref")]
    git_ref: String,
    #[serde(default)]
    sha: Option<String>,
}

/// PR actions that produce new code to build.
const BUILD_ACTIONS: [&str; 3] = ["opened", "synchronize", "reopened"];

/// Authenticate and normalize one webhook delivery.
pub fn ingest(
    secret: &str,
    raw_body: &[u8],
    signature: Option<&str>,
    event_kind: Option<&str>,
) -> Result<NormalizedEvent, IngestError> {
    if !github_service::validate_signature(secret, raw_body, signature.unwrap_or("")) {
        tracing::warn!("Webhook signature validation failed");
        return Err(IngestError::Unauthorized);
    }

    let payload: serde_json::Value = serde_json::from_slice(raw_body)
        .map_err(|e| IngestError::MalformedPayload(e.to_string()))?;
    let envelope: Envelope = serde_json::from_value(payload.clone())
        .map_err(|e| IngestError::MalformedPayload(e.to_string()))?;

    let event = event_kind.unwrap_or("unknown");
    let repository = envelope.repository.map(|r| r.full_name);
    if repository.is_none() && matches!(event, "push" | "pull_request") {
        return Err(IngestError::MalformedPayload(format!(
            "{event}: missing repository.full_name"
        )));
    }

    let kind = match event {
        "push" => EventKind::Push(normalize_push(payload)?),
        "pull_request" => normalize_pull_request(payload)?,
        _ => EventKind::Opaque {
            event: event.to_string(),
            payload,
        },
    };

    Ok(NormalizedEvent {
        repository: repository.unwrap_or_default(),
        sender: envelope
            .sender
            .map(|s| s.login)
            .unwrap_or_else(|| "unknown".to_string()),
        kind,
    })
}

fn normalize_push(payload: serde_json::Value) -> Result<PushEvent, IngestError> {
    let push: PushPayload = serde_json::from_value(payload)
        .map_err(|e| IngestError::MalformedPayload(format!("push: {e}")))?;

    Ok(PushEvent {
        branch: push
            .git_ref
            .strip_prefix("refs/heads/")
            .filter(|b| !b.is_empty())
            .map(str::to_string),
        head_commit: push.after.filter(|sha| !is_null_sha(sha)),
        commits: push.commits,
        pusher: push
            .pusher
            .map(|p| p.name)
            .unwrap_or_else(|| "unknown".to_string()),
        deleted: push.deleted,
    })
}

fn normalize_pull_request(payload: serde_json::Value) -> Result<EventKind, IngestError> {
    let pr: PullRequestPayload = serde_json::from_value(payload)
        .map_err(|e| IngestError::MalformedPayload(format!("pull_request: {e}")))?;

    if !BUILD_ACTIONS.contains(&pr.action.as_str()) {
        return Ok(EventKind::Ignored {
            event: "pull_request".to_string(),
            reason: format!("action '{}' does not change code", pr.action),
        });
    }

    let number = pr
        .number
        .or(pr.pull_request.number)
        .ok_or_else(|| IngestError::MalformedPayload("pull_request: missing number".into()))?;

    Ok(EventKind::PullRequest(PullRequestEvent {
        number,
        action: pr.action,
        head_branch: pr.pull_request.head.git_ref,
        head_sha: pr.pull_request.head.sha,
        base_branch: pr.pull_request.base.git_ref,
    }))
}

fn is_null_sha(sha: &str) -> bool {
    !sha.is_empty() && sha.bytes().all(|b| b == b'0')
}
