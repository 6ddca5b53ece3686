//! FixAttempt: one remediation trial for a failure pattern found on a build.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Attempts below this confidence wait for a human before anything is applied.
pub const APPROVAL_THRESHOLD: u8 = 80;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixType {
    DependencyUpdate,
    ConfigFix,
    CodeFormatting,
    SyntaxFix,
    MissingFile,
    EnvironmentFix,
    PermissionFix,
    LlmSuggestion,
}

impl FixType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DependencyUpdate => "dependency_update",
            Self::ConfigFix => "config_fix",
            Self::CodeFormatting => "code_formatting",
            Self::SyntaxFix => "syntax_fix",
            Self::MissingFile => "missing_file",
            Self::EnvironmentFix => "environment_fix",
            Self::PermissionFix => "permission_fix",
            Self::LlmSuggestion => "llm_suggestion",
        }
    }

    /// Fix types that touch manifests, config or CI environment only, never source code.
    pub fn is_safe(&self) -> bool {
        matches!(
            self,
            Self::DependencyUpdate | Self::ConfigFix | Self::MissingFile | Self::EnvironmentFix
        )
    }
}

impl fmt::Display for FixType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `pending → {applied | failed | cancelled}`, `applied → reverted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixAttemptStatus {
    Pending,
    Applied,
    Failed,
    Cancelled,
    Reverted,
}

impl FixAttemptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Applied => "applied",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Reverted => "reverted",
        }
    }

    /// Statuses that block a new attempt for the same pattern in the same chain.
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Pending | Self::Applied)
    }
}

impl fmt::Display for FixAttemptStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixAttempt {
    pub id: i64,
    pub build_id: i64,
    pub chain_id: i64,
    pub attempt_number: u32,
    pub fix_type: FixType,
    pub status: FixAttemptStatus,
    /// Name of the analyzer rule that matched.
    pub error_pattern: String,
    pub error_message: String,
    pub matched_text: String,
    pub confidence_score: u8,
    pub requires_approval: bool,
    pub fix_suggestion: Option<String>,
    pub branch_name: Option<String>,
    pub pull_request_url: Option<String>,
    pub pull_request_number: Option<i64>,
    pub changes_summary: Option<String>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub applied_at: Option<DateTime<Utc>>,
    pub reverted_at: Option<DateTime<Utc>>,
}

impl FixAttempt {
    pub fn mark_applied(&mut self, at: DateTime<Utc>) {
        self.status = FixAttemptStatus::Applied;
        self.applied_at = Some(at);
    }

    /// Mark failed and append the reason to the notes.
    pub fn mark_failed(&mut self, reason: &str) {
        self.status = FixAttemptStatus::Failed;
        if !reason.is_empty() {
            self.append_note(&format!("Failure reason: {reason}"));
        }
    }

    pub fn mark_reverted(&mut self, at: DateTime<Utc>) {
        self.status = FixAttemptStatus::Reverted;
        self.reverted_at = Some(at);
    }

    pub fn append_note(&mut self, note: &str) {
        match self.notes.as_mut() {
            Some(notes) => {
                notes.push('\n');
                notes.push_str(note);
            }
            None => self.notes = Some(note.to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewFixAttempt {
    pub build_id: i64,
    pub chain_id: i64,
    pub attempt_number: u32,
    pub fix_type: FixType,
    pub error_pattern: String,
    pub error_message: String,
    pub matched_text: String,
    pub confidence_score: u8,
    pub fix_suggestion: Option<String>,
}

impl NewFixAttempt {
    pub fn requires_approval(&self) -> bool {
        requires_approval(self.confidence_score)
    }
}

pub fn requires_approval(confidence: u8) -> bool {
    confidence < APPROVAL_THRESHOLD
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attempt() -> FixAttempt {
        FixAttempt {
            id: 1,
            build_id: 1,
            chain_id: 1,
            attempt_number: 1,
            fix_type: FixType::ConfigFix,
            status: FixAttemptStatus::Pending,
            error_pattern: "gradle_sync_failed".into(),
            error_message: "Gradle sync failed".into(),
            matched_text: String::new(),
            confidence_score: 85,
            requires_approval: false,
            fix_suggestion: None,
            branch_name: None,
            pull_request_url: None,
            pull_request_number: None,
            changes_summary: None,
            notes: None,
            created_at: Utc::now(),
            applied_at: None,
            reverted_at: None,
        }
    }

    #[test]
    fn approval_threshold_is_eighty() {
        for confidence in 0..=100u8 {
            assert_eq!(requires_approval(confidence), confidence < 80, "{confidence}");
        }
    }

    #[test]
    fn failure_reasons_accumulate() {
        let mut attempt = attempt();
        attempt.append_note("opened by reviewer");
        attempt.mark_failed("branch already exists");
        attempt.mark_failed("GitHub returned 422");

        assert_eq!(attempt.status, FixAttemptStatus::Failed);
        assert_eq!(
            attempt.notes.as_deref(),
            Some(
                "opened by reviewer\nFailure reason: branch already exists\nFailure reason: GitHub returned 422"
            )
        );
    }

    #[test]
    fn only_pending_and_applied_are_open() {
        assert!(FixAttemptStatus::Pending.is_open());
        assert!(FixAttemptStatus::Applied.is_open());
        assert!(!FixAttemptStatus::Failed.is_open());
        assert!(!FixAttemptStatus::Cancelled.is_open());
        assert!(!FixAttemptStatus::Reverted.is_open());
    }

    #[test]
    fn fix_type_serializes_snake_case() {
        let json = serde_json::to_string(&FixType::DependencyUpdate).unwrap();
        assert_eq!(json, "\"dependency_update\"");
        assert!(!FixType::SyntaxFix.is_safe());
        assert!(FixType::EnvironmentFix.is_safe());
    }
}
