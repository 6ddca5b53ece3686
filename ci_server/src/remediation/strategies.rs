//! Built-in remediation strategies, one per safe fix type.

use async_trait::async_trait;

use super::{Remediation, RemediationContext, RemediationError, RemediationStrategy};
use crate::models::{FixAttempt, FixType};

/// `<prefix>-<rule>/<build id>/<attempt number>`
///
/// Attempts on one build share a build id and may share a fix type, so the
/// matched rule keeps their branches apart.
fn branch_name(prefix: &str, attempt: &FixAttempt) -> String {
    let rule: String = attempt
        .error_pattern
        .trim()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
        .collect();
    let rule = rule.trim_matches('-');
    let kind = if rule.is_empty() {
        prefix.to_string()
    } else {
        format!("{prefix}-{rule}")
    };
    format!("{kind}/{}/{}", attempt.build_id, attempt.attempt_number)
}

fn summary(headline: String, attempt: &FixAttempt) -> String {
    let mut text = headline;
    text.push_str("\n\n");
    text.push_str(&format!(
        "Detected `{}` (confidence {}%):\n\n    {}\n",
        attempt.error_pattern, attempt.confidence_score, attempt.error_message
    ));
    if let Some(suggestion) = attempt.fix_suggestion.as_deref() {
        text.push_str(&format!("\nSuggested fix: {suggestion}\n"));
    }
    text
}

async fn open_fix(
    prefix: &str,
    title: String,
    headline: String,
    attempt: &FixAttempt,
    ctx: &RemediationContext<'_>,
) -> Result<Remediation, RemediationError> {
    if attempt.build_id != ctx.build.id {
        return Err(RemediationError::MissingContext(format!(
            "attempt {} belongs to build {}, not {}",
            attempt.id, attempt.build_id, ctx.build.id
        )));
    }
    let base = ctx.base_branch()?;
    let branch = branch_name(prefix, attempt);
    let changes_summary = summary(headline, attempt);

    let pull_request = ctx
        .source_control
        .open_pull_request(&ctx.repository.full_name, &branch, base, &title, &changes_summary)
        .await?;

    Ok(Remediation {
        branch_name: branch,
        changes_summary,
        pull_request,
    })
}

pub struct DependencyFix;

#[async_trait]
impl RemediationStrategy for DependencyFix {
    fn fix_type(&self) -> FixType {
        FixType::DependencyUpdate
    }

    async fn apply(
        &self,
        attempt: &FixAttempt,
        ctx: &RemediationContext<'_>,
    ) -> Result<Remediation, RemediationError> {
        let headline = if attempt.matched_text.is_empty() {
            "Update dependency versions to resolve the conflict".to_string()
        } else {
            format!("Add missing dependency `{}`", attempt.matched_text)
        };
        let title = format!("Auto-fix: dependency update for build #{}", ctx.build.id);
        open_fix("auto-fix", title, headline, attempt, ctx).await
    }
}

pub struct ConfigFix;

#[async_trait]
impl RemediationStrategy for ConfigFix {
    fn fix_type(&self) -> FixType {
        FixType::ConfigFix
    }

    async fn apply(
        &self,
        attempt: &FixAttempt,
        ctx: &RemediationContext<'_>,
    ) -> Result<Remediation, RemediationError> {
        let title = format!("Auto-fix: build configuration for build #{}", ctx.build.id);
        let headline = "Update the build configuration".to_string();
        open_fix("auto-fix-config", title, headline, attempt, ctx).await
    }
}

pub struct MissingFileFix;

#[async_trait]
impl RemediationStrategy for MissingFileFix {
    fn fix_type(&self) -> FixType {
        FixType::MissingFile
    }

    async fn apply(
        &self,
        attempt: &FixAttempt,
        ctx: &RemediationContext<'_>,
    ) -> Result<Remediation, RemediationError> {
        let title = format!("Auto-fix: restore missing file for build #{}", ctx.build.id);
        let headline = "Restore the file the build could not find".to_string();
        open_fix("auto-fix-file", title, headline, attempt, ctx).await
    }
}

pub struct EnvironmentFix;

#[async_trait]
impl RemediationStrategy for EnvironmentFix {
    fn fix_type(&self) -> FixType {
        FixType::EnvironmentFix
    }

    async fn apply(
        &self,
        attempt: &FixAttempt,
        ctx: &RemediationContext<'_>,
    ) -> Result<Remediation, RemediationError> {
        let title = format!("Auto-fix: CI environment for build #{}", ctx.build.id);
        let headline = "Adjust the CI environment setup".to_string();
        open_fix("auto-fix-env", title, headline, attempt, ctx).await
    }
}
