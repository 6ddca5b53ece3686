//! Failure classification: scans build logs against a fixed rule table.

use std::sync::LazyLock;

use regex::{Regex, RegexBuilder};
use serde::Serialize;

use crate::models::FixType;

/// One known failure signature.
pub struct Rule {
    pub name: &'static str,
    pub pattern: Regex,
    pub fix_type: FixType,
    pub confidence: u8,
    pub description: &'static str,
    /// Advice shown on the fix attempt. `{}` is replaced with the captured text
    /// and dropped when the match captured nothing.
    pub suggestion: &'static str,
}

/// A proposed fix derived from one rule match. Never persisted as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FixCandidate {
    pub rule_name: &'static str,
    /// Full text of the match.
    pub error_message: String,
    /// First capture group, or empty when the rule has none.
    pub matched_text: String,
    pub fix_type: FixType,
    pub confidence: u8,
    pub description: &'static str,
    pub suggestion: String,
    /// 1-based line of the match start.
    pub line_number: usize,
}

fn rule(
    name: &'static str,
    pattern: &str,
    fix_type: FixType,
    confidence: u8,
    description: &'static str,
    suggestion: &'static str,
) -> Rule {
    let pattern = RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .unwrap();
    Rule {
        name,
        pattern,
        fix_type,
        confidence,
        description,
        suggestion,
    }
}

/// Rules in match order.
pub static RULES: LazyLock<Vec<Rule>> = LazyLock::new(|| {
    vec![
        rule(
            "missing_python_package",
            r"ModuleNotFoundError: No module named '([^']+)'",
            FixType::DependencyUpdate,
            90,
            "Missing Python package",
            "Add the missing package: {}",
        ),
        rule(
            "dependency_version_conflict",
            r"ERROR:.*version.*conflict",
            FixType::DependencyUpdate,
            80,
            "Dependency version conflict",
            "Update dependencies to resolve the conflict",
        ),
        rule(
            "gradle_sync_failed",
            r"Gradle sync failed",
            FixType::ConfigFix,
            85,
            "Gradle sync failed",
            "Run gradle clean build",
        ),
        rule(
            "android_sdk_missing",
            r"Android SDK.*not found",
            FixType::EnvironmentFix,
            90,
            "Android SDK not found",
            "Install and configure the Android SDK",
        ),
        rule(
            "java_home_not_set",
            r"JAVA_HOME.*not set",
            FixType::EnvironmentFix,
            95,
            "JAVA_HOME is not set",
            "Set the JAVA_HOME environment variable",
        ),
        rule(
            "keystore_not_found",
            r"keystore.*not found",
            FixType::MissingFile,
            85,
            "Keystore file missing",
            "Create the keystore or point the build at the correct path",
        ),
        rule(
            "npm_package_missing",
            r"npm ERR!.*?not found(?: - GET \S+/(\S+))?",
            FixType::DependencyUpdate,
            80,
            "Missing npm package",
            "Install the missing package: npm install {}",
        ),
        rule(
            "syntax_error",
            r"SyntaxError.*",
            FixType::SyntaxFix,
            70,
            "Syntax error",
            "Review and correct the syntax error",
        ),
    ]
});

/// Classify a build log into fix candidates, in rule order then match order.
pub fn analyze(log_text: &str) -> Vec<FixCandidate> {
    let mut candidates = Vec::new();

    for rule in RULES.iter() {
        for captures in rule.pattern.captures_iter(log_text) {
            let Some(whole) = captures.get(0) else {
                continue;
            };
            let matched_text = captures
                .get(1)
                .map(|m| m.as_str().to_string())
                .unwrap_or_default();

            candidates.push(FixCandidate {
                rule_name: rule.name,
                error_message: whole.as_str().to_string(),
                suggestion: render_suggestion(rule.suggestion, &matched_text),
                matched_text,
                fix_type: rule.fix_type,
                confidence: rule.confidence,
                description: rule.description,
                line_number: line_number(log_text, whole.start()),
            });
        }
    }

    candidates
}

fn render_suggestion(template: &str, captured: &str) -> String {
    if captured.is_empty() {
        template.replace("{}", "").trim_end().to_string()
    } else {
        template.replace("{}", captured)
    }
}

fn line_number(text: &str, offset: usize) -> usize {
    text.as_bytes()[..offset].iter().filter(|&&b| b == b'\n').count() + 1
}
