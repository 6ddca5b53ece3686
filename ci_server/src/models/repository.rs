//! Repository and Integration: registration records owned by the surrounding system.
//!
//! The pipeline reads these; it only writes `last_build_at` / `last_used_at`
//! and may auto-provision a default integration.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Repository {
    pub id: i64,
    /// `owner/name`, e.g. "centrixsystems/centrix".
    pub full_name: String,
    pub auto_fix_enabled: bool,
    pub auto_fix_safe_only: bool,
    /// Overrides the server-wide follow-up build bound when set.
    pub auto_fix_max_attempts: Option<u32>,
    pub primary_branch: String,
    pub last_build_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewRepository {
    pub full_name: String,
    #[serde(default)]
    pub auto_fix_enabled: bool,
    #[serde(default = "default_true")]
    pub auto_fix_safe_only: bool,
    #[serde(default)]
    pub auto_fix_max_attempts: Option<u32>,
    #[serde(default = "default_branch")]
    pub primary_branch: String,
}

/// Connection between a repository and one CI platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Integration {
    pub id: i64,
    pub repository_id: i64,
    /// Raw platform string as registered; parsed when the adapter is resolved.
    pub platform: String,
    pub is_active: bool,
    /// Platform-specific settings (workflow file, app id, project slug).
    pub settings: serde_json::Value,
    pub last_used_at: Option<DateTime<Utc>>,
}

impl Integration {
    pub fn setting(&self, key: &str) -> Option<&str> {
        self.settings.get(key).and_then(|v| v.as_str())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewIntegration {
    #[serde(skip)]
    pub repository_id: i64,
    pub platform: String,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub settings: serde_json::Value,
}

impl NewIntegration {
    /// Fallback integration provisioned when a repository has none.
    pub fn github_actions_default(repository_id: i64) -> Self {
        Self {
            repository_id,
            platform: "github_actions".to_string(),
            is_active: true,
            settings: serde_json::Value::Null,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_branch() -> String {
    "main".to_string()
}
