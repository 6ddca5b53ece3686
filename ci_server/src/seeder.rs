//! Registration seed: loads repositories and their CI integrations from JSON.
//!
//! ```json
//! [
//!   {
//!     "full_name": "acme/app",
//!     "auto_fix_enabled": true,
//!     "integrations": [{ "platform": "codemagic", "settings": { "app_id": "abc" } }]
//!   }
//! ]
//! ```
//!
//! Idempotent for repositories (re-seeding replaces settings).

use std::path::Path;

use anyhow::Context;
use serde::Deserialize;

use crate::models::{NewIntegration, NewRepository};
use crate::store::{MemoryStore, Store};

#[derive(Debug, Deserialize)]
struct SeedEntry {
    #[serde(flatten)]
    repository: NewRepository,
    #[serde(default)]
    integrations: Vec<NewIntegration>,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct SeedSummary {
    pub repositories: usize,
    pub integrations: usize,
}

pub async fn seed_from_file(store: &MemoryStore, path: &Path) -> anyhow::Result<SeedSummary> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    seed_from_str(store, &raw)
        .await
        .with_context(|| format!("seeding from {}", path.display()))
}

pub async fn seed_from_str(store: &MemoryStore, raw: &str) -> anyhow::Result<SeedSummary> {
    let entries: Vec<SeedEntry> = serde_json::from_str(raw)?;
    let mut summary = SeedSummary::default();

    for entry in entries {
        if entry.repository.full_name.trim().is_empty() {
            anyhow::bail!("repository entry without full_name");
        }
        let repository = store.insert_repository(entry.repository)?;
        summary.repositories += 1;

        for mut integration in entry.integrations {
            integration.repository_id = repository.id;
            let integration = store.create_integration(integration).await?;
            tracing::debug!(
                repository = %repository.full_name,
                platform = %integration.platform,
                "Integration registered"
            );
            summary.integrations += 1;
        }
        tracing::info!(
            repository = %repository.full_name,
            auto_fix = repository.auto_fix_enabled,
            "Repository registered"
        );
    }

    Ok(summary)
}
