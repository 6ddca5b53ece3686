//! Pipeline services: ingestion, dispatch, orchestration, analysis and remediation.

pub mod analyzer;
pub mod build_service;
pub mod dispatch_service;
pub mod fix_service;
pub mod github_service;
pub mod ingest_service;
pub mod orchestrator;
