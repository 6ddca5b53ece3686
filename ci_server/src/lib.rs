//! Centrix auto-fix: CI build orchestration with automatic failure remediation.
//!
//! GitHub webhooks become builds on the repository's CI platform. Failed
//! builds are analyzed for known error patterns, and fixes are proposed as
//! pull requests followed by a verification build, bounded per retry chain.

pub mod config;
pub mod error;
pub mod fakes;
pub mod metrics;
pub mod models;
pub mod pipeline;
pub mod platforms;
pub mod remediation;
pub mod routes;
pub mod seeder;
pub mod services;
pub mod store;
pub mod worker;
