//! Auto-fix pipeline data models.

pub mod build;
pub mod fix_attempt;
pub mod repository;

pub use build::{Build, BuildStatus, NewBuild, TriggerKind};
pub use fix_attempt::{FixAttempt, FixAttemptStatus, FixType, NewFixAttempt};
pub use repository::{Integration, NewIntegration, NewRepository, Repository};
