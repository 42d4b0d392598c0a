//! Deployment pipeline for the liftoff CLI
//!
//! A deploy packages the application directory into a gzipped tar archive,
//! uploads it, then follows the remote build and rollout by polling status and
//! streaming build logs until a terminal stage. [`deploy`] runs the whole
//! pipeline; the stages are usable on their own.

/// Gzipped tar archive of an application directory
pub mod archive;
/// Error type and process exit codes
pub mod error;
/// Layered ignore rules for packaging
pub mod ignore_rules;
/// Resumable build log stream
pub mod logs;
/// Deployment identifiers and outcomes
pub mod model;
/// The end-to-end deploy
pub mod orchestrator;
mod session;
/// Deployment stages and status tracking
pub mod status;
/// Archive upload
pub mod upload;

#[cfg(test)]
mod test_helpers;

pub use archive::{ArchiveBuilder, ArchiveHandle};
pub use error::DeployError;
pub use ignore_rules::{IgnorePattern, IgnoreRuleSet, IgnoreSources, IgnoreTier, Polarity};
pub use logs::BuildLogStream;
pub use model::{ArchiveEntry, DeploymentId, DeploymentOutcome, LogCursor, LogLine};
pub use orchestrator::{DeployDependencies, DeployOptions, deploy};
pub use status::{DeploymentStage, DeploymentStatus, StatusTracker};
pub use upload::{UploadOutcome, UploadSession};
