//! Identifiers and outcomes shared across the pipeline

use std::fmt;
use std::path::PathBuf;

use crate::error::EXIT_PROTOCOL;
use crate::status::{DeploymentStage, DeploymentStatus};

/// Exit code for a deployment whose build failed
pub const EXIT_BUILD_FAILED: i32 = 10;
/// Exit code for a deployment that failed to roll out
pub const EXIT_DEPLOY_FAILED: i32 = 11;
/// Exit code for a deployment that failed verification
pub const EXIT_VERIFICATION_FAILED: i32 = 12;
/// Exit code for a user interrupt
pub const EXIT_CANCELLED: i32 = 130;

/// Service-assigned identifier of an accepted upload
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeploymentId(String);

impl DeploymentId {
    /// Wrap a raw identifier
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Raw identifier
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeploymentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Position in the remote build log; only ever moves forward
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LogCursor(String);

impl LogCursor {
    /// Wrap a raw message id
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Raw message id, as sent back on resume
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// One delivered build log line and the cursor just after it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    /// Cursor to resume from after this line
    pub cursor: LogCursor,
    /// Line text without trailing whitespace
    pub text: String,
}

/// A file placed in the archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    /// Path relative to the application directory
    pub relative_path: PathBuf,
    /// Size in bytes when it was added
    pub size: u64,
}

/// How a deploy invocation ended, short of an error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeploymentOutcome {
    /// The service reached a terminal stage
    Finished {
        /// Deployment that was tracked
        deployment_id: DeploymentId,
        /// Terminal stage with its diagnostic detail
        status: DeploymentStatus,
        /// Dashboard page, when the service sent one
        dashboard_url: Option<String>,
    },
    /// The upload was accepted and the caller chose not to wait for the build
    Submitted {
        /// Deployment the service created
        deployment_id: DeploymentId,
        /// Dashboard page, when the service sent one
        dashboard_url: Option<String>,
    },
    /// The user interrupted the deploy
    Cancelled,
}

impl DeploymentOutcome {
    /// Whether the deployment is known to be live
    pub const fn is_success(&self) -> bool {
        match self {
            Self::Finished { status, .. } => status.stage.is_success(),
            Self::Submitted { .. } | Self::Cancelled => false,
        }
    }

    /// Process exit code for this outcome
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Cancelled => EXIT_CANCELLED,
            Self::Submitted { .. } => 0,
            Self::Finished { status, .. } => match status.stage {
                DeploymentStage::Verified | DeploymentStage::VerificationSkipped => 0,
                DeploymentStage::BuildFailed => EXIT_BUILD_FAILED,
                DeploymentStage::DeployFailed => EXIT_DEPLOY_FAILED,
                DeploymentStage::VerificationFailed => EXIT_VERIFICATION_FAILED,
                // tracking only ends on a terminal stage
                DeploymentStage::Queued
                | DeploymentStage::Building
                | DeploymentStage::Built
                | DeploymentStage::Deploying
                | DeploymentStage::Deployed
                | DeploymentStage::Verifying => EXIT_PROTOCOL,
            },
        }
    }
}
