//! Error taxonomy for a deploy attempt

use std::path::PathBuf;
use std::time::Duration;

use liftoff_runtime::{ApiError, AuthError};
use thiserror::Error;

/// Exit code for a configuration problem
pub const EXIT_CONFIGURATION: i32 = 2;
/// Exit code for a missing, expired or rejected token
pub const EXIT_AUTH: i32 = 3;
/// Exit code for an unreadable path during archive construction
pub const EXIT_ARCHIVE: i32 = 4;
/// Exit code for exhausted transport retries
pub const EXIT_TRANSPORT: i32 = 5;
/// Exit code for an upload the service refused
pub const EXIT_VALIDATION: i32 = 6;
/// Exit code for a service contract violation
pub const EXIT_PROTOCOL: i32 = 7;
/// Exit code when no terminal status arrives in time
pub const EXIT_STATUS_TIMEOUT: i32 = 8;

/// Errors that abort a deploy attempt
///
/// Failed deployments and user cancellation are not errors; they are
/// reported through [`crate::DeploymentOutcome`].
#[derive(Debug, Error)]
pub enum DeployError {
    /// Bad ignore syntax, missing application directory
    #[error("{0}")]
    Configuration(String),

    /// Token missing, expired or rejected
    #[error("{0}")]
    Auth(String),

    /// A path under the application directory could not be read
    #[error("Failed to add {} to the archive: {source}", path.display())]
    ArchiveBuild {
        /// Offending path
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Connection or timeout failures that outlasted the retry budget
    #[error("{0}")]
    Transport(String),

    /// The service refused the upload; message is the service's, verbatim
    #[error("{0}")]
    Validation(String),

    /// The service broke the status or log contract
    #[error("Unexpected response from the deployment service: {0}")]
    Protocol(String),

    /// No terminal status within the overall wait
    #[error("Timed out after {}s waiting for the deployment to finish", .0.as_secs())]
    StatusTimeout(Duration),

    /// Local I/O failure outside of reading application files
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl DeployError {
    /// Process exit code for this error
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Configuration(_) => EXIT_CONFIGURATION,
            Self::Auth(_) => EXIT_AUTH,
            Self::ArchiveBuild { .. } | Self::Io(_) => EXIT_ARCHIVE,
            Self::Transport(_) => EXIT_TRANSPORT,
            Self::Validation(_) => EXIT_VALIDATION,
            Self::Protocol(_) => EXIT_PROTOCOL,
            Self::StatusTimeout(_) => EXIT_STATUS_TIMEOUT,
        }
    }

    pub(crate) fn session_expired() -> Self {
        Self::Auth("Your session has expired. Run `liftoff login` to re-authenticate.".to_string())
    }
}

impl From<ApiError> for DeployError {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::Unauthorized { message } if message.is_empty() => Self::Auth(
                "The deployment service rejected your token. Run `liftoff login` to re-authenticate."
                    .to_string(),
            ),
            ApiError::Unauthorized { message } => Self::Auth(format!(
                "The deployment service rejected your token ({message}). Run `liftoff login` to re-authenticate."
            )),
            ApiError::Rejected { message, .. } => Self::Validation(message),
            ApiError::Decode(message) => Self::Protocol(message),
            err @ (ApiError::Transport(_) | ApiError::Timeout | ApiError::Server { .. }) => {
                Self::Transport(err.to_string())
            }
        }
    }
}

impl From<AuthError> for DeployError {
    fn from(err: AuthError) -> Self {
        Self::Auth(err.to_string())
    }
}
