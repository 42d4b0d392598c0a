//! Dependency injection traits for testability
//!
//! This module provides trait abstractions for all external dependencies of
//! the deployment pipeline, allowing for easy mocking and testing.

use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::Stream;
use serde::Deserialize;

use crate::api_client::ApiError;
use crate::auth::{AuthError, AuthToken};

/// Lines of an NDJSON response body, in arrival order
pub type LineStream = Pin<Box<dyn Stream<Item = Result<String, ApiError>> + Send>>;

/// Body returned when the service accepts an upload
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UploadReceipt {
    /// Service-assigned deployment identifier
    pub id: String,
    /// Dashboard page for the deployment
    #[serde(default)]
    pub dashboard_url: Option<String>,
}

/// One observation of a deployment's stage, as sent on the wire
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StatusReport {
    /// Stage name
    pub status: String,
    /// Diagnostic payload for failure and skip stages
    #[serde(default)]
    pub detail: Option<String>,
}

/// Deployment service API operations
#[async_trait]
pub trait CloudApiClient: Send + Sync {
    /// Stream an archive to the upload endpoint
    async fn upload_archive(
        &self,
        token: &AuthToken,
        upload_id: &str,
        archive: &Path,
        progress: Arc<dyn ProgressIndicator>,
    ) -> Result<UploadReceipt, ApiError>;

    /// Tell the service an upload was abandoned
    async fn cancel_upload(&self, token: &AuthToken, upload_id: &str) -> Result<(), ApiError>;

    /// Fetch the current stage of a deployment
    async fn deployment_status(
        &self,
        token: &AuthToken,
        deployment_id: &str,
    ) -> Result<StatusReport, ApiError>;

    /// Open the build log, resuming after `last_message_id` when given
    async fn open_build_logs(
        &self,
        token: &AuthToken,
        deployment_id: &str,
        last_message_id: Option<&str>,
    ) -> Result<LineStream, ApiError>;
}

/// Supplies a bearer token on demand
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Resolve the token for this attempt
    async fn resolve_token(&self) -> Result<AuthToken, AuthError>;
}

/// User interface operations
pub trait UserInterface: Send + Sync {
    /// Create a spinner progress indicator
    fn create_spinner(&self) -> Box<dyn ProgressIndicator>;

    /// Create a byte-count progress bar
    fn create_progress_bar(&self, total: u64) -> Box<dyn ProgressIndicator>;

    /// Print a message
    fn print(&self, message: &str);

    /// Print a styled message
    fn print_styled(&self, message: &str, style: MessageStyle);

    /// Check if running in interactive mode
    fn is_interactive(&self) -> bool;
}

/// Progress indicator trait
pub trait ProgressIndicator: Send + Sync {
    /// Set the message
    fn set_message(&self, message: &str);

    /// Advance the position by `delta`
    fn inc(&self, delta: u64);

    /// Reset the position
    fn set_position(&self, position: u64);

    /// Finish and clear the progress
    fn finish_and_clear(&self);

    /// Enable steady tick
    fn enable_steady_tick(&self, duration: Duration);

    /// Finish with a message
    fn finish_with_message(&self, message: String);
}

/// Message styling options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageStyle {
    /// Dimmed text for streamed log lines
    Dim,
    /// Warning style (typically yellow)
    Warning,
    /// Error style (typically red)
    Error,
    /// Success style (typically green)
    Success,
}
