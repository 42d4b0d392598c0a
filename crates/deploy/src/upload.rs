//! Archive upload with retries and cooperative cancellation

use std::sync::Arc;
use std::time::Duration;

use liftoff_runtime::config::backoff_delay;
use liftoff_runtime::{AuthToken, CloudApiClient, DeploySettings, ProgressIndicator};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::archive::ArchiveHandle;
use crate::error::DeployError;
use crate::model::DeploymentId;
use crate::session::SessionDeadline;

/// How long a cancellation notice may delay returning to the user
const CANCEL_NOTICE_TIMEOUT: Duration = Duration::from_secs(5);

/// Result of an upload that did not fail
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    /// The service accepted the archive
    Accepted {
        /// Identifier of the new deployment
        deployment_id: DeploymentId,
        /// Dashboard page for the deployment
        dashboard_url: Option<String>,
    },
    /// The cancellation token fired first
    Cancelled,
}

/// One upload of one archive
///
/// Every attempt streams the whole archive again from the start; the service
/// has no partial-resume contract. Only transport-level failures are retried.
pub struct UploadSession {
    api_client: Arc<dyn CloudApiClient>,
    upload_id: String,
    max_attempts: u32,
    backoff: Duration,
}

impl UploadSession {
    /// New session with a fresh upload id
    pub fn new(api_client: Arc<dyn CloudApiClient>, settings: &DeploySettings) -> Self {
        Self {
            api_client,
            upload_id: Uuid::new_v4().to_string(),
            max_attempts: settings.upload_max_attempts.max(1),
            backoff: settings.upload_backoff(),
        }
    }

    /// Client-generated id the service knows this upload by
    pub fn upload_id(&self) -> &str {
        &self.upload_id
    }

    /// Send `archive`, consuming it; the archive file is gone by the time this
    /// returns, whatever the result
    pub async fn upload(
        &self,
        archive: ArchiveHandle,
        token: &AuthToken,
        progress: Arc<dyn ProgressIndicator>,
        cancel: &CancellationToken,
    ) -> Result<UploadOutcome, DeployError> {
        let session = SessionDeadline::for_token(token);
        let mut attempt = 0;
        loop {
            session.ensure_live()?;
            attempt += 1;
            progress.set_position(0);
            debug!(
                "Uploading {} bytes as {} (attempt {}/{})",
                archive.size(),
                self.upload_id,
                attempt,
                self.max_attempts
            );

            let sent = tokio::select! {
                biased;
                () = cancel.cancelled() => None,
                sent = self.api_client.upload_archive(
                    token,
                    &self.upload_id,
                    archive.path(),
                    Arc::clone(&progress),
                ) => Some(sent),
            };

            let err = match sent {
                None => return Ok(self.cancelled(archive, token).await),
                Some(Ok(receipt)) => {
                    info!("Upload {} accepted as deployment {}", self.upload_id, receipt.id);
                    return Ok(UploadOutcome::Accepted {
                        deployment_id: DeploymentId::new(receipt.id),
                        dashboard_url: receipt.dashboard_url,
                    });
                }
                Some(Err(err)) => err,
            };

            if !err.is_retryable() {
                return Err(err.into());
            }
            if attempt >= self.max_attempts {
                return Err(DeployError::Transport(format!(
                    "Upload failed after {attempt} attempts: {err}"
                )));
            }

            let delay = backoff_delay(self.backoff, attempt - 1);
            warn!("Upload attempt {} failed, retrying in {:?}: {}", attempt, delay, err);
            tokio::select! {
                biased;
                () = cancel.cancelled() => return Ok(self.cancelled(archive, token).await),
                () = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Tell the service, best effort, then release the archive
    async fn cancelled(&self, archive: ArchiveHandle, token: &AuthToken) -> UploadOutcome {
        info!("Upload {} cancelled", self.upload_id);
        let notice = self.api_client.cancel_upload(token, &self.upload_id);
        match tokio::time::timeout(CANCEL_NOTICE_TIMEOUT, notice).await {
            Ok(Ok(())) => debug!("Service acknowledged cancellation of {}", self.upload_id),
            Ok(Err(err)) => debug!("Cancellation notice for {} failed: {}", self.upload_id, err),
            Err(_) => debug!("Cancellation notice for {} timed out", self.upload_id),
        }
        if let Err(err) = archive.close() {
            warn!("Failed to remove archive: {}", err);
        }
        UploadOutcome::Cancelled
    }
}

#[cfg(test)]
#[path = "upload_tests.rs"]
mod tests;
