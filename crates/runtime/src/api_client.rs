//! HTTP client for the deployment service

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::{StreamExt, TryStreamExt};
use reqwest::{Client, Response};
use thiserror::Error;
use tokio_util::codec::{FramedRead, LinesCodec};
use tokio_util::io::{ReaderStream, StreamReader};
use tracing::debug;

use crate::auth::AuthToken;
use crate::config::DeploySettings;
use crate::deps::{CloudApiClient, LineStream, ProgressIndicator, StatusReport, UploadReceipt};

/// Longest build log line accepted before the stream is treated as broken
pub const MAX_LOG_LINE_BYTES: usize = 1024 * 1024;

/// Classified HTTP failure
#[derive(Debug, Error)]
pub enum ApiError {
    /// Connection could not be established or was dropped
    #[error("Connection to the deployment service failed: {0}")]
    Transport(String),

    /// Connect or read timeout elapsed
    #[error("The request to the deployment service timed out")]
    Timeout,

    /// Token rejected (401/403)
    #[error("The token was rejected by the deployment service: {message}")]
    Unauthorized {
        /// Service-provided message
        message: String,
    },

    /// Request refused for a reason the client cannot fix by retrying
    #[error("{message}")]
    Rejected {
        /// HTTP status code
        status: u16,
        /// Service-provided message, verbatim
        message: String,
    },

    /// Service-side failure that may clear up on retry
    #[error("The deployment service returned {status}: {message}")]
    Server {
        /// HTTP status code
        status: u16,
        /// Response body
        message: String,
    },

    /// A response body did not have the expected shape
    #[error("Unexpected response from the deployment service: {0}")]
    Decode(String),
}

impl ApiError {
    /// Whether a retry from scratch might succeed
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Timeout | Self::Server { .. })
    }

    /// Classify a non-success status code and its body
    pub fn from_status(status: u16, body: &str) -> Self {
        let message = extract_message(body);
        match status {
            401 | 403 => Self::Unauthorized { message },
            408 | 429 | 500..=599 => Self::Server { status, message },
            _ => Self::Rejected { status, message },
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}

/// Pull `detail` or `message` out of a JSON error body, else return it trimmed
fn extract_message(body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        for key in ["detail", "message"] {
            match value.get(key) {
                Some(serde_json::Value::String(s)) => return s.clone(),
                Some(other) if !other.is_null() => return other.to_string(),
                _ => {}
            }
        }
    }
    body.trim().to_string()
}

async fn check_status(response: Response) -> Result<Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    debug!("Request failed with {}: {}", status, body);
    Err(ApiError::from_status(status.as_u16(), &body))
}

/// Production API client backed by reqwest
pub struct RealCloudApiClient {
    client: Client,
    base_url: String,
}

impl RealCloudApiClient {
    /// Build a client with the connect and read timeouts from `settings`
    pub fn new(settings: &DeploySettings) -> Result<Self, ApiError> {
        let client = Client::builder()
            .connect_timeout(settings.connect_timeout())
            .read_timeout(settings.read_timeout())
            .user_agent(concat!("liftoff/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ApiError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            base_url: settings.api_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

#[async_trait]
impl CloudApiClient for RealCloudApiClient {
    async fn upload_archive(
        &self,
        token: &AuthToken,
        upload_id: &str,
        archive: &Path,
        progress: Arc<dyn ProgressIndicator>,
    ) -> Result<UploadReceipt, ApiError> {
        let file = tokio::fs::File::open(archive)
            .await
            .map_err(|e| ApiError::Transport(format!("cannot open archive: {e}")))?;
        let body =
            ReaderStream::new(file).inspect_ok(move |chunk| progress.inc(chunk.len() as u64));

        let response = self
            .client
            .post(self.url("/deployments/upload"))
            .query(&[("upload_id", upload_id)])
            .bearer_auth(token.secret())
            .header(reqwest::header::CONTENT_TYPE, "application/gzip")
            .body(reqwest::Body::wrap_stream(body))
            .send()
            .await?;

        let response = check_status(response).await?;
        response.json::<UploadReceipt>().await.map_err(ApiError::from)
    }

    async fn cancel_upload(&self, token: &AuthToken, upload_id: &str) -> Result<(), ApiError> {
        let response = self
            .client
            .post(self.url(&format!("/uploads/{upload_id}/cancelled")))
            .bearer_auth(token.secret())
            .send()
            .await?;
        check_status(response).await.map(|_| ())
    }

    async fn deployment_status(
        &self,
        token: &AuthToken,
        deployment_id: &str,
    ) -> Result<StatusReport, ApiError> {
        let response = self
            .client
            .get(self.url(&format!("/deployments/{deployment_id}/status")))
            .bearer_auth(token.secret())
            .send()
            .await?;
        let response = check_status(response).await?;
        response.json::<StatusReport>().await.map_err(ApiError::from)
    }

    async fn open_build_logs(
        &self,
        token: &AuthToken,
        deployment_id: &str,
        last_message_id: Option<&str>,
    ) -> Result<LineStream, ApiError> {
        let mut request = self
            .client
            .get(self.url(&format!("/deployments/{deployment_id}/build-logs")))
            .bearer_auth(token.secret());
        if let Some(cursor) = last_message_id {
            request = request.query(&[("last_message_id", cursor)]);
        }

        let response = check_status(request.send().await?).await?;

        let reader = StreamReader::new(response.bytes_stream().map_err(std::io::Error::other));
        let codec = LinesCodec::new_with_max_length(MAX_LOG_LINE_BYTES);
        let lines = FramedRead::new(reader, codec)
            .map(|line| line.map_err(|e| ApiError::Transport(e.to_string())));

        Ok(Box::pin(lines))
    }
}

#[cfg(test)]
#[path = "api_client_tests.rs"]
mod tests;
