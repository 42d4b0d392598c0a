//! Test doubles for the deployment pipeline
//!
//! `MockAuthProviderMock` is a mockall mock. The API client is a scripted
//! fake instead: upload cancellation and dropped log connections need futures
//! that stay pending or end mid-stream, which mockall's synchronous
//! `returning` closures cannot express.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use mockall::mock;

use liftoff_runtime::{
    ApiError, AuthError, AuthProvider, AuthToken, CloudApiClient, LineStream, ProgressIndicator,
    StatusReport, TokenSource, UploadReceipt,
};

// Mock implementation of the AuthProvider trait.
//
// # Example
//
// ```rust
// let mut auth = MockAuthProviderMock::new();
// auth.expect_resolve_token()
//     .times(1)
//     .returning(|| Ok(AuthToken::new("secret", TokenSource::Env)));
// ```
mock! {
    pub AuthProviderMock {}

    #[async_trait]
    impl AuthProvider for AuthProviderMock {
        async fn resolve_token(&self) -> Result<AuthToken, AuthError>;
    }
}

/// Auth provider mock that hands out a non-expiring token once
pub fn auth_with_valid_token() -> MockAuthProviderMock {
    let mut auth = MockAuthProviderMock::new();
    auth.expect_resolve_token()
        .times(1)
        .returning(|| Ok(AuthToken::new("test-token", TokenSource::Env)));
    auth
}

/// Requests the fake received, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiCall {
    /// Archive upload
    Upload {
        /// Client-generated upload id
        upload_id: String,
    },
    /// Upload cancellation notice
    CancelUpload {
        /// Client-generated upload id
        upload_id: String,
    },
    /// Status poll
    Status,
    /// Build log subscription
    OpenLogs {
        /// Resume cursor sent with the request
        cursor: Option<String>,
    },
}

/// Scripted reply to one upload request
pub enum UploadReply {
    /// Accept with the given id
    Accept(&'static str),
    /// Fail with an error
    Fail(ApiError),
    /// Report some bytes sent, then never finish
    Stall(u64),
}

/// Scripted reply to one build log subscription
pub enum LogReply {
    /// Deliver these lines, then end the response body
    Lines(Vec<String>),
    /// Deliver these lines, then fail with a transport error mid-body
    LinesThenDrop(Vec<String>),
    /// Deliver these lines, then keep the connection open silently
    LinesThenHold(Vec<String>),
    /// Refuse the subscription
    Fail(ApiError),
}

/// NDJSON message event with the given id
pub fn log_message(id: u32, text: &str) -> String {
    serde_json::json!({"type": "message", "message": text, "id": id.to_string()}).to_string()
}

/// NDJSON event with only a type field
pub fn log_event(kind: &str) -> String {
    serde_json::json!({ "type": kind }).to_string()
}

/// Status report as the service sends it
pub fn report(status: &str, detail: Option<&str>) -> StatusReport {
    StatusReport {
        status: status.to_string(),
        detail: detail.map(str::to_string),
    }
}

/// Scripted stand-in for the deployment service
#[derive(Default)]
pub struct FakeCloudApi {
    uploads: Mutex<VecDeque<UploadReply>>,
    statuses: Mutex<VecDeque<Result<StatusReport, ApiError>>>,
    logs: Mutex<VecDeque<LogReply>>,
    calls: Mutex<Vec<ApiCall>>,
    uploaded_archives: Mutex<Vec<PathBuf>>,
}

impl FakeCloudApi {
    /// Empty script; every request panics until scripted
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an upload reply
    #[must_use]
    pub fn upload(self, reply: UploadReply) -> Self {
        self.uploads.lock().unwrap().push_back(reply);
        self
    }

    /// Queue status polls that each report one stage
    #[must_use]
    pub fn statuses(self, stages: &[&str]) -> Self {
        {
            let mut statuses = self.statuses.lock().unwrap();
            for stage in stages {
                statuses.push_back(Ok(report(stage, None)));
            }
        }
        self
    }

    /// Queue one status poll reply
    #[must_use]
    pub fn status(self, reply: Result<StatusReport, ApiError>) -> Self {
        self.statuses.lock().unwrap().push_back(reply);
        self
    }

    /// Queue a build log subscription reply
    #[must_use]
    pub fn logs(self, reply: LogReply) -> Self {
        self.logs.lock().unwrap().push_back(reply);
        self
    }

    /// Every request received so far
    pub fn calls(&self) -> Vec<ApiCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Number of status polls received
    pub fn status_polls(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, ApiCall::Status))
            .count()
    }

    /// Archive paths handed to `upload_archive`
    pub fn uploaded_archives(&self) -> Vec<PathBuf> {
        self.uploaded_archives.lock().unwrap().clone()
    }

    fn record(&self, call: ApiCall) {
        self.calls.lock().unwrap().push(call);
    }
}

fn ok_lines(lines: Vec<String>) -> impl futures::Stream<Item = Result<String, ApiError>> {
    stream::iter(lines.into_iter().map(Ok))
}

#[async_trait]
impl CloudApiClient for FakeCloudApi {
    async fn upload_archive(
        &self,
        _token: &AuthToken,
        upload_id: &str,
        archive: &Path,
        progress: Arc<dyn ProgressIndicator>,
    ) -> Result<UploadReceipt, ApiError> {
        self.record(ApiCall::Upload {
            upload_id: upload_id.to_string(),
        });
        self.uploaded_archives
            .lock()
            .unwrap()
            .push(archive.to_path_buf());
        assert!(archive.exists(), "archive must exist while uploading");

        let reply = self
            .uploads
            .lock()
            .unwrap()
            .pop_front()
            .expect("unexpected upload request");
        match reply {
            UploadReply::Accept(id) => {
                let size = std::fs::metadata(archive).map(|m| m.len()).unwrap_or(0);
                progress.inc(size);
                Ok(UploadReceipt {
                    id: id.to_string(),
                    dashboard_url: Some(format!("https://dashboard.liftoff.dev/d/{id}")),
                })
            }
            UploadReply::Fail(err) => Err(err),
            UploadReply::Stall(sent) => {
                progress.inc(sent);
                std::future::pending().await
            }
        }
    }

    async fn cancel_upload(&self, _token: &AuthToken, upload_id: &str) -> Result<(), ApiError> {
        self.record(ApiCall::CancelUpload {
            upload_id: upload_id.to_string(),
        });
        Ok(())
    }

    async fn deployment_status(
        &self,
        _token: &AuthToken,
        _deployment_id: &str,
    ) -> Result<StatusReport, ApiError> {
        self.record(ApiCall::Status);
        self.statuses
            .lock()
            .unwrap()
            .pop_front()
            .expect("status polled after the script ran out")
    }

    async fn open_build_logs(
        &self,
        _token: &AuthToken,
        _deployment_id: &str,
        last_message_id: Option<&str>,
    ) -> Result<LineStream, ApiError> {
        self.record(ApiCall::OpenLogs {
            cursor: last_message_id.map(str::to_string),
        });
        let reply = self.logs.lock().unwrap().pop_front();
        match reply {
            Some(LogReply::Lines(lines)) => Ok(Box::pin(ok_lines(lines))),
            Some(LogReply::LinesThenDrop(lines)) => Ok(Box::pin(ok_lines(lines).chain(
                stream::once(async { Err(ApiError::Transport("connection reset".to_string())) }),
            ))),
            Some(LogReply::LinesThenHold(lines)) => {
                Ok(Box::pin(ok_lines(lines).chain(stream::pending())))
            }
            Some(LogReply::Fail(err)) => Err(err),
            // an unscripted subscription stays open until the caller stops
            None => Ok(Box::pin(stream::pending())),
        }
    }
}
