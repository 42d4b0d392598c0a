use std::path::PathBuf;

use liftoff_runtime::{ApiError, TestUserInterface, TokenSource, UserInterface};
use pretty_assertions::assert_eq;
use tempfile::TempDir;

use super::*;
use crate::archive::ArchiveBuilder;
use crate::ignore_rules::IgnoreSources;
use crate::test_helpers::{ApiCall, FakeCloudApi, UploadReply};

struct TestFixture {
    api: Arc<FakeCloudApi>,
    ui: TestUserInterface,
    settings: DeploySettings,
    _app: TempDir,
    archive: Option<ArchiveHandle>,
}

impl TestFixture {
    fn new(api: FakeCloudApi) -> Self {
        let app = tempfile::Builder::new()
            .prefix("liftoff-app-")
            .tempdir()
            .unwrap();
        std::fs::write(app.path().join("app.py"), "print('hello')").unwrap();
        let rules = IgnoreSources::default().load(app.path()).unwrap();
        let archive = ArchiveBuilder::build(app.path(), &rules).unwrap();

        Self {
            api: Arc::new(api),
            ui: TestUserInterface::new(),
            settings: DeploySettings::default(),
            _app: app,
            archive: Some(archive),
        }
    }

    fn archive_path(&self) -> PathBuf {
        self.archive.as_ref().unwrap().path().to_path_buf()
    }

    async fn upload(&mut self, cancel: &CancellationToken) -> Result<UploadOutcome, DeployError> {
        self.upload_with(&AuthToken::new("token", TokenSource::Env), cancel)
            .await
    }

    async fn upload_with(
        &mut self,
        token: &AuthToken,
        cancel: &CancellationToken,
    ) -> Result<UploadOutcome, DeployError> {
        let session = UploadSession::new(self.api.clone(), &self.settings);
        let archive = self.archive.take().unwrap();
        let progress: Arc<dyn ProgressIndicator> =
            Arc::from(self.ui.create_progress_bar(archive.size()));
        session
            .upload(archive, token, progress, cancel)
            .await
    }
}

#[tokio::test(start_paused = true)]
async fn test_accepted_upload_returns_deployment_id() {
    let mut fixture = TestFixture::new(FakeCloudApi::new().upload(UploadReply::Accept("D1")));
    let archive = fixture.archive_path();
    let size = std::fs::metadata(&archive).unwrap().len();

    let outcome = fixture.upload(&CancellationToken::new()).await.unwrap();

    assert_eq!(
        outcome,
        UploadOutcome::Accepted {
            deployment_id: DeploymentId::new("D1"),
            dashboard_url: Some("https://dashboard.liftoff.dev/d/D1".to_string()),
        }
    );
    assert_eq!(fixture.ui.get_progress_bytes(), size);
    assert!(!archive.exists());
}

#[tokio::test(start_paused = true)]
async fn test_transport_failures_retry_from_the_start() {
    let mut fixture = TestFixture::new(
        FakeCloudApi::new()
            .upload(UploadReply::Fail(ApiError::Transport(
                "connection reset".to_string(),
            )))
            .upload(UploadReply::Fail(ApiError::Server {
                status: 503,
                message: "unavailable".to_string(),
            }))
            .upload(UploadReply::Accept("D1")),
    );

    let outcome = fixture.upload(&CancellationToken::new()).await.unwrap();

    assert!(matches!(outcome, UploadOutcome::Accepted { .. }));
    let uploads: Vec<ApiCall> = fixture
        .api
        .calls()
        .into_iter()
        .filter(|c| matches!(c, ApiCall::Upload { .. }))
        .collect();
    assert_eq!(uploads.len(), 3);
    // every attempt reuses the same upload id
    assert!(uploads.windows(2).all(|w| w[0] == w[1]));
}

#[tokio::test(start_paused = true)]
async fn test_retry_budget_exhaustion_is_transport_error() {
    let mut fixture = TestFixture::new(
        FakeCloudApi::new()
            .upload(UploadReply::Fail(ApiError::Timeout))
            .upload(UploadReply::Fail(ApiError::Timeout)),
    );
    fixture.settings.upload_max_attempts = 2;
    let archive = fixture.archive_path();

    let err = fixture.upload(&CancellationToken::new()).await.unwrap_err();

    assert!(matches!(err, DeployError::Transport(ref m) if m.contains("2 attempts")));
    assert_eq!(fixture.api.calls().len(), 2);
    assert!(!archive.exists());
}

#[tokio::test(start_paused = true)]
async fn test_rejected_token_is_not_retried() {
    let mut fixture = TestFixture::new(FakeCloudApi::new().upload(UploadReply::Fail(
        ApiError::Unauthorized {
            message: "token expired".to_string(),
        },
    )));

    let err = fixture.upload(&CancellationToken::new()).await.unwrap_err();

    assert!(matches!(err, DeployError::Auth(ref m) if m.contains("liftoff login")));
    assert_eq!(fixture.api.calls().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_validation_failure_is_surfaced_verbatim() {
    let mut fixture = TestFixture::new(FakeCloudApi::new().upload(UploadReply::Fail(
        ApiError::Rejected {
            status: 413,
            message: "Archive exceeds the 100 MB limit for your plan".to_string(),
        },
    )));

    let err = fixture.upload(&CancellationToken::new()).await.unwrap_err();

    assert_eq!(err.to_string(), "Archive exceeds the 100 MB limit for your plan");
    assert_eq!(fixture.api.calls().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_mid_transfer_notifies_service_and_removes_archive() {
    let mut fixture = TestFixture::new(FakeCloudApi::new().upload(UploadReply::Stall(4096)));
    let archive = fixture.archive_path();
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(3)).await;
        trigger.cancel();
    });

    let outcome = fixture.upload(&cancel).await.unwrap();

    assert_eq!(outcome, UploadOutcome::Cancelled);
    assert_eq!(fixture.ui.get_progress_bytes(), 4096);
    assert!(!archive.exists());
    assert!(!archive.parent().unwrap().exists());

    let calls = fixture.api.calls();
    let ApiCall::Upload { upload_id } = &calls[0] else {
        panic!("first call should be the upload, got {calls:?}");
    };
    assert_eq!(
        calls[1],
        ApiCall::CancelUpload {
            upload_id: upload_id.clone()
        }
    );
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_backoff() {
    let mut fixture = TestFixture::new(
        FakeCloudApi::new().upload(UploadReply::Fail(ApiError::Transport("reset".to_string()))),
    );
    fixture.settings.upload_backoff_ms = 60_000;
    let archive = fixture.archive_path();
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        trigger.cancel();
    });

    let outcome = fixture.upload(&cancel).await.unwrap();

    assert_eq!(outcome, UploadOutcome::Cancelled);
    assert!(!archive.exists());
    assert_eq!(fixture.api.calls().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_before_start_still_releases_archive() {
    let mut fixture = TestFixture::new(FakeCloudApi::new());
    let archive = fixture.archive_path();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let outcome = fixture.upload(&cancel).await.unwrap();

    assert_eq!(outcome, UploadOutcome::Cancelled);
    assert!(!archive.exists());
    assert!(
        !fixture
            .api
            .calls()
            .iter()
            .any(|c| matches!(c, ApiCall::Upload { .. }))
    );
}

#[tokio::test(start_paused = true)]
async fn test_retry_is_not_sent_with_an_expired_token() {
    let mut fixture = TestFixture::new(
        FakeCloudApi::new()
            .upload(UploadReply::Fail(ApiError::Transport("reset".to_string())))
            .upload(UploadReply::Accept("D1")),
    );
    fixture.settings.upload_backoff_ms = 500;
    let archive = fixture.archive_path();
    let token = AuthToken::with_expiry(
        "short-lived",
        Some(chrono::Utc::now() + chrono::Duration::milliseconds(200)),
        TokenSource::Stored,
    );

    let err = fixture
        .upload_with(&token, &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, DeployError::Auth(ref m) if m.contains("liftoff login")), "got {err:?}");
    assert_eq!(fixture.api.calls().len(), 1);
    assert!(!archive.exists());
}
