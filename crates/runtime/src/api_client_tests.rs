//! Tests for the reqwest-backed API client

use super::*;
use crate::auth::TokenSource;
use crate::deps::UserInterface;
use crate::ui::TestUserInterface;
use futures_util::StreamExt;
use pretty_assertions::assert_eq;
use serde_json::json;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client_for(server: &MockServer) -> RealCloudApiClient {
    let settings = DeploySettings {
        api_url: format!("{}/", server.uri()),
        ..DeploySettings::default()
    };
    RealCloudApiClient::new(&settings).unwrap()
}

fn token() -> AuthToken {
    AuthToken::new("hello", TokenSource::Env)
}

#[test]
fn test_status_classification() {
    assert!(matches!(
        ApiError::from_status(401, ""),
        ApiError::Unauthorized { .. }
    ));
    assert!(matches!(
        ApiError::from_status(403, ""),
        ApiError::Unauthorized { .. }
    ));
    assert!(ApiError::from_status(503, "").is_retryable());
    assert!(ApiError::from_status(429, "").is_retryable());
    assert!(!ApiError::from_status(422, "").is_retryable());

    match ApiError::from_status(413, r#"{"detail": "Archive exceeds 100MB quota"}"#) {
        ApiError::Rejected { status, message } => {
            assert_eq!(status, 413);
            assert_eq!(message, "Archive exceeds 100MB quota");
        }
        other => panic!("unexpected classification: {other:?}"),
    }
}

#[test]
fn test_rejection_falls_back_to_raw_body() {
    let err = ApiError::from_status(400, "  bad archive  ");
    assert_eq!(err.to_string(), "bad archive");
}

#[tokio::test]
async fn test_upload_streams_archive_and_reports_progress() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/deployments/upload"))
        .and(query_param("upload_id", "upload-1"))
        .and(header("authorization", "Bearer hello"))
        .respond_with(
            ResponseTemplate::new(201)
                .set_body_json(json!({"id": "D1", "dashboard_url": "http://dash/D1"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::TempDir::new().unwrap();
    let archive = dir.path().join("bundle.tar.gz");
    let payload = vec![7u8; 200_000];
    std::fs::write(&archive, &payload).unwrap();

    let ui = TestUserInterface::new();
    let progress: Arc<dyn ProgressIndicator> = Arc::from(ui.create_progress_bar(200_000));

    let receipt = client_for(&server)
        .upload_archive(&token(), "upload-1", &archive, progress)
        .await
        .unwrap();

    assert_eq!(receipt.id, "D1");
    assert_eq!(receipt.dashboard_url.as_deref(), Some("http://dash/D1"));
    assert_eq!(ui.get_progress_bytes(), 200_000);

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests[0].body, payload);
}

#[tokio::test]
async fn test_upload_unauthorized() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/deployments/upload"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({"detail": "expired"})))
        .mount(&server)
        .await;

    let dir = tempfile::TempDir::new().unwrap();
    let archive = dir.path().join("bundle.tar.gz");
    std::fs::write(&archive, b"data").unwrap();

    let ui = TestUserInterface::new();
    let err = client_for(&server)
        .upload_archive(&token(), "u", &archive, Arc::from(ui.create_progress_bar(4)))
        .await
        .unwrap_err();

    assert!(matches!(err, ApiError::Unauthorized { ref message } if message == "expired"));
}

#[tokio::test]
async fn test_cancel_upload_posts_to_cancel_endpoint() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/uploads/upload-9/cancelled"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    client_for(&server)
        .cancel_upload(&token(), "upload-9")
        .await
        .unwrap();
}

#[tokio::test]
async fn test_deployment_status_parses_detail() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/deployments/D1/status"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"status": "build_failed", "detail": "syntax error"})),
        )
        .mount(&server)
        .await;

    let report = client_for(&server)
        .deployment_status(&token(), "D1")
        .await
        .unwrap();

    assert_eq!(
        report,
        StatusReport {
            status: "build_failed".to_string(),
            detail: Some("syntax error".to_string()),
        }
    );
}

#[tokio::test]
async fn test_deployment_status_bad_body_is_decode_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/deployments/D1/status"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
        .mount(&server)
        .await;

    let err = client_for(&server)
        .deployment_status(&token(), "D1")
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::Decode(_)));
}

#[tokio::test]
async fn test_build_logs_split_into_lines_and_send_cursor() {
    let server = MockServer::start().await;
    let body = concat!(
        r#"{"type": "message", "message": "Step 3", "id": "3"}"#,
        "\n",
        r#"{"type": "message", "message": "Step 4", "id": "4"}"#,
        "\n",
        r#"{"type": "complete"}"#,
    );
    Mock::given(method("GET"))
        .and(path("/deployments/D1/build-logs"))
        .and(query_param("last_message_id", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .expect(1)
        .mount(&server)
        .await;

    let stream = client_for(&server)
        .open_build_logs(&token(), "D1", Some("2"))
        .await
        .unwrap();
    let lines: Vec<String> = stream.map(Result::unwrap).collect().await;

    assert_eq!(
        lines,
        vec![
            r#"{"type": "message", "message": "Step 3", "id": "3"}"#.to_string(),
            r#"{"type": "message", "message": "Step 4", "id": "4"}"#.to_string(),
            r#"{"type": "complete"}"#.to_string(),
        ]
    );
}

#[tokio::test]
async fn test_build_logs_server_error_is_retryable() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/deployments/D1/build-logs"))
        .respond_with(ResponseTemplate::new(500).set_body_string("Internal Server Error"))
        .mount(&server)
        .await;

    let Err(err) = client_for(&server)
        .open_build_logs(&token(), "D1", None)
        .await
    else {
        panic!("expected an error");
    };
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_build_logs_oversized_line_is_a_stream_error() {
    let server = MockServer::start().await;
    let body = format!(
        "{}\n{}\n",
        "x".repeat(MAX_LOG_LINE_BYTES + 1),
        r#"{"type": "complete"}"#
    );
    Mock::given(method("GET"))
        .and(path("/deployments/D1/build-logs"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(&server)
        .await;

    let mut stream = client_for(&server)
        .open_build_logs(&token(), "D1", None)
        .await
        .unwrap();

    let first = stream.next().await.expect("stream ended early");
    assert!(matches!(first, Err(ApiError::Transport(_))), "got {first:?}");
}
