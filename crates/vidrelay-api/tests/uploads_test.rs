//! Presigned grant, client-direct completion and legacy route tests.

mod helpers;

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::time::Duration;

use vidrelay_storage::{SinkError, SinkOp};

use helpers::setup_test_app;

#[tokio::test]
async fn presigned_grant_clamps_expiry_and_creates_no_job() {
    let app = setup_test_app();
    let before = Utc::now();

    let response = app
        .client()
        .post("/api/v0/uploads/presigned")
        .json(&json!({
            "filename": "holiday.MOV",
            "content_type": "video/quicktime",
            "expires_in_secs": 86_400
        }))
        .await;

    assert_eq!(response.status_code(), 200);
    let grant: Value = response.json();
    let key = grant["destination_key"].as_str().unwrap();
    assert!(key.starts_with("videos/"));
    assert!(key.ends_with(".mov"));
    assert_eq!(grant["content_type"], "video/quicktime");
    assert!(grant["upload_url"]
        .as_str()
        .unwrap()
        .contains("X-Amz-Expires=3600"));

    let expires_at: DateTime<Utc> = grant["expires_at"].as_str().unwrap().parse().unwrap();
    assert!(expires_at > before);
    assert!(expires_at <= Utc::now() + chrono::Duration::seconds(3600));

    assert!(app.ledger.is_empty());
}

#[tokio::test]
async fn presigned_grant_uses_default_expiry() {
    let app = setup_test_app();
    let grant: Value = app
        .client()
        .post("/api/v0/uploads/presigned")
        .json(&json!({ "filename": "clip.mp4", "content_type": "video/mp4" }))
        .await
        .json();
    assert!(grant["upload_url"]
        .as_str()
        .unwrap()
        .contains("X-Amz-Expires=900"));
}

#[tokio::test]
async fn presigned_grant_sink_failure_is_bad_gateway() {
    let app = setup_test_app();
    app.sink.fail_next(
        SinkOp::Presign,
        SinkError::permanent("presign", "InvalidAccessKeyId"),
    );

    let response = app
        .client()
        .post("/api/v0/uploads/presigned")
        .json(&json!({ "filename": "clip.mp4", "content_type": "video/mp4" }))
        .await;

    assert_eq!(response.status_code(), 502);
    let body: Value = response.json();
    assert_eq!(body["code"], "STORAGE_ERROR");
    assert!(body.get("details").is_none());
}

#[tokio::test]
async fn presigned_grant_rejects_empty_filename() {
    let app = setup_test_app();
    let response = app
        .client()
        .post("/api/v0/uploads/presigned")
        .json(&json!({ "filename": "", "content_type": "video/mp4" }))
        .await;
    assert_eq!(response.status_code(), 400);
}

#[tokio::test]
async fn client_upload_completion_records_job_and_fires_trigger() {
    let app = setup_test_app();

    let response = app
        .client()
        .post("/api/v0/uploads/complete")
        .json(&json!({
            "destination_key": "videos/direct.mp4",
            "size": 1234,
            "context": { "channel": "shorts" }
        }))
        .await;

    assert_eq!(response.status_code(), 201);
    let body: Value = response.json();
    assert_eq!(body["state"], "completed");
    assert_eq!(body["strategy"], "client_direct");
    assert_eq!(body["bytes_transferred"], 1234);
    assert_eq!(
        body["result_ref"],
        "https://sink.test/bucket/videos/direct.mp4"
    );

    let id: uuid::Uuid = body["id"].as_str().unwrap().parse().unwrap();
    let mut fired = false;
    for _ in 0..200 {
        if vidrelay_db::JobLedger::get(&app.ledger, id)
            .await
            .unwrap()
            .webhook_fired
        {
            fired = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(fired);
    assert_eq!(app.hook.calls(), 1);
}

#[tokio::test]
async fn client_upload_completion_rejects_bad_key() {
    let app = setup_test_app();
    let response = app
        .client()
        .post("/api/v0/uploads/complete")
        .json(&json!({ "destination_key": "/absolute.mp4" }))
        .await;
    assert_eq!(response.status_code(), 400);
    assert!(app.ledger.is_empty());
}

#[tokio::test]
async fn legacy_upload_enqueues_absolute_url() {
    let app = setup_test_app();

    let response = app
        .client()
        .post("/upload")
        .json(&json!({ "file_url": "https://files.example.com/v/abc.mp4" }))
        .await;

    assert_eq!(response.status_code(), 202);
    let body: Value = response.json();
    assert_eq!(body["status"], "accepted");
    let file = body["file"].as_str().unwrap();
    assert!(file.starts_with("https://sink.test/bucket/videos/"));

    let id: uuid::Uuid = body["job_id"].as_str().unwrap().parse().unwrap();
    let job = vidrelay_db::JobLedger::get(&app.ledger, id).await.unwrap();
    assert_eq!(job.source_ref, "https://files.example.com/v/abc.mp4");
    assert_eq!(
        file,
        format!("https://sink.test/bucket/{}", job.destination_key)
    );

    let rejected = app
        .client()
        .post("/upload")
        .json(&json!({ "file_url": "not a url" }))
        .await;
    assert_eq!(rejected.status_code(), 400);
}
