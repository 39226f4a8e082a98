//! End-to-end submission pipeline tests.
//!
//! Drive the full axum router with hand-built multipart bodies and a
//! capturing mail transport; no network or SMTP involved. Storage roots are
//! per-test temp directories.
//!
//! Run with: `cargo test --test submission_pipeline_test`

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use http_body_util::BodyExt;
use tower::ServiceExt;

use fp_common::{FieldConfig, FormField};
use fp_server::api::{create_router, AppState};
use fp_server::config::Config;
use fp_server::email::{EmailService, MemoryOutbox};
use fp_server::form::{FormSchema, LifecycleCleaner, MailTemplate};

const BOUNDARY: &str = "fieldpost-test-boundary";

/// A JPEG payload with real magic bytes plus filler.
fn jpeg_bytes() -> Vec<u8> {
    let mut data = vec![0xFF, 0xD8, 0xFF, 0xE0];
    data.extend_from_slice(&[0u8; 64]);
    data
}

struct TestPart<'a> {
    name: &'a str,
    filename: Option<&'a str>,
    content_type: Option<&'a str>,
    data: Vec<u8>,
}

fn text_part<'a>(name: &'a str, value: &'a str) -> TestPart<'a> {
    TestPart {
        name,
        filename: None,
        content_type: None,
        data: value.as_bytes().to_vec(),
    }
}

fn photo_part<'a>(filename: &'a str, data: Vec<u8>) -> TestPart<'a> {
    TestPart {
        name: "photos[]",
        filename: Some(filename),
        content_type: Some("image/jpeg"),
        data,
    }
}

/// Hand-assemble a multipart/form-data body.
fn multipart_body(parts: &[TestPart]) -> Vec<u8> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        match part.filename {
            Some(filename) => body.extend_from_slice(
                format!(
                    "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
                    part.name, filename
                )
                .as_bytes(),
            ),
            None => body.extend_from_slice(
                format!("Content-Disposition: form-data; name=\"{}\"\r\n", part.name).as_bytes(),
            ),
        }
        if let Some(content_type) = part.content_type {
            body.extend_from_slice(format!("Content-Type: {content_type}\r\n").as_bytes());
        }
        body.extend_from_slice(b"\r\n");
        body.extend_from_slice(&part.data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

/// The example field from the pipeline contract: required, 1-3 images,
/// 1 MiB per file.
fn photo_schema() -> FormSchema {
    let mut photos = FieldConfig::new("photos");
    photos.required = true;
    photos.min_count = Some(1);
    photos.max_count = Some(3);
    photos.per_file_size_limit = 1_048_576;
    photos.accepted_types = vec!["image/*".into()];

    FormSchema {
        fields: vec![
            FormField::Text {
                name: "your-name".into(),
            },
            FormField::Files(photos),
        ],
        mail: MailTemplate {
            to: "inbox@example.com".into(),
            subject: "Submission from [your-name]".into(),
            body: "From: [your-name]\nPhotos: [photos]\n".into(),
        },
        messages: HashMap::new(),
    }
}

fn test_state(storage_root: &Path) -> (AppState, MemoryOutbox) {
    let mut config = Config::default_for_test();
    config.storage_dir = storage_root.to_path_buf();
    let (mailer, outbox) = EmailService::in_memory();
    (AppState::new(config, photo_schema(), Some(mailer)), outbox)
}

async fn submit(state: AppState, body: Vec<u8>) -> (StatusCode, serde_json::Value) {
    let app = create_router(state);
    let request = Request::builder()
        .method("POST")
        .uri("/api/forms/submit")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = serde_json::from_slice(&bytes).unwrap();
    (status, json)
}

fn files_in(root: &Path) -> Vec<String> {
    if !root.exists() {
        return Vec::new();
    }
    let mut names: Vec<String> = std::fs::read_dir(root)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

#[tokio::test]
async fn test_valid_submission_stores_attaches_and_resolves_mail_tags() {
    let temp = tempfile::tempdir().unwrap();
    let root = temp.path().join("stored");
    let (state, outbox) = test_state(&root);
    let registry = state.registry.clone();

    let body = multipart_body(&[
        text_part("your-name", "Alice"),
        photo_part("photo1.jpg", jpeg_bytes()),
        photo_part("photo2.jpg", jpeg_bytes()),
    ]);
    let (status, json) = submit(state, body).await;

    assert_eq!(status, StatusCode::OK, "{json}");
    assert_eq!(json["status"], "mail_sent");

    // Two stored files, owner-read-only, still present (no cleaner running)
    assert_eq!(files_in(&root), vec!["photo1.jpg", "photo2.jpg"]);
    assert_eq!(registry.len(), 1);

    // One message with both attachments and resolved mail tags
    let messages = outbox.messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].to, "inbox@example.com");
    assert_eq!(messages[0].subject, "Submission from Alice");
    assert!(messages[0].body.contains("From: Alice"));
    assert!(messages[0].body.contains("Photos: photo1.jpg, photo2.jpg"));
    assert_eq!(messages[0].attachment_paths.len(), 2);
}

#[tokio::test]
async fn test_dispatch_event_cleans_stored_files() {
    let temp = tempfile::tempdir().unwrap();
    let root = temp.path().join("stored");
    let (state, _outbox) = test_state(&root);
    let registry = state.registry.clone();

    let handle = LifecycleCleaner::new(registry.clone()).spawn(&state.dispatch);

    let body = multipart_body(&[
        text_part("your-name", "Alice"),
        photo_part("photo1.jpg", jpeg_bytes()),
    ]);
    let (status, _) = submit(state, body).await;
    assert_eq!(status, StatusCode::OK);

    // Cleanup is fire-and-forget on its own task; poll briefly
    for _ in 0..100 {
        if files_in(&root).is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(files_in(&root).is_empty(), "stored files should be cleaned");
    assert!(registry.is_empty());

    handle.abort();
}

#[tokio::test]
async fn test_too_many_files_rejected_with_zero_stored() {
    let temp = tempfile::tempdir().unwrap();
    let root = temp.path().join("stored");
    let (state, outbox) = test_state(&root);

    let body = multipart_body(&[
        text_part("your-name", "Alice"),
        photo_part("1.jpg", jpeg_bytes()),
        photo_part("2.jpg", jpeg_bytes()),
        photo_part("3.jpg", jpeg_bytes()),
        photo_part("4.jpg", jpeg_bytes()),
    ]);
    let (status, json) = submit(state, body).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "VALIDATION_FAILED");
    assert_eq!(json["errors"][0]["field_name"], "photos");
    assert_eq!(json["errors"][0]["rule_id"], "max_file_count");
    assert_eq!(
        json["errors"][0]["message"],
        "You cannot upload more than 3 files per request."
    );

    assert!(files_in(&root).is_empty(), "nothing may be stored");
    assert!(outbox.messages().is_empty(), "nothing may be mailed");
}

#[tokio::test]
async fn test_missing_required_field_rejected() {
    let temp = tempfile::tempdir().unwrap();
    let (state, _outbox) = test_state(&temp.path().join("stored"));

    let body = multipart_body(&[text_part("your-name", "Alice")]);
    let (status, json) = submit(state, body).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["errors"][0]["field_name"], "photos");
    assert_eq!(json["errors"][0]["rule_id"], "required");
}

#[tokio::test]
async fn test_forged_image_content_rejected() {
    let temp = tempfile::tempdir().unwrap();
    let root = temp.path().join("stored");
    let (state, _outbox) = test_state(&root);

    let body = multipart_body(&[
        text_part("your-name", "Alice"),
        photo_part("payload.jpg", b"plain text pretending to be a jpeg".to_vec()),
    ]);
    let (status, json) = submit(state, body).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["errors"][0]["rule_id"], "file_type_invalid");
    assert!(files_in(&root).is_empty());
}

#[tokio::test]
async fn test_submission_rejected_without_mailer() {
    let temp = tempfile::tempdir().unwrap();
    let mut config = Config::default_for_test();
    config.storage_dir = temp.path().join("stored");
    let state = AppState::new(config, photo_schema(), None);

    let body = multipart_body(&[photo_part("photo1.jpg", jpeg_bytes())]);
    let (status, json) = submit(state, body).await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json["error"], "MAIL_NOT_CONFIGURED");
}

#[tokio::test]
async fn test_schema_endpoint_reports_limits_and_encoding() {
    let temp = tempfile::tempdir().unwrap();
    let (state, _outbox) = test_state(&temp.path().join("stored"));

    let app = create_router(state);
    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/forms/schema")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();

    assert_eq!(json["requires_multipart"], true);
    let files_field = json["fields"]
        .as_array()
        .unwrap()
        .iter()
        .find(|f| f["kind"] == "files")
        .unwrap();
    assert_eq!(files_field["name"], "photos");
    assert_eq!(files_field["max_count"], 3);
    assert_eq!(files_field["per_file_size_limit"], 1_048_576);
}

#[tokio::test]
async fn test_duplicate_names_stored_under_probed_suffixes() {
    let temp = tempfile::tempdir().unwrap();
    let root = temp.path().join("stored");
    let (state, outbox) = test_state(&root);

    let body = multipart_body(&[
        photo_part("photo.jpg", jpeg_bytes()),
        photo_part("photo.jpg", jpeg_bytes()),
    ]);
    let (status, _) = submit(state, body).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(files_in(&root), vec!["photo-1.jpg", "photo.jpg"]);

    let messages = outbox.messages();
    assert!(messages[0].body.contains("Photos: photo.jpg, photo-1.jpg"));
}
