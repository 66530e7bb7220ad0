//! End-to-end tests over the real router: init, chunk, status, resume,
//! complete, cancel, and the config/health endpoints.

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use serde_json::Value;
use std::{sync::Arc, time::Duration};
use tower::ServiceExt;
use upload_coordinator::{
    routes::routes::routes,
    services::{
        blob_backend::FsBlobBackend,
        coordinator::{RetryPolicy, UploadCoordinator, UploadLimits},
        session_store::FileSessionStore,
    },
};

struct TestApp {
    router: Router,
    data_dir: tempfile::TempDir,
    _session_dir: tempfile::TempDir,
}

fn test_app() -> TestApp {
    test_app_with_limits(UploadLimits {
        chunk_size: 50,
        max_file_size: 1000,
    })
}

fn test_app_with_limits(limits: UploadLimits) -> TestApp {
    let data_dir = tempfile::tempdir().unwrap();
    let session_dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FileSessionStore::new(session_dir.path()).unwrap());
    let backend = Arc::new(FsBlobBackend::new(data_dir.path()).unwrap());
    let body_limit = limits.chunk_request_body_limit();
    let coordinator = UploadCoordinator::new(
        store,
        backend,
        limits,
        RetryPolicy {
            attempts: 3,
            base_delay: Duration::from_millis(1),
        },
    );
    TestApp {
        router: routes(body_limit).with_state(coordinator),
        data_dir,
        _session_dir: session_dir,
    }
}

async fn send_json(
    router: &Router,
    method: &str,
    uri: &str,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(v) => {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
            Body::from(serde_json::to_vec(&v).unwrap())
        }
        None => Body::empty(),
    };
    let response = router.clone().oneshot(builder.body(body).unwrap()).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, json)
}

const BOUNDARY: &str = "test-chunk-boundary";

fn multipart_chunk_body(upload_id: &str, chunk_index: u32, payload: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    let mut text_field = |name: &str, value: &str| {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            )
            .as_bytes(),
        );
    };
    text_field("upload_id", upload_id);
    text_field("chunk_index", &chunk_index.to_string());
    body.extend_from_slice(
        format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"chunk\"\r\n\
             Content-Type: application/octet-stream\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(payload);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
    body
}

async fn send_chunk(
    router: &Router,
    upload_id: &str,
    chunk_index: u32,
    payload: &[u8],
) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("POST")
        .uri("/api/upload/chunk")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(multipart_chunk_body(
            upload_id,
            chunk_index,
            payload,
        )))
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

#[tokio::test]
async fn full_upload_flow() {
    let app = test_app();

    let (status, init) = send_json(
        &app.router,
        "POST",
        "/api/upload/init",
        Some(serde_json::json!({"filename": "report.bin", "file_size": 100})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(init["chunk_size"], 50);
    let upload_id = init["upload_id"].as_str().unwrap().to_string();

    let (status, chunk) = send_chunk(&app.router, &upload_id, 0, b"a".repeat(50).as_slice()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(chunk["progress_percentage"], 50.0);

    let (status, view) = send_json(
        &app.router,
        "GET",
        &format!("/api/upload/status/{upload_id}"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(view["completed_chunks"], 1);
    assert_eq!(view["progress_percentage"], 50.0);
    assert_eq!(view["completed"], false);

    let (status, chunk) = send_chunk(&app.router, &upload_id, 1, b"b".repeat(50).as_slice()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(chunk["progress_percentage"], 100.0);

    let (status, done) = send_json(
        &app.router,
        "POST",
        "/api/upload/complete",
        Some(serde_json::json!({"upload_id": upload_id})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(done["blocks_count"], 2);
    assert_eq!(done["filename"], "report.bin");

    // The committed object holds both chunks in order.
    let contents = std::fs::read(app.data_dir.path().join("report.bin")).unwrap();
    assert_eq!(contents.len(), 100);
    assert!(contents[..50].iter().all(|&b| b == b'a'));
    assert!(contents[50..].iter().all(|&b| b == b'b'));

    // Completion is terminal.
    let (status, err) = send_json(
        &app.router,
        "POST",
        "/api/upload/complete",
        Some(serde_json::json!({"upload_id": upload_id})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(err["retryable"], false);

    let (status, _) = send_chunk(&app.router, &upload_id, 2, b"c").await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn resume_reports_staged_block_ids() {
    let app = test_app();
    let (_, init) = send_json(
        &app.router,
        "POST",
        "/api/upload/init",
        Some(serde_json::json!({"filename": "resume.bin", "file_size": 150})),
    )
    .await;
    let upload_id = init["upload_id"].as_str().unwrap().to_string();

    let (_, first) = send_chunk(&app.router, &upload_id, 0, b"x").await;
    // A retried chunk shows up once.
    send_chunk(&app.router, &upload_id, 0, b"x").await;

    let (status, resume) = send_json(
        &app.router,
        "GET",
        &format!("/api/upload/resume/{upload_id}"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(resume["completed_chunks"], 1);
    assert_eq!(resume["chunk_size"], 50);
    assert_eq!(
        resume["block_ids"],
        serde_json::json!([first["block_id"].as_str().unwrap()])
    );
}

#[tokio::test]
async fn oversize_init_is_rejected() {
    let app = test_app();
    let (status, body) = send_json(
        &app.router,
        "POST",
        "/api/upload/init",
        Some(serde_json::json!({"filename": "huge.bin", "file_size": 1001})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["retryable"], false);
}

#[tokio::test]
async fn unknown_upload_id_is_not_found() {
    let app = test_app();
    let ghost = uuid::Uuid::new_v4();

    for uri in [
        format!("/api/upload/status/{ghost}"),
        format!("/api/upload/resume/{ghost}"),
    ] {
        let (status, _) = send_json(&app.router, "GET", &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND, "{}", uri);
    }

    let (status, _) = send_json(
        &app.router,
        "DELETE",
        &format!("/api/upload/{ghost}"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send_chunk(&app.router, &ghost.to_string(), 0, b"x").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn cancel_removes_the_session() {
    let app = test_app();
    let (_, init) = send_json(
        &app.router,
        "POST",
        "/api/upload/init",
        Some(serde_json::json!({"filename": "gone.bin", "file_size": 10})),
    )
    .await;
    let upload_id = init["upload_id"].as_str().unwrap().to_string();

    let (status, _) = send_json(
        &app.router,
        "DELETE",
        &format!("/api/upload/{upload_id}"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send_json(
        &app.router,
        "GET",
        &format!("/api/upload/status/{upload_id}"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn config_and_health_endpoints() {
    let app = test_app();

    let (status, cfg) = send_json(&app.router, "GET", "/api/config", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cfg["chunk_size"], 50);
    assert_eq!(cfg["max_file_size"], 1000);

    let (status, health) = send_json(&app.router, "GET", "/healthz", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(health["status"], "ok");

    let (status, ready) = send_json(&app.router, "GET", "/readyz", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ready["status"], "ok");
    assert_eq!(ready["checks"]["session_store"]["ok"], true);
    assert_eq!(ready["checks"]["blob_backend"]["ok"], true);
}

#[tokio::test]
async fn chunk_of_the_advertised_size_is_accepted() {
    // Clients size their chunks from the value init/config hand out, so the
    // chunk endpoint must accept a body holding one full chunk even when
    // that is far above axum's stock 2 MiB cap.
    const CHUNK_SIZE: u64 = 5 * 1024 * 1024;
    let app = test_app_with_limits(UploadLimits {
        chunk_size: CHUNK_SIZE,
        max_file_size: 4 * CHUNK_SIZE,
    });

    let (status, init) = send_json(
        &app.router,
        "POST",
        "/api/upload/init",
        Some(serde_json::json!({"filename": "large.bin", "file_size": CHUNK_SIZE})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(init["chunk_size"], CHUNK_SIZE);
    let upload_id = init["upload_id"].as_str().unwrap().to_string();

    let payload = vec![0xAB_u8; CHUNK_SIZE as usize];
    let (status, chunk) = send_chunk(&app.router, &upload_id, 0, &payload).await;
    assert_eq!(status, StatusCode::OK, "body: {chunk}");
    assert_eq!(chunk["progress_percentage"], 100.0);

    let (status, done) = send_json(
        &app.router,
        "POST",
        "/api/upload/complete",
        Some(serde_json::json!({"upload_id": upload_id})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(done["blocks_count"], 1);

    let meta = std::fs::metadata(app.data_dir.path().join("large.bin")).unwrap();
    assert_eq!(meta.len(), CHUNK_SIZE);
}

#[tokio::test]
async fn empty_upload_commits_an_empty_object() {
    let app = test_app();
    let (_, init) = send_json(
        &app.router,
        "POST",
        "/api/upload/init",
        Some(serde_json::json!({"filename": "empty.bin", "file_size": 0})),
    )
    .await;
    let upload_id = init["upload_id"].as_str().unwrap().to_string();

    let (status, done) = send_json(
        &app.router,
        "POST",
        "/api/upload/complete",
        Some(serde_json::json!({"upload_id": upload_id})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(done["blocks_count"], 0);

    let meta = std::fs::metadata(app.data_dir.path().join("empty.bin")).unwrap();
    assert_eq!(meta.len(), 0);
}
