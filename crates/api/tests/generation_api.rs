//! Integration tests for `POST /api/v1/generate`.

mod common;

use axum::http::StatusCode;
use common::{body_json, post_json};
use serde_json::json;

// ---------------------------------------------------------------------------
// Test: a successful generation returns the delivered path in a data envelope
// ---------------------------------------------------------------------------

#[tokio::test]
async fn generate_returns_artifact_path() {
    let dir = tempfile::tempdir().unwrap();
    let engine = common::spawn_mock_engine(dir.path()).await;
    let app = common::build_test_app(&engine, dir.path());
    let input = common::write_room(dir.path(), "empty_room_00021.png");

    let response = post_json(
        app.router,
        "/api/v1/generate",
        json!({
            "prompt": "mid-century modern living room",
            "image_path": input,
            "task_type": "furniture",
            "room_description": "living room with two windows"
        }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    let expected = app.pipeline.output_dir.join("staged_00021.png");
    assert_eq!(json["data"]["image_path"], expected.display().to_string());
    assert_eq!(json["data"]["prompt_id"], "mock-1");
    assert!(json["data"]["seed"].as_u64().unwrap() >= 1);
    assert!(expected.exists());

    let sidecar: serde_json::Value = serde_json::from_str(
        &std::fs::read_to_string(app.pipeline.output_dir.join("staged_00021.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(sidecar["description"], "living room with two windows");
    assert_eq!(sidecar["task_type"], "furniture");
}

// ---------------------------------------------------------------------------
// Test: a missing input image is 404
// ---------------------------------------------------------------------------

#[tokio::test]
async fn missing_input_returns_404() {
    let dir = tempfile::tempdir().unwrap();
    let app = common::build_test_app(&common::dead_engine_url().await, dir.path());

    let response = post_json(
        app.router,
        "/api/v1/generate",
        json!({ "prompt": "p", "image_path": dir.path().join("nope.png") }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let json = body_json(response).await;
    assert_eq!(json["code"], "INPUT_NOT_FOUND");
    assert!(json["error"].as_str().unwrap().contains("nope.png"));
}

// ---------------------------------------------------------------------------
// Test: zero target resolution is 400
// ---------------------------------------------------------------------------

#[tokio::test]
async fn zero_resolution_returns_400() {
    let dir = tempfile::tempdir().unwrap();
    let app = common::build_test_app(&common::dead_engine_url().await, dir.path());
    let input = common::write_room(dir.path(), "empty_room_00001.png");

    let response = post_json(
        app.router,
        "/api/v1/generate",
        json!({ "prompt": "p", "image_path": input, "target_resolution": 0 }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["code"], "INVALID_REQUEST");
}

// ---------------------------------------------------------------------------
// Test: an engine that is not running is 503 and leaves nothing staged
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unreachable_engine_returns_503() {
    let dir = tempfile::tempdir().unwrap();
    let app = common::build_test_app(&common::dead_engine_url().await, dir.path());
    let input = common::write_room(dir.path(), "empty_room_00002.png");

    let response = post_json(
        app.router,
        "/api/v1/generate",
        json!({ "prompt": "p", "image_path": input }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body_json(response).await["code"], "ENGINE_UNREACHABLE");

    let staged: Vec<_> = std::fs::read_dir(&app.pipeline.engine_input_dir)
        .unwrap()
        .collect();
    assert!(staged.is_empty());
}
