#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::body::Body;
use axum::extract::Path as UrlPath;
use axum::http::{Method, Request};
use axum::response::Response;
use axum::routing;
use axum::{Json, Router};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use vstage_api::config::ServerConfig;
use vstage_api::router::build_app_router;
use vstage_api::state::AppState;
use vstage_comfyui::api::ComfyUIApi;
use vstage_pipeline::config::{NodeMap, PipelineConfig};
use vstage_pipeline::orchestrator::Orchestrator;
use vstage_pipeline::template::GraphTemplate;
use vstage_pipeline::wait::ManualClock;

/// Build a test `ServerConfig` with safe defaults.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
    }
}

/// A test application wired to a ComfyUI at `engine_url`, with its
/// engine and output directories under `root`.
pub struct TestApp {
    pub router: Router,
    pub pipeline: Arc<PipelineConfig>,
}

pub fn build_test_app(engine_url: &str, root: &Path) -> TestApp {
    let pipeline = PipelineConfig::new(engine_url, root.join("ComfyUI"), root.join("outputs"));
    pipeline.ensure_directories().unwrap();
    let pipeline = Arc::new(pipeline);

    let template_path =
        Path::new(env!("CARGO_MANIFEST_DIR")).join("../../workflows/virtual_staging_workflow.json");
    let template = GraphTemplate::load(&template_path, NodeMap::default(), "test.safetensors").unwrap();

    let orchestrator = Orchestrator::with_parts(
        Arc::clone(&pipeline),
        Arc::new(template),
        ComfyUIApi::new(engine_url),
        Arc::new(ManualClock::new()),
    );
    let config = test_config();
    let state = AppState {
        config: Arc::new(config.clone()),
        orchestrator: Arc::new(orchestrator),
    };

    TestApp {
        router: build_app_router(state, &config),
        pipeline,
    }
}

/// Start a mock ComfyUI that completes every prompt immediately, writing
/// its output into `<root>/ComfyUI/output`.
pub async fn spawn_mock_engine(root: &Path) -> String {
    let output_dir = root.join("ComfyUI").join("output");
    let prefix_store = Arc::new(std::sync::Mutex::new(String::new()));

    let submit_store = Arc::clone(&prefix_store);
    let submit = routing::post(move |Json(body): Json<Value>| {
        let output_dir = output_dir.clone();
        let store = Arc::clone(&submit_store);
        async move {
            let prefix = body["prompt"]["126"]["inputs"]["filename_prefix"]
                .as_str()
                .unwrap_or_default()
                .to_string();
            let filename = format!("{prefix}00001_.png");
            std::fs::write(output_dir.join(&filename), b"png").unwrap();
            *store.lock().unwrap() = filename;
            Json(json!({ "prompt_id": "mock-1", "number": 0, "node_errors": {} }))
        }
    });

    let history_store = Arc::clone(&prefix_store);
    let history = routing::get(move |UrlPath(id): UrlPath<String>| {
        let store = Arc::clone(&history_store);
        async move {
            let filename = store.lock().unwrap().clone();
            Json(json!({ id: { "outputs": { "126": { "images": [
                { "filename": filename, "subfolder": "", "type": "output" }
            ] } } } }))
        }
    });

    let router = Router::new()
        .route("/system_stats", routing::get(|| async { Json(json!({ "system": {} })) }))
        .route("/prompt", submit)
        .route("/history/{id}", history);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

/// URL of a port with nothing listening on it.
pub async fn dead_engine_url() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}")
}

/// Write a small PNG for use as request input.
pub fn write_room(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    image::GrayImage::new(64, 48).save(&path).unwrap();
    path
}

pub async fn get(app: Router, uri: &str) -> Response {
    app.oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

pub async fn post_json(app: Router, uri: &str, body: Value) -> Response {
    app.oneshot(
        Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
    )
    .await
    .unwrap()
}

pub async fn body_json(response: Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}
