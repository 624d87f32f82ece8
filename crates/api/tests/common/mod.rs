#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request};
use axum::response::Response;
use axum::Router;
use http_body_util::BodyExt;
use image::{DynamicImage, ImageFormat};
use tempfile::TempDir;
use tokio::sync::Semaphore;
use tower::ServiceExt;

use gridgen_api::config::ServerConfig;
use gridgen_api::router::build_app_router;
use gridgen_api::state::AppState;
use gridgen_core::backend::{
    BackendError, GeneratedImage, GenerationBackend, GenerationOutput, GenerationRequest,
};
use gridgen_core::preset::InMemoryPresets;
use gridgen_pipeline::font::FixedMetricsFont;
use gridgen_pipeline::{GridRunner, LocalImageStore, RunnerConfig};

pub const USER: &str = "tester";

/// Black images sized by the cell's width/height params. Generations wait
/// on `hold` when one is set.
#[derive(Default)]
pub struct FakeBackend {
    hold: Option<Arc<Semaphore>>,
    calls: AtomicUsize,
}

impl FakeBackend {
    pub fn held_by(hold: Arc<Semaphore>) -> Self {
        Self {
            hold: Some(hold),
            ..Default::default()
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GenerationBackend for FakeBackend {
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationOutput, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(hold) = &self.hold {
            if let Ok(permit) = hold.acquire().await {
                permit.forget();
            }
        }
        let image = DynamicImage::new_rgb8(
            request.params.image_width(),
            request.params.image_height(),
        );
        Ok(GenerationOutput {
            image: GeneratedImage::encode(&image, ImageFormat::Png)
                .map_err(|e| BackendError::InvalidOutput(e.to_string()))?,
            metadata: None,
        })
    }
}

/// Build a test `ServerConfig` with safe defaults.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        user_id: USER.to_string(),
        presets_path: None,
        comfyui_api_url: "http://127.0.0.1:8188".to_string(),
        comfyui_ws_url: "ws://127.0.0.1:8188".to_string(),
        comfyui_workflow_path: "workflow.json".into(),
    }
}

pub fn runner_config(output_dir: &Path) -> RunnerConfig {
    RunnerConfig {
        output_dir: output_dir.to_path_buf(),
        max_simultaneous_gens: 2,
        order_delay: Duration::ZERO,
        stream_poll_interval: Duration::from_millis(20),
        ..Default::default()
    }
}

/// A router wired like production, writing into its own temp directory.
pub struct TestApp {
    pub app: Router,
    pub backend: Arc<FakeBackend>,
    pub dir: TempDir,
}

impl TestApp {
    pub fn output_dir(&self) -> &Path {
        self.dir.path()
    }
}

pub fn build_test_app() -> TestApp {
    build_test_app_with(FakeBackend::default())
}

pub fn build_test_app_with(backend: FakeBackend) -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let backend = Arc::new(backend);
    let app = build_router(runner_config(dir.path()), backend.clone());
    TestApp { app, backend, dir }
}

pub fn build_router(runner_config: RunnerConfig, backend: Arc<FakeBackend>) -> Router {
    let config = test_config();
    let store = Arc::new(LocalImageStore::new(
        runner_config.output_dir.clone(),
        runner_config.output_url_base.clone(),
        runner_config.image_format.clone(),
    ));
    let runner = GridRunner::new(runner_config, backend, store, Arc::new(InMemoryPresets::new()))
        .with_font(Arc::new(FixedMetricsFont::default()));

    let state = AppState {
        config: Arc::new(config.clone()),
        runner: Arc::new(runner),
    };
    build_app_router(state, &config)
}

/// Serve `app` on an ephemeral port for WebSocket tests.
pub async fn spawn_server(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

pub async fn send(app: Router, method: Method, uri: &str) -> Response {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn get(app: Router, uri: &str) -> Response {
    send(app, Method::GET, uri).await
}

pub async fn delete(app: Router, uri: &str) -> Response {
    send(app, Method::DELETE, uri).await
}

pub async fn body_bytes(response: Response) -> Vec<u8> {
    response.into_body().collect().await.unwrap().to_bytes().to_vec()
}

pub async fn body_json(response: Response) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}
