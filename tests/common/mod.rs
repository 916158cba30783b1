#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use tempfile::TempDir;
use tower::ServiceExt;

use document_analyzer::analysis::{AnalysisExecutor, InferenceEngine, TextExtractor};
use document_analyzer::config::Config;
use document_analyzer::db::{JobStore, MemoryJobStore};
use document_analyzer::dispatch::DispatchPolicy;
use document_analyzer::queue::{MemoryQueue, Worker};
use document_analyzer::{create_router, AppState};

pub const BOUNDARY: &str = "analyzer-test-boundary";

/// Inference fake with a fixed behaviour.
#[derive(Clone, Copy)]
pub enum Script {
    Reply(&'static str),
    Fail(&'static str),
    Hang,
}

#[async_trait]
impl InferenceEngine for Script {
    async fn analyze(&self, _query: &str, _text: &str) -> anyhow::Result<String> {
        match *self {
            Script::Reply(text) => Ok(text.to_string()),
            Script::Fail(msg) => Err(anyhow::anyhow!(msg)),
            Script::Hang => std::future::pending().await,
        }
    }
}

/// Treats the input reference itself as the document text.
pub struct ReferenceText;

impl TextExtractor for ReferenceText {
    fn extract_text(&self, input_reference: &str) -> String {
        input_reference.to_string()
    }
}

pub fn executor(script: Script, timeout: Duration) -> Arc<AnalysisExecutor> {
    Arc::new(AnalysisExecutor::new(
        Arc::new(ReferenceText),
        Arc::new(script),
        timeout,
    ))
}

pub fn test_config(upload_dir: &std::path::Path) -> Config {
    let upload_dir = upload_dir.to_string_lossy().into_owned();
    Config::from_vars(|key| match key {
        "UPLOAD_DIR" => Some(upload_dir.clone()),
        "ALLOWED_ORIGINS" => Some("http://localhost:3000".to_string()),
        _ => None,
    })
    .expect("test config")
}

pub struct TestApp {
    pub router: Router,
    pub store: MemoryJobStore,
    pub queue: Option<Arc<MemoryQueue>>,
    pub executor: Arc<AnalysisExecutor>,
    pub upload_dir: TempDir,
}

impl TestApp {
    pub fn inline(script: Script) -> Self {
        Self::build(script, Duration::from_secs(5), None)
    }

    pub fn queued(script: Script) -> Self {
        Self::build(script, Duration::from_secs(5), Some(Arc::new(MemoryQueue::new())))
    }

    pub fn with_upload_limit(script: Script, max_upload_bytes: usize) -> Self {
        Self::assemble(script, Duration::from_secs(5), None, |config| {
            config.storage.max_upload_bytes = max_upload_bytes;
        })
    }

    pub fn build(script: Script, timeout: Duration, queue: Option<Arc<MemoryQueue>>) -> Self {
        Self::assemble(script, timeout, queue, |_| {})
    }

    fn assemble(
        script: Script,
        timeout: Duration,
        queue: Option<Arc<MemoryQueue>>,
        adjust: impl FnOnce(&mut Config),
    ) -> Self {
        let upload_dir = tempfile::tempdir().expect("tempdir");
        let mut config = test_config(upload_dir.path());
        adjust(&mut config);
        let store = MemoryJobStore::new();
        let executor = executor(script, timeout);
        let policy = match &queue {
            Some(queue) => DispatchPolicy::queued(queue.clone()),
            None => DispatchPolicy::inline(),
        };

        let state = AppState::new(
            config,
            Arc::new(store.clone()),
            executor.clone(),
            Arc::new(policy),
        );

        Self {
            router: create_router(state),
            store,
            queue,
            executor,
            upload_dir,
        }
    }

    pub fn worker(&self) -> Worker {
        let queue = self.queue.clone().expect("queued app");
        Worker::new(
            Arc::new(self.store.clone()) as Arc<dyn JobStore>,
            queue,
            self.executor.clone(),
            Duration::from_millis(20),
        )
    }

    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.router.clone().oneshot(request).await.expect("request")
    }

    pub async fn get(&self, uri: &str) -> Response<Body> {
        self.send(
            Request::builder()
                .method(Method::GET)
                .uri(uri)
                .body(Body::empty())
                .expect("request"),
        )
        .await
    }

    pub async fn analyze(&self, file: Option<(&str, &[u8])>, query: Option<&str>) -> Response<Body> {
        self.send(analyze_request(file, query)).await
    }
}

/// Build a multipart `POST /analyze` request.
pub fn analyze_request(file: Option<(&str, &[u8])>, query: Option<&str>) -> Request<Body> {
    let mut body: Vec<u8> = Vec::new();

    if let Some((name, data)) = file {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{name}\"\r\nContent-Type: application/pdf\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(data);
        body.extend_from_slice(b"\r\n");
    }
    if let Some(query) = query {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"query\"\r\n\r\n{query}\r\n"
            )
            .as_bytes(),
        );
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

    Request::builder()
        .method(Method::POST)
        .uri("/analyze")
        .header(
            "content-type",
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .expect("request")
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("body")
        .to_bytes();
    serde_json::from_slice(&bytes).expect("json body")
}
