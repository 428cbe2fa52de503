//! Common test utilities for API testing with mocks.
//!
//! Builds an in-process router over a temp-dir SQLite store and artifact
//! root. The orchestrator's workers are not started; tests call
//! [`TestFixture::drive`] to run queued stages deterministically.

#![allow(dead_code)]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{HeaderMap, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use deckforge_core::config::{ArtifactsConfig, DatabaseConfig};
use deckforge_core::testing::MockGenerator;
use deckforge_core::{
    ArtifactStore, Config, ExecutorSet, FsArtifactStore, InMemoryDispatchQueue, Orchestrator,
    OrchestratorConfig, RetryConfig, SqliteTaskStore, StatusFacade, TaskStore,
};
use deckforge_server::api::create_router;
use deckforge_server::state::AppState;

/// Test fixture for API testing with a scripted generator.
pub struct TestFixture {
    /// The Axum router for testing
    pub router: Router,
    /// Orchestrator behind the router, for driving queued stages
    pub orchestrator: Orchestrator,
    /// Mock generator - script failures and delays
    pub generator: Arc<MockGenerator>,
    /// Temporary directory for the database and artifacts
    pub temp_dir: TempDir,
}

/// Response from a test request
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Value,
    pub raw: Vec<u8>,
}

impl TestFixture {
    pub async fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = temp_dir.path().join("test.db");
        let artifacts_root = temp_dir.path().join("artifacts");

        let config = Config {
            database: DatabaseConfig {
                path: db_path.clone(),
                ..Default::default()
            },
            artifacts: ArtifactsConfig {
                root: artifacts_root.clone(),
            },
            orchestrator: OrchestratorConfig {
                enabled: false,
                retry: RetryConfig::immediate(3),
                ..Default::default()
            },
            ..Default::default()
        };

        let store: Arc<dyn TaskStore> =
            Arc::new(SqliteTaskStore::new(&db_path).expect("Failed to create task store"));
        let artifacts: Arc<dyn ArtifactStore> = Arc::new(FsArtifactStore::new(artifacts_root));
        let generator = Arc::new(MockGenerator::new());

        let orchestrator = Orchestrator::new(
            config.orchestrator.clone(),
            config.limits.clone(),
            config.locks.clone(),
            Arc::clone(&store),
            Arc::new(InMemoryDispatchQueue::new()),
            ExecutorSet::new(generator.clone(), Arc::clone(&artifacts)),
        );
        let status = StatusFacade::new(store, artifacts);

        let state = Arc::new(AppState::new(config, orchestrator.clone(), status));
        let router = create_router(state);

        Self {
            router,
            orchestrator,
            generator,
            temp_dir,
        }
    }

    /// Run every queued stage dispatch until the queue is empty.
    pub async fn drive(&self) -> usize {
        self.orchestrator
            .process_pending()
            .await
            .expect("Failed to process dispatches")
    }

    /// Submit a task and drive it to completion, returning its id.
    pub async fn completed_task(&self, topic: &str, num_slides: u32) -> String {
        let response = self
            .post(
                "/api/v1/tasks",
                serde_json::json!({ "topic": topic, "num_slides": num_slides }),
            )
            .await;
        assert_eq!(response.status, StatusCode::ACCEPTED, "{:?}", response.body);
        self.drive().await;
        response.body["task_id"].as_str().unwrap().to_string()
    }

    pub async fn get(&self, path: &str) -> TestResponse {
        self.request("GET", path, None).await
    }

    pub async fn post(&self, path: &str, body: Value) -> TestResponse {
        self.request("POST", path, Some(body)).await
    }

    pub async fn patch(&self, path: &str, body: Value) -> TestResponse {
        self.request("PATCH", path, Some(body)).await
    }

    pub async fn delete_with_body(&self, path: &str, body: Value) -> TestResponse {
        self.request("DELETE", path, Some(body)).await
    }

    async fn request(&self, method: &str, path: &str, body: Option<Value>) -> TestResponse {
        let mut request_builder = Request::builder().method(method).uri(path);

        let body = match body {
            Some(json) => {
                request_builder = request_builder.header("Content-Type", "application/json");
                Body::from(serde_json::to_string(&json).unwrap())
            }
            None => Body::empty(),
        };

        let request = request_builder.body(body).unwrap();

        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");

        let status = response.status();
        let headers = response.headers().clone();
        let raw = response
            .into_body()
            .collect()
            .await
            .expect("Failed to collect body")
            .to_bytes()
            .to_vec();

        let body: Value = if raw.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&raw).unwrap_or(Value::Null)
        };

        TestResponse {
            status,
            headers,
            body,
            raw,
        }
    }
}
