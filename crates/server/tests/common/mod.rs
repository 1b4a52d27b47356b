//! Common test utilities for API testing with mocks.
//!
//! This module provides a test fixture that creates an in-process server
//! with mock image services and an in-memory queue, so the whole zip flow
//! runs without network access.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::{Body, Bytes};
use axum::http::{HeaderMap, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use photozip_core::{
    create_audit_system, AdmissionController, ArchiveBuilder, ArtifactPublisher, AuditStore,
    Config, FsObjectStore, JobOrchestrator, JobStatusStore, MemoryQueue, MemoryRateLimitStore,
    MessageDispatcher, RateLimitStore, SqliteAuditStore,
    testing::{MockImageFetcher, MockImageSource, MockRateLimitStore},
};

use photozip_server::state::AppState;

/// Re-export fixtures for test convenience
pub use photozip_core::testing::fixtures;

pub const SIGNING_SECRET: &str = "fixture-signing-secret";

/// Test fixture for API testing with mock dependencies.
pub struct TestFixture {
    pub router: Router,
    pub queue: Arc<MemoryQueue>,
    pub source: Arc<MockImageSource>,
    pub fetcher: Arc<MockImageFetcher>,
    pub store: Arc<FsObjectStore>,
    pub status: Arc<JobStatusStore>,
    pub audit_store: Arc<SqliteAuditStore>,
    /// Present when the fixture was built with `TestConfig::rate_limit_mock`.
    pub rate_limit_store: Option<Arc<MockRateLimitStore>>,
    pub dispatcher: Option<Arc<MessageDispatcher>>,
    pub temp_dir: TempDir,
}

/// Response from a test request
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Value,
    pub bytes: Bytes,
}

impl TestResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// Configuration for test fixture.
#[derive(Debug, Clone, Default)]
pub struct TestConfig {
    /// Run the message dispatcher so queued requests become jobs
    pub enable_dispatcher: bool,
    /// Back admission control with a store that can be made unavailable
    pub rate_limit_mock: bool,
}

impl TestConfig {
    pub fn with_dispatcher() -> Self {
        Self {
            enable_dispatcher: true,
            ..Default::default()
        }
    }

    pub fn with_rate_limit_mock() -> Self {
        Self {
            rate_limit_mock: true,
            ..Default::default()
        }
    }
}

impl TestFixture {
    /// Create a new test fixture with default mocks.
    pub async fn new() -> Self {
        Self::with_config(TestConfig::default()).await
    }

    /// Create a test fixture with custom configuration.
    pub async fn with_config(test_config: TestConfig) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");

        let mut config = Config::default();
        config.database.path = temp_dir.path().join("test.db");
        config.storage.root = temp_dir.path().join("artifacts");
        config.storage.public_base_url = "http://localhost:3000".to_string();
        config.storage.signing_secret = SIGNING_SECRET.to_string();
        config.dispatcher.enabled = test_config.enable_dispatcher;
        config.dispatcher.idle_poll_ms = 10;
        config.dispatcher.error_backoff_ms = 10;

        let audit_store = Arc::new(
            SqliteAuditStore::new(&config.database.path).expect("Failed to create audit store"),
        );
        let (audit, writer) =
            create_audit_system(Arc::clone(&audit_store) as Arc<dyn AuditStore>, 100);
        tokio::spawn(writer.run());

        let queue = Arc::new(MemoryQueue::with_poll_timeout(
            config.queue.topic.clone(),
            Duration::from_millis(20),
        ));
        let source = Arc::new(MockImageSource::new());
        let fetcher = Arc::new(MockImageFetcher::new());
        let store = Arc::new(FsObjectStore::new(&config.storage));
        let status = Arc::new(JobStatusStore::new());

        let (rate_limit_store, admission_store) = if test_config.rate_limit_mock {
            let mock = Arc::new(MockRateLimitStore::new());
            (Some(Arc::clone(&mock)), mock as Arc<dyn RateLimitStore>)
        } else {
            (None, Arc::new(MemoryRateLimitStore::new()) as Arc<dyn RateLimitStore>)
        };
        let admission = Arc::new(
            AdmissionController::new(&config.rate_limit, admission_store)
                .with_audit(audit.clone()),
        );

        let dispatcher = if test_config.enable_dispatcher {
            let publisher = ArtifactPublisher::new(
                Arc::clone(&store) as Arc<dyn photozip_core::ObjectStore>,
                config.storage.prefix.clone(),
                Duration::from_secs(config.storage.url_ttl_secs),
            )
            .with_audit(audit.clone());
            let orchestrator = JobOrchestrator::new(
                config.jobs.clone(),
                Arc::clone(&source) as Arc<dyn photozip_core::ImageSource>,
                ArchiveBuilder::new(Arc::clone(&fetcher) as Arc<dyn photozip_core::ImageFetcher>),
                publisher,
                Arc::clone(&status),
            )
            .with_audit(audit.clone());
            let dispatcher = Arc::new(
                MessageDispatcher::new(
                    config.dispatcher.clone(),
                    Arc::clone(&queue) as Arc<dyn photozip_core::Subscription>,
                    Arc::new(orchestrator),
                )
                .with_audit(audit.clone()),
            );
            dispatcher.start().await;
            Some(dispatcher)
        } else {
            None
        };

        let state = Arc::new(AppState::new(
            config,
            audit.clone(),
            Arc::clone(&audit_store) as Arc<dyn AuditStore>,
            Arc::clone(&status),
            Arc::clone(&queue) as Arc<dyn photozip_core::Publisher>,
            admission,
            Some(Arc::clone(&store)),
            dispatcher.clone(),
        ));

        let router = photozip_server::api::create_router(state);

        Self {
            router,
            queue,
            source,
            fetcher,
            store,
            status,
            audit_store,
            rate_limit_store,
            dispatcher,
            temp_dir,
        }
    }

    /// Send a GET request to the test server.
    pub async fn get(&self, path: &str) -> TestResponse {
        self.request("GET", path, &[]).await
    }

    /// Send a POST request without a body.
    pub async fn post(&self, path: &str) -> TestResponse {
        self.request("POST", path, &[]).await
    }

    /// Send a POST request with extra headers.
    pub async fn post_with_headers(&self, path: &str, headers: &[(&str, &str)]) -> TestResponse {
        self.request("POST", path, headers).await
    }

    /// Wait until `count` queue messages have been acknowledged.
    pub async fn wait_for_acks(&self, count: usize) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while self.queue.acked_count() < count {
            assert!(Instant::now() < deadline, "timed out waiting for acks");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Wait until the audit writer has persisted `count` events of `event_type`.
    pub async fn wait_for_audit(&self, event_type: &str, count: usize) {
        let filter = photozip_core::AuditFilter::new().with_event_type(event_type);
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let found = self.audit_store.query(&filter).expect("audit query").len();
            if found >= count {
                return;
            }
            assert!(Instant::now() < deadline, "timed out waiting for {} events", event_type);
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    async fn request(&self, method: &str, path: &str, headers: &[(&str, &str)]) -> TestResponse {
        let mut request_builder = Request::builder().method(method).uri(path);
        for (name, value) in headers {
            request_builder = request_builder.header(*name, *value);
        }
        let request = request_builder.body(Body::empty()).unwrap();

        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");

        let status = response.status();
        let headers = response.headers().clone();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to collect body")
            .to_bytes();

        let body: Value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };

        TestResponse {
            status,
            headers,
            body,
            bytes,
        }
    }
}

/// Helper to assert a response has expected status.
#[macro_export]
macro_rules! assert_status {
    ($response:expr, $status:expr) => {
        assert_eq!(
            $response.status, $status,
            "Expected status {:?}, got {:?}. Body: {}",
            $status,
            $response.status,
            serde_json::to_string_pretty(&$response.body).unwrap_or_default()
        );
    };
}
