//! Scrape payloads and the execution backend that performs target fetches.
//!
//! The proxy correlates responses to requests by the `scrape_id` carried in
//! the payload, never by stream position: results are written in completion
//! order, which can differ from request order.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::metrics::{AgentMetrics, SCRAPE_INVALID_PATH, SCRAPE_SUCCESS, SCRAPE_UNSUCCESSFUL};
use crate::paths::PathManager;

/// A scrape request received from the proxy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScrapeRequest {
    pub scrape_id: u64,
    pub agent_id: String,
    /// Path the proxy was scraped on (no leading slash).
    pub path: String,
}

/// Result of executing one scrape request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScrapeResponse {
    pub scrape_id: u64,
    pub agent_id: String,
    /// False when the fetch failed or the path was unknown.
    pub valid: bool,
    pub status_code: u16,
    pub content_type: String,
    pub text: String,
    /// Human-readable reason when `valid` is false.
    pub failure_reason: Option<String>,
}

impl ScrapeResponse {
    /// Error-carrying response for a failed or invalid scrape.
    pub fn failure(request: &ScrapeRequest, status_code: u16, reason: impl Into<String>) -> Self {
        Self {
            scrape_id: request.scrape_id,
            agent_id: request.agent_id.clone(),
            valid: false,
            status_code,
            content_type: String::new(),
            text: String::new(),
            failure_reason: Some(reason.into()),
        }
    }
}

/// Execution backend: turns a scrape request into a response.
///
/// Implementations must contain their own failures — a bad scrape target
/// yields an error-carrying response, never an error across this boundary.
#[async_trait]
pub trait ScrapeBackend: Send + Sync {
    async fn fetch(&self, request: ScrapeRequest) -> ScrapeResponse;
}

/// HTTP execution backend: fetches the registered target URL for a path.
pub struct ScrapeService {
    client: Client,
    paths: Arc<PathManager>,
    metrics: Arc<AgentMetrics>,
}

impl ScrapeService {
    pub fn new(scrape_timeout: Duration, paths: Arc<PathManager>, metrics: Arc<AgentMetrics>) -> Self {
        let client = Client::builder()
            .timeout(scrape_timeout)
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            paths,
            metrics,
        }
    }
}

#[async_trait]
impl ScrapeBackend for ScrapeService {
    async fn fetch(&self, request: ScrapeRequest) -> ScrapeResponse {
        let Some(path_context) = self.paths.lookup(&request.path).await else {
            tracing::warn!("Invalid path request: /{}", request.path);
            self.metrics.record_scrape(SCRAPE_INVALID_PATH);
            return ScrapeResponse::failure(&request, 404, "unregistered path");
        };

        tracing::debug!("Fetching path request /{} {}", path_context.path, path_context.url);
        let started = Instant::now();
        let result = self.client.get(&path_context.url).send().await;
        self.metrics.observe_latency(started.elapsed());

        match result {
            Ok(response) => {
                let status = response.status();
                let content_type = response
                    .headers()
                    .get(reqwest::header::CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("")
                    .to_string();

                if status.is_success() {
                    match response.text().await {
                        Ok(text) => {
                            self.metrics.record_scrape(SCRAPE_SUCCESS);
                            ScrapeResponse {
                                scrape_id: request.scrape_id,
                                agent_id: request.agent_id.clone(),
                                valid: true,
                                status_code: status.as_u16(),
                                content_type,
                                text,
                                failure_reason: None,
                            }
                        }
                        Err(e) => {
                            self.metrics.record_scrape(SCRAPE_UNSUCCESSFUL);
                            ScrapeResponse::failure(
                                &request,
                                status.as_u16(),
                                format!("failed to read body: {e}"),
                            )
                        }
                    }
                } else {
                    self.metrics.record_scrape(SCRAPE_UNSUCCESSFUL);
                    ScrapeResponse::failure(
                        &request,
                        status.as_u16(),
                        format!("target returned {status}"),
                    )
                }
            }
            Err(e) => {
                tracing::info!(
                    "Failed HTTP request: {} [{}]",
                    path_context.url,
                    e
                );
                self.metrics.record_scrape(SCRAPE_UNSUCCESSFUL);
                ScrapeResponse::failure(&request, 404, e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PathMapping;
    use crate::error::Result;
    use crate::transport::ProxyTransport;
    use axum::{routing::get, Router};
    use std::sync::atomic::AtomicU64;

    struct StaticRegistrar(AtomicU64);

    #[async_trait]
    impl ProxyTransport for StaticRegistrar {
        fn proxy_host(&self) -> String {
            "test:0".to_string()
        }

        async fn connect(&self, _transport_filter_disabled: bool) -> bool {
            true
        }

        async fn register_agent(&self, _agent_name: &str, _host_name: &str) -> Result<String> {
            Ok("agent-1".to_string())
        }

        async fn register_path(&self, _agent_id: &str, _path: &str) -> Result<u64> {
            Ok(self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst))
        }

        async fn reset_stubs(&self) {}

        async fn read_requests(
            &self,
            _backend: Arc<dyn ScrapeBackend>,
            _ctx: Arc<crate::agent::ConnectionContext>,
        ) -> Result<()> {
            Ok(())
        }

        async fn write_responses(&self, _ctx: Arc<crate::agent::ConnectionContext>) -> Result<()> {
            Ok(())
        }

        async fn send_heartbeat(&self) -> Result<()> {
            Ok(())
        }

        async fn shutdown(&self) {}
    }

    fn request(path: &str) -> ScrapeRequest {
        ScrapeRequest {
            scrape_id: 42,
            agent_id: "agent-1".to_string(),
            path: path.to_string(),
        }
    }

    async fn service_with_paths(mappings: Vec<PathMapping>) -> (ScrapeService, Arc<AgentMetrics>) {
        let paths = Arc::new(PathManager::new(mappings));
        let registrar = StaticRegistrar(AtomicU64::new(1));
        paths.register_paths(&registrar, "agent-1").await.unwrap();
        let metrics = Arc::new(AgentMetrics::new("launch-1", "agent-1"));
        let service = ScrapeService::new(Duration::from_secs(2), paths, Arc::clone(&metrics));
        (service, metrics)
    }

    #[tokio::test]
    async fn test_unknown_path_yields_invalid_404() {
        let (service, metrics) = service_with_paths(vec![]).await;

        let response = service.fetch(request("nope")).await;
        assert!(!response.valid);
        assert_eq!(response.status_code, 404);
        assert_eq!(response.scrape_id, 42);
        assert_eq!(metrics.scrape_count(SCRAPE_INVALID_PATH), 1);
    }

    #[tokio::test]
    async fn test_unreachable_target_contained_as_failure_response() {
        let (service, metrics) = service_with_paths(vec![PathMapping {
            path: "dead".to_string(),
            // Nothing listens here; connection is refused immediately.
            url: "http://127.0.0.1:9/metrics".to_string(),
        }])
        .await;

        let response = service.fetch(request("dead")).await;
        assert!(!response.valid);
        assert!(response.failure_reason.is_some());
        assert_eq!(metrics.scrape_count(SCRAPE_UNSUCCESSFUL), 1);
    }

    #[tokio::test]
    async fn test_successful_fetch_carries_body_and_content_type() {
        let app = Router::new().route(
            "/metrics",
            get(|| async { "node_load1 0.42\n" }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let (service, metrics) = service_with_paths(vec![PathMapping {
            path: "node".to_string(),
            url: format!("http://{addr}/metrics"),
        }])
        .await;

        let response = service.fetch(request("node")).await;
        assert!(response.valid);
        assert_eq!(response.status_code, 200);
        assert!(response.text.contains("node_load1"));
        assert_eq!(metrics.scrape_count(SCRAPE_SUCCESS), 1);
    }

    #[tokio::test]
    async fn test_target_error_status_is_unsuccessful() {
        let app = Router::new().route(
            "/metrics",
            get(|| async { (axum::http::StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let (service, metrics) = service_with_paths(vec![PathMapping {
            path: "node".to_string(),
            url: format!("http://{addr}/metrics"),
        }])
        .await;

        let response = service.fetch(request("node")).await;
        assert!(!response.valid);
        assert_eq!(response.status_code, 500);
        assert_eq!(metrics.scrape_count(SCRAPE_UNSUCCESSFUL), 1);
    }
}
