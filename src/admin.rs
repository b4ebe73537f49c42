//! Admin HTTP surface: liveness, health, metrics, and debug endpoints.
//!
//! Served separately from the proxy transport so operators can probe the
//! agent even when the proxy link is down. `/healthcheck` reports the
//! scrape backlog against the configured unhealthy threshold; `/debug` is
//! only routed when enabled in config.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::agent::Agent;
use crate::error::{AgentError, Result};

/// Running admin server with a graceful-shutdown handle.
pub struct AdminServer {
    addr: SocketAddr,
    shutdown_tx: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl AdminServer {
    /// Bind and start serving in a background task.
    pub async fn start(agent: Arc<Agent>) -> Result<Self> {
        let admin = agent.config().admin.clone();

        let mut router = Router::new()
            .route("/ping", get(ping))
            .route("/healthcheck", get(healthcheck))
            .route("/metrics", get(metrics));
        if admin.debug_enabled {
            router = router.route("/debug", get(debug));
        }
        let router = router.with_state(Arc::clone(&agent));

        let listener = TcpListener::bind((admin.host.as_str(), admin.port))
            .await
            .map_err(|e| {
                AgentError::Unclassified(format!(
                    "failed to bind admin server on {}:{}: {e}",
                    admin.host, admin.port
                ))
            })?;
        let addr = listener.local_addr().map_err(|e| {
            AgentError::Unclassified(format!("failed to read admin server address: {e}"))
        })?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            let server = axum::serve(listener, router).with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            });
            if let Err(e) = server.await {
                tracing::error!("Admin server error: {}", e);
            }
        });

        tracing::info!("Admin server listening on http://{}", addr);
        Ok(Self {
            addr,
            shutdown_tx,
            handle,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Stop accepting connections and wait for the server task to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
        let _ = self.handle.await;
        tracing::info!("Admin server stopped");
    }
}

async fn ping() -> &'static str {
    "pong"
}

async fn healthcheck(State(agent): State<Arc<Agent>>) -> Response {
    let threshold = agent.config().internal.scrape_request_backlog_unhealthy_size;
    if agent.metrics().backlog_healthy(threshold) {
        (StatusCode::OK, "OK").into_response()
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            format!("Unhealthy backlog size: {}", agent.metrics().backlog()),
        )
            .into_response()
    }
}

async fn metrics(State(agent): State<Arc<Agent>>) -> String {
    agent.metrics().render()
}

async fn debug(State(agent): State<Arc<Agent>>) -> String {
    agent.status_text().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{ConnectionContext, LivenessMark};
    use crate::config::AgentConfig;
    use crate::metrics::AgentMetrics;
    use crate::paths::PathManager;
    use crate::scrape::{ScrapeBackend, ScrapeRequest, ScrapeResponse};
    use crate::transport::ProxyTransport;
    use async_trait::async_trait;

    struct NullTransport;

    #[async_trait]
    impl ProxyTransport for NullTransport {
        fn proxy_host(&self) -> String {
            "test:0".to_string()
        }

        async fn connect(&self, _transport_filter_disabled: bool) -> bool {
            false
        }

        async fn register_agent(&self, _agent_name: &str, _host_name: &str) -> Result<String> {
            Ok("agent-1".to_string())
        }

        async fn register_path(&self, _agent_id: &str, _path: &str) -> Result<u64> {
            Ok(1)
        }

        async fn reset_stubs(&self) {}

        async fn read_requests(
            &self,
            _backend: Arc<dyn ScrapeBackend>,
            _ctx: Arc<ConnectionContext>,
        ) -> Result<()> {
            Ok(())
        }

        async fn write_responses(&self, _ctx: Arc<ConnectionContext>) -> Result<()> {
            Ok(())
        }

        async fn send_heartbeat(&self) -> Result<()> {
            Ok(())
        }

        async fn shutdown(&self) {}
    }

    struct NullBackend;

    #[async_trait]
    impl ScrapeBackend for NullBackend {
        async fn fetch(&self, request: ScrapeRequest) -> ScrapeResponse {
            ScrapeResponse::failure(&request, 404, "test backend")
        }
    }

    fn test_agent(mut config: AgentConfig) -> Arc<Agent> {
        config.name = Some("admin-test".to_string());
        config.admin.host = "127.0.0.1".to_string();
        config.admin.port = 0;
        let metrics = Arc::new(AgentMetrics::new("launch-a", "admin-test"));
        let liveness = Arc::new(LivenessMark::new());
        Arc::new(Agent::new(
            config,
            "launch-a".to_string(),
            Arc::new(NullTransport),
            Arc::new(NullBackend),
            Arc::new(PathManager::new(vec![])),
            metrics,
            liveness,
        ))
    }

    #[tokio::test]
    async fn test_ping_and_metrics() {
        let agent = test_agent(AgentConfig::default());
        let server = AdminServer::start(Arc::clone(&agent)).await.unwrap();
        let base = format!("http://{}", server.local_addr());

        let pong = reqwest::get(format!("{base}/ping")).await.unwrap();
        assert_eq!(pong.status(), 200);
        assert_eq!(pong.text().await.unwrap(), "pong");

        let metrics = reqwest::get(format!("{base}/metrics")).await.unwrap();
        assert_eq!(metrics.status(), 200);
        let body = metrics.text().await.unwrap();
        assert!(body.contains("agent_scrape_request_backlog"));
        assert!(body.contains("agent_name=\"admin-test\""));

        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_healthcheck_tracks_backlog_threshold() {
        let mut config = AgentConfig::default();
        config.internal.scrape_request_backlog_unhealthy_size = 2;
        let agent = test_agent(config);
        let server = AdminServer::start(Arc::clone(&agent)).await.unwrap();
        let base = format!("http://{}", server.local_addr());

        let healthy = reqwest::get(format!("{base}/healthcheck")).await.unwrap();
        assert_eq!(healthy.status(), 200);

        agent.metrics().incr_backlog();
        agent.metrics().incr_backlog();
        let unhealthy = reqwest::get(format!("{base}/healthcheck")).await.unwrap();
        assert_eq!(unhealthy.status(), 503);
        assert!(unhealthy.text().await.unwrap().contains("backlog size: 2"));

        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_debug_endpoint_gated_by_config() {
        let agent = test_agent(AgentConfig::default());
        let server = AdminServer::start(Arc::clone(&agent)).await.unwrap();
        let base = format!("http://{}", server.local_addr());

        let off = reqwest::get(format!("{base}/debug")).await.unwrap();
        assert_eq!(off.status(), 404);
        server.shutdown().await;

        let mut config = AgentConfig::default();
        config.admin.debug_enabled = true;
        let agent = test_agent(config);
        let server = AdminServer::start(Arc::clone(&agent)).await.unwrap();
        let base = format!("http://{}", server.local_addr());

        let on = reqwest::get(format!("{base}/debug")).await.unwrap();
        assert_eq!(on.status(), 200);
        let body = on.text().await.unwrap();
        assert!(body.contains("AgentName: admin-test"));
        assert!(body.contains("ProxyHost: test:0"));

        server.shutdown().await;
    }
}
