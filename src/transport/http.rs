//! Long-poll JSON transport over HTTP.
//!
//! The agent dials out; the proxy never connects back. Inbound scrape
//! requests arrive as an NDJSON stream on a long-lived GET, outbound
//! results and heartbeats are POSTed one at a time.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, RwLock};

use crate::agent::{ConnectionContext, LivenessMark, ScrapeRequestAction};
use crate::error::{AgentError, Result};
use crate::metrics::AgentMetrics;
use crate::scrape::{ScrapeBackend, ScrapeRequest};
use crate::transport::ProxyTransport;

#[derive(Debug, Serialize)]
struct ConnectRequest {
    transport_filter_disabled: bool,
}

#[derive(Debug, Serialize)]
struct RegisterAgentRequest<'a> {
    agent_name: &'a str,
    host_name: &'a str,
}

#[derive(Debug, Deserialize)]
struct RegisterAgentReply {
    agent_id: String,
    valid: bool,
    #[serde(default)]
    reason: String,
}

#[derive(Debug, Serialize)]
struct RegisterPathRequest<'a> {
    path: &'a str,
}

#[derive(Debug, Deserialize)]
struct RegisterPathReply {
    path_id: u64,
    valid: bool,
    #[serde(default)]
    reason: String,
}

/// HTTP long-poll implementation of the proxy transport.
pub struct HttpProxyTransport {
    host: String,
    base_url: String,
    client: RwLock<Client>,
    /// Proxy-assigned agent id; session state cleared by `reset_stubs`.
    agent_id: RwLock<String>,
    metrics: Arc<AgentMetrics>,
    liveness: Arc<LivenessMark>,
    closed_tx: watch::Sender<bool>,
}

impl HttpProxyTransport {
    pub fn new(host: String, metrics: Arc<AgentMetrics>, liveness: Arc<LivenessMark>) -> Self {
        let (closed_tx, _) = watch::channel(false);
        Self {
            base_url: format!("http://{host}"),
            host,
            client: RwLock::new(new_client()),
            agent_id: RwLock::new(String::new()),
            metrics,
            liveness,
            closed_tx,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn session_agent_id(&self) -> Result<String> {
        let agent_id = self.agent_id.read().await.clone();
        if agent_id.is_empty() {
            return Err(AgentError::Unclassified(
                "transport used before registration".to_string(),
            ));
        }
        Ok(agent_id)
    }
}

fn new_client() -> Client {
    Client::builder()
        .connect_timeout(Duration::from_secs(5))
        // No overall timeout: the inbound request stream is long-lived.
        .build()
        .expect("Failed to create HTTP client")
}

/// Split complete newline-terminated records off the front of `buf`.
fn drain_lines(buf: &mut Vec<u8>) -> Vec<String> {
    let mut lines = Vec::new();
    while let Some(pos) = buf.iter().position(|&b| b == b'\n') {
        let line: Vec<u8> = buf.drain(..=pos).collect();
        let text = String::from_utf8_lossy(&line[..line.len() - 1])
            .trim()
            .to_string();
        if !text.is_empty() {
            lines.push(text);
        }
    }
    lines
}

#[async_trait]
impl ProxyTransport for HttpProxyTransport {
    fn proxy_host(&self) -> String {
        self.host.clone()
    }

    async fn connect(&self, transport_filter_disabled: bool) -> bool {
        tracing::info!("Connecting to proxy at {}...", self.host);
        let client = self.client.read().await.clone();
        let result = client
            .post(self.url("/api/agents/connect"))
            .json(&ConnectRequest {
                transport_filter_disabled,
            })
            .send()
            .await
            .and_then(|r| r.error_for_status());

        match result {
            Ok(_) => {
                tracing::info!("Connected to proxy at {}", self.host);
                true
            }
            Err(e) => {
                tracing::info!("Cannot connect to proxy at {} [{}]", self.host, e);
                false
            }
        }
    }

    async fn register_agent(&self, agent_name: &str, host_name: &str) -> Result<String> {
        let client = self.client.read().await.clone();
        let reply: RegisterAgentReply = client
            .post(self.url("/api/agents/register"))
            .json(&RegisterAgentRequest {
                agent_name,
                host_name,
            })
            .send()
            .await
            .map_err(AgentError::from_reqwest)?
            .error_for_status()
            .map_err(AgentError::from_reqwest)?
            .json()
            .await
            .map_err(|e| AgentError::InvalidResponse {
                reason: format!("registerAgent(): {e}"),
            })?;

        if !reply.valid {
            return Err(AgentError::InvalidResponse {
                reason: format!("registerAgent(): {}", reply.reason),
            });
        }

        *self.agent_id.write().await = reply.agent_id.clone();
        Ok(reply.agent_id)
    }

    async fn register_path(&self, agent_id: &str, path: &str) -> Result<u64> {
        let client = self.client.read().await.clone();
        let reply: RegisterPathReply = client
            .post(self.url(&format!("/api/agents/{agent_id}/paths")))
            .json(&RegisterPathRequest { path })
            .send()
            .await
            .map_err(AgentError::from_reqwest)?
            .error_for_status()
            .map_err(AgentError::from_reqwest)?
            .json()
            .await
            .map_err(|e| AgentError::InvalidResponse {
                reason: format!("registerPath(/{path}): {e}"),
            })?;

        if !reply.valid {
            return Err(AgentError::InvalidResponse {
                reason: format!("registerPath(/{path}): {}", reply.reason),
            });
        }
        Ok(reply.path_id)
    }

    async fn reset_stubs(&self) {
        *self.client.write().await = new_client();
        self.agent_id.write().await.clear();
    }

    async fn read_requests(
        &self,
        backend: Arc<dyn ScrapeBackend>,
        ctx: Arc<ConnectionContext>,
    ) -> Result<()> {
        let agent_id = self.session_agent_id().await?;
        let client = self.client.read().await.clone();
        let mut closed_rx = self.closed_tx.subscribe();

        let pending = client
            .get(self.url(&format!("/api/agents/{agent_id}/requests")))
            .send();
        let response = tokio::select! {
            response = pending => response.map_err(AgentError::from_reqwest)?,
            _ = closed_rx.wait_for(|closed| *closed) => return Err(AgentError::Disconnected),
        }
        .error_for_status()
        .map_err(AgentError::from_reqwest)?;

        let mut stream = response.bytes_stream();
        let mut buf: Vec<u8> = Vec::new();

        loop {
            let chunk = tokio::select! {
                chunk = stream.next() => chunk,
                _ = closed_rx.wait_for(|closed| *closed) => return Err(AgentError::Disconnected),
            };

            let Some(chunk) = chunk else {
                // Proxy closed the stream cleanly.
                return Err(AgentError::Disconnected);
            };
            let chunk = chunk.map_err(AgentError::from_reqwest)?;
            buf.extend_from_slice(&chunk);

            for line in drain_lines(&mut buf) {
                let request: ScrapeRequest =
                    serde_json::from_str(&line).map_err(|e| AgentError::InvalidResponse {
                        reason: format!("bad scrape request: {e}"),
                    })?;

                let action = {
                    let backend = Arc::clone(&backend);
                    ScrapeRequestAction::new(async move { backend.fetch(request).await })
                };
                // Counted before the enqueue so the executor's decrement
                // can never be observed first; rolled back if the context
                // closed underneath us.
                self.metrics.incr_backlog();
                if let Err(e) = ctx.enqueue_request(action).await {
                    self.metrics.decr_backlog();
                    return Err(e);
                }
            }
        }
    }

    async fn write_responses(&self, ctx: Arc<ConnectionContext>) -> Result<()> {
        let agent_id = self.session_agent_id().await?;
        let client = self.client.read().await.clone();
        let url = self.url(&format!("/api/agents/{agent_id}/responses"));

        let Some(mut rx) = ctx.take_result_rx().await else {
            return Err(AgentError::Unclassified(
                "result queue already taken".to_string(),
            ));
        };

        // Context teardown closes the result queue, which unblocks this
        // recv with end-of-stream.
        while let Some(response) = rx.recv().await {
            client
                .post(&url)
                .json(&response)
                .send()
                .await
                .map_err(AgentError::from_reqwest)?
                .error_for_status()
                .map_err(AgentError::from_reqwest)?;
            self.liveness.mark();
        }
        Ok(())
    }

    async fn send_heartbeat(&self) -> Result<()> {
        let agent_id = self.session_agent_id().await?;
        let client = self.client.read().await.clone();
        client
            .post(self.url(&format!("/api/agents/{agent_id}/heartbeat")))
            .send()
            .await
            .map_err(AgentError::from_reqwest)?
            .error_for_status()
            .map_err(AgentError::from_reqwest)?;
        self.liveness.mark();
        Ok(())
    }

    async fn shutdown(&self) {
        let _ = self.closed_tx.send(true);
    }
}
