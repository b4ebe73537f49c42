//! Proxy transport seam.
//!
//! The orchestrator only ever talks to the proxy through this trait, so the
//! wire protocol can be swapped without touching the connection cycle. The
//! in-tree implementation is long-poll JSON over HTTP (`http` module).

mod http;

pub use http::HttpProxyTransport;

use std::sync::Arc;

use async_trait::async_trait;

use crate::agent::ConnectionContext;
use crate::error::Result;
use crate::scrape::ScrapeBackend;

/// Call-level contract between the orchestrator and the wire transport.
///
/// Errors surfaced from these calls must map onto the `AgentError`
/// taxonomy so the reconnect loop can classify them.
#[async_trait]
pub trait ProxyTransport: Send + Sync {
    /// `host:port` for log lines.
    fn proxy_host(&self) -> String;

    /// Open the transport connection. Returns false (after logging) when
    /// the proxy is unreachable; there is nothing to unwind in that case.
    async fn connect(&self, transport_filter_disabled: bool) -> bool;

    /// Register this agent with the proxy; returns the assigned agent id.
    async fn register_agent(&self, agent_name: &str, host_name: &str) -> Result<String>;

    /// Register one path mapping; returns the proxy-assigned path id.
    async fn register_path(&self, agent_id: &str, path: &str) -> Result<u64>;

    /// Drop per-connection transport state ahead of a fresh attempt.
    async fn reset_stubs(&self);

    /// Reader duty cycle: receive scrape requests from the proxy and
    /// enqueue them (as actions over `backend`) onto the context until the
    /// stream ends or errors. Termination of any kind ends the connection
    /// cycle, so a clean end-of-stream surfaces as a disconnect error.
    async fn read_requests(
        &self,
        backend: Arc<dyn ScrapeBackend>,
        ctx: Arc<ConnectionContext>,
    ) -> Result<()>;

    /// Writer duty cycle: send queued results to the proxy until the
    /// result queue closes on context teardown. Every successful send
    /// updates the liveness mark. Exiting on disconnect is normal, not a
    /// failure.
    async fn write_responses(&self, ctx: Arc<ConnectionContext>) -> Result<()>;

    /// Send one heartbeat; updates the liveness mark on success.
    async fn send_heartbeat(&self) -> Result<()>;

    /// Tear the transport down; any blocked stream read must unblock.
    async fn shutdown(&self);
}
