//! Connection orchestrator.
//!
//! Owns the outer reconnect-with-backoff loop and, per successful
//! connection, the four duty cycles: reader, writer, heartbeat watchdog,
//! and executor. The cycles run under one supervision scope tied to a
//! fresh `ConnectionContext`; the first cycle to terminate (normally or
//! with an error) closes the context, cancels its siblings, and hands the
//! outcome to the reconnect loop's failure classification. No error here
//! is fatal to the process — only an external stop ends the loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Instant;

use tokio::task::JoinSet;

use crate::agent::heartbeat::{run_watchdog, HeartbeatConfig};
use crate::agent::{ConnectionContext, InitialConnectionBarrier, LivenessMark, ReconnectLimiter};
use crate::config::AgentConfig;
use crate::error::{AgentError, Result};
use crate::metrics::AgentMetrics;
use crate::paths::PathManager;
use crate::scrape::ScrapeBackend;
use crate::transport::ProxyTransport;

/// Random 15-character alphanumeric launch id.
///
/// Stable for the process lifetime; correlates metrics and log lines
/// across reconnects.
pub fn random_launch_id() -> String {
    use rand::distributions::Alphanumeric;
    use rand::Rng;
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(15)
        .map(char::from)
        .collect()
}

/// The reverse-tunnel scraping agent.
pub struct Agent {
    config: AgentConfig,
    agent_name: String,
    host_name: String,
    launch_id: String,
    /// Non-empty only while a connection is registered; cleared before
    /// every new attempt.
    agent_id: RwLock<String>,
    running: Arc<AtomicBool>,
    started_at: Instant,
    transport: Arc<dyn ProxyTransport>,
    backend: Arc<dyn ScrapeBackend>,
    paths: Arc<PathManager>,
    metrics: Arc<AgentMetrics>,
    liveness: Arc<LivenessMark>,
    reconnect_limiter: ReconnectLimiter,
    initial_connection: InitialConnectionBarrier,
}

impl Agent {
    pub fn new(
        config: AgentConfig,
        launch_id: String,
        transport: Arc<dyn ProxyTransport>,
        backend: Arc<dyn ScrapeBackend>,
        paths: Arc<PathManager>,
        metrics: Arc<AgentMetrics>,
        liveness: Arc<LivenessMark>,
    ) -> Self {
        let agent_name = config.agent_name();
        let reconnect_limiter = ReconnectLimiter::new(config.internal.reconnect_pause());

        tracing::info!("Agent name: {}", agent_name);
        tracing::info!(
            "Proxy reconnect pause time: {:?}",
            config.internal.reconnect_pause()
        );
        tracing::info!("Scrape timeout time: {:?}", config.internal.scrape_timeout());

        Self {
            agent_name,
            host_name: crate::config::host_name(),
            launch_id,
            agent_id: RwLock::new(String::new()),
            running: Arc::new(AtomicBool::new(true)),
            started_at: Instant::now(),
            config,
            transport,
            backend,
            paths,
            metrics,
            liveness,
            reconnect_limiter,
            initial_connection: InitialConnectionBarrier::new(),
        }
    }

    pub fn agent_name(&self) -> &str {
        &self.agent_name
    }

    pub fn launch_id(&self) -> &str {
        &self.launch_id
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn metrics(&self) -> &Arc<AgentMetrics> {
        &self.metrics
    }

    pub fn agent_id(&self) -> String {
        self.agent_id.read().expect("agent_id lock poisoned").clone()
    }

    fn set_agent_id(&self, agent_id: &str) {
        *self.agent_id.write().expect("agent_id lock poisoned") = agent_id.to_string();
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Stop the outer loop and cascade into the transport.
    pub async fn shutdown(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.transport.shutdown().await;
    }

    /// Block until the first registration ever succeeds, or time out.
    pub async fn await_initial_connection(&self, timeout: std::time::Duration) -> bool {
        self.initial_connection.await_released(timeout).await
    }

    /// Plain-text status for the admin `/debug` endpoint.
    pub async fn status_text(&self) -> String {
        format!(
            "Agent Info\n\n\
             Uptime:    {:?}\n\
             AgentId:   {}\n\
             AgentName: {}\n\
             LaunchId:  {}\n\
             ProxyHost: {}\n\
             Backlog:   {}\n\n\
             Paths:\n{}",
            self.started_at.elapsed(),
            self.agent_id(),
            self.agent_name,
            self.launch_id,
            self.transport.proxy_host(),
            self.metrics.backlog(),
            self.paths.to_plain_text().await,
        )
    }

    /// Outer retry loop. Runs until `shutdown()`.
    ///
    /// The limiter starts with one free token so the first attempt is not
    /// delayed; every later attempt waits out the reconnect pause, even
    /// after a clean disconnect.
    pub async fn run(&self) {
        self.reconnect_limiter.acquire().await;

        while self.is_running() {
            if let Err(e) = self.connect_to_proxy().await {
                e.log_for_reconnect(&self.transport.proxy_host());
            }
            let waited = self.reconnect_limiter.acquire().await;
            tracing::info!("Waited {:?} to reconnect", waited);
        }
    }

    /// One full connect → register → pump → unwind sequence.
    async fn connect_to_proxy(&self) -> Result<()> {
        // Reset transport stubs if the previous attempt had registered.
        if !self.agent_id().is_empty() {
            self.transport.reset_stubs().await;
            tracing::info!("Resetting agent id");
            self.set_agent_id("");
        }

        // Reset per-attempt state.
        self.paths.clear().await;
        self.metrics.reset_backlog();
        self.liveness.mark();

        if !self
            .transport
            .connect(self.config.transport_filter_disabled)
            .await
        {
            // Nothing was opened, so there is nothing to unwind.
            return Ok(());
        }

        let agent_id = self
            .transport
            .register_agent(&self.agent_name, &self.host_name)
            .await?;
        self.set_agent_id(&agent_id);
        self.initial_connection.release();

        self.paths
            .register_paths(self.transport.as_ref(), &agent_id)
            .await?;

        let ctx = Arc::new(ConnectionContext::new(self.config.internal.request_queue_size));
        let mut cycles: JoinSet<Result<()>> = JoinSet::new();

        // Reader: proxy stream → request queue.
        {
            let transport = Arc::clone(&self.transport);
            let backend = Arc::clone(&self.backend);
            let ctx = Arc::clone(&ctx);
            let running = Arc::clone(&self.running);
            cycles.spawn(async move {
                guard_cycle(
                    "read_requests",
                    &running,
                    transport.read_requests(backend, ctx).await,
                )
            });
        }

        // Writer: result queue → proxy, until disconnected.
        {
            let transport = Arc::clone(&self.transport);
            let ctx = Arc::clone(&ctx);
            let running = Arc::clone(&self.running);
            cycles.spawn(async move {
                guard_cycle(
                    "write_responses",
                    &running,
                    transport.write_responses(ctx).await,
                )
            });
        }

        // Heartbeat watchdog. Disabled is a planned no-op and must not
        // count as a terminated duty cycle, so it is never spawned.
        let heartbeat_config = HeartbeatConfig::from(&self.config.internal);
        if heartbeat_config.enabled {
            let transport = Arc::clone(&self.transport);
            let ctx = Arc::clone(&ctx);
            let liveness = Arc::clone(&self.liveness);
            let running = Arc::clone(&self.running);
            let running_for_guard = Arc::clone(&self.running);
            cycles.spawn(async move {
                guard_cycle(
                    "heartbeat",
                    &running_for_guard,
                    run_watchdog(heartbeat_config, transport, ctx, liveness, running).await,
                )
            });
        } else {
            tracing::info!("Heartbeat disabled");
        }

        // Executor: request queue → fetch → result queue.
        {
            let metrics = Arc::clone(&self.metrics);
            let ctx = Arc::clone(&ctx);
            let running = Arc::clone(&self.running);
            cycles.spawn(async move {
                guard_cycle(
                    "execute_scrape_requests",
                    &running,
                    execute_scrape_requests(metrics, ctx).await,
                )
            });
        }

        // The attempt ends when the first duty cycle terminates; siblings
        // must not outlive the scope.
        let first = cycles.join_next().await;
        ctx.close().await;
        cycles.shutdown().await;

        match first {
            Some(Ok(result)) => result,
            Some(Err(join_err)) => Err(AgentError::Unclassified(format!(
                "duty cycle panicked: {join_err}"
            ))),
            None => Ok(()),
        }
    }
}

/// Failure-isolating wrapper around one duty cycle outcome.
///
/// Logs unexpected failures unless the service is already stopping, and
/// passes the result through for the cycle-level classification.
fn guard_cycle(name: &str, running: &AtomicBool, result: Result<()>) -> Result<()> {
    if let Err(ref e) = result {
        if running.load(Ordering::SeqCst) && !matches!(e, AgentError::Disconnected) {
            tracing::warn!("{}(): {}", name, e);
        }
    }
    result
}

/// Executor duty cycle: drain the request queue until it closes.
///
/// A failing fetch is contained inside the action and comes back as an
/// error-carrying response; it never aborts this cycle.
async fn execute_scrape_requests(
    metrics: Arc<AgentMetrics>,
    ctx: Arc<ConnectionContext>,
) -> Result<()> {
    let Some(mut rx) = ctx.take_request_rx().await else {
        return Err(AgentError::Unclassified(
            "request queue already taken".to_string(),
        ));
    };

    while let Some(action) = rx.recv().await {
        metrics.decr_backlog();
        let response = action.invoke().await;
        if ctx.send_result(response).await.is_err() {
            break;
        }
    }
    // Queue closure is the intended termination path.
    Ok(())
}
