//! Agent entry point: config layering, wiring, and shutdown handling.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use burrow::admin::AdminServer;
use burrow::agent::{random_launch_id, Agent, LivenessMark};
use burrow::config::AgentConfig;
use burrow::metrics::AgentMetrics;
use burrow::paths::PathManager;
use burrow::scrape::ScrapeService;
use burrow::transport::HttpProxyTransport;

#[derive(Parser, Debug)]
#[command(name = "burrow", version, about = "Reverse-tunnel metrics-scraping agent")]
struct Cli {
    /// JSON config file with path mappings and tunables
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Proxy endpoint (hostname or hostname:port)
    #[arg(short = 'p', long, env = "PROXY_HOSTNAME")]
    proxy: Option<String>,

    /// Agent name reported to the proxy
    #[arg(short = 'n', long, env = "AGENT_NAME")]
    name: Option<String>,

    /// Admin server port
    #[arg(long)]
    admin_port: Option<u16>,

    /// Expose the plain-text /debug admin endpoint
    #[arg(long)]
    debug: bool,

    /// Ask the proxy to skip its transport filter for this agent
    #[arg(long)]
    transport_filter_disabled: bool,
}

impl Cli {
    /// Config file first, then environment, then explicit flags.
    fn into_config(self) -> anyhow::Result<AgentConfig> {
        let mut config = match &self.config {
            Some(path) => AgentConfig::from_file(path)?,
            None => AgentConfig::default(),
        };
        config.apply_env();

        if let Some(proxy) = self.proxy {
            config.proxy.hostname = proxy;
        }
        if let Some(name) = self.name {
            config.name = Some(name);
        }
        if let Some(port) = self.admin_port {
            config.admin.port = port;
        }
        if self.debug {
            config.admin.debug_enabled = true;
        }
        if self.transport_filter_disabled {
            config.transport_filter_disabled = true;
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = Cli::parse().into_config()?;

    let launch_id = random_launch_id();
    let metrics = Arc::new(AgentMetrics::new(launch_id.clone(), config.agent_name()));
    let liveness = Arc::new(LivenessMark::new());
    let paths = Arc::new(PathManager::new(config.paths.clone()));
    let transport = Arc::new(HttpProxyTransport::new(
        config.proxy.host(),
        Arc::clone(&metrics),
        Arc::clone(&liveness),
    ));
    let backend = Arc::new(ScrapeService::new(
        config.internal.scrape_timeout(),
        Arc::clone(&paths),
        Arc::clone(&metrics),
    ));

    let admin_enabled = config.admin.enabled;
    let agent = Arc::new(Agent::new(
        config,
        launch_id,
        transport,
        backend,
        paths,
        metrics,
        liveness,
    ));

    let admin = if admin_enabled {
        Some(AdminServer::start(Arc::clone(&agent)).await?)
    } else {
        None
    };

    let run_task = {
        let agent = Arc::clone(&agent);
        tokio::spawn(async move { agent.run().await })
    };

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");

    agent.shutdown().await;
    run_task.await?;
    if let Some(admin) = admin {
        admin.shutdown().await;
    }

    tracing::info!("Agent stopped");
    Ok(())
}
