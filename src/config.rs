//! Agent configuration.
//!
//! Settings come from three layers, later layers winning:
//! 1. built-in defaults
//! 2. a JSON config file (path mappings live here)
//! 3. environment variables (`PROXY_HOSTNAME`, `AGENT_NAME`) and CLI flags

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{AgentError, Result};

/// Top-level agent configuration.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AgentConfig {
    /// Agent name reported to the proxy. Defaults to the host name.
    pub name: Option<String>,
    /// Proxy endpoint the agent dials out to.
    pub proxy: ProxyConfig,
    /// Path mappings offered to the proxy on each connection.
    pub paths: Vec<PathMapping>,
    /// Orchestrator tunables.
    pub internal: InternalConfig,
    /// Admin/health HTTP surface.
    pub admin: AdminConfig,
    /// Ask the proxy to skip its transport filter for this agent.
    pub transport_filter_disabled: bool,
}

/// Proxy endpoint settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    pub hostname: String,
    pub port: u16,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            hostname: "localhost".to_string(),
            port: 8082,
        }
    }
}

impl ProxyConfig {
    /// `host:port` string used in log lines and transport URLs.
    pub fn host(&self) -> String {
        if self.hostname.contains(':') {
            self.hostname.clone()
        } else {
            format!("{}:{}", self.hostname, self.port)
        }
    }
}

/// One path the agent serves on behalf of the proxy.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct PathMapping {
    /// Path the proxy exposes (no leading slash).
    pub path: String,
    /// Target URL fetched locally when the path is scraped.
    pub url: String,
}

/// Orchestrator tunables. Defaults mirror a small on-prem deployment.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InternalConfig {
    /// Minimum pause between connection attempts, in seconds.
    pub reconnect_pause_secs: u64,
    /// Whether the heartbeat watchdog runs at all.
    pub heartbeat_enabled: bool,
    /// Heartbeat poll interval, in milliseconds.
    pub heartbeat_check_pause_millis: u64,
    /// Inactivity threshold after which a heartbeat is sent, in seconds.
    pub heartbeat_max_inactivity_secs: u64,
    /// Backlog size at which the health check reports unhealthy.
    pub scrape_request_backlog_unhealthy_size: i64,
    /// Timeout for a single target fetch, in seconds.
    pub scrape_timeout_secs: u64,
    /// Capacity of the per-connection request and result queues.
    pub request_queue_size: usize,
}

impl Default for InternalConfig {
    fn default() -> Self {
        Self {
            reconnect_pause_secs: 3,
            heartbeat_enabled: true,
            heartbeat_check_pause_millis: 500,
            heartbeat_max_inactivity_secs: 5,
            scrape_request_backlog_unhealthy_size: 25,
            scrape_timeout_secs: 15,
            request_queue_size: 256,
        }
    }
}

impl InternalConfig {
    pub fn reconnect_pause(&self) -> Duration {
        Duration::from_secs(self.reconnect_pause_secs)
    }

    pub fn heartbeat_check_pause(&self) -> Duration {
        Duration::from_millis(self.heartbeat_check_pause_millis)
    }

    pub fn heartbeat_max_inactivity(&self) -> Duration {
        Duration::from_secs(self.heartbeat_max_inactivity_secs)
    }

    pub fn scrape_timeout(&self) -> Duration {
        Duration::from_secs(self.scrape_timeout_secs)
    }
}

/// Admin/health HTTP server settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AdminConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    /// Expose the plain-text `/debug` endpoint.
    pub debug_enabled: bool,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "0.0.0.0".to_string(),
            port: 8093,
            debug_enabled: false,
        }
    }
}

impl AgentConfig {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            AgentError::Unclassified(format!("failed to read config {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&content).map_err(|e| {
            AgentError::Unclassified(format!("invalid config {}: {}", path.display(), e))
        })
    }

    /// Apply `PROXY_HOSTNAME` and `AGENT_NAME` environment overrides.
    pub fn apply_env(&mut self) {
        if let Ok(hostname) = std::env::var("PROXY_HOSTNAME") {
            if !hostname.is_empty() {
                self.proxy.hostname = hostname;
            }
        }
        if let Ok(name) = std::env::var("AGENT_NAME") {
            if !name.is_empty() {
                self.name = Some(name);
            }
        }
    }

    /// Agent name, falling back to `Unnamed-<host>` from host identity.
    pub fn agent_name(&self) -> String {
        match &self.name {
            Some(name) if !name.is_empty() => name.clone(),
            _ => format!("Unnamed-{}", host_name()),
        }
    }
}

/// Best-effort local host name, used for the default agent name and for
/// proxy registration.
pub fn host_name() -> String {
    if let Ok(name) = std::env::var("HOSTNAME") {
        if !name.is_empty() {
            return name;
        }
    }
    std::process::Command::new("hostname")
        .output()
        .ok()
        .and_then(|out| String::from_utf8(out.stdout).ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}
