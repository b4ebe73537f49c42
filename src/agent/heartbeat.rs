//! Heartbeat watchdog duty cycle.
//!
//! Keeps the connection alive when no application traffic has been sent
//! recently: polls the liveness mark and sends a heartbeat through the
//! transport once the inactivity threshold is crossed. A disabled
//! watchdog is a planned no-op, not a terminated duty cycle; the
//! orchestrator checks `enabled` and never spawns it in that case.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::agent::{ConnectionContext, LivenessMark};
use crate::config::InternalConfig;
use crate::error::Result;
use crate::transport::ProxyTransport;

/// Watchdog settings.
#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    /// Whether the watchdog is spawned at all.
    pub enabled: bool,
    /// Poll interval.
    pub check_pause: Duration,
    /// Inactivity threshold after which a heartbeat is due.
    pub max_inactivity: Duration,
}

impl From<&InternalConfig> for HeartbeatConfig {
    fn from(internal: &InternalConfig) -> Self {
        Self {
            enabled: internal.heartbeat_enabled,
            check_pause: internal.heartbeat_check_pause(),
            max_inactivity: internal.heartbeat_max_inactivity(),
        }
    }
}

/// Run the watchdog until the service stops or the connection drops.
///
/// The transport's `send_heartbeat` updates the liveness mark on success,
/// so at most one heartbeat fires per inactivity breach per poll.
pub async fn run_watchdog(
    config: HeartbeatConfig,
    transport: Arc<dyn ProxyTransport>,
    ctx: Arc<ConnectionContext>,
    liveness: Arc<LivenessMark>,
    running: Arc<AtomicBool>,
) -> Result<()> {
    tracing::info!(
        "Heartbeat scheduled to fire after {:?} of inactivity",
        config.max_inactivity
    );

    while running.load(Ordering::SeqCst) && ctx.is_connected() {
        if liveness.elapsed() > config.max_inactivity {
            tracing::debug!("Sending heartbeat");
            transport.send_heartbeat().await?;
        }
        tokio::time::sleep(config.check_pause).await;
    }

    tracing::info!("Heartbeat completed");
    Ok(())
}
