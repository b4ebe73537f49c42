//! Core agent logic.
//!
//! The orchestrator owns the reconnect loop and, per connection, the four
//! duty cycles (reader, writer, heartbeat watchdog, executor) coupled
//! through a per-connection context. Supporting pieces live in their own
//! modules: the liveness mark, the reconnect rate limiter, and the
//! one-shot initial-connection barrier.

mod barrier;
mod context;
mod heartbeat;
mod limiter;
mod liveness;
mod orchestrator;

pub use barrier::InitialConnectionBarrier;
pub use context::{ConnectionContext, ScrapeRequestAction};
pub use heartbeat::{run_watchdog, HeartbeatConfig};
pub use limiter::ReconnectLimiter;
pub use liveness::LivenessMark;
pub use orchestrator::{random_launch_id, Agent};
