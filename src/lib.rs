//! burrow - reverse-tunnel metrics-scraping agent.
//!
//! The agent runs behind a network boundary, dials out to a proxy, and
//! executes the scrape requests the proxy forwards on behalf of its own
//! clients. One process keeps exactly one proxy connection alive through
//! a reconnect-with-backoff loop; each connection runs four concurrent
//! duty cycles (reader, writer, heartbeat watchdog, executor) coupled by
//! a per-connection context.

pub mod admin;
pub mod agent;
pub mod config;
pub mod error;
pub mod metrics;
pub mod paths;
pub mod scrape;
pub mod transport;
