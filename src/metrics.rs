//! Agent-side metrics: backlog gauge, scrape counters, latency.
//!
//! Samples are labeled with the process-lifetime `launch_id` and the agent
//! name so one proxy can tell reconnecting agents apart. A plain-text
//! exposition is served by the admin server.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Scrape outcome types used as counter labels.
pub const SCRAPE_SUCCESS: &str = "success";
pub const SCRAPE_UNSUCCESSFUL: &str = "unsuccessful";
pub const SCRAPE_INVALID_PATH: &str = "invalid_path";

#[derive(Debug, Default)]
struct LatencyStats {
    count: u64,
    total: Duration,
}

/// Counters and gauges for one agent process.
#[derive(Debug)]
pub struct AgentMetrics {
    launch_id: String,
    agent_name: String,
    /// Scrape requests received but not yet executed.
    backlog: AtomicI64,
    scrape_requests: Mutex<HashMap<String, u64>>,
    latency: Mutex<LatencyStats>,
}

impl AgentMetrics {
    pub fn new(launch_id: impl Into<String>, agent_name: impl Into<String>) -> Self {
        Self {
            launch_id: launch_id.into(),
            agent_name: agent_name.into(),
            backlog: AtomicI64::new(0),
            scrape_requests: Mutex::new(HashMap::new()),
            latency: Mutex::new(LatencyStats::default()),
        }
    }

    pub fn launch_id(&self) -> &str {
        &self.launch_id
    }

    pub fn agent_name(&self) -> &str {
        &self.agent_name
    }

    /// Current backlog: requests enqueued minus requests dequeued.
    pub fn backlog(&self) -> i64 {
        self.backlog.load(Ordering::SeqCst)
    }

    /// Reader enqueued a request.
    pub fn incr_backlog(&self) {
        self.backlog.fetch_add(1, Ordering::SeqCst);
    }

    /// Executor dequeued a request. The gauge never goes negative.
    pub fn decr_backlog(&self) {
        let _ = self
            .backlog
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| Some((v - 1).max(0)));
    }

    /// Reset the backlog at the start of a connection attempt.
    pub fn reset_backlog(&self) {
        self.backlog.store(0, Ordering::SeqCst);
    }

    /// Backlog health against the configured unhealthy threshold.
    pub fn backlog_healthy(&self, unhealthy_size: i64) -> bool {
        self.backlog() < unhealthy_size
    }

    /// Count one scrape by outcome type.
    pub fn record_scrape(&self, outcome: &str) {
        if outcome.is_empty() {
            return;
        }
        let mut counters = self.scrape_requests.lock().expect("metrics lock poisoned");
        *counters.entry(outcome.to_string()).or_default() += 1;
    }

    /// Record one target-fetch latency sample.
    pub fn observe_latency(&self, elapsed: Duration) {
        let mut stats = self.latency.lock().expect("metrics lock poisoned");
        stats.count += 1;
        stats.total += elapsed;
    }

    /// Counter value for one outcome type (0 if never recorded).
    pub fn scrape_count(&self, outcome: &str) -> u64 {
        self.scrape_requests
            .lock()
            .expect("metrics lock poisoned")
            .get(outcome)
            .copied()
            .unwrap_or(0)
    }

    /// Render the Prometheus-style text exposition.
    pub fn render(&self) -> String {
        let labels = format!(
            "launch_id=\"{}\",agent_name=\"{}\"",
            self.launch_id, self.agent_name
        );
        let mut out = String::new();

        out.push_str("# TYPE agent_scrape_request_backlog gauge\n");
        out.push_str(&format!(
            "agent_scrape_request_backlog{{{}}} {}\n",
            labels,
            self.backlog()
        ));

        out.push_str("# TYPE agent_scrape_requests_total counter\n");
        let counters = self.scrape_requests.lock().expect("metrics lock poisoned");
        let mut outcomes: Vec<_> = counters.iter().collect();
        outcomes.sort_by(|a, b| a.0.cmp(b.0));
        for (outcome, count) in outcomes {
            out.push_str(&format!(
                "agent_scrape_requests_total{{{},type=\"{}\"}} {}\n",
                labels, outcome, count
            ));
        }
        drop(counters);

        let stats = self.latency.lock().expect("metrics lock poisoned");
        out.push_str("# TYPE agent_scrape_request_latency_seconds summary\n");
        out.push_str(&format!(
            "agent_scrape_request_latency_seconds_count{{{}}} {}\n",
            labels, stats.count
        ));
        out.push_str(&format!(
            "agent_scrape_request_latency_seconds_sum{{{}}} {:.6}\n",
            labels,
            stats.total.as_secs_f64()
        ));

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backlog_tracks_enqueue_dequeue() {
        let metrics = AgentMetrics::new("launch-1", "agent-1");
        assert_eq!(metrics.backlog(), 0);

        metrics.incr_backlog();
        metrics.incr_backlog();
        assert_eq!(metrics.backlog(), 2);

        metrics.decr_backlog();
        assert_eq!(metrics.backlog(), 1);
    }

    #[test]
    fn test_backlog_never_negative() {
        let metrics = AgentMetrics::new("launch-1", "agent-1");
        metrics.decr_backlog();
        metrics.decr_backlog();
        assert_eq!(metrics.backlog(), 0);
    }

    #[test]
    fn test_reset_backlog() {
        let metrics = AgentMetrics::new("launch-1", "agent-1");
        metrics.incr_backlog();
        metrics.incr_backlog();
        metrics.reset_backlog();
        assert_eq!(metrics.backlog(), 0);
    }

    #[test]
    fn test_backlog_health_threshold() {
        let metrics = AgentMetrics::new("launch-1", "agent-1");
        assert!(metrics.backlog_healthy(2));
        metrics.incr_backlog();
        metrics.incr_backlog();
        assert!(!metrics.backlog_healthy(2));
    }

    #[test]
    fn test_scrape_counters_by_type() {
        let metrics = AgentMetrics::new("launch-1", "agent-1");
        metrics.record_scrape(SCRAPE_SUCCESS);
        metrics.record_scrape(SCRAPE_SUCCESS);
        metrics.record_scrape(SCRAPE_INVALID_PATH);
        metrics.record_scrape("");

        assert_eq!(metrics.scrape_count(SCRAPE_SUCCESS), 2);
        assert_eq!(metrics.scrape_count(SCRAPE_INVALID_PATH), 1);
        assert_eq!(metrics.scrape_count(SCRAPE_UNSUCCESSFUL), 0);
    }

    #[test]
    fn test_render_contains_labels_and_values() {
        let metrics = AgentMetrics::new("abc123", "edge-agent");
        metrics.incr_backlog();
        metrics.record_scrape(SCRAPE_SUCCESS);
        metrics.observe_latency(Duration::from_millis(250));

        let text = metrics.render();
        assert!(text.contains("launch_id=\"abc123\""));
        assert!(text.contains("agent_name=\"edge-agent\""));
        assert!(text.contains("agent_scrape_request_backlog"));
        assert!(text.contains("type=\"success\"} 1"));
        assert!(text.contains("agent_scrape_request_latency_seconds_count"));
    }
}
