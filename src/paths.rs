//! Path registry: which proxy paths this agent serves, and where they
//! point locally.
//!
//! Registrations are per-connection state. The orchestrator clears the
//! registry at the start of every attempt and re-registers each mapping
//! with the proxy once registration succeeds.

use std::collections::HashMap;

use tokio::sync::RwLock;

use crate::config::PathMapping;
use crate::error::Result;
use crate::transport::ProxyTransport;

/// One registered path with the id the proxy assigned to it.
#[derive(Debug, Clone)]
pub struct PathContext {
    pub path_id: u64,
    pub path: String,
    pub url: String,
}

/// Registry of path → target-URL mappings for the current connection.
#[derive(Debug)]
pub struct PathManager {
    mappings: Vec<PathMapping>,
    contexts: RwLock<HashMap<String, PathContext>>,
}

impl PathManager {
    pub fn new(mappings: Vec<PathMapping>) -> Self {
        Self {
            mappings,
            contexts: RwLock::new(HashMap::new()),
        }
    }

    /// Drop all registrations. Called at the start of each attempt.
    pub async fn clear(&self) {
        self.contexts.write().await.clear();
    }

    /// Register every configured mapping with the proxy.
    pub async fn register_paths(
        &self,
        transport: &dyn ProxyTransport,
        agent_id: &str,
    ) -> Result<()> {
        for mapping in &self.mappings {
            let path_id = transport.register_path(agent_id, &mapping.path).await?;
            tracing::info!("Registered {} as /{}", mapping.url, mapping.path);
            self.contexts.write().await.insert(
                mapping.path.clone(),
                PathContext {
                    path_id,
                    path: mapping.path.clone(),
                    url: mapping.url.clone(),
                },
            );
        }
        Ok(())
    }

    /// Look up the target for a scraped path.
    pub async fn lookup(&self, path: &str) -> Option<PathContext> {
        self.contexts.read().await.get(path).cloned()
    }

    /// Number of currently registered paths.
    pub async fn registered_count(&self) -> usize {
        self.contexts.read().await.len()
    }

    /// Plain-text dump for the admin `/debug` endpoint.
    pub async fn to_plain_text(&self) -> String {
        let contexts = self.contexts.read().await;
        if contexts.is_empty() {
            return "No registered paths\n".to_string();
        }
        let mut lines: Vec<String> = contexts
            .values()
            .map(|c| format!("/{} -> {} (path_id {})", c.path, c.url, c.path_id))
            .collect();
        lines.sort();
        lines.join("\n") + "\n"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AgentError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    struct RegistrarOnly {
        next_id: AtomicU64,
        fail_path: Option<String>,
    }

    #[async_trait]
    impl ProxyTransport for RegistrarOnly {
        fn proxy_host(&self) -> String {
            "test:0".to_string()
        }

        async fn connect(&self, _transport_filter_disabled: bool) -> bool {
            true
        }

        async fn register_agent(&self, _agent_name: &str, _host_name: &str) -> Result<String> {
            Ok("agent-1".to_string())
        }

        async fn register_path(&self, _agent_id: &str, path: &str) -> Result<u64> {
            if self.fail_path.as_deref() == Some(path) {
                return Err(AgentError::InvalidResponse {
                    reason: format!("registerPath(/{path})"),
                });
            }
            Ok(self.next_id.fetch_add(1, Ordering::SeqCst))
        }

        async fn reset_stubs(&self) {}

        async fn read_requests(
            &self,
            _backend: Arc<dyn crate::scrape::ScrapeBackend>,
            _ctx: Arc<crate::agent::ConnectionContext>,
        ) -> Result<()> {
            Ok(())
        }

        async fn write_responses(&self, _ctx: Arc<crate::agent::ConnectionContext>) -> Result<()> {
            Ok(())
        }

        async fn send_heartbeat(&self) -> Result<()> {
            Ok(())
        }

        async fn shutdown(&self) {}
    }

    fn mappings() -> Vec<PathMapping> {
        vec![
            PathMapping {
                path: "node".to_string(),
                url: "http://localhost:9100/metrics".to_string(),
            },
            PathMapping {
                path: "app".to_string(),
                url: "http://localhost:8080/metrics".to_string(),
            },
        ]
    }

    #[tokio::test]
    async fn test_register_and_lookup() {
        let manager = PathManager::new(mappings());
        let transport = RegistrarOnly {
            next_id: AtomicU64::new(1),
            fail_path: None,
        };

        manager.register_paths(&transport, "agent-1").await.unwrap();
        assert_eq!(manager.registered_count().await, 2);

        let ctx = manager.lookup("node").await.unwrap();
        assert_eq!(ctx.url, "http://localhost:9100/metrics");
        assert!(manager.lookup("missing").await.is_none());
    }

    #[tokio::test]
    async fn test_clear_drops_registrations() {
        let manager = PathManager::new(mappings());
        let transport = RegistrarOnly {
            next_id: AtomicU64::new(1),
            fail_path: None,
        };

        manager.register_paths(&transport, "agent-1").await.unwrap();
        manager.clear().await;
        assert_eq!(manager.registered_count().await, 0);
        assert!(manager.lookup("node").await.is_none());
    }

    #[tokio::test]
    async fn test_registration_failure_surfaces() {
        let manager = PathManager::new(mappings());
        let transport = RegistrarOnly {
            next_id: AtomicU64::new(1),
            fail_path: Some("app".to_string()),
        };

        let err = manager
            .register_paths(&transport, "agent-1")
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::InvalidResponse { .. }));
    }

    #[tokio::test]
    async fn test_plain_text_dump() {
        let manager = PathManager::new(mappings());
        let transport = RegistrarOnly {
            next_id: AtomicU64::new(7),
            fail_path: None,
        };
        manager.register_paths(&transport, "agent-1").await.unwrap();

        let text = manager.to_plain_text().await;
        assert!(text.contains("/node -> http://localhost:9100/metrics"));
        assert!(text.contains("/app -> http://localhost:8080/metrics"));
    }
}
