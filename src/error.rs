//! Error types for the agent and its proxy transport.

use tracing::Level;

/// Errors surfaced by a connection attempt or one of its duty cycles.
///
/// Every variant is recoverable: the reconnect loop classifies, logs, and
/// retries. Nothing here terminates the process.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    /// The proxy could not be reached mid-attempt (refused, timed out).
    /// The pre-open connect probe reports false instead of raising this.
    #[error("connect failed: {reason}")]
    ConnectFailed { reason: String },

    /// The proxy rejected the registration or returned a malformed
    /// registration response.
    #[error("invalid response from proxy: {reason}")]
    InvalidResponse { reason: String },

    /// Either side closed the stream. Expected during proxy restarts and
    /// not treated as an error-level event.
    #[error("disconnected from proxy")]
    Disconnected,

    /// Transport-layer error carrying a status code (unreachable,
    /// unauthenticated, ...).
    #[error("transport status {code}: {message}")]
    Status { code: u16, message: String },

    /// Anything else raised by a duty cycle. Kept recoverable so the
    /// retry loop never exits on an unanticipated failure.
    #[error("{0}")]
    Unclassified(String),
}

impl AgentError {
    /// Map a reqwest failure into the transport taxonomy.
    pub fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() {
            AgentError::ConnectFailed {
                reason: err.to_string(),
            }
        } else if let Some(status) = err.status() {
            AgentError::Status {
                code: status.as_u16(),
                message: err.to_string(),
            }
        } else if err.is_body() || err.is_decode() {
            // Mid-stream body errors mean the proxy went away.
            AgentError::Disconnected
        } else {
            AgentError::Unclassified(err.to_string())
        }
    }

    /// Log level the reconnect loop uses for this error kind.
    ///
    /// Disconnects and invalid responses are routine (info); connect
    /// failures raised mid-attempt, status errors, and unclassified
    /// errors deserve a warning.
    pub fn log_level(&self) -> Level {
        match self {
            AgentError::InvalidResponse { .. } | AgentError::Disconnected => Level::INFO,
            AgentError::ConnectFailed { .. }
            | AgentError::Status { .. }
            | AgentError::Unclassified(_) => Level::WARN,
        }
    }

    /// Log this attempt outcome the way the reconnect loop reports it.
    pub fn log_for_reconnect(&self, proxy_host: &str) {
        match self {
            AgentError::InvalidResponse { reason } => {
                tracing::info!(
                    "Disconnected from proxy at {} after invalid response: {}",
                    proxy_host,
                    reason
                );
            }
            AgentError::Disconnected => {
                tracing::info!("Disconnected from proxy at {}", proxy_host);
            }
            AgentError::ConnectFailed { reason } => {
                tracing::warn!("Cannot connect to proxy at {}: {}", proxy_host, reason);
            }
            AgentError::Status { code, message } => {
                tracing::warn!(
                    "Transport error from proxy at {}: {} {}",
                    proxy_host,
                    code,
                    message
                );
            }
            AgentError::Unclassified(message) => {
                tracing::warn!("Error caught in connection cycle: {}", message);
            }
        }
    }
}

/// Result type for agent operations.
pub type Result<T> = std::result::Result<T, AgentError>;
