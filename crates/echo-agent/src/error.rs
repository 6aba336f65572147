//! Error types for the edge agent.

use echo_cache::CacheError;
use echo_net::NetError;
use echo_outbox::OutboxError;
use thiserror::Error;

/// Result type alias for agent operations.
pub type AgentResult<T> = Result<T, AgentError>;

/// Errors that can occur inside the agent.
///
/// None of these reach a page as a failed fetch: the fetch executor turns
/// them into a cached fallback or the synthetic offline response.
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Outbox error: {0}")]
    Outbox(#[from] OutboxError),

    #[error("Network error: {0}")]
    Network(#[from] NetError),

    #[error("Install failed at {url}: {reason}")]
    InstallFailed { url: String, reason: String },

    #[error("Delivery rejected with status {0}")]
    Delivery(u16),

    #[error("Not cached: {0}")]
    NotCached(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Client error: {0}")]
    Client(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AgentError {
    /// Create a new client error
    pub fn client(msg: impl Into<String>) -> Self {
        Self::Client(msg.into())
    }

    /// Create a new invalid-state error
    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    /// Get the error category for logging.
    pub fn category(&self) -> &'static str {
        match self {
            AgentError::Cache(_) => "cache",
            AgentError::Outbox(_) => "outbox",
            AgentError::Network(_) => "network",
            AgentError::InstallFailed { .. } => "install",
            AgentError::Delivery(_) => "delivery",
            AgentError::NotCached(_) => "not_cached",
            AgentError::InvalidState(_) => "invalid_state",
            AgentError::Client(_) => "client",
            AgentError::Config(_) => "config",
            AgentError::Url(_) => "url",
            AgentError::Io(_) => "io",
        }
    }
}
