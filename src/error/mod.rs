//! Error types for Parley.

pub mod unified;

pub use unified::{ErrorKind, RecoverySuggestion, Severity};

use thiserror::Error;

/// Primary error type for all Parley operations.
#[derive(Error, Debug)]
pub enum ParleyError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Config file error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Agent not found: {0}")]
    AgentNotFound(String),

    #[error("Agent already registered: {0}")]
    DuplicateAgent(String),

    #[error("Model provider error: {message}")]
    ModelProvider {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Interruption store error: {0}")]
    Store(String),
}

impl ParleyError {
    /// Create a model provider error from a message.
    pub fn provider(message: impl Into<String>) -> Self {
        Self::ModelProvider {
            message: message.into(),
            source: None,
        }
    }

    /// Create a model provider error wrapping an underlying cause.
    pub fn provider_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::ModelProvider {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, ParleyError>;
