//! Unified error type for the conversation turn engine.

use thiserror::Error;

/// Conceptual error kinds from the turn engine's contract with callers.
///
/// Tool-level failures never surface here — they are converted to a
/// [`crate::message::ToolResult`] at the tool boundary, per the registry's
/// "never raise across the boundary" rule.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("stream decode error: {0}")]
    Decode(String),

    #[error("plugin error: {0}")]
    Plugin(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type AgentResult<T> = Result<T, AgentError>;
