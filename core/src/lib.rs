//! # codinglm-core
//!
//! The conversation turn engine behind CodinGLM: an interactive terminal
//! coding assistant that brokers a streaming conversation between a human
//! developer and a large language model while giving the model tool access
//! to the local machine.
//!
//! This crate covers the hard engineering, not the terminal: a [`turn`]
//! controller that streams model output, dispatches model-requested tool
//! calls through a [`tools`] registry or a subprocess-backed [`plugin`]
//! manager, keeps the conversation under a token ceiling via the [`compress`]
//! module, and tolerates a mid-stream user [`interrupt`].
//!
//! ## Main modules
//!
//! - [`message`]: [`Role`], [`Message`], [`ToolCall`], [`ToolResult`],
//!   [`Conversation`] — the data model.
//! - [`token`]: cheap upper-bound token estimation.
//! - [`tools`]: the [`tools::Tool`] contract, [`tools::Registry`], and the
//!   built-in tool set (file ops, shell, version control, web fetch, todo,
//!   sub-agent).
//! - [`plugin`]: [`plugin::PluginManager`] — subprocess-backed external tool
//!   providers speaking JSON-RPC over stdio, namespaced `mcp::<server>::<tool>`.
//! - [`stream`]: [`stream::Decoder`] — parses an Anthropic-style event stream
//!   into typed [`stream::StreamChunk`]s, reassembling tool-call arguments.
//! - [`llm`]: [`llm::LlmClient`] trait and the concrete [`llm::AnthropicClient`].
//! - [`compress`]: [`compress::Compressor`] — threshold-triggered context
//!   summarisation with convergence and lifetime metrics.
//! - [`turn`]: [`turn::TurnController`] — the per-turn loop tying the above
//!   together.
//! - [`interrupt`]: [`interrupt::InterruptSource`] — a background ESC-key
//!   latch the Turn Controller polls between stream chunks.
//! - [`error`]: [`error::AgentError`], the unified error type.

pub mod compress;
pub mod error;
pub mod interrupt;
pub mod llm;
pub mod message;
pub mod plugin;
pub mod stream;
pub mod token;
pub mod tools;
pub mod turn;

pub use compress::{CompressionMetrics, CompressionOutcome, Compressor, CompressorConfig};
pub use error::{AgentError, AgentResult};
pub use interrupt::InterruptSource;
pub use llm::{AnthropicClient, CompletionResponse, LlmClient, ToolDefinition};
pub use message::{Conversation, Message, Role, ToolCall, ToolResult};
pub use plugin::{PluginConfig, PluginManager};
pub use stream::{Decoder, StreamChunk};
pub use tools::{Registry, Tool};
pub use turn::{ToolHistoryEntry, TurnController, TurnOutcome, TurnResult};
