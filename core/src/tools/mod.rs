//! Tool Contract & Registry (C2, C3).

pub mod file;
mod shell;
mod sub_agent;
mod todo;
mod vcs;
mod web_fetch;

pub use shell::{GetJobOutputTool, KillJobTool, ShellTool};
pub use sub_agent::SubAgentTool;
pub use todo::{TodoItem, TodoStatus, TodoWriteTool};
pub use vcs::VcsTool;
pub use web_fetch::WebFetchTool;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::message::ToolResult;

/// Common shape for every built-in and plugin-backed tool.
///
/// `execute` must never raise across the registry boundary: internal
/// failures are converted to `ToolResult::err` inside the implementation.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique name within the registry. Plugin-provided tools are
    /// namespaced `mcp::<server>::<tool>` by the plugin manager, not here.
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON schema describing the tool's parameters, used both for model
    /// prompting and CLI introspection.
    fn parameters_schema(&self) -> Value;

    async fn execute(&self, args: Value) -> ToolResult;
}

/// Name -> tool map with JSON argument decoding and dispatch.
#[derive(Default)]
pub struct Registry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    pub fn specs(&self) -> Vec<(String, String, Value)> {
        self.tools
            .values()
            .map(|t| {
                (
                    t.name().to_string(),
                    t.description().to_string(),
                    t.parameters_schema(),
                )
            })
            .collect()
    }

    /// Decodes `arguments` as JSON (empty string ⇒ `{}`) and dispatches.
    pub async fn execute(&self, name: &str, arguments: &str) -> ToolResult {
        let tool = match self.tools.get(name) {
            Some(t) => t.clone(),
            None => return ToolResult::err(format!("Tool '{}' not found", name)),
        };

        let args: Value = if arguments.trim().is_empty() {
            Value::Object(Default::default())
        } else {
            match serde_json::from_str(arguments) {
                Ok(v) => v,
                Err(e) => {
                    return ToolResult::err(format!("Invalid JSON arguments: {}", e));
                }
            }
        };

        tool.execute(args).await
    }
}
