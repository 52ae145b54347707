//! Todo tool: an in-memory, advisory task list.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::Mutex;

use crate::message::ToolResult;
use crate::tools::Tool;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TodoStatus {
    Pending,
    InProgress,
    Completed,
}

impl TodoStatus {
    fn glyph(self) -> &'static str {
        match self {
            TodoStatus::Pending => "[ ]",
            TodoStatus::InProgress => "[~]",
            TodoStatus::Completed => "[x]",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TodoItem {
    pub content: String,
    pub status: TodoStatus,
    pub active_form: String,
}

/// Replaces the whole todo list with the model-supplied one. There is
/// deliberately no companion read tool — the CLI renders the list itself
/// from the shared state this tool mutates.
pub struct TodoWriteTool {
    items: Arc<Mutex<Vec<TodoItem>>>,
}

impl Default for TodoWriteTool {
    fn default() -> Self {
        Self::new()
    }
}

impl TodoWriteTool {
    pub fn new() -> Self {
        Self {
            items: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub async fn snapshot(&self) -> Vec<TodoItem> {
        self.items.lock().await.clone()
    }

    pub fn render(items: &[TodoItem]) -> String {
        items
            .iter()
            .map(|i| format!("{} {}", i.status.glyph(), i.content))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[async_trait]
impl Tool for TodoWriteTool {
    fn name(&self) -> &str {
        "TodoWrite"
    }

    fn description(&self) -> &str {
        "Creates and manages a structured task list for the current session"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "todos": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "content": {"type": "string"},
                            "status": {"type": "string", "enum": ["pending", "in_progress", "completed"]},
                            "active_form": {"type": "string"}
                        },
                        "required": ["content", "status", "active_form"]
                    }
                }
            },
            "required": ["todos"]
        })
    }

    async fn execute(&self, args: Value) -> ToolResult {
        let Some(raw_items) = args.get("todos") else {
            return ToolResult::err("Missing required parameter 'todos'");
        };
        let items: Vec<TodoItem> = match serde_json::from_value(raw_items.clone()) {
            Ok(items) => items,
            Err(e) => return ToolResult::err(format!("Invalid todos: {}", e)),
        };

        let rendered = Self::render(&items);
        *self.items.lock().await = items;
        ToolResult::ok(format!("Todo list updated:\n{}", rendered))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn replaces_the_whole_list() {
        let tool = TodoWriteTool::new();
        tool.execute(json!({"todos": [
            {"content": "write spec", "status": "completed", "active_form": "Writing spec"},
            {"content": "write code", "status": "in_progress", "active_form": "Writing code"}
        ]}))
        .await;
        let snapshot = tool.snapshot().await;
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[1].status, TodoStatus::InProgress);
    }
}
