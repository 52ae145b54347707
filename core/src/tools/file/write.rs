//! Write tool: creates parent directories, overwrites unconditionally.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::message::ToolResult;
use crate::tools::Tool;

use super::path::resolve_path;

pub struct WriteTool;

#[async_trait]
impl Tool for WriteTool {
    fn name(&self) -> &str {
        "Write"
    }

    fn description(&self) -> &str {
        "Writes a file to the local filesystem, creating parent directories if needed"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "Absolute or project-relative path to the file to write"},
                "file_path": {"type": "string", "description": "(Legacy) alias for path"},
                "content": {"type": "string", "description": "The content to write to the file"},
                "contents": {"type": "string", "description": "(Legacy) alias for content"}
            },
            "required": ["path", "content"]
        })
    }

    async fn execute(&self, args: Value) -> ToolResult {
        let target = args
            .get("path")
            .or_else(|| args.get("file_path"))
            .and_then(Value::as_str);
        let Some(target) = target else {
            return ToolResult::err("Missing required parameter 'path'");
        };
        let content = args
            .get("content")
            .or_else(|| args.get("contents"))
            .and_then(Value::as_str);
        let Some(content) = content else {
            return ToolResult::err("Missing required parameter 'content'");
        };

        let path = resolve_path(target);
        if let Some(parent) = path.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                return ToolResult::err(e.to_string());
            }
        }
        match std::fs::write(&path, content) {
            Ok(()) => ToolResult::ok(format!("File written successfully: {}", target)),
            Err(e) => ToolResult::err(e.to_string()),
        }
    }
}
