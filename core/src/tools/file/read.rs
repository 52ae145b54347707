//! Read tool: file contents prefixed by 1-indexed line numbers.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::message::ToolResult;
use crate::tools::Tool;

use super::path::resolve_path;

const MAX_LINE_LENGTH: usize = 2000;

pub struct ReadTool;

#[async_trait]
impl Tool for ReadTool {
    fn name(&self) -> &str {
        "Read"
    }

    fn description(&self) -> &str {
        "Reads a file from the local filesystem with optional line offset and limit"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "Absolute or project-relative path to the file to read"},
                "file_path": {"type": "string", "description": "(Legacy) alias for path"},
                "offset": {"type": "number", "description": "1-indexed line number to start reading from"},
                "limit": {"type": "number", "description": "Number of lines to read"}
            },
            "required": ["path"]
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

        let path = resolve_path(target);
        if !path.exists() {
            return ToolResult::err(format!("File not found: {}", target));
        }
        if path.is_dir() {
            return ToolResult::err(format!("Path is a directory: {}", target));
        }

        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) => return ToolResult::err(e.to_string()),
        };

        let offset = args.get("offset").and_then(Value::as_u64).map(|n| n as usize);
        let limit = args.get("limit").and_then(Value::as_u64).map(|n| n as usize);

        let lines: Vec<&str> = content.lines().collect();
        let start_0based = offset.map(|o| o.saturating_sub(1)).unwrap_or(0).min(lines.len());
        let end = limit.map(|l| (start_0based + l).min(lines.len())).unwrap_or(lines.len());
        let selected = &lines[start_0based..end];

        let start_line_number = offset.unwrap_or(1);
        let mut out = Vec::with_capacity(selected.len());
        for (i, line) in selected.iter().enumerate() {
            let line_number = start_line_number + i;
            let rendered = if line.chars().count() > MAX_LINE_LENGTH {
                let truncated: String = line.chars().take(MAX_LINE_LENGTH).collect();
                format!("{}... [truncated]", truncated)
            } else {
                (*line).to_string()
            };
            out.push(format!("{:>6}\t{}", line_number, rendered));
        }

        ToolResult::ok(out.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reads_with_line_numbers() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.txt");
        std::fs::write(&file, "one\ntwo\nthree\n").unwrap();

        let tool = ReadTool;
        let result = tool
            .execute(json!({"path": file.to_str().unwrap()}))
            .await;
        assert!(result.ok);
        assert!(result.output.contains("     1\tone"));
        assert!(result.output.contains("     2\ttwo"));
    }

    #[tokio::test]
    async fn offset_and_limit_select_a_window() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.txt");
        std::fs::write(&file, "one\ntwo\nthree\nfour\n").unwrap();

        let tool = ReadTool;
        let result = tool
            .execute(json!({"path": file.to_str().unwrap(), "offset": 2, "limit": 1}))
            .await;
        assert!(result.ok);
        assert_eq!(result.output, "     2\ttwo");
    }

    #[tokio::test]
    async fn missing_file_is_a_failure() {
        let tool = ReadTool;
        let result = tool.execute(json!({"path": "/no/such/file"})).await;
        assert!(!result.ok);
    }

    #[tokio::test]
    async fn directory_is_a_failure() {
        let dir = tempfile::tempdir().unwrap();
        let tool = ReadTool;
        let result = tool
            .execute(json!({"path": dir.path().to_str().unwrap()}))
            .await;
        assert!(!result.ok);
    }
}
