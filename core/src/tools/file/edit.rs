//! Edit tool: exact-string replacement.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::message::ToolResult;
use crate::tools::Tool;

use super::path::resolve_path;

pub struct EditTool;

#[async_trait]
impl Tool for EditTool {
    fn name(&self) -> &str {
        "Edit"
    }

    fn description(&self) -> &str {
        "Performs exact string replacements in files"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {"type": "string", "description": "Absolute or project-relative path to the file to modify"},
                "file_path": {"type": "string", "description": "(Legacy) alias for path"},
                "old_string": {"type": "string", "description": "The text to replace"},
                "new_string": {"type": "string", "description": "The text to replace it with"},
                "replace_all": {"type": "boolean", "description": "Replace all occurrences (default false)", "default": false}
            },
            "required": ["path", "old_string", "new_string"]
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
        let Some(old) = args.get("old_string").and_then(Value::as_str) else {
            return ToolResult::err("Missing required parameter 'old_string'");
        };
        let Some(new) = args.get("new_string").and_then(Value::as_str) else {
            return ToolResult::err("Missing required parameter 'new_string'");
        };
        let replace_all = args
            .get("replace_all")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        let path = resolve_path(target);
        if !path.exists() {
            return ToolResult::err(format!("File not found: {}", target));
        }
        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) => return ToolResult::err(e.to_string()),
        };

        let occurrences = content.matches(old).count();
        if occurrences == 0 {
            let preview: String = old.chars().take(100).collect();
            return ToolResult::err(format!("String not found in file: {}...", preview));
        }
        if !replace_all && occurrences > 1 {
            return ToolResult::err(format!(
                "String appears {} times. Use replace_all=true or provide more context.",
                occurrences
            ));
        }

        let new_content = if replace_all {
            content.replace(old, new)
        } else {
            content.replacen(old, new, 1)
        };

        if let Err(e) = std::fs::write(&path, &new_content) {
            return ToolResult::err(e.to_string());
        }

        let replaced = if replace_all { occurrences } else { 1 };
        ToolResult::ok(format!(
            "Replaced {} occurrence(s) in {}",
            replaced, target
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn replaces_a_unique_occurrence() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.txt");
        std::fs::write(&file, "hello world").unwrap();

        let tool = EditTool;
        let result = tool
            .execute(json!({"path": file.to_str().unwrap(), "old_string": "world", "new_string": "rust"}))
            .await;
        assert!(result.ok);
        assert_eq!(std::fs::read_to_string(&file).unwrap(), "hello rust");
    }

    #[tokio::test]
    async fn fails_when_old_string_absent() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.txt");
        std::fs::write(&file, "hello world").unwrap();

        let tool = EditTool;
        let result = tool
            .execute(json!({"path": file.to_str().unwrap(), "old_string": "nope", "new_string": "x"}))
            .await;
        assert!(!result.ok);
    }

    #[tokio::test]
    async fn fails_on_ambiguous_match_without_replace_all() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.txt");
        std::fs::write(&file, "foo foo foo").unwrap();

        let tool = EditTool;
        let result = tool
            .execute(json!({"path": file.to_str().unwrap(), "old_string": "foo", "new_string": "bar"}))
            .await;
        assert!(!result.ok);
        assert!(result.error.unwrap().contains("3 times"));
    }

    #[tokio::test]
    async fn replace_all_replaces_every_occurrence() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.txt");
        std::fs::write(&file, "foo foo foo").unwrap();

        let tool = EditTool;
        let result = tool
            .execute(json!({"path": file.to_str().unwrap(), "old_string": "foo", "new_string": "bar", "replace_all": true}))
            .await;
        assert!(result.ok);
        assert_eq!(std::fs::read_to_string(&file).unwrap(), "bar bar bar");
    }

    #[tokio::test]
    async fn edit_then_reverse_edit_restores_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.txt");
        std::fs::write(&file, "alpha beta gamma").unwrap();

        let tool = EditTool;
        tool.execute(json!({"path": file.to_str().unwrap(), "old_string": "beta", "new_string": "BETA"}))
            .await;
        tool.execute(json!({"path": file.to_str().unwrap(), "old_string": "BETA", "new_string": "beta"}))
            .await;
        assert_eq!(std::fs::read_to_string(&file).unwrap(), "alpha beta gamma");
    }
}
