//! Glob tool: files matching a pattern, sorted by mtime descending.

use std::time::SystemTime;

use async_trait::async_trait;
use serde_json::{json, Value};
use walkdir::WalkDir;

use crate::message::ToolResult;
use crate::tools::Tool;

use super::path::resolve_path;

pub struct GlobTool;

#[async_trait]
impl Tool for GlobTool {
    fn name(&self) -> &str {
        "Glob"
    }

    fn description(&self) -> &str {
        "Fast file pattern matching tool that finds files by glob patterns, sorted by most recently modified"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": {"type": "string", "description": "The glob pattern to match files against (e.g. '**/*.rs')"},
                "path": {"type": "string", "description": "The directory to search in (defaults to current directory)"},
                "recursive": {"type": "boolean", "description": "Search recursively (default true)"}
            },
            "required": ["pattern"]
        })
    }

    async fn execute(&self, args: Value) -> ToolResult {
        let Some(pattern_str) = args.get("pattern").and_then(Value::as_str) else {
            return ToolResult::err("Missing required parameter 'pattern'");
        };
        let search_root = args
            .get("path")
            .and_then(Value::as_str)
            .map(resolve_path)
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_default());
        let recursive = args.get("recursive").and_then(Value::as_bool).unwrap_or(true);

        if !search_root.exists() {
            return ToolResult::err(format!("Directory not found: {}", search_root.display()));
        }

        let pattern = match glob::Pattern::new(pattern_str) {
            Ok(p) => p,
            Err(e) => return ToolResult::err(format!("Invalid pattern: {}", e)),
        };

        let walker = if recursive {
            WalkDir::new(&search_root)
        } else {
            WalkDir::new(&search_root).max_depth(1)
        };

        let mut matches: Vec<(std::path::PathBuf, SystemTime)> = Vec::new();
        for entry in walker.into_iter().filter_map(Result::ok) {
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry.path().strip_prefix(&search_root).unwrap_or(entry.path());
            if !pattern.matches_path(relative) && !pattern.matches_path(entry.path()) {
                continue;
            }
            let modified = entry
                .metadata()
                .ok()
                .and_then(|m| m.modified().ok())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            matches.push((entry.into_path(), modified));
        }

        matches.sort_by(|a, b| b.1.cmp(&a.1));

        if matches.is_empty() {
            return ToolResult::ok("No files found");
        }
        let out: Vec<String> = matches.into_iter().map(|(p, _)| p.display().to_string()).collect();
        ToolResult::ok(out.join("\n"))
    }
}
