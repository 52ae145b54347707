//! Grep tool: regex search over files, three output modes.

use async_trait::async_trait;
use grep_regex::RegexMatcherBuilder;
use grep_searcher::sinks::UTF8;
use grep_searcher::SearcherBuilder;
use ignore::WalkBuilder;
use serde_json::{json, Value};

use crate::message::ToolResult;
use crate::tools::Tool;

use super::path::resolve_path;

pub struct GrepTool;

#[async_trait]
impl Tool for GrepTool {
    fn name(&self) -> &str {
        "Grep"
    }

    fn description(&self) -> &str {
        "Search for text patterns in files"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": {"type": "string", "description": "The regular expression pattern to search for"},
                "path": {"type": "string", "description": "File or directory to search in (defaults to current directory)"},
                "glob": {"type": "string", "description": "Glob pattern to filter files (e.g. '*.rs')"},
                "output_mode": {"type": "string", "enum": ["files_with_matches", "content", "count"], "description": "Output mode (default files_with_matches)"},
                "case_insensitive": {"type": "boolean", "description": "Case insensitive search"},
                "context_lines": {"type": "number", "description": "Lines of context to show (content mode only)"}
            },
            "required": ["pattern"]
        })
    }

    async fn execute(&self, args: Value) -> ToolResult {
        let Some(pattern) = args.get("pattern").and_then(Value::as_str) else {
            return ToolResult::err("Missing required parameter 'pattern'");
        };
        let search_root = args
            .get("path")
            .and_then(Value::as_str)
            .map(resolve_path)
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_default());
        let glob_filter = args.get("glob").and_then(Value::as_str);
        let output_mode = args
            .get("output_mode")
            .and_then(Value::as_str)
            .unwrap_or("files_with_matches");
        let case_insensitive = args
            .get("case_insensitive")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let context_lines = args
            .get("context_lines")
            .and_then(Value::as_u64)
            .unwrap_or(0) as usize;

        let matcher = match RegexMatcherBuilder::new()
            .case_insensitive(case_insensitive)
            .build(pattern)
        {
            Ok(m) => m,
            Err(e) => return ToolResult::err(format!("Invalid pattern: {}", e)),
        };

        let glob_matcher: Option<glob::Pattern> = match glob_filter.map(glob::Pattern::new) {
            Some(Ok(p)) => Some(p),
            Some(Err(e)) => return ToolResult::err(format!("Invalid glob: {}", e)),
            None => None,
        };

        let mut files_with_matches: Vec<String> = Vec::new();
        let mut content_lines: Vec<String> = Vec::new();
        let mut counts_by_file: Vec<(String, u64)> = Vec::new();

        for entry in WalkBuilder::new(&search_root).hidden(false).build() {
            let entry = match entry {
                Ok(e) => e,
                Err(_) => continue,
            };
            if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                continue;
            }
            if let Some(g) = &glob_matcher {
                let relative = entry.path().strip_prefix(&search_root).unwrap_or(entry.path());
                if !g.matches_path(relative) && !g.matches_path(entry.path()) {
                    continue;
                }
            }

            let mut searcher = SearcherBuilder::new()
                .before_context(context_lines)
                .after_context(context_lines)
                .build();

            let mut file_count: u64 = 0;
            let path = entry.path().to_path_buf();
            let search_result = searcher.search_path(
                &matcher,
                &path,
                UTF8(|lineno, line| {
                    file_count += 1;
                    if output_mode == "content" {
                        content_lines.push(format!("{}:{}:{}", path.display(), lineno, line.trim_end()));
                    }
                    Ok(true)
                }),
            );
            if search_result.is_err() {
                continue;
            }
            if file_count > 0 {
                files_with_matches.push(path.display().to_string());
                counts_by_file.push((path.display().to_string(), file_count));
            }
        }

        let output = match output_mode {
            "content" => content_lines.join("\n"),
            "count" => counts_by_file
                .iter()
                .map(|(f, count)| format!("{}:{}", f, count))
                .collect::<Vec<_>>()
                .join("\n"),
            _ => files_with_matches.join("\n"),
        };

        if output.is_empty() {
            ToolResult::ok("No matches found")
        } else {
            ToolResult::ok(output)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn finds_matching_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "hello world\n").unwrap();
        std::fs::write(dir.path().join("b.txt"), "goodbye\n").unwrap();

        let tool = GrepTool;
        let result = tool
            .execute(json!({"pattern": "hello", "path": dir.path().to_str().unwrap()}))
            .await;
        assert!(result.ok);
        assert!(result.output.contains("a.txt"));
        assert!(!result.output.contains("b.txt"));
    }

    #[tokio::test]
    async fn no_matches_is_ok_with_sentinel() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "nothing here\n").unwrap();

        let tool = GrepTool;
        let result = tool
            .execute(json!({"pattern": "zzz_not_present", "path": dir.path().to_str().unwrap()}))
            .await;
        assert!(result.ok);
        assert_eq!(result.output, "No matches found");
    }

    #[tokio::test]
    async fn count_mode_reports_per_file_match_counts() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "foo\nfoo\nbar\n").unwrap();

        let tool = GrepTool;
        let result = tool
            .execute(json!({"pattern": "foo", "path": dir.path().to_str().unwrap(), "output_mode": "count"}))
            .await;
        assert!(result.ok);
        assert!(result.output.contains("a.txt:2"));
    }

    #[tokio::test]
    async fn content_mode_includes_line_numbers() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "line one\nline two\n").unwrap();

        let tool = GrepTool;
        let result = tool
            .execute(json!({"pattern": "two", "path": dir.path().to_str().unwrap(), "output_mode": "content"}))
            .await;
        assert!(result.ok);
        assert!(result.output.contains(":2:"));
    }
}
