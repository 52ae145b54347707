//! VCS tool: a version-control subcommand run as a subprocess with a fixed
//! 30s timeout.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::message::ToolResult;
use crate::tools::Tool;

const VCS_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

pub struct VcsTool;

#[async_trait]
impl Tool for VcsTool {
    fn name(&self) -> &str {
        "Vcs"
    }

    fn description(&self) -> &str {
        "Runs a version-control (git) subcommand"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "subcommand": {"type": "string", "description": "The git subcommand, e.g. 'status', 'diff', 'log'"},
                "args": {"type": "array", "items": {"type": "string"}, "description": "Additional arguments"}
            },
            "required": ["subcommand"]
        })
    }

    async fn execute(&self, args: Value) -> ToolResult {
        let Some(subcommand) = args.get("subcommand").and_then(Value::as_str) else {
            return ToolResult::err("Missing required parameter 'subcommand'");
        };
        let extra_args: Vec<String> = args
            .get("args")
            .and_then(Value::as_array)
            .map(|a| a.iter().filter_map(|v| v.as_str().map(String::from)).collect())
            .unwrap_or_default();

        let mut command = tokio::process::Command::new("git");
        command.arg(subcommand).args(&extra_args);
        command.stdout(std::process::Stdio::piped());
        command.stderr(std::process::Stdio::piped());

        let child = match command.spawn() {
            Ok(c) => c,
            Err(e) => return ToolResult::err(e.to_string()),
        };

        match tokio::time::timeout(VCS_TIMEOUT, child.wait_with_output()).await {
            Ok(Ok(output)) => {
                let stdout = String::from_utf8_lossy(&output.stdout).to_string();
                let stderr = String::from_utf8_lossy(&output.stderr).to_string();
                if output.status.success() {
                    ToolResult::ok(if stdout.is_empty() { stderr } else { stdout })
                } else {
                    ToolResult::err(if stderr.is_empty() { stdout } else { stderr })
                }
            }
            Ok(Err(e)) => ToolResult::err(e.to_string()),
            Err(_) => ToolResult::err("git command timed out after 30s"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_subcommand_is_a_failure() {
        let tool = VcsTool;
        let result = tool.execute(json!({})).await;
        assert!(!result.ok);
    }
}
