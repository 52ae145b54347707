//! Shell tool: synchronous commands plus background jobs.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Mutex;

use crate::message::ToolResult;
use crate::tools::Tool;

const MAX_TIMEOUT_MS: u64 = 600_000;
const DEFAULT_TIMEOUT_MS: u64 = 120_000;
const OUTPUT_TRUNCATE_CHARS: usize = 30_000;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum JobState {
    Running,
    Done,
}

struct BackgroundJob {
    state: JobState,
    stdout: String,
    stderr: String,
    exit_code: Option<i32>,
    error: Option<String>,
    task: Option<tokio::task::JoinHandle<()>>,
}

/// Shared job table backing [`ShellTool`], [`GetJobOutputTool`] and
/// [`KillJobTool`].
#[derive(Clone, Default)]
struct JobTable {
    jobs: Arc<Mutex<HashMap<String, BackgroundJob>>>,
}

fn truncate_output(mut output: String) -> String {
    if output.chars().count() > OUTPUT_TRUNCATE_CHARS {
        output = output.chars().take(OUTPUT_TRUNCATE_CHARS).collect();
        output.push_str("\n... [output truncated]");
    }
    output
}

pub struct ShellTool {
    jobs: JobTable,
}

impl Default for ShellTool {
    fn default() -> Self {
        Self::new()
    }
}

impl ShellTool {
    pub fn new() -> Self {
        Self {
            jobs: JobTable::default(),
        }
    }

    pub fn job_output_tool(&self) -> GetJobOutputTool {
        GetJobOutputTool {
            jobs: self.jobs.clone(),
        }
    }

    pub fn kill_job_tool(&self) -> KillJobTool {
        KillJobTool {
            jobs: self.jobs.clone(),
        }
    }
}

#[async_trait]
impl Tool for ShellTool {
    fn name(&self) -> &str {
        "Shell"
    }

    fn description(&self) -> &str {
        "Executes a shell command, synchronously or as a background job"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {"type": "string", "description": "The command to execute"},
                "timeout": {"type": "number", "description": "Timeout in milliseconds (max 600000)"},
                "run_in_background": {"type": "boolean", "description": "Run the command as a background job"}
            },
            "required": ["command"]
        })
    }

    async fn execute(&self, args: Value) -> ToolResult {
        let Some(command) = args.get("command").and_then(Value::as_str) else {
            return ToolResult::err("Missing required parameter 'command'");
        };
        let timeout_ms = args
            .get("timeout")
            .and_then(Value::as_u64)
            .unwrap_or(DEFAULT_TIMEOUT_MS)
            .min(MAX_TIMEOUT_MS);
        let background = args
            .get("run_in_background")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        if background {
            let job_id = uuid::Uuid::new_v4().to_string()[..8].to_string();
            self.jobs.jobs.lock().await.insert(
                job_id.clone(),
                BackgroundJob {
                    state: JobState::Running,
                    stdout: String::new(),
                    stderr: String::new(),
                    exit_code: None,
                    error: None,
                    task: None,
                },
            );

            let jobs = self.jobs.jobs.clone();
            let command = command.to_string();
            let job_id_for_task = job_id.clone();
            let task = tokio::spawn(async move {
                let outcome = run_command(&command, timeout_ms).await;
                let mut jobs = jobs.lock().await;
                if let Some(job) = jobs.get_mut(&job_id_for_task) {
                    job.state = JobState::Done;
                    match outcome {
                        Ok((stdout, stderr, code)) => {
                            job.stdout = stdout;
                            job.stderr = stderr;
                            job.exit_code = Some(code);
                        }
                        Err(e) => job.error = Some(e),
                    }
                }
            });
            if let Some(job) = self.jobs.jobs.lock().await.get_mut(&job_id) {
                job.task = Some(task);
            }

            return ToolResult::ok(format!(
                "Background job started: {}\nCommand: {}",
                job_id, command
            ));
        }

        match run_command(command, timeout_ms).await {
            Ok((stdout, stderr, code)) => {
                let mut combined = stdout;
                if !stderr.is_empty() {
                    if !combined.is_empty() {
                        combined.push('\n');
                    }
                    combined.push_str(&stderr);
                }
                let combined = truncate_output(combined);
                if code == 0 {
                    ToolResult::ok(if combined.trim().is_empty() {
                        "Tool ran without output or errors".to_string()
                    } else {
                        combined.trim().to_string()
                    })
                } else {
                    ToolResult {
                        ok: false,
                        output: combined.trim().to_string(),
                        error: Some(format!("Exit code: {}", code)),
                    }
                }
            }
            Err(e) => ToolResult::err(e),
        }
    }
}

async fn run_command(command: &str, timeout_ms: u64) -> Result<(String, String, i32), String> {
    let mut child = tokio::process::Command::new("sh")
        .arg("-c")
        .arg(command)
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| e.to_string())?;

    let timeout = std::time::Duration::from_millis(timeout_ms);
    let output = tokio::time::timeout(timeout, child.wait_with_output()).await;

    match output {
        Ok(Ok(output)) => Ok((
            String::from_utf8_lossy(&output.stdout).to_string(),
            String::from_utf8_lossy(&output.stderr).to_string(),
            output.status.code().unwrap_or(-1),
        )),
        Ok(Err(e)) => Err(e.to_string()),
        Err(_) => Err(format!("Command timed out after {}ms", timeout_ms)),
    }
}

/// Polls a background job's output; optionally filters lines by regex.
pub struct GetJobOutputTool {
    jobs: JobTable,
}

#[async_trait]
impl Tool for GetJobOutputTool {
    fn name(&self) -> &str {
        "GetJobOutput"
    }

    fn description(&self) -> &str {
        "Gets the current output of a background shell job"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "id": {"type": "string", "description": "The background job id"},
                "filter_regex": {"type": "string", "description": "Optional regex to filter output lines"}
            },
            "required": ["id"]
        })
    }

    async fn execute(&self, args: Value) -> ToolResult {
        let Some(id) = args.get("id").and_then(Value::as_str) else {
            return ToolResult::err("Missing required parameter 'id'");
        };
        let jobs = self.jobs.jobs.lock().await;
        let Some(job) = jobs.get(id) else {
            return ToolResult::err(format!("Job not found: {}", id));
        };

        let mut output = format!("{}{}", job.stdout, job.stderr);
        if let Some(pattern) = args.get("filter_regex").and_then(Value::as_str) {
            match regex::Regex::new(pattern) {
                Ok(re) => {
                    output = output
                        .lines()
                        .filter(|l| re.is_match(l))
                        .collect::<Vec<_>>()
                        .join("\n");
                }
                Err(e) => return ToolResult::err(format!("Invalid filter_regex: {}", e)),
            }
        }

        let state = match job.state {
            JobState::Running => "running",
            JobState::Done => "done",
        };
        let mut summary = format!("State: {}\n", state);
        if let Some(code) = job.exit_code {
            summary.push_str(&format!("Exit code: {}\n", code));
        }
        if let Some(error) = &job.error {
            summary.push_str(&format!("Error: {}\n", error));
        }
        summary.push_str(&output);
        ToolResult::ok(summary)
    }
}

/// Kills a running background job.
pub struct KillJobTool {
    jobs: JobTable,
}

#[async_trait]
impl Tool for KillJobTool {
    fn name(&self) -> &str {
        "KillJob"
    }

    fn description(&self) -> &str {
        "Terminates a running background shell job"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "id": {"type": "string", "description": "The background job id"}
            },
            "required": ["id"]
        })
    }

    async fn execute(&self, args: Value) -> ToolResult {
        let Some(id) = args.get("id").and_then(Value::as_str) else {
            return ToolResult::err("Missing required parameter 'id'");
        };
        let mut jobs = self.jobs.jobs.lock().await;
        let Some(job) = jobs.get_mut(id) else {
            return ToolResult::err(format!("Job not found: {}", id));
        };
        if job.state == JobState::Running {
            if let Some(task) = job.task.take() {
                task.abort();
            }
        }
        job.state = JobState::Done;
        job.error = Some("killed by user".to_string());
        ToolResult::ok(format!("Job {} killed", id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn runs_a_synchronous_command() {
        let tool = ShellTool::new();
        let result = tool.execute(json!({"command": "echo hello"})).await;
        assert!(result.ok);
        assert_eq!(result.output, "hello");
    }

    #[tokio::test]
    async fn nonzero_exit_code_is_a_failure() {
        let tool = ShellTool::new();
        let result = tool.execute(json!({"command": "exit 7"})).await;
        assert!(!result.ok);
        assert_eq!(result.error.as_deref(), Some("Exit code: 7"));
    }

    #[tokio::test]
    async fn kill_job_stops_a_running_job() {
        let tool = ShellTool::new();
        let job_tool = tool.job_output_tool();
        let kill_tool = tool.kill_job_tool();
        let start = tool
            .execute(json!({"command": "sleep 30", "run_in_background": true}))
            .await;
        let job_id = start.output.lines().next().unwrap().rsplit(' ').next().unwrap();

        // Give the task time to actually spawn the child before killing it.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        let killed = kill_tool.execute(json!({"id": job_id})).await;
        assert!(killed.ok);

        let polled = job_tool.execute(json!({"id": job_id})).await;
        assert!(polled.output.contains("done"));
        assert!(polled.output.contains("killed by user"));
    }

    #[tokio::test]
    async fn background_job_can_be_polled() {
        let tool = ShellTool::new();
        let job_tool = tool.job_output_tool();
        let start = tool
            .execute(json!({"command": "echo bg", "run_in_background": true}))
            .await;
        assert!(start.ok);
        let job_id = start.output.lines().next().unwrap().rsplit(' ').next().unwrap();

        for _ in 0..50 {
            let polled = job_tool.execute(json!({"id": job_id})).await;
            if polled.output.contains("done") {
                assert!(polled.output.contains("bg"));
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        panic!("background job never completed");
    }
}
