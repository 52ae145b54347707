//! Hand-rolled JSON-RPC 2.0 over a child process's stdio. Reimplements the
//! narrow slice of the MCP wire contract the core needs (`initialize`,
//! `list_tools`, `call_tool`) without pulling in an external MCP crate,
//! grounded in the teacher's `McpSession` spawn/handshake/correlate pattern.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;

use super::PluginConfig;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const INITIALIZE_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Clone, Debug, Deserialize)]
pub struct PluginToolSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_schema", rename = "input_schema")]
    pub input_schema: Value,
}

fn default_schema() -> Value {
    json!({"type": "object"})
}

#[derive(Debug, thiserror::Error)]
pub enum PluginSessionError {
    #[error("failed to spawn plugin process: {0}")]
    Spawn(String),
    #[error("plugin transport error: {0}")]
    Transport(String),
    #[error("plugin handshake timed out")]
    HandshakeTimeout,
    #[error("plugin rpc error: {0}")]
    Rpc(String),
    #[error("plugin response malformed: {0}")]
    Malformed(String),
}

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<Value>>>>;

/// A live connection to one plugin child process: owns its stdin handle and
/// the background task draining stdout and routing responses by request id.
pub struct PluginSession {
    child: Child,
    stdin: ChildStdin,
    next_id: AtomicU64,
    pending: PendingMap,
    reader_task: JoinHandle<()>,
}

impl PluginSession {
    /// Spawns the child with `{command, args, env}` (the child inherits the
    /// parent's environment plus `env`'s overrides), then completes the
    /// `initialize` / `initialized` handshake.
    pub async fn spawn(config: &PluginConfig) -> Result<Self, PluginSessionError> {
        let mut command = tokio::process::Command::new(&config.command);
        command
            .args(&config.args)
            .envs(&config.env)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::null());

        let mut child = command
            .spawn()
            .map_err(|e| PluginSessionError::Spawn(e.to_string()))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| PluginSessionError::Spawn("no stdin handle".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| PluginSessionError::Spawn("no stdout handle".to_string()))?;

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let reader_pending = pending.clone();
        let reader_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        let Ok(value) = serde_json::from_str::<Value>(&line) else {
                            continue;
                        };
                        let Some(id) = value.get("id").and_then(Value::as_u64) else {
                            continue;
                        };
                        let mut pending = reader_pending.lock().await;
                        if let Some(sender) = pending.remove(&id) {
                            let _ = sender.send(value);
                        }
                    }
                    Ok(None) | Err(_) => break,
                }
            }
        });

        let mut session = Self {
            child,
            stdin,
            next_id: AtomicU64::new(1),
            pending,
            reader_task,
        };

        session.initialize().await?;
        Ok(session)
    }

    async fn initialize(&mut self) -> Result<(), PluginSessionError> {
        let params = json!({
            "protocolVersion": "2025-06-18",
            "clientInfo": {"name": "codinglm", "version": env!("CARGO_PKG_VERSION")},
        });
        let result = self
            .call("initialize", params, INITIALIZE_TIMEOUT)
            .await?;
        if let Some(error) = result.get("error") {
            return Err(PluginSessionError::Rpc(
                error.get("message").and_then(Value::as_str).unwrap_or("initialize failed").to_string(),
            ));
        }
        self.notify("initialized", json!({})).await
    }

    pub async fn list_tools(&mut self) -> Result<Vec<PluginToolSpec>, PluginSessionError> {
        let response = self.call("list_tools", json!({}), REQUEST_TIMEOUT).await?;
        let result = extract_result(&response)?;
        let tools = result
            .get("tools")
            .cloned()
            .unwrap_or_else(|| Value::Array(vec![]));
        serde_json::from_value(tools).map_err(|e| PluginSessionError::Malformed(e.to_string()))
    }

    pub async fn call_tool(&mut self, tool: &str, arguments: Value) -> Result<String, PluginSessionError> {
        let params = json!({"name": tool, "arguments": arguments});
        let response = self.call("call_tool", params, REQUEST_TIMEOUT).await?;
        let result = extract_result(&response)?;
        let content = result
            .get("content")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let text = content
            .iter()
            .filter_map(|block| block.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("");
        Ok(text)
    }

    async fn call(&mut self, method: &str, params: Value, timeout: Duration) -> Result<Value, PluginSessionError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        let request = json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params});
        self.write_line(&request).await?;

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) => Err(PluginSessionError::Transport("response channel closed".to_string())),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(PluginSessionError::HandshakeTimeout)
            }
        }
    }

    async fn notify(&mut self, method: &str, params: Value) -> Result<(), PluginSessionError> {
        let notification = json!({"jsonrpc": "2.0", "method": method, "params": params});
        self.write_line(&notification).await
    }

    async fn write_line(&mut self, value: &Value) -> Result<(), PluginSessionError> {
        let mut line = value.to_string();
        line.push('\n');
        self.stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| PluginSessionError::Transport(e.to_string()))
    }

    /// Kills the child and reclaims the reader task; leaves no dangling
    /// process or task.
    pub async fn shutdown(&mut self) {
        let _ = self.child.start_kill();
        let _ = self.child.wait().await;
        self.reader_task.abort();
    }
}

fn extract_result(response: &Value) -> Result<Value, PluginSessionError> {
    if let Some(error) = response.get("error") {
        return Err(PluginSessionError::Rpc(
            error.get("message").and_then(Value::as_str).unwrap_or("rpc error").to_string(),
        ));
    }
    response
        .get("result")
        .cloned()
        .ok_or_else(|| PluginSessionError::Malformed("response carries neither result nor error".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A tiny in-process stand-in for a well-behaved MCP server: reads one
    /// JSON-RPC request per line from stdin, writes a matching response.
    fn fake_server_script() -> String {
        "while IFS= read -r line; do \
            id=$(printf '%s' \"$line\" | sed -n 's/.*\"id\":\\([0-9]*\\).*/\\1/p'); \
            method=$(printf '%s' \"$line\" | sed -n 's/.*\"method\":\"\\([a-z_]*\\)\".*/\\1/p'); \
            if [ \"$method\" = \"initialize\" ]; then \
                printf '{\"jsonrpc\":\"2.0\",\"id\":%s,\"result\":{}}\\n' \"$id\"; \
            elif [ \"$method\" = \"list_tools\" ]; then \
                printf '{\"jsonrpc\":\"2.0\",\"id\":%s,\"result\":{\"tools\":[{\"name\":\"echo\",\"description\":\"echoes\",\"input_schema\":{\"type\":\"object\"}}]}}\\n' \"$id\"; \
            elif [ \"$method\" = \"call_tool\" ]; then \
                printf '{\"jsonrpc\":\"2.0\",\"id\":%s,\"result\":{\"content\":[{\"type\":\"text\",\"text\":\"ok\"}]}}\\n' \"$id\"; \
            fi; \
        done"
            .to_string()
    }

    #[tokio::test]
    async fn full_handshake_list_and_call_round_trip() {
        let config = PluginConfig {
            command: "sh".to_string(),
            args: vec!["-c".to_string(), fake_server_script()],
            env: HashMap::new(),
        };

        let mut session = PluginSession::spawn(&config).await.expect("session spawns");
        let tools = session.list_tools().await.expect("lists tools");
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "echo");

        let text = session.call_tool("echo", json!({"x": 1})).await.expect("calls tool");
        assert_eq!(text, "ok");

        session.shutdown().await;
    }

    #[tokio::test]
    async fn spawning_a_missing_binary_fails_cleanly() {
        let config = PluginConfig {
            command: "/no/such/binary-xyz".to_string(),
            args: vec![],
            env: HashMap::new(),
        };
        let result = PluginSession::spawn(&config).await;
        assert!(result.is_err());
    }
}
