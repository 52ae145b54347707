//! Interactive REPL loop: read a line from stdin, either run it as a slash
//! command or hand it to the Turn Controller as a user turn, print the
//! result, repeat until EOF or `/exit`/`/quit`.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};

use codinglm_core::{
    AnthropicClient, Compressor, Conversation, InterruptSource, Message, PluginManager, Registry,
    ToolHistoryEntry, TurnController, TurnOutcome,
};

use crate::transcript::Transcript;

const TOOL_HISTORY_CAPACITY: usize = 20;
const KNOWN_MODELS: &[&str] = &["glm-4.6", "glm-4.5", "glm-4.5-air", "glm-4.5-flash"];

/// Owns everything that changes turn-to-turn: the conversation, the
/// compressor's pass counter and lifetime metrics, the current model
/// selection, and the bounded tool-output ring the `/toolout` command reads.
pub struct App {
    conversation: Conversation,
    compressor: Compressor,
    registry: Arc<Registry>,
    plugins: Arc<PluginManager>,
    llm: AnthropicClient,
    max_tool_iterations: Option<u32>,
    tool_history: VecDeque<ToolHistoryEntry>,
    transcript: Transcript,
    interrupt: InterruptSource,
}

impl App {
    pub fn new(
        system_prompt: impl Into<String>,
        compressor: Compressor,
        registry: Arc<Registry>,
        plugins: Arc<PluginManager>,
        llm: AnthropicClient,
        max_tool_iterations: Option<u32>,
        transcript: Transcript,
    ) -> Self {
        Self {
            conversation: Conversation::new(system_prompt),
            compressor,
            registry,
            plugins,
            llm,
            max_tool_iterations,
            tool_history: VecDeque::with_capacity(TOOL_HISTORY_CAPACITY),
            transcript,
            interrupt: InterruptSource::start(),
        }
    }

    fn controller(&self) -> TurnController {
        TurnController::new(self.registry.clone(), self.max_tool_iterations).with_plugins(self.plugins.clone())
    }

    fn record_tool_history(&mut self, entries: Vec<ToolHistoryEntry>) {
        for entry in entries {
            if self.tool_history.len() == TOOL_HISTORY_CAPACITY {
                self.tool_history.pop_front();
            }
            self.transcript.record_event(
                "tool_call",
                serde_json::json!({
                    "name": entry.name,
                    "call_id": entry.call_id,
                    "ok": entry.ok,
                }),
            );
            self.tool_history.push_back(entry);
        }
    }

    pub async fn run_user_turn(&mut self, text: &str) -> String {
        self.conversation.push(Message::user(text));
        self.transcript.record_user_turn(text);
        self.interrupt.reset();

        let controller = self.controller();
        let interrupted = self.interrupt.flag();
        let result = controller
            .run_turn_streaming(&mut self.conversation, &self.llm, &mut self.compressor, Some(interrupted))
            .await;

        self.record_tool_history(result.tool_history);

        let reply = match result.outcome {
            TurnOutcome::Text(text) => text,
            TurnOutcome::IterationLimitReached { last_text } => format!(
                "[reached tool-iteration limit]{}",
                last_text.map(|t| format!(" {}", t)).unwrap_or_default()
            ),
            TurnOutcome::Interrupted { partial_text } => format!("[interrupted] {}", partial_text),
        };

        self.transcript.record_assistant_turn(&reply);
        reply
    }

    async fn handle_command(&mut self, line: &str) -> CommandOutcome {
        let mut parts = line.trim().splitn(2, char::is_whitespace);
        let command = parts.next().unwrap_or("");
        let rest = parts.next().unwrap_or("").trim();

        match command {
            "/help" => CommandOutcome::Print(HELP_TEXT.to_string()),
            "/clear" => {
                self.conversation.clear_keep_system();
                self.compressor.reset();
                CommandOutcome::Print("Conversation cleared.".to_string())
            }
            "/compact" => {
                let outcome = self
                    .compressor
                    .maybe_compress(&mut self.conversation, &self.llm, Some("manual"))
                    .await;
                let message = match outcome {
                    codinglm_core::CompressionOutcome::Compressed { passes } => {
                        format!("Compressed in {} pass(es).", passes)
                    }
                    _ => "No compression performed.".to_string(),
                };
                CommandOutcome::Print(message)
            }
            "/metrics" => CommandOutcome::Print(self.compressor.metrics().to_string()),
            "/permissions" => CommandOutcome::Print(
                "Every built-in and plugin tool runs without an interactive confirmation prompt in this build."
                    .to_string(),
            ),
            "/tools" => CommandOutcome::Print(self.list_tools().await),
            "/toolout" => CommandOutcome::Print(self.tool_output(rest)),
            "/model" => {
                if rest.is_empty() {
                    CommandOutcome::Print(format!("Current model: {}", self.llm.model))
                } else {
                    self.llm.model = rest.to_string();
                    CommandOutcome::Print(format!("Model set to {}", rest))
                }
            }
            "/models" => {
                let mut lines = vec![format!("Current: {}", self.llm.model)];
                lines.extend(KNOWN_MODELS.iter().map(|m| format!("  {}", m)));
                CommandOutcome::Print(lines.join("\n"))
            }
            "/mcp" => CommandOutcome::Print(self.handle_mcp(rest).await),
            "/exit" | "/quit" => CommandOutcome::Exit,
            other => CommandOutcome::Print(format!("Unknown command: {}. Try /help.", other)),
        }
    }

    async fn list_tools(&self) -> String {
        let mut lines: Vec<String> = self
            .registry
            .specs()
            .into_iter()
            .map(|(name, description, _)| format!("{} - {}", name, description))
            .collect();
        lines.sort();

        let mut plugin_lines: Vec<String> = self
            .plugins
            .tool_catalogue()
            .await
            .into_iter()
            .map(|(name, description, _)| format!("{} - {}", name, description))
            .collect();
        plugin_lines.sort();
        lines.extend(plugin_lines);

        if lines.is_empty() {
            "No tools registered.".to_string()
        } else {
            lines.join("\n")
        }
    }

    fn tool_output(&self, arg: &str) -> String {
        if self.tool_history.is_empty() {
            return "No tool calls recorded yet.".to_string();
        }

        let index = if arg.is_empty() {
            self.tool_history.len() - 1
        } else {
            match arg.parse::<usize>() {
                Ok(i) if i < self.tool_history.len() => i,
                _ => return format!("No such entry. Valid range: 0..{}", self.tool_history.len() - 1),
            }
        };

        let entry = &self.tool_history[index];
        format!(
            "[{}] {} (call {}) ok={}\n{}",
            index, entry.name, entry.call_id, entry.ok, entry.output
        )
    }

    async fn handle_mcp(&self, rest: &str) -> String {
        let mut parts = rest.splitn(2, char::is_whitespace);
        let sub = parts.next().unwrap_or("");
        let name = parts.next().unwrap_or("").trim();

        match sub {
            "list" => {
                let names = self.plugins.provider_names().await;
                if names.is_empty() {
                    "No MCP providers registered.".to_string()
                } else {
                    names.join("\n")
                }
            }
            "enable" => {
                if name.is_empty() {
                    return "Usage: /mcp enable <name>".to_string();
                }
                if self.plugins.enable(name).await {
                    format!("Enabled {}", name)
                } else {
                    format!("Failed to enable {}", name)
                }
            }
            "disable" => {
                if name.is_empty() {
                    return "Usage: /mcp disable <name>".to_string();
                }
                if self.plugins.disable(name).await {
                    format!("Disabled {}", name)
                } else {
                    format!("No such provider: {}", name)
                }
            }
            "status" => {
                if name.is_empty() {
                    let names = self.plugins.provider_names().await;
                    let mut lines = Vec::new();
                    for n in names {
                        let enabled = self.plugins.is_enabled(&n).await;
                        lines.push(format!("{}: {}", n, if enabled { "enabled" } else { "disabled" }));
                    }
                    if lines.is_empty() {
                        "No MCP providers registered.".to_string()
                    } else {
                        lines.join("\n")
                    }
                } else {
                    let enabled = self.plugins.is_enabled(name).await;
                    format!("{}: {}", name, if enabled { "enabled" } else { "disabled" })
                }
            }
            other => format!("Unknown /mcp subcommand: '{}'. Try list|enable|disable|status.", other),
        }
    }

    pub async fn shutdown(self) {
        self.interrupt.stop().await;
    }
}

enum CommandOutcome {
    Print(String),
    Exit,
}

const HELP_TEXT: &str = "\
/help                         Show this help
/clear                        Clear the conversation, keep the system prompt
/compact                      Force one context-compression pass
/metrics                      Show lifetime compression metrics
/permissions                  Show the current tool-permission posture
/tools                        List registered and plugin-provided tools
/toolout [i]                  Show a recorded tool call's output (default: last)
/model <name>                 Switch the active model
/models                       List known model names
/mcp list|enable|disable|status <name?>   Manage MCP plugin providers
/exit, /quit                  Leave the REPL";

/// Drives the REPL: prompt, read a line, dispatch, print, repeat.
/// Returns the process exit code (always 0 — a configuration error exits
/// before this loop is ever entered).
pub async fn run_repl_loop(app: &mut App) -> i32 {
    let mut reader = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("> ");
        let _ = std::io::Write::flush(&mut std::io::stdout());

        let line = match reader.next_line().await {
            Ok(line) => line,
            Err(e) => {
                eprintln!("error reading input: {}", e);
                break;
            }
        };

        let line = match line {
            None => break,
            Some(s) if s.trim().is_empty() => continue,
            Some(s) => s,
        };

        if line.trim().starts_with('/') {
            match app.handle_command(&line).await {
                CommandOutcome::Print(text) => println!("{}", text),
                CommandOutcome::Exit => break,
            }
            continue;
        }

        if app.interrupt.is_interrupted() {
            app.interrupt.reset();
        }

        let reply = app.run_user_turn(&line).await;
        println!("{}", reply);
    }

    println!("Bye.");
    0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn help_text_lists_every_slash_command() {
        for cmd in [
            "/help", "/clear", "/compact", "/metrics", "/permissions", "/tools", "/toolout", "/model", "/models",
            "/mcp", "/exit", "/quit",
        ] {
            assert!(HELP_TEXT.contains(cmd), "missing {} from help text", cmd);
        }
    }
}
