//! SubAgent (`Task`) tool: runs a bounded inner turn-controller loop against
//! a fresh conversation, seeded with a subagent-type-specific system prompt.
//! Constructed after the parent registry exists, since it borrows it.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::llm::LlmClient;
use crate::message::{Conversation, ToolResult};
use crate::tools::{Registry, Tool};
use crate::turn::{TurnController, TurnOutcome};

const MAX_SUBAGENT_ITERATIONS: u32 = 10;

fn system_prompt_for(subagent_type: &str) -> String {
    match subagent_type {
        "general-purpose" => {
            "You are a focused sub-agent. Complete the given task using the available tools, \
             then report your final answer concisely.".to_string()
        }
        other => format!(
            "You are a sub-agent specialised for '{}' tasks. Complete the given task using the \
             available tools, then report your final answer concisely.",
            other
        ),
    }
}

pub struct SubAgentTool {
    llm: Arc<dyn LlmClient>,
    registry: Arc<Registry>,
}

impl SubAgentTool {
    pub fn new(llm: Arc<dyn LlmClient>, registry: Arc<Registry>) -> Self {
        Self { llm, registry }
    }
}

#[async_trait]
impl Tool for SubAgentTool {
    fn name(&self) -> &str {
        "Task"
    }

    fn description(&self) -> &str {
        "Launches a sub-agent to autonomously complete a bounded task using the available tools"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "description": {"type": "string", "description": "A short (3-5 word) description of the task"},
                "subagent_type": {"type": "string", "description": "A short label for the sub-agent's specialisation"},
                "prompt": {"type": "string", "description": "The task for the sub-agent to complete"}
            },
            "required": ["description", "subagent_type", "prompt"]
        })
    }

    async fn execute(&self, args: Value) -> ToolResult {
        let Some(description) = args.get("description").and_then(Value::as_str) else {
            return ToolResult::err("Missing required parameter 'description'");
        };
        let Some(prompt) = args.get("prompt").and_then(Value::as_str) else {
            return ToolResult::err("Missing required parameter 'prompt'");
        };
        let subagent_type = args.get("subagent_type").and_then(Value::as_str).unwrap_or("general-purpose");

        let mut conversation = Conversation::new(system_prompt_for(subagent_type));
        conversation.push(crate::message::Message::user(prompt));

        let controller = TurnController::new(self.registry.clone(), Some(MAX_SUBAGENT_ITERATIONS));
        let mut compressor = crate::compress::Compressor::new(crate::compress::CompressorConfig {
            enabled: false,
            ..Default::default()
        });

        match controller.run_turn(&mut conversation, self.llm.as_ref(), &mut compressor).await.outcome {
            TurnOutcome::Text(text) => ToolResult::ok(format!("Task: {}\n\nResult:\n{}", description, text)),
            TurnOutcome::IterationLimitReached { last_text } => ToolResult::ok(format!(
                "Sub-agent reached its {}-iteration limit without a final answer.{}",
                MAX_SUBAGENT_ITERATIONS,
                last_text.map(|t| format!(" Last output: {}", t)).unwrap_or_default()
            )),
            TurnOutcome::Interrupted { partial_text } => ToolResult::ok(format!(
                "Sub-agent was interrupted. Partial output: {}",
                partial_text
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AgentError;
    use crate::llm::{CompletionResponse, ToolDefinition};
    use crate::message::Message;
    use crate::stream::StreamChunk;

    struct StubLlm;

    #[async_trait]
    impl LlmClient for StubLlm {
        async fn complete(
            &self,
            _messages: &[Message],
            _tools: &[ToolDefinition],
        ) -> Result<CompletionResponse, AgentError> {
            Ok(CompletionResponse::Text("sub-agent result".to_string()))
        }

        async fn stream(
            &self,
            _messages: &[Message],
            _tools: &[ToolDefinition],
            _tx: tokio::sync::mpsc::Sender<StreamChunk>,
        ) -> Result<(), AgentError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn runs_a_bounded_turn_and_returns_final_text() {
        let tool = SubAgentTool::new(Arc::new(StubLlm), Arc::new(Registry::new()));
        let result = tool
            .execute(json!({
                "description": "summarize repo",
                "subagent_type": "general-purpose",
                "prompt": "summarize the repo"
            }))
            .await;
        assert!(result.ok);
        assert_eq!(result.output, "Task: summarize repo\n\nResult:\nsub-agent result");
    }

    #[tokio::test]
    async fn missing_prompt_is_a_parameter_error() {
        let tool = SubAgentTool::new(Arc::new(StubLlm), Arc::new(Registry::new()));
        let result = tool
            .execute(json!({"description": "summarize repo", "subagent_type": "general-purpose"}))
            .await;
        assert!(!result.ok);
    }

    #[tokio::test]
    async fn missing_description_is_a_parameter_error() {
        let tool = SubAgentTool::new(Arc::new(StubLlm), Arc::new(Registry::new()));
        let result = tool
            .execute(json!({"subagent_type": "general-purpose", "prompt": "summarize the repo"}))
            .await;
        assert!(!result.ok);
    }
}
