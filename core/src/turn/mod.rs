//! Turn Controller (C9): drives the tool-call loop for a single user turn,
//! in both a non-streaming and a streaming flavour, honoring an optional
//! iteration bound, the interrupt tie-break rule, and firing the Compressor
//! after every append to the conversation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::compress::Compressor;
use crate::llm::{CompletionResponse, LlmClient, ToolDefinition};
use crate::message::{Conversation, Message};
use crate::plugin::{split_namespaced, PluginManager};
use crate::stream::StreamChunk;
use crate::tools::Registry;

/// How a turn concluded.
#[derive(Debug)]
pub enum TurnOutcome {
    /// The model produced a final text reply with no further tool calls.
    Text(String),
    /// `max_tool_iterations` was reached before the model stopped calling
    /// tools; `last_text` carries any trailing text the model had emitted.
    IterationLimitReached { last_text: Option<String> },
    /// The user interrupted mid-turn. Per the tie-break rule, any partial
    /// text collected so far wins over tool calls collected in the same
    /// chunk batch — those tool calls are discarded, not executed. When no
    /// text at all had been collected, the model's tool-use intent is
    /// honoured instead: the pending tool calls are dispatched (and show up
    /// in `tool_history`) before this outcome is returned with an empty
    /// `partial_text`.
    Interrupted { partial_text: String },
}

/// One completed tool dispatch, recorded for the bounded `/toolout` ring
/// (capacity fixed by the caller — the Controller itself imposes no bound).
#[derive(Clone, Debug)]
pub struct ToolHistoryEntry {
    pub name: String,
    pub call_id: String,
    pub ok: bool,
    pub output: String,
}

/// How a turn concluded, plus every tool dispatch made along the way, in
/// order — the caller decides how much of it to keep (e.g. a bounded ring).
#[derive(Debug)]
pub struct TurnResult {
    pub outcome: TurnOutcome,
    pub tool_history: Vec<ToolHistoryEntry>,
}

pub struct TurnController {
    registry: Arc<Registry>,
    plugins: Arc<PluginManager>,
    max_tool_iterations: Option<u32>,
}

impl TurnController {
    pub fn new(registry: Arc<Registry>, max_tool_iterations: Option<u32>) -> Self {
        Self {
            registry,
            plugins: Arc::new(PluginManager::new()),
            max_tool_iterations,
        }
    }

    pub fn with_plugins(mut self, plugins: Arc<PluginManager>) -> Self {
        self.plugins = plugins;
        self
    }

    async fn tool_definitions(&self) -> Vec<ToolDefinition> {
        let mut tools: Vec<ToolDefinition> = self
            .registry
            .specs()
            .into_iter()
            .map(|(name, description, parameters_schema)| ToolDefinition {
                name,
                description,
                parameters_schema,
            })
            .collect();

        for (name, description, parameters_schema) in self.plugins.tool_catalogue().await {
            tools.push(ToolDefinition {
                name,
                description,
                parameters_schema,
            });
        }

        tools
    }

    /// Dispatches to the Plugin Manager if the name is namespaced
    /// `mcp::<server>::<tool>`, else to the Registry.
    async fn dispatch(&self, call: &crate::message::ToolCall) -> crate::message::ToolResult {
        if split_namespaced(&call.name).is_some() {
            return self.plugins.execute(&call.name, decode_arguments(&call.arguments_json)).await;
        }
        self.registry.execute(&call.name, &call.arguments_json).await
    }

    /// Non-streaming loop: call the model, execute any tool calls it
    /// requests, feed results back, and repeat until it replies with text
    /// alone or the iteration bound is hit. Fires the Compressor after
    /// every append, per the distilled spec's data-flow contract.
    pub async fn run_turn(
        &self,
        conversation: &mut Conversation,
        llm: &dyn LlmClient,
        compressor: &mut Compressor,
    ) -> TurnResult {
        let tools = self.tool_definitions().await;
        let mut iteration: u32 = 0;
        let mut last_text: Option<String> = None;
        let mut tool_history = Vec::new();

        loop {
            if let Some(max) = self.max_tool_iterations {
                if iteration >= max {
                    warn!(iteration, max, "turn controller hit max_tool_iterations");
                    return TurnResult {
                        outcome: TurnOutcome::IterationLimitReached { last_text },
                        tool_history,
                    };
                }
            }

            let response = match llm.complete(conversation.messages(), &tools).await {
                Ok(response) => response,
                Err(e) => {
                    warn!(error = %e, "llm completion failed");
                    return TurnResult {
                        outcome: TurnOutcome::Text(format!("Error: {}", e)),
                        tool_history,
                    };
                }
            };

            match response {
                CompletionResponse::Text(text) => {
                    conversation.push(Message::assistant_text(text.clone()));
                    compressor.maybe_compress(conversation, llm, Some("assistant")).await;
                    debug!(iteration, "turn finished with text reply");
                    return TurnResult {
                        outcome: TurnOutcome::Text(text),
                        tool_history,
                    };
                }
                CompletionResponse::ToolCalls(tool_calls) => {
                    last_text = None;
                    conversation.push(Message::assistant_tool_calls(tool_calls.clone()));

                    for call in &tool_calls {
                        info!(tool = %call.name, "dispatching tool call");
                        let result = self.dispatch(call).await;
                        tool_history.push(ToolHistoryEntry {
                            name: call.name.clone(),
                            call_id: call.id.clone(),
                            ok: result.ok,
                            output: result.output.clone(),
                        });
                        conversation.push(Message::tool_result(call.id.clone(), result.as_feedback_text()));
                        compressor
                            .maybe_compress(conversation, llm, Some(call.name.as_str()))
                            .await;
                    }

                    iteration += 1;
                }
            }
        }
    }

    /// Streaming loop: consumes chunks off `llm.stream()`, accumulating text
    /// and tool-call fragments, checking `interrupted` between chunks.
    pub async fn run_turn_streaming(
        &self,
        conversation: &mut Conversation,
        llm: &dyn LlmClient,
        compressor: &mut Compressor,
        interrupted: Option<Arc<AtomicBool>>,
    ) -> TurnResult {
        let tools = self.tool_definitions().await;
        let mut iteration: u32 = 0;
        let mut tool_history = Vec::new();

        loop {
            if let Some(max) = self.max_tool_iterations {
                if iteration >= max {
                    return TurnResult {
                        outcome: TurnOutcome::IterationLimitReached { last_text: None },
                        tool_history,
                    };
                }
            }

            let (tx, mut rx) = tokio::sync::mpsc::channel::<StreamChunk>(32);
            let stream_fut = llm.stream(conversation.messages(), &tools, tx);
            tokio::pin!(stream_fut);

            let mut text = String::new();
            let mut tool_calls = Vec::new();
            let mut interrupted_mid_stream = false;

            loop {
                tokio::select! {
                    biased;
                    chunk = rx.recv() => {
                        match chunk {
                            Some(chunk) => {
                                if let Some(delta) = chunk.delta {
                                    text.push_str(&delta);
                                }
                                if let Some(calls) = chunk.tool_calls {
                                    tool_calls.extend(calls);
                                }
                            }
                            None => break,
                        }
                    }
                }

                if let Some(flag) = &interrupted {
                    if flag.load(Ordering::SeqCst) {
                        interrupted_mid_stream = true;
                        break;
                    }
                }
            }

            if let Err(e) = stream_fut.await {
                warn!(error = %e, "llm stream failed");
                return TurnResult {
                    outcome: TurnOutcome::Text(format!("Error: {}", e)),
                    tool_history,
                };
            }

            if interrupted_mid_stream {
                // Tie-break: partial text wins over any tool calls collected
                // in this same batch, even if both are non-empty. Only when
                // no text at all was collected do we honour the model's
                // tool-use intent and still dispatch what it asked for.
                if text.is_empty() && !tool_calls.is_empty() {
                    conversation.push(Message::assistant_tool_calls(tool_calls.clone()));
                    for call in &tool_calls {
                        let result = self.dispatch(call).await;
                        tool_history.push(ToolHistoryEntry {
                            name: call.name.clone(),
                            call_id: call.id.clone(),
                            ok: result.ok,
                            output: result.output.clone(),
                        });
                        conversation.push(Message::tool_result(call.id.clone(), result.as_feedback_text()));
                        compressor
                            .maybe_compress(conversation, llm, Some(call.name.as_str()))
                            .await;
                    }
                    return TurnResult {
                        outcome: TurnOutcome::Interrupted { partial_text: String::new() },
                        tool_history,
                    };
                }

                return TurnResult {
                    outcome: TurnOutcome::Interrupted { partial_text: text },
                    tool_history,
                };
            }

            if tool_calls.is_empty() {
                conversation.push(Message::assistant_text(text.clone()));
                compressor.maybe_compress(conversation, llm, Some("assistant")).await;
                return TurnResult {
                    outcome: TurnOutcome::Text(text),
                    tool_history,
                };
            }

            conversation.push(Message::assistant_tool_calls(tool_calls.clone()));
            for call in &tool_calls {
                let result = self.dispatch(call).await;
                tool_history.push(ToolHistoryEntry {
                    name: call.name.clone(),
                    call_id: call.id.clone(),
                    ok: result.ok,
                    output: result.output.clone(),
                });
                conversation.push(Message::tool_result(call.id.clone(), result.as_feedback_text()));
                compressor
                    .maybe_compress(conversation, llm, Some(call.name.as_str()))
                    .await;
            }

            iteration += 1;
        }
    }
}

fn decode_arguments(arguments_json: &str) -> serde_json::Value {
    if arguments_json.trim().is_empty() {
        serde_json::Value::Object(Default::default())
    } else {
        serde_json::from_str(arguments_json).unwrap_or_else(|_| serde_json::Value::Object(Default::default()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AgentError;
    use crate::message::ToolCall;
    use crate::tools::Tool;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::Mutex as StdMutex;

    struct Echo;

    #[async_trait]
    impl Tool for Echo {
        fn name(&self) -> &str {
            "Echo"
        }
        fn description(&self) -> &str {
            "echoes its input"
        }
        fn parameters_schema(&self) -> Value {
            json!({"type": "object"})
        }
        async fn execute(&self, args: Value) -> crate::message::ToolResult {
            crate::message::ToolResult::ok(args.to_string())
        }
    }

    /// Replays a fixed sequence of responses, one per call to `complete`.
    struct ScriptedLlm {
        responses: StdMutex<Vec<CompletionResponse>>,
    }

    impl ScriptedLlm {
        fn new(responses: Vec<CompletionResponse>) -> Self {
            Self {
                responses: StdMutex::new(responses.into_iter().rev().collect()),
            }
        }
    }

    #[async_trait]
    impl LlmClient for ScriptedLlm {
        async fn complete(
            &self,
            _messages: &[Message],
            _tools: &[ToolDefinition],
        ) -> Result<CompletionResponse, AgentError> {
            Ok(self.responses.lock().unwrap().pop().unwrap_or(CompletionResponse::Text(String::new())))
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

    fn registry_with_echo() -> Arc<Registry> {
        let mut registry = Registry::new();
        registry.register(Arc::new(Echo));
        Arc::new(registry)
    }

    fn no_op_compressor() -> Compressor {
        Compressor::new(crate::compress::CompressorConfig {
            enabled: false,
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn single_text_reply_ends_the_turn() {
        let controller = TurnController::new(registry_with_echo(), None);
        let llm = ScriptedLlm::new(vec![CompletionResponse::Text("hello".to_string())]);
        let mut conv = Conversation::new("system");
        conv.push(Message::user("hi"));
        let mut compressor = no_op_compressor();

        match controller.run_turn(&mut conv, &llm, &mut compressor).await.outcome {
            TurnOutcome::Text(text) => assert_eq!(text, "hello"),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn tool_call_round_trips_before_final_text() {
        let controller = TurnController::new(registry_with_echo(), None);
        let llm = ScriptedLlm::new(vec![
            CompletionResponse::ToolCalls(vec![ToolCall {
                id: "call-1".to_string(),
                name: "Echo".to_string(),
                arguments_json: r#"{"x":1}"#.to_string(),
            }]),
            CompletionResponse::Text("done".to_string()),
        ]);
        let mut conv = Conversation::new("system");
        conv.push(Message::user("run echo"));
        let mut compressor = no_op_compressor();

        let result = controller.run_turn(&mut conv, &llm, &mut compressor).await;
        match result.outcome {
            TurnOutcome::Text(text) => assert_eq!(text, "done"),
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(result.tool_history.len(), 1);
        assert!(result.tool_history[0].ok);

        let tool_result = conv.messages().iter().find(|m| m.tool_call_id.is_some()).unwrap();
        assert_eq!(tool_result.content.as_deref(), Some(r#"{"x":1}"#));
    }

    #[tokio::test]
    async fn iteration_bound_is_enforced() {
        let controller = TurnController::new(registry_with_echo(), Some(1));
        let llm = ScriptedLlm::new(vec![
            CompletionResponse::ToolCalls(vec![ToolCall {
                id: "call-1".to_string(),
                name: "Echo".to_string(),
                arguments_json: "{}".to_string(),
            }]),
            CompletionResponse::ToolCalls(vec![ToolCall {
                id: "call-2".to_string(),
                name: "Echo".to_string(),
                arguments_json: "{}".to_string(),
            }]),
        ]);
        let mut conv = Conversation::new("system");
        conv.push(Message::user("loop forever"));
        let mut compressor = no_op_compressor();

        match controller.run_turn(&mut conv, &llm, &mut compressor).await.outcome {
            TurnOutcome::IterationLimitReached { .. } => {}
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    /// Streams a fixed sequence of chunks, ignoring `messages`/`tools`.
    struct ScriptedStream {
        chunks: StdMutex<Vec<StreamChunk>>,
    }

    impl ScriptedStream {
        fn new(chunks: Vec<StreamChunk>) -> Self {
            Self {
                chunks: StdMutex::new(chunks.into_iter().rev().collect()),
            }
        }
    }

    #[async_trait]
    impl LlmClient for ScriptedStream {
        async fn complete(
            &self,
            _messages: &[Message],
            _tools: &[ToolDefinition],
        ) -> Result<CompletionResponse, AgentError> {
            Ok(CompletionResponse::Text(String::new()))
        }

        async fn stream(
            &self,
            _messages: &[Message],
            _tools: &[ToolDefinition],
            tx: tokio::sync::mpsc::Sender<StreamChunk>,
        ) -> Result<(), AgentError> {
            let remaining: Vec<StreamChunk> = { self.chunks.lock().unwrap().drain(..).rev().collect() };
            for chunk in remaining {
                let _ = tx.send(chunk).await;
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn interrupt_with_partial_text_finalises_it_and_skips_tool_dispatch() {
        let controller = TurnController::new(registry_with_echo(), None);
        let llm = ScriptedStream::new(vec![StreamChunk {
            delta: Some("Hello".to_string()),
            tool_calls: None,
            finish_reason: None,
        }]);
        let mut conv = Conversation::new("system");
        conv.push(Message::user("hi"));
        let mut compressor = no_op_compressor();
        let interrupted = Arc::new(AtomicBool::new(true));

        let result = controller
            .run_turn_streaming(&mut conv, &llm, &mut compressor, Some(interrupted))
            .await;

        match result.outcome {
            TurnOutcome::Interrupted { partial_text } => assert_eq!(partial_text, "Hello"),
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert!(result.tool_history.is_empty());
        assert!(conv.messages().iter().all(|m| m.tool_call_id.is_none()));
    }

    #[tokio::test]
    async fn interrupt_with_only_tool_calls_still_dispatches_them() {
        let controller = TurnController::new(registry_with_echo(), None);
        let llm = ScriptedStream::new(vec![StreamChunk {
            delta: None,
            tool_calls: Some(vec![ToolCall {
                id: "call-1".to_string(),
                name: "Echo".to_string(),
                arguments_json: r#"{"x":1}"#.to_string(),
            }]),
            finish_reason: None,
        }]);
        let mut conv = Conversation::new("system");
        conv.push(Message::user("run echo"));
        let mut compressor = no_op_compressor();
        let interrupted = Arc::new(AtomicBool::new(true));

        let result = controller
            .run_turn_streaming(&mut conv, &llm, &mut compressor, Some(interrupted))
            .await;

        match result.outcome {
            TurnOutcome::Interrupted { partial_text } => assert_eq!(partial_text, ""),
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(result.tool_history.len(), 1);
        assert!(result.tool_history[0].ok);
        assert!(conv.messages().iter().any(|m| m.tool_call_id.is_some()));
    }

    #[tokio::test]
    async fn unnamespaced_plugin_call_is_a_synthetic_failure() {
        let controller = TurnController::new(registry_with_echo(), None);
        let call = ToolCall {
            id: "c1".to_string(),
            name: "mcp::nope::x".to_string(),
            arguments_json: "{}".to_string(),
        };
        let result = controller.dispatch(&call).await;
        assert!(!result.ok);
    }
}
