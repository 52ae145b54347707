//! LLM Client (C7): builds the Anthropic-Messages wire payload, issues
//! streaming/non-streaming calls, and surfaces typed errors.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::AgentError;
use crate::message::{Message, Role, ToolCall};
use crate::stream::{Decoder, StreamChunk};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_BASE_URL: &str = "https://api.z.ai/api/anthropic";

/// A tool definition as surfaced to the model.
#[derive(Clone, Debug)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters_schema: Value,
}

/// Either a final assistant text or a list of tool calls the model wants
/// to run next.
#[derive(Clone, Debug)]
pub enum CompletionResponse {
    Text(String),
    ToolCalls(Vec<ToolCall>),
}

/// Abstraction over the wire client so the Turn Controller and Compressor
/// can be tested without network access.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
    ) -> Result<CompletionResponse, AgentError>;

    async fn stream(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
        chunk_tx: tokio::sync::mpsc::Sender<StreamChunk>,
    ) -> Result<(), AgentError>;

    /// Like [`Self::complete`], but issued against `model` for this call
    /// only, instead of whatever model the client is currently configured
    /// with. This is how the Compressor honours a configured
    /// `summary_model` without mutating the shared client — a "temporary
    /// swap" expressed as a per-call parameter rather than interior
    /// mutation. Clients that have no notion of an overridable model (test
    /// stubs) can rely on the default, which ignores `model` entirely.
    async fn complete_with_model(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
        _model: Option<&str>,
    ) -> Result<CompletionResponse, AgentError> {
        self.complete(messages, tools).await
    }
}

/// Builds the Anthropic-Messages-compatible request payload from the
/// internal conversation representation.
pub fn build_payload(
    model: &str,
    max_tokens: u32,
    temperature: f32,
    messages: &[Message],
    tools: &[ToolDefinition],
    stream: bool,
) -> Value {
    let (system, converted) = convert_messages(messages);

    let mut payload = json!({
        "model": model,
        "max_tokens": max_tokens,
        "temperature": temperature,
        "messages": converted,
    });

    if let Some(system) = system {
        payload["system"] = json!(system);
    }
    if !tools.is_empty() {
        payload["tools"] = json!(tools
            .iter()
            .map(|t| json!({
                "type": "tool",
                "name": t.name,
                "description": t.description,
                "input_schema": t.parameters_schema,
            }))
            .collect::<Vec<_>>());
    }
    if stream {
        payload["stream"] = json!(true);
    }

    payload
}

fn convert_messages(messages: &[Message]) -> (Option<String>, Vec<Value>) {
    let mut system_prompts = Vec::new();
    let mut converted = Vec::new();

    for message in messages {
        match message.role {
            Role::System => {
                if let Some(content) = &message.content {
                    system_prompts.push(content.clone());
                }
            }
            Role::User => {
                let text = message.content.clone().unwrap_or_default();
                converted.push(json!({
                    "role": "user",
                    "content": [{"type": "text", "text": text}],
                }));
            }
            Role::Assistant => {
                let mut blocks: Vec<Value> = Vec::new();
                if let Some(content) = &message.content {
                    if !content.is_empty() {
                        blocks.push(json!({"type": "text", "text": content}));
                    }
                }
                if let Some(tool_calls) = &message.tool_calls {
                    for call in tool_calls {
                        let input: Value =
                            serde_json::from_str(&call.arguments_json).unwrap_or_else(|_| json!({}));
                        blocks.push(json!({
                            "type": "tool_use",
                            "id": call.id,
                            "name": call.name,
                            "input": input,
                        }));
                    }
                }
                if blocks.is_empty() {
                    blocks.push(json!({"type": "text", "text": ""}));
                }
                converted.push(json!({"role": "assistant", "content": blocks}));
            }
            Role::Tool => {
                let content = message.content.clone().unwrap_or_default();
                converted.push(json!({
                    "role": "user",
                    "content": [{
                        "type": "tool_result",
                        "tool_use_id": message.tool_call_id.clone().unwrap_or_default(),
                        "content": content,
                    }],
                }));
            }
        }
    }

    let system = if system_prompts.is_empty() {
        None
    } else {
        Some(system_prompts.join("\n\n"))
    };

    (system, converted)
}

/// Extracts a decoded, non-streaming response from a parsed Anthropic
/// response body.
pub fn decode_response(body: &Value) -> CompletionResponse {
    let mut tool_calls = Vec::new();
    let mut text_parts = Vec::new();

    if let Some(content) = body.get("content").and_then(Value::as_array) {
        for block in content {
            match block.get("type").and_then(Value::as_str) {
                Some("text") => {
                    text_parts.push(block.get("text").and_then(Value::as_str).unwrap_or("").to_string());
                }
                Some("tool_use") => {
                    let input = block.get("input").cloned().unwrap_or_else(|| json!({}));
                    tool_calls.push(ToolCall {
                        id: block.get("id").and_then(Value::as_str).unwrap_or("").to_string(),
                        name: block.get("name").and_then(Value::as_str).unwrap_or("").to_string(),
                        arguments_json: input.to_string(),
                    });
                }
                _ => {}
            }
        }
    }

    if !tool_calls.is_empty() {
        CompletionResponse::ToolCalls(tool_calls)
    } else {
        CompletionResponse::Text(text_parts.join(""))
    }
}

/// Extracts a best-effort message from a non-2xx Anthropic error body.
pub fn format_api_error(status: u16, body: &Value) -> String {
    if let Some(error) = body.get("error") {
        let code = error.get("code").and_then(Value::as_str);
        let message = error.get("message").and_then(Value::as_str);
        return match (code, message) {
            (Some(code), Some(message)) => format!("API error ({}): {}", code, message),
            (None, Some(message)) => format!("API error: {}", message),
            _ => format!("API error: HTTP {}", status),
        };
    }
    format!("API error: HTTP {}", status)
}

/// The concrete wire client, backed by `reqwest`.
pub struct AnthropicClient {
    http: reqwest::Client,
    api_key: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    base_url: String,
}

impl AnthropicClient {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>, base_url: Option<String>, timeout_ms: u64) -> Self {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_millis(timeout_ms))
            .build()
            .expect("reqwest client builds");
        Self {
            http,
            api_key: api_key.into(),
            model: model.into(),
            temperature: 0.7,
            max_tokens: 8192,
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        }
    }

    fn headers(&self) -> reqwest::header::HeaderMap {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert("content-type", "application/json".parse().unwrap());
        headers.insert("x-api-key", self.api_key.parse().unwrap());
        headers.insert("anthropic-version", ANTHROPIC_VERSION.parse().unwrap());
        headers
    }
}

#[async_trait]
impl LlmClient for AnthropicClient {
    async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
    ) -> Result<CompletionResponse, AgentError> {
        let payload = build_payload(&self.model, self.max_tokens, self.temperature, messages, tools, false);
        let url = format!("{}/v1/messages", self.base_url);

        let response = self
            .http
            .post(&url)
            .headers(self.headers())
            .json(&payload)
            .send()
            .await
            .map_err(|e| AgentError::Network(e.to_string()))?;

        let status = response.status();
        let body: Value = response
            .json()
            .await
            .map_err(|e| AgentError::Network(e.to_string()))?;

        if !status.is_success() {
            return Err(AgentError::Api(format_api_error(status.as_u16(), &body)));
        }

        Ok(decode_response(&body))
    }

    async fn complete_with_model(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
        model: Option<&str>,
    ) -> Result<CompletionResponse, AgentError> {
        let Some(model) = model else {
            return self.complete(messages, tools).await;
        };

        let payload = build_payload(model, self.max_tokens, self.temperature, messages, tools, false);
        let url = format!("{}/v1/messages", self.base_url);

        let response = self
            .http
            .post(&url)
            .headers(self.headers())
            .json(&payload)
            .send()
            .await
            .map_err(|e| AgentError::Network(e.to_string()))?;

        let status = response.status();
        let body: Value = response
            .json()
            .await
            .map_err(|e| AgentError::Network(e.to_string()))?;

        if !status.is_success() {
            return Err(AgentError::Api(format_api_error(status.as_u16(), &body)));
        }

        Ok(decode_response(&body))
    }

    async fn stream(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
        chunk_tx: tokio::sync::mpsc::Sender<StreamChunk>,
    ) -> Result<(), AgentError> {
        let payload = build_payload(&self.model, self.max_tokens, self.temperature, messages, tools, true);
        let url = format!("{}/v1/messages", self.base_url);

        let response = self
            .http
            .post(&url)
            .headers(self.headers())
            .json(&payload)
            .send()
            .await
            .map_err(|e| AgentError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body: Value = response.json().await.unwrap_or(Value::Null);
            return Err(AgentError::Api(format_api_error(status.as_u16(), &body)));
        }

        let mut decoder = Decoder::new();
        let mut stream = response.bytes_stream();
        let mut buffer = String::new();

        use futures::StreamExt;
        while let Some(chunk) = stream.next().await {
            let bytes = chunk.map_err(|e| AgentError::Network(e.to_string()))?;
            buffer.push_str(&String::from_utf8_lossy(&bytes));

            while let Some(pos) = buffer.find('\n') {
                let line = buffer[..pos].trim_end_matches('\r').to_string();
                buffer.drain(..=pos);
                match decoder.feed_line(&line) {
                    Ok(Some(chunk)) => {
                        let _ = chunk_tx.send(chunk).await;
                    }
                    Ok(None) => {}
                    Err(e) => return Err(AgentError::Decode(e.0)),
                }
                if decoder.is_done() {
                    return Ok(());
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_messages_are_concatenated() {
        let messages = vec![Message::system("one"), Message::system("two"), Message::user("hi")];
        let payload = build_payload("m", 100, 0.5, &messages, &[], false);
        assert_eq!(payload["system"], json!("one\n\ntwo"));
    }

    #[test]
    fn empty_assistant_content_is_padded() {
        let messages = vec![Message::assistant_tool_calls(vec![])];
        let payload = build_payload("m", 100, 0.5, &messages, &[], false);
        let content = payload["messages"][0]["content"].as_array().unwrap();
        assert_eq!(content.len(), 1);
        assert_eq!(content[0]["type"], "text");
    }

    #[test]
    fn tool_message_becomes_user_role_tool_result() {
        let messages = vec![Message::tool_result("call-1", "42")];
        let payload = build_payload("m", 100, 0.5, &messages, &[], false);
        let entry = &payload["messages"][0];
        assert_eq!(entry["role"], "user");
        assert_eq!(entry["content"][0]["type"], "tool_result");
        assert_eq!(entry["content"][0]["tool_use_id"], "call-1");
    }

    #[test]
    fn decode_response_prefers_tool_calls_over_text() {
        let body = json!({
            "content": [
                {"type": "text", "text": "thinking..."},
                {"type": "tool_use", "id": "t1", "name": "Bash", "input": {"command": "ls"}}
            ]
        });
        match decode_response(&body) {
            CompletionResponse::ToolCalls(calls) => assert_eq!(calls.len(), 1),
            CompletionResponse::Text(_) => panic!("expected tool calls"),
        }
    }

    #[test]
    fn format_api_error_prefers_code_and_message() {
        let body = json!({"error": {"code": "rate_limited", "message": "slow down"}});
        assert_eq!(format_api_error(429, &body), "API error (rate_limited): slow down");
    }
}
