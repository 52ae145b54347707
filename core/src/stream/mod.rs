//! Streaming Decoder (C6): parses an Anthropic-style `text/event-stream`
//! into typed [`StreamChunk`]s, reassembling tool-call arguments that
//! arrive as incremental JSON fragments.

use std::collections::HashMap;

use serde::Deserialize;
use serde_json::Value;

use crate::message::ToolCall;

/// One decoded unit of a streaming response. Chunks carrying nothing
/// material (no delta, no tool-calls, no finish reason) are never produced.
#[derive(Clone, Debug, Default)]
pub struct StreamChunk {
    pub delta: Option<String>,
    pub tool_calls: Option<Vec<ToolCall>>,
    pub finish_reason: Option<String>,
}

impl StreamChunk {
    fn is_material(&self) -> bool {
        self.delta.is_some() || self.tool_calls.is_some() || self.finish_reason.is_some()
    }
}

/// A `tool_use` content block that has been opened but not yet closed.
struct ToolUseState {
    id: String,
    name: String,
    input_dict: Option<Value>,
    input_buffer: String,
}

impl ToolUseState {
    /// Finalises arguments: prefer the accumulated buffer if it parses as
    /// JSON; otherwise the pre-filled dict if any; otherwise `{}`. The
    /// result always parses as a JSON object — an unparseable buffer with
    /// no fallback dict is never surfaced verbatim.
    fn arguments_json(&self) -> String {
        if !self.input_buffer.is_empty() && serde_json::from_str::<Value>(&self.input_buffer).is_ok() {
            return self.input_buffer.clone();
        }
        if let Some(dict) = &self.input_dict {
            return dict.to_string();
        }
        "{}".to_string()
    }
}

/// Raised when the server sends an `error` event with a well-formed
/// payload. Propagates synchronously from the consuming iteration step,
/// per the decoder's contract.
#[derive(Debug, thiserror::Error)]
#[error("stream error: {0}")]
pub struct DecodeStreamError(pub String);

/// Stateful decoder driven line-by-line. Callers feed it raw SSE lines (no
/// trailing newline required) and poll [`Decoder::next_chunk`].
pub struct Decoder {
    current_event: Option<String>,
    tool_states: HashMap<u64, ToolUseState>,
    done: bool,
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Deserialize)]
struct ContentBlockStart {
    index: u64,
    content_block: ContentBlock,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    id: Option<String>,
    name: Option<String>,
    input: Option<Value>,
}

#[derive(Deserialize)]
struct ContentBlockDelta {
    index: u64,
    delta: Delta,
}

#[derive(Deserialize)]
struct Delta {
    #[serde(rename = "type")]
    kind: Option<String>,
    text: Option<String>,
    partial_json: Option<String>,
    stop_reason: Option<String>,
}

#[derive(Deserialize)]
struct ContentBlockStop {
    index: u64,
}

#[derive(Deserialize)]
struct MessageDeltaPayload {
    delta: Delta,
}

#[derive(Deserialize)]
struct MessageStop {
    stop_reason: Option<String>,
}

#[derive(Deserialize)]
struct ErrorPayload {
    error: Option<ErrorDetail>,
}

#[derive(Deserialize)]
struct ErrorDetail {
    message: Option<String>,
}

impl Decoder {
    pub fn new() -> Self {
        Self {
            current_event: None,
            tool_states: HashMap::new(),
            done: false,
        }
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Feeds one raw line of the event stream. Returns `Ok(Some(chunk))`
    /// for a material chunk, `Ok(None)` for a line that produced nothing
    /// observable, and `Err` for a well-formed `error` event.
    pub fn feed_line(&mut self, line: &str) -> Result<Option<StreamChunk>, DecodeStreamError> {
        if line.is_empty() {
            return Ok(None);
        }

        if let Some(event) = line.strip_prefix("event:") {
            self.current_event = Some(event.trim().to_string());
            return Ok(None);
        }

        let Some(data) = line.strip_prefix("data:") else {
            return Ok(None);
        };
        let data = data.trim();

        if data == "[DONE]" {
            self.done = true;
            return Ok(Some(StreamChunk {
                finish_reason: Some("stop".to_string()),
                ..Default::default()
            }));
        }

        let Some(event) = self.current_event.clone() else {
            return Ok(None);
        };

        let payload: Value = match serde_json::from_str(data) {
            Ok(v) => v,
            Err(_) => return Ok(None),
        };

        if event == "error" {
            let detail: ErrorPayload = serde_json::from_value(payload).unwrap_or(ErrorPayload { error: None });
            let message = detail
                .error
                .and_then(|e| e.message)
                .unwrap_or_else(|| "Unknown streaming error".to_string());
            return Err(DecodeStreamError(message));
        }

        let mut chunk = StreamChunk::default();

        match event.as_str() {
            "content_block_start" => {
                if let Ok(start) = serde_json::from_value::<ContentBlockStart>(payload) {
                    if start.content_block.kind == "tool_use" {
                        let (input_dict, input_buffer) = match start.content_block.input {
                            Some(Value::Object(map)) => (Some(Value::Object(map)), String::new()),
                            Some(Value::String(s)) => (None, s),
                            _ => (None, String::new()),
                        };
                        self.tool_states.insert(
                            start.index,
                            ToolUseState {
                                id: start.content_block.id.unwrap_or_default(),
                                name: start.content_block.name.unwrap_or_default(),
                                input_dict,
                                input_buffer,
                            },
                        );
                    }
                }
            }
            "content_block_delta" => {
                if let Ok(delta) = serde_json::from_value::<ContentBlockDelta>(payload) {
                    match delta.delta.kind.as_deref() {
                        Some("text_delta") => {
                            chunk.delta = Some(delta.delta.text.unwrap_or_default());
                        }
                        Some("input_json_delta") => {
                            if let Some(state) = self.tool_states.get_mut(&delta.index) {
                                state.input_buffer.push_str(&delta.delta.partial_json.unwrap_or_default());
                            }
                        }
                        _ => {}
                    }
                }
            }
            "content_block_stop" => {
                if let Ok(stop) = serde_json::from_value::<ContentBlockStop>(payload) {
                    if let Some(state) = self.tool_states.remove(&stop.index) {
                        chunk.tool_calls = Some(vec![ToolCall {
                            id: state.id,
                            name: state.name,
                            arguments_json: state.arguments_json(),
                        }]);
                    }
                }
            }
            "message_delta" => {
                if let Ok(delta) = serde_json::from_value::<MessageDeltaPayload>(payload) {
                    if let Some(stop_reason) = delta.delta.stop_reason {
                        chunk.finish_reason = Some(stop_reason);
                    }
                }
            }
            "message_stop" => {
                let stop: MessageStop = serde_json::from_value(payload).unwrap_or(MessageStop { stop_reason: None });
                chunk.finish_reason = Some(stop.stop_reason.unwrap_or_else(|| "stop".to_string()));
                self.done = true;
            }
            _ => {}
        }

        if chunk.is_material() {
            Ok(Some(chunk))
        } else {
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_all(decoder: &mut Decoder, lines: &[&str]) -> Vec<StreamChunk> {
        let mut chunks = Vec::new();
        for line in lines {
            if let Ok(Some(chunk)) = decoder.feed_line(line) {
                chunks.push(chunk);
            }
        }
        chunks
    }

    #[test]
    fn streaming_tool_use_reassembly() {
        let mut decoder = Decoder::new();
        let chunks = feed_all(
            &mut decoder,
            &[
                "event: content_block_start",
                r#"data: {"index":0,"content_block":{"type":"tool_use","id":"t1","name":"Bash","input":{}}}"#,
                "event: content_block_delta",
                r#"data: {"index":0,"delta":{"type":"input_json_delta","partial_json":"{\"command\":\"ls\"}"}}"#,
                "event: content_block_stop",
                r#"data: {"index":0}"#,
                "event: message_stop",
                r#"data: {"stop_reason":"tool_use"}"#,
            ],
        );

        assert_eq!(chunks.len(), 2);
        let tool_calls = chunks[0].tool_calls.as_ref().expect("tool calls chunk");
        assert_eq!(tool_calls.len(), 1);
        let parsed: Value = serde_json::from_str(&tool_calls[0].arguments_json).unwrap();
        assert_eq!(parsed, serde_json::json!({"command": "ls"}));
        assert_eq!(chunks[1].finish_reason.as_deref(), Some("tool_use"));
    }

    #[test]
    fn text_delta_is_emitted() {
        let mut decoder = Decoder::new();
        let chunks = feed_all(
            &mut decoder,
            &[
                "event: content_block_delta",
                r#"data: {"index":0,"delta":{"type":"text_delta","text":"Hello"}}"#,
            ],
        );
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].delta.as_deref(), Some("Hello"));
    }

    #[test]
    fn done_sentinel_ends_the_stream() {
        let mut decoder = Decoder::new();
        let chunks = feed_all(&mut decoder, &["data: [DONE]"]);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].finish_reason.as_deref(), Some("stop"));
        assert!(decoder.is_done());
    }

    #[test]
    fn error_event_raises_synchronously() {
        let mut decoder = Decoder::new();
        decoder.feed_line("event: error").unwrap();
        let err = decoder
            .feed_line(r#"data: {"error":{"message":"overloaded"}}"#)
            .unwrap_err();
        assert_eq!(err.0, "overloaded");
    }

    #[test]
    fn malformed_json_is_silently_ignored() {
        let mut decoder = Decoder::new();
        decoder.feed_line("event: content_block_delta").unwrap();
        let result = decoder.feed_line("data: {not json at all");
        assert!(result.unwrap().is_none());
    }

    #[test]
    fn unparseable_buffer_with_no_prefilled_dict_falls_back_to_empty_object() {
        let mut decoder = Decoder::new();
        feed_all(
            &mut decoder,
            &[
                "event: content_block_start",
                r#"data: {"index":0,"content_block":{"type":"tool_use","id":"t1","name":"X"}}"#,
                "event: content_block_delta",
                r#"data: {"index":0,"delta":{"type":"input_json_delta","partial_json":"not-json"}}"#,
            ],
        );
        let chunks = feed_all(
            &mut decoder,
            &["event: content_block_stop", r#"data: {"index":0}"#],
        );
        let tool_calls = chunks[0].tool_calls.as_ref().unwrap();
        let parsed: Value = serde_json::from_str(&tool_calls[0].arguments_json).unwrap();
        assert_eq!(parsed, serde_json::json!({}));
    }

    #[test]
    fn prefilled_dict_is_used_when_buffer_never_parses() {
        let mut decoder = Decoder::new();
        feed_all(
            &mut decoder,
            &[
                "event: content_block_start",
                r#"data: {"index":0,"content_block":{"type":"tool_use","id":"t1","name":"X","input":{"a":1}}}"#,
                "event: content_block_delta",
                r#"data: {"index":0,"delta":{"type":"input_json_delta","partial_json":"not-json"}}"#,
            ],
        );
        let chunks = feed_all(
            &mut decoder,
            &["event: content_block_stop", r#"data: {"index":0}"#],
        );
        let tool_calls = chunks[0].tool_calls.as_ref().unwrap();
        let parsed: Value = serde_json::from_str(&tool_calls[0].arguments_json).unwrap();
        assert_eq!(parsed, serde_json::json!({"a": 1}));
    }
}
