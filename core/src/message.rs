//! The data model: Role, Message, ToolCall, ToolResult, Conversation.

use serde::{Deserialize, Serialize};

/// One of the four roles a message can carry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A model-emitted request to invoke a named tool with JSON arguments.
///
/// `arguments_json` is always a valid JSON object string by the time it
/// leaves the decoder or client; in-flight fragments are never externally
/// observable.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments_json: String,
}

/// The locally produced reply to a tool call.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolResult {
    pub ok: bool,
    pub output: String,
    pub error: Option<String>,
}

impl ToolResult {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            ok: true,
            output: output.into(),
            error: None,
        }
    }

    pub fn err(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            output: String::new(),
            error: Some(error.into()),
        }
    }

    /// The text fed back to the model: `output` on success, `"Error: ..."`
    /// on failure, per the Turn Controller's tool-dispatch step.
    pub fn as_feedback_text(&self) -> String {
        if self.ok {
            self.output.clone()
        } else {
            format!("Error: {}", self.error.as_deref().unwrap_or("unknown error"))
        }
    }
}

/// The unit of conversation.
///
/// Invariant: at least one of `content`/`tool_calls` is non-empty except for
/// role=`Tool`, where `content` may be an error sentinel string. Every
/// `Tool`-role message's `tool_call_id` must equal some tool-call id emitted
/// by a prior `Assistant` message in the same conversation (enforced by
/// `Conversation`, not by `Message` itself).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Option<String>,
    pub tool_calls: Option<Vec<ToolCall>>,
    pub tool_call_id: Option<String>,
    pub name: Option<String>,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
            name: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
            name: None,
        }
    }

    pub fn assistant_text(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
            name: None,
        }
    }

    pub fn assistant_tool_calls(tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: Role::Assistant,
            content: None,
            tool_calls: Some(tool_calls),
            tool_call_id: None,
            name: None,
        }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: Some(text.into()),
            tool_calls: None,
            tool_call_id: Some(tool_call_id.into()),
            name: None,
        }
    }

    /// Builds a synthetic summary message: role=assistant, `name` carries
    /// the compressor's session-unique marker.
    pub fn summary(marker: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
            name: Some(marker.into()),
        }
    }

    pub fn is_summary_with_marker_prefix(&self, prefix: &str) -> bool {
        matches!(&self.name, Some(n) if n.starts_with(prefix))
    }
}

/// Ordered sequence of Messages, head-anchored by exactly one `system`
/// message. Append-only except for the compressor's splice-replace.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Conversation {
    messages: Vec<Message>,
}

impl Conversation {
    /// Creates a conversation with its required head system message.
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self {
            messages: vec![Message::system(system_prompt)],
        }
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn messages_mut(&mut self) -> &mut Vec<Message> {
        &mut self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Resets to just the original system message — `/clear`'s contract.
    pub fn clear_keep_system(&mut self) {
        if let Some(system) = self.messages.first().cloned() {
            self.messages = vec![system];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_conversation_is_head_anchored_by_a_single_system_message() {
        let conv = Conversation::new("be helpful");
        assert_eq!(conv.len(), 1);
        assert_eq!(conv.messages()[0].role, Role::System);
        assert_eq!(conv.messages()[0].content.as_deref(), Some("be helpful"));
    }

    #[test]
    fn clear_keep_system_drops_everything_but_the_head() {
        let mut conv = Conversation::new("be helpful");
        conv.push(Message::user("hi"));
        conv.push(Message::assistant_text("hello"));
        assert_eq!(conv.len(), 3);

        conv.clear_keep_system();

        assert_eq!(conv.len(), 1);
        assert_eq!(conv.messages()[0].role, Role::System);
    }

    #[test]
    fn tool_result_feedback_text_distinguishes_success_from_failure() {
        assert_eq!(ToolResult::ok("42").as_feedback_text(), "42");
        assert_eq!(ToolResult::err("boom").as_feedback_text(), "Error: boom");
    }

    #[test]
    fn tool_message_carries_the_call_id_it_answers() {
        let msg = Message::tool_result("call-1", "ok");
        assert_eq!(msg.role, Role::Tool);
        assert_eq!(msg.tool_call_id.as_deref(), Some("call-1"));
    }

    #[test]
    fn summary_message_is_identified_by_its_marker_prefix() {
        let marker = "context_summary_abc123";
        let msg = Message::summary(marker, "condensed history");
        assert!(msg.is_summary_with_marker_prefix("context_summary_"));

        let ordinary = Message::assistant_text("not a summary");
        assert!(!ordinary.is_summary_with_marker_prefix("context_summary_"));
    }
}
