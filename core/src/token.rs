//! Cheap upper-bound token estimation (C1).
//!
//! Contract: monotonic under concatenation, not exact. Used by the Turn
//! Controller to decide when the Compressor should fire.

use crate::message::Message;

const AVERAGE_CHARS_PER_TOKEN: usize = 4;
const MESSAGE_OVERHEAD_TOKENS: u32 = 4;

/// Estimates tokens for a block of text.
pub fn estimate_text(text: &str) -> u32 {
    if text.is_empty() {
        return 0;
    }
    let len = text.chars().count();
    (((len + AVERAGE_CHARS_PER_TOKEN - 1) / AVERAGE_CHARS_PER_TOKEN).max(1)) as u32
}

/// Estimates tokens consumed by a single message.
pub fn estimate_message(message: &Message) -> u32 {
    let mut total = MESSAGE_OVERHEAD_TOKENS;
    if let Some(content) = &message.content {
        total += estimate_text(content);
    }
    if let Some(tool_calls) = &message.tool_calls {
        for call in tool_calls {
            total += estimate_text(&call.name) + estimate_text(&call.arguments_json);
        }
    }
    if message.tool_call_id.is_some() {
        total += 2;
    }
    if message.name.is_some() {
        total += 1;
    }
    total
}

/// Estimates total tokens for a sequence of messages.
pub fn estimate_messages(messages: &[Message]) -> u32 {
    messages.iter().map(estimate_message).sum()
}
