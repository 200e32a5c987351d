//! Token estimation.
//!
//! Uses a character-based heuristic: ~4 characters per token, plus a fixed
//! charge for every tool call to cover ids and argument schema that do not
//! show up in the message text.

use pincer_core::message::Message;

pub const CHARS_PER_TOKEN: usize = 4;

/// Tokens charged per tool call on a message.
pub const TOOL_CALL_OVERHEAD_TOKENS: usize = 100;

/// Estimate the token cost of a single message.
pub fn estimate_message_tokens(message: &Message) -> usize {
    message.text().len() / CHARS_PER_TOKEN + TOOL_CALL_OVERHEAD_TOKENS * message.tool_calls.len()
}

/// Estimate the token cost of a message list.
pub fn estimate_tokens(messages: &[Message]) -> usize {
    messages.iter().map(estimate_message_tokens).sum()
}
