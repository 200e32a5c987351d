//! Conversation compaction.
//!
//! When a prompt outgrows the context window (minus a reserve), the older
//! part of the conversation is summarized by the model and replaced with a
//! single system message. The leading system messages and the most recent
//! turns are always kept verbatim. Compaction never fails the caller: if the
//! summarizer errors, the original messages are returned.

use pincer_core::message::{Message, Role};
use pincer_core::provider::Provider;
use tracing::{info, warn};

use super::token::estimate_tokens;
use super::truncate::DEFAULT_CONTEXT_WINDOW_TOKENS;

pub const RESERVE_TOKENS: usize = 8_000;
pub const MIN_MESSAGES_TO_COMPACT: usize = 15;
pub const RECENT_MESSAGES_TO_KEEP: usize = 12;

/// Transcript sent to the summarizer is capped at this many bytes.
pub const MAX_TRANSCRIPT_CHARS: usize = 50_000;

pub const SUMMARY_SYSTEM_PROMPT: &str = "You are a summarizer. Summarize the following \
conversation concisely. Preserve: key facts, decisions, TODOs, open questions, and constraints. \
Output only the summary, no preamble.";

const TRANSCRIPT_TRUNCATED_MARKER: &str = "\n\n[... truncated for summarization ...]";
const EMPTY_SUMMARY: &str = "No prior history.";

/// Summarize older turns if `messages` no longer fits the window.
///
/// Returns the input unchanged when it fits, when there is too little
/// conversation to be worth summarizing, or when the summarizer fails.
pub async fn compact_if_needed(
    messages: Vec<Message>,
    window_tokens: u32,
    summarizer: &dyn Provider,
    model: &str,
) -> Vec<Message> {
    let window = if window_tokens == 0 {
        DEFAULT_CONTEXT_WINDOW_TOKENS
    } else {
        window_tokens
    } as usize;
    let threshold = window.saturating_sub(RESERVE_TOKENS);

    let estimated = estimate_tokens(&messages);
    if estimated <= threshold || messages.len() < MIN_MESSAGES_TO_COMPACT {
        return messages;
    }

    let system_end = messages
        .iter()
        .position(|m| m.role != Role::System)
        .unwrap_or(messages.len());
    let conversation_len = messages.len() - system_end;
    if conversation_len < MIN_MESSAGES_TO_COMPACT {
        return messages;
    }

    let keep = RECENT_MESSAGES_TO_KEEP.min(conversation_len);
    if keep < 2 {
        return messages;
    }
    let recent_start = messages.len() - keep;
    let to_summarize = &messages[system_end..recent_start];
    if to_summarize.len() < 4 {
        return messages;
    }

    let transcript = render_transcript(to_summarize);
    let request = [
        Message::system(SUMMARY_SYSTEM_PROMPT),
        Message::user(transcript),
    ];

    let summary = match summarizer.chat(&request, &[], model).await {
        Ok(response) => {
            let text = response.content.trim();
            if text.is_empty() {
                EMPTY_SUMMARY.to_string()
            } else {
                text.to_string()
            }
        }
        Err(e) => {
            warn!(error = %e, "Compaction summarization failed, keeping full history");
            return messages;
        }
    };

    let summarized = to_summarize.len();
    let before = messages.len();
    let mut compacted = Vec::with_capacity(system_end + 1 + keep);
    let mut iter = messages.into_iter();
    compacted.extend(iter.by_ref().take(system_end));
    compacted.push(Message::system(format!(
        "Previous conversation summary:\n\n{summary}"
    )));
    compacted.extend(iter.skip(summarized));

    info!(
        estimated_tokens = estimated,
        threshold,
        messages_before = before,
        messages_after = compacted.len(),
        "Conversation compacted"
    );
    compacted
}

/// `"<role>: <text>"` per message with text, blank-line separated, capped
/// at [`MAX_TRANSCRIPT_CHARS`].
fn render_transcript(messages: &[Message]) -> String {
    let mut out = String::new();
    for m in messages {
        let text = m.text();
        if text.is_empty() {
            continue;
        }
        out.push_str(m.role.as_str());
        out.push_str(": ");
        out.push_str(text);
        out.push_str("\n\n");
    }
    let trimmed_len = out.trim_end().len();
    out.truncate(trimmed_len);

    if out.len() > MAX_TRANSCRIPT_CHARS {
        let mut cut = MAX_TRANSCRIPT_CHARS;
        while !out.is_char_boundary(cut) {
            cut -= 1;
        }
        out.truncate(cut);
        out.push_str(TRANSCRIPT_TRUNCATED_MARKER);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use pincer_core::error::ProviderError;
    use pincer_core::provider::{LlmResponse, ToolDefinition};
    use std::sync::Mutex;

    /// Records the summarization request and answers with a fixed summary.
    struct Summarizer {
        reply: Result<String, ProviderError>,
        seen: Mutex<Vec<Vec<Message>>>,
    }

    impl Summarizer {
        fn replying(text: &str) -> Self {
            Self {
                reply: Ok(text.to_string()),
                seen: Mutex::new(Vec::new()),
            }
        }

        fn failing() -> Self {
            Self {
                reply: Err(ProviderError::Network("connection refused".into())),
                seen: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> usize {
            self.seen.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Provider for Summarizer {
        fn name(&self) -> &str {
            "summarizer"
        }

        fn default_model(&self) -> &str {
            "sum-1"
        }

        async fn chat(
            &self,
            messages: &[Message],
            _tools: &[ToolDefinition],
            _model: &str,
        ) -> Result<LlmResponse, ProviderError> {
            self.seen.lock().unwrap().push(messages.to_vec());
            self.reply.clone().map(LlmResponse::text)
        }
    }

    /// Two system messages followed by `n` alternating user/assistant turns of `len` chars.
    fn conversation(n: usize, len: usize) -> Vec<Message> {
        let mut msgs = vec![Message::system("persona"), Message::system("policy")];
        for i in 0..n {
            let body = format!("{i}:{}", "w".repeat(len));
            msgs.push(if i % 2 == 0 {
                Message::user(body)
            } else {
                Message::assistant(body)
            });
        }
        msgs
    }

    #[tokio::test]
    async fn under_threshold_is_noop() {
        let provider = Summarizer::replying("unused");
        let msgs = conversation(30, 10);
        let out = compact_if_needed(msgs.clone(), 128_000, &provider, "m").await;
        assert_eq!(out, msgs);
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn few_messages_is_noop_even_when_oversized() {
        let provider = Summarizer::replying("unused");
        let msgs: Vec<Message> = (0..10).map(|_| Message::user("y".repeat(4000))).collect();
        let out = compact_if_needed(msgs.clone(), 100, &provider, "m").await;
        assert_eq!(out, msgs);
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn compacts_older_turns() {
        let provider = Summarizer::replying("  user likes tea  ");
        // 20 turns of ~4000 chars each ≈ 20k tokens, over a 16k window minus reserve
        let msgs = conversation(20, 4000);
        let recent: Vec<Message> = msgs[msgs.len() - RECENT_MESSAGES_TO_KEEP..].to_vec();

        let out = compact_if_needed(msgs, 16_000, &provider, "m").await;

        assert_eq!(out.len(), 2 + 1 + RECENT_MESSAGES_TO_KEEP);
        assert_eq!(out[0].text(), "persona");
        assert_eq!(out[1].text(), "policy");
        assert_eq!(out[2].role, Role::System);
        assert_eq!(out[2].text(), "Previous conversation summary:\n\nuser likes tea");
        assert_eq!(&out[3..], &recent[..]);

        let seen = provider.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0][0].text(), SUMMARY_SYSTEM_PROMPT);
        let transcript = seen[0][1].text();
        assert!(transcript.starts_with("user: 0:"));
        assert!(transcript.contains("assistant: 1:"));
        assert!(!transcript.contains("8:"), "recent turns must not be summarized");
    }

    #[tokio::test]
    async fn summarizer_failure_keeps_original() {
        let provider = Summarizer::failing();
        let msgs = conversation(20, 4000);
        let out = compact_if_needed(msgs.clone(), 16_000, &provider, "m").await;
        assert_eq!(out, msgs);
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn blank_summary_uses_placeholder() {
        let provider = Summarizer::replying("   ");
        let out = compact_if_needed(conversation(20, 4000), 16_000, &provider, "m").await;
        assert_eq!(out[2].text(), "Previous conversation summary:\n\nNo prior history.");
    }

    #[tokio::test]
    async fn mostly_system_messages_is_noop() {
        let provider = Summarizer::replying("unused");
        let mut msgs: Vec<Message> = (0..20).map(|_| Message::system("s".repeat(4000))).collect();
        msgs.extend((0..5).map(|_| Message::user("u".repeat(4000))));
        let out = compact_if_needed(msgs.clone(), 16_000, &provider, "m").await;
        assert_eq!(out, msgs);
        assert_eq!(provider.calls(), 0);
    }

    #[test]
    fn transcript_is_capped() {
        let msgs: Vec<Message> = (0..30).map(|_| Message::user("z".repeat(5000))).collect();
        let transcript = render_transcript(&msgs);
        assert!(transcript.ends_with(TRANSCRIPT_TRUNCATED_MARKER));
        assert_eq!(
            transcript.len(),
            MAX_TRANSCRIPT_CHARS + TRANSCRIPT_TRUNCATED_MARKER.len()
        );
    }

    #[test]
    fn transcript_skips_empty_messages() {
        let msgs = vec![
            Message::user("hi"),
            Message::assistant_with_tool_calls("", vec![]),
            Message::tool_result("c1", "result"),
        ];
        assert_eq!(render_transcript(&msgs), "user: hi\n\ntool: result");
    }
}
