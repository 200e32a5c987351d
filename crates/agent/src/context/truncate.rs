//! Tool result truncation.
//!
//! A single tool result may use at most 30% of the context window (counted
//! as 4 chars per token), capped at a hard maximum. Oversized results are
//! cut at a line boundary when one is close to the cut, then marked with a
//! suffix telling the model the view is partial.

use tracing::debug;

pub const DEFAULT_CONTEXT_WINDOW_TOKENS: u32 = 128_000;
pub const MAX_TOOL_RESULT_CONTEXT_SHARE: f64 = 0.3;
pub const HARD_MAX_TOOL_RESULT_CHARS: usize = 400_000;
pub const MIN_KEEP_CHARS: usize = 2_000;

pub const TRUNCATION_SUFFIX: &str = "\n\n⚠️ [Content truncated — original was too large for the model's context window. \
The content above is a partial view. If you need more, request specific sections or use \
offset/limit parameters to read smaller chunks.]";

/// Maximum characters a single tool result may keep for a given window.
/// A window of 0 means the default 128k.
pub fn max_tool_result_chars(window_tokens: u32) -> usize {
    let window = if window_tokens == 0 {
        DEFAULT_CONTEXT_WINDOW_TOKENS
    } else {
        window_tokens
    };
    let max_tokens = (f64::from(window) * MAX_TOOL_RESULT_CONTEXT_SHARE).floor() as usize;
    (max_tokens * 4).min(HARD_MAX_TOOL_RESULT_CHARS)
}

/// Truncate `text` to roughly `max_chars`, appending [`TRUNCATION_SUFFIX`].
///
/// At least [`MIN_KEEP_CHARS`] are kept even when that exceeds `max_chars`.
/// Text that cannot shrink while keeping that much plus the suffix is
/// returned as-is, so a truncated result is always shorter than its input.
pub fn truncate_tool_result(text: &str, max_chars: usize) -> String {
    if text.len() <= max_chars || text.len() <= MIN_KEEP_CHARS + TRUNCATION_SUFFIX.len() {
        return text.to_string();
    }

    let keep = max_chars
        .saturating_sub(TRUNCATION_SUFFIX.len())
        .max(MIN_KEEP_CHARS);
    let keep = floor_char_boundary(text, keep);

    let cut = match text[..keep].rfind('\n') {
        Some(newline) if newline > keep * 80 / 100 => newline,
        _ => keep,
    };

    debug!(original = text.len(), kept = cut, "Truncated tool result");
    let mut out = String::with_capacity(cut + TRUNCATION_SUFFIX.len());
    out.push_str(&text[..cut]);
    out.push_str(TRUNCATION_SUFFIX);
    out
}

/// Largest index `<= index` that lies on a char boundary of `text`.
fn floor_char_boundary(text: &str, index: usize) -> usize {
    let mut i = index.min(text.len());
    while !text.is_char_boundary(i) {
        i -= 1;
    }
    i
}
