//! Incomplete-action detection.
//!
//! Models sometimes answer "Let me check that for you." and stop, without
//! calling a tool. [`suggests_incomplete_action`] flags such answers so the
//! loop can nudge the model into acting.
//!
//! This is a textual heuristic. It will miss promises phrased in other ways
//! and will occasionally flag a finished answer; keep it conservative.
//!
//! An answer is flagged when, after trimming:
//!
//! - it ends with a colon (an announced step that never came), or
//! - any sentence starts with a promise phrase from [`PROMISE_PREFIXES`],
//!   optionally after a filler word from [`FILLER_WORDS`], and the sentence
//!   is not one of the courtesy phrases in [`COURTESY_PREFIXES`].
//!
//! Empty text and plain completion language ("Done.", "Here is the summary.")
//! are never flagged.

/// Sentence openings that promise an action.
pub const PROMISE_PREFIXES: &[&str] = &[
    "let me ",
    "i'll ",
    "i will ",
    "i'm going to ",
    "i am going to ",
    "i'm about to ",
    "i am about to ",
    "i need to ",
    "i'm now going to ",
    "now i'll ",
    "now i will ",
    "next i'll ",
    "next, i'll ",
    "first, i'll ",
    "first i'll ",
];

/// Openings that look like promises but are conversational courtesy.
pub const COURTESY_PREFIXES: &[&str] = &[
    "let me know",
    "i'll be here",
    "i will be here",
    "i'll be happy",
    "i will be happy",
    "i'll keep that in mind",
];

/// Words that may precede a promise phrase ("Sure, let me …").
pub const FILLER_WORDS: &[&str] = &["ok", "okay", "sure", "alright", "great", "got it", "right"];

/// Whether a final answer promises an action it did not take.
pub fn suggests_incomplete_action(text: &str) -> bool {
    let text = text.trim();
    if text.is_empty() {
        return false;
    }
    if text.ends_with(':') {
        return true;
    }

    let normalized = text.to_lowercase().replace('\u{2019}', "'");
    normalized
        .split(['.', '!', '?', '\n'])
        .map(|s| strip_filler(s.trim()))
        .any(is_promise)
}

fn strip_filler(sentence: &str) -> &str {
    for filler in FILLER_WORDS {
        if let Some(rest) = sentence.strip_prefix(filler) {
            if let Some(rest) = rest.strip_prefix(',').or_else(|| rest.strip_prefix(' ')) {
                return rest.trim_start();
            }
        }
    }
    sentence
}

fn is_promise(sentence: &str) -> bool {
    // Sentences are compared with a trailing space so "let me" alone still matches.
    let padded = format!("{sentence} ");
    PROMISE_PREFIXES.iter().any(|p| padded.starts_with(p))
        && !COURTESY_PREFIXES.iter().any(|c| sentence.starts_with(c))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_promises() {
        for text in [
            "Let me check the weather for you.",
            "I'll look that up now.",
            "I will search the docs and report back.",
            "I'm going to fetch the page.",
            "Sure, let me do that.",
            "Okay! I’ll write that to memory.",
            "Good question. Let me find out.",
            "Here is my plan:",
        ] {
            assert!(suggests_incomplete_action(text), "should flag: {text}");
        }
    }

    #[test]
    fn ignores_completed_answers() {
        for text in [
            "",
            "   ",
            "Done.",
            "The forecast for Oslo is 12°C and cloudy.",
            "I saved that to your long-term memory.",
            "Here is the summary you asked for.",
            "Let me know if you need anything else.",
            "4",
        ] {
            assert!(!suggests_incomplete_action(text), "should not flag: {text}");
        }
    }

    #[test]
    fn promise_later_in_answer() {
        assert!(suggests_incomplete_action(
            "I found three results.\nNext, I'll compare them."
        ));
    }

    #[test]
    fn filler_needs_separator() {
        // "okayish" is not the filler "okay"
        assert!(!suggests_incomplete_action("Okayish, that works."));
    }
}
