//! Keyword-overlap ranker.
//!
//! Scores each memory by how many distinct query words it contains. Cheap,
//! deterministic, and good enough to pick a handful of notes for a prompt.

use pincer_core::memory::{MemoryItem, MemoryRanker};
use std::collections::HashSet;

/// Words shorter than this are ignored when scoring.
const MIN_WORD_LEN: usize = 2;

#[derive(Debug, Clone, Copy, Default)]
pub struct SimpleRanker;

impl SimpleRanker {
    pub fn new() -> Self {
        Self
    }
}

fn words(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() >= MIN_WORD_LEN)
        .map(|w| w.to_lowercase())
        .collect()
}

impl MemoryRanker for SimpleRanker {
    /// Items sharing no word with the query are dropped, unless nothing
    /// matches at all; then the first `top_k` items are returned in their
    /// original order so recent notes still reach the prompt.
    fn rank(&self, query: &str, items: &[MemoryItem], top_k: usize) -> Vec<MemoryItem> {
        if top_k == 0 || items.is_empty() {
            return Vec::new();
        }

        let query_words = words(query);
        let mut scored: Vec<(usize, &MemoryItem)> = items
            .iter()
            .map(|item| {
                let overlap = words(&item.text).intersection(&query_words).count();
                (overlap, item)
            })
            .filter(|(score, _)| *score > 0)
            .collect();

        if scored.is_empty() {
            return items.iter().take(top_k).cloned().collect();
        }

        // Stable: ties keep input order
        scored.sort_by(|a, b| b.0.cmp(&a.0));
        scored
            .into_iter()
            .take(top_k)
            .map(|(_, item)| item.clone())
            .collect()
    }
}
