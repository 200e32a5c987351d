//! Memory items and the ranking interface.
//!
//! The memory subsystem produces immutable [`MemoryItem`]s; the context
//! builder asks a [`MemoryRanker`] for the few most relevant to the current
//! message. How ranking works is the ranker's business.

use serde::{Deserialize, Serialize};

/// Short-term (today's notes) or long-term memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryKind {
    #[serde(rename = "short")]
    ShortTerm,
    #[serde(rename = "long")]
    LongTerm,
}

impl MemoryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ShortTerm => "short",
            Self::LongTerm => "long",
        }
    }
}

impl std::fmt::Display for MemoryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single remembered fact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryItem {
    pub kind: MemoryKind,
    pub text: String,
}

impl MemoryItem {
    pub fn new(kind: MemoryKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
        }
    }

    pub fn short(text: impl Into<String>) -> Self {
        Self::new(MemoryKind::ShortTerm, text)
    }

    pub fn long(text: impl Into<String>) -> Self {
        Self::new(MemoryKind::LongTerm, text)
    }
}

/// Selects the memories most relevant to a query.
pub trait MemoryRanker: Send + Sync {
    /// Return at most `top_k` items from `items`, most relevant first.
    fn rank(&self, query: &str, items: &[MemoryItem], top_k: usize) -> Vec<MemoryItem>;
}
