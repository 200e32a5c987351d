//! Memory implementations for Pincer.
//!
//! - [`FileMemoryStore`]: markdown long-term memory and daily notes in the workspace
//! - [`SimpleRanker`]: keyword-overlap implementation of `MemoryRanker`

pub mod file_store;
pub mod ranker;

pub use file_store::{FileMemoryStore, MemoryTarget};
pub use ranker::SimpleRanker;
