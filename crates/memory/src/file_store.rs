//! File-based memory: human-editable markdown notes in the workspace.
//!
//! Storage layout under `<workspace>/memory/`:
//!
//! - `MEMORY.md`: long-term facts, kept across days
//! - `<YYYY-MM-DD>.md`: today's short-term notes
//!
//! The store renders both files into the pre-formatted memory context blob
//! that the context builder injects, and splits them into [`MemoryItem`]s
//! (one per non-empty line) for ranking.

use chrono::Local;
use pincer_core::error::MemoryError;
use pincer_core::memory::{MemoryItem, MemoryKind};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::debug;

pub const LONG_TERM_FILE: &str = "MEMORY.md";

/// Which memory file a write goes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryTarget {
    /// Today's notes
    Today,
    /// Long-term memory
    Long,
}

impl std::str::FromStr for MemoryTarget {
    type Err = MemoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "today" => Ok(Self::Today),
            "long" => Ok(Self::Long),
            other => Err(MemoryError::InvalidTarget(other.to_string())),
        }
    }
}

/// Markdown memory files rooted in a workspace.
pub struct FileMemoryStore {
    dir: PathBuf,
    /// Serializes read-modify-write cycles across concurrent sessions.
    write_lock: Mutex<()>,
}

impl FileMemoryStore {
    /// Create a store for `<workspace>/memory/`. Nothing is created until the first write.
    pub fn new(workspace: impl AsRef<Path>) -> Self {
        Self {
            dir: workspace.as_ref().join("memory"),
            write_lock: Mutex::new(()),
        }
    }

    pub fn long_term_path(&self) -> PathBuf {
        self.dir.join(LONG_TERM_FILE)
    }

    pub fn today_path(&self) -> PathBuf {
        self.dir.join(format!("{}.md", today()))
    }

    fn path_for(&self, target: MemoryTarget) -> PathBuf {
        match target {
            MemoryTarget::Today => self.today_path(),
            MemoryTarget::Long => self.long_term_path(),
        }
    }

    /// Write `content` to a memory file, appending a line or replacing the file.
    pub async fn write(
        &self,
        target: MemoryTarget,
        content: &str,
        append: bool,
    ) -> Result<PathBuf, MemoryError> {
        let _guard = self.write_lock.lock().await;
        let path = self.path_for(target);

        tokio::fs::create_dir_all(&self.dir).await.map_err(|e| {
            MemoryError::Storage(format!("Failed to create memory directory: {e}"))
        })?;

        let body = if append {
            let mut existing = read_or_empty(&path).await;
            if !existing.is_empty() && !existing.ends_with('\n') {
                existing.push('\n');
            }
            existing.push_str(content.trim_end());
            existing.push('\n');
            existing
        } else {
            format!("{}\n", content.trim_end())
        };

        tokio::fs::write(&path, body)
            .await
            .map_err(|e| MemoryError::Storage(format!("Failed to write memory file: {e}")))?;

        debug!(path = %path.display(), ?target, append, "Memory written");
        Ok(path)
    }

    pub async fn read_long_term(&self) -> String {
        read_or_empty(&self.long_term_path()).await
    }

    pub async fn read_today(&self) -> String {
        read_or_empty(&self.today_path()).await
    }

    /// Render long-term memory and today's notes as one context blob.
    /// Empty when neither file has content.
    pub async fn read_context(&self) -> String {
        let long = self.read_long_term().await;
        let today_notes = self.read_today().await;
        let mut sections = Vec::new();

        if !long.trim().is_empty() {
            sections.push(format!("## Long-term memory\n\n{}", long.trim()));
        }
        if !today_notes.trim().is_empty() {
            sections.push(format!(
                "## Today's notes ({})\n\n{}",
                today(),
                today_notes.trim()
            ));
        }
        sections.join("\n\n")
    }

    /// Every non-empty line of both files as a memory item; list bullets are stripped.
    pub async fn items(&self) -> Vec<MemoryItem> {
        let mut items = lines_as_items(&self.read_long_term().await, MemoryKind::LongTerm);
        items.extend(lines_as_items(&self.read_today().await, MemoryKind::ShortTerm));
        items
    }
}

fn today() -> String {
    Local::now().format("%Y-%m-%d").to_string()
}

async fn read_or_empty(path: &Path) -> String {
    tokio::fs::read_to_string(path).await.unwrap_or_default()
}

fn lines_as_items(text: &str, kind: MemoryKind) -> Vec<MemoryItem> {
    text.lines()
        .map(|l| l.trim())
        .map(|l| l.strip_prefix("- ").or_else(|| l.strip_prefix("* ")).unwrap_or(l))
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(|l| MemoryItem::new(kind, l))
        .collect()
}
