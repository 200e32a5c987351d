//! Workspace documents: the bootstrap files that shape the agent's persona.
//!
//! Well-known files live at the workspace root:
//!
//! 1. `SOUL.md`: personality, tone, style
//! 2. `AGENTS.md`: standing instructions
//! 3. `USER.md`: user-specific context
//! 4. `TOOLS.md`: notes on available tools
//!
//! Each file is optional. A missing or unreadable file is "not found",
//! which callers skip silently.

use std::path::PathBuf;
use tracing::debug;

pub const SOUL_FILE: &str = "SOUL.md";
pub const AGENTS_FILE: &str = "AGENTS.md";
pub const USER_FILE: &str = "USER.md";
pub const TOOLS_FILE: &str = "TOOLS.md";

/// Bootstrap documents in the order they are injected into the prompt.
pub const BOOTSTRAP_FILES: [&str; 4] = [SOUL_FILE, AGENTS_FILE, USER_FILE, TOOLS_FILE];

/// Reads named documents from a workspace.
pub trait DocumentReader: Send + Sync {
    /// Return the document's content, or `None` when it does not exist.
    fn read_document(&self, name: &str) -> Option<String>;
}

/// A workspace rooted at a directory on the local filesystem.
#[derive(Debug, Clone)]
pub struct FsWorkspace {
    root: PathBuf,
}

impl FsWorkspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl DocumentReader for FsWorkspace {
    fn read_document(&self, name: &str) -> Option<String> {
        let path = self.root.join(name);
        match std::fs::read_to_string(&path) {
            Ok(content) => Some(content),
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Workspace document not loaded");
                None
            }
        }
    }
}
